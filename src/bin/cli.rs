//! CLI for training and running boosted-cascade face detectors.
//!
//! Usage:
//!   cascade-face train <positives> <backgrounds> -o cascade.bin
//!   cascade-face detect <image> --model cascade.bin          # human-readable
//!   cascade-face detect <image> --json -o result.json        # JSON output
//!   cascade-face detect <image> --draw annotated.png         # boxes on image

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use image::imageops::FilterType;
use image::GenericImageView;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use cascade_face::{
    Cascade, CascadeTrainer, DetectParams, Detection, Detector, FeatureExtractor, GrayImage,
    HaarExtractor, ImageAccess, NegativeSource, Sample, TrainObserver, TrainParams,
};

#[derive(Parser, Debug)]
#[command(name = "cascade-face")]
#[command(author, version, about = "Boosted-cascade face detection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a cascade from labeled images
    Train(TrainArgs),
    /// Detect faces in an image with a trained cascade
    Detect(DetectArgs),
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// Directory of positive (face) images, one window per image
    positives: PathBuf,

    /// Directory of background images to sample negative windows from
    backgrounds: PathBuf,

    /// Output path for the trained cascade
    #[arg(short, long, default_value = "cascade.bin")]
    output: PathBuf,

    /// Detection window side length in pixels
    #[arg(long, default_value_t = 24)]
    window: u32,

    /// Number of cascade stages
    #[arg(long, default_value_t = 8)]
    stages: usize,

    /// Boosting-round budget per stage
    #[arg(long, default_value_t = 32)]
    rounds: usize,

    /// Minimum per-stage detection rate
    #[arg(long, default_value_t = 0.95)]
    min_detection_rate: f64,

    /// Maximum per-stage false-positive rate
    #[arg(long, default_value_t = 0.5)]
    max_false_positive_rate: f64,

    /// Initial number of negative windows to sample
    #[arg(long, default_value_t = 1000)]
    negatives: usize,

    /// Replenish the negative pool when fewer than this many remain
    #[arg(long, default_value_t = 400)]
    min_negatives: usize,

    /// Seed for negative-window sampling
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(clap::Args, Debug)]
struct DetectArgs {
    /// Input image file
    image: PathBuf,

    /// Trained cascade file
    #[arg(short, long, default_value = "cascade.bin")]
    model: PathBuf,

    /// Output as JSON
    #[arg(short, long)]
    json: bool,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write a copy of the image with detection boxes to this path
    #[arg(long)]
    draw: Option<PathBuf>,

    /// Number of pyramid iterations
    #[arg(long, default_value_t = 12)]
    scales: usize,

    /// Downscale ratio between pyramid iterations
    #[arg(long, default_value_t = 0.75)]
    scale_factor: f64,

    /// Minimum overlap ratio for merging detections
    #[arg(long, default_value_t = 0.5)]
    overlap: f64,

    /// Minimum group size for a merged detection to survive
    #[arg(long, default_value_t = 3)]
    min_neighbors: usize,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Train(args) => run_train(&args),
        Command::Detect(args) => run_detect(&args),
    }
}

fn run_train(args: &TrainArgs) -> Result<(), Box<dyn std::error::Error>> {
    let extractor = HaarExtractor::new(args.window)?;
    info!(
        "enumerated {} features for a {}px window",
        extractor.feature_count(),
        args.window
    );

    let mut positives = Vec::new();
    for path in image_paths(&args.positives)? {
        let luma = image::open(&path)?.to_luma8();
        let luma = if luma.dimensions() == (args.window, args.window) {
            luma
        } else {
            image::imageops::resize(&luma, args.window, args.window, FilterType::Triangle)
        };
        positives.push(Sample::positive(extractor.extract_image(&to_gray(luma))?));
    }
    if positives.is_empty() {
        return Err(format!("no positive images found in {}", args.positives.display()).into());
    }
    info!("loaded {} positive samples", positives.len());

    let mut backgrounds = Vec::new();
    for path in image_paths(&args.backgrounds)? {
        let gray = to_gray(image::open(&path)?.to_luma8());
        if gray.width() >= args.window && gray.height() >= args.window {
            backgrounds.push(gray);
        } else {
            warn!(
                "skipping {}: smaller than the detection window",
                path.display()
            );
        }
    }
    if backgrounds.is_empty() {
        return Err(format!(
            "no usable background images found in {}",
            args.backgrounds.display()
        )
        .into());
    }

    let mut source = RandomCrops {
        backgrounds,
        extractor: &extractor,
        rng: StdRng::seed_from_u64(args.seed),
    };
    let negatives: Vec<Sample> = source
        .replenish(args.negatives)
        .into_iter()
        .map(Sample::negative)
        .collect();
    info!("sampled {} negative windows", negatives.len());

    let params = TrainParams {
        stages: args.stages,
        max_rounds_per_stage: args.rounds,
        min_detection_rate: args.min_detection_rate,
        max_false_positive_rate: args.max_false_positive_rate,
        min_negatives: args.min_negatives,
    };
    let mut observer = LogObserver;
    let cascade = CascadeTrainer::new(args.window, params)
        .observer(&mut observer)
        .negative_source(&mut source)
        .train(positives, negatives)?;

    cascade.save(&args.output)?;
    info!(
        "saved {}-stage cascade to {}",
        cascade.stages().len(),
        args.output.display()
    );
    Ok(())
}

fn run_detect(args: &DetectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cascade = Cascade::load(&args.model)?;
    info!(
        "loaded {}-stage cascade with a {}px window",
        cascade.stages().len(),
        cascade.window_size()
    );

    let extractor = HaarExtractor::new(cascade.window_size())?;
    let params = DetectParams {
        scales: args.scales,
        scale_factor: args.scale_factor,
        overlap_threshold: args.overlap,
        min_neighbors: args.min_neighbors,
    };
    let detector = Detector::new(cascade, extractor, params)?;

    let dynamic = image::open(&args.image)?;
    let (width, height) = dynamic.dimensions();
    let detections = detector.detect(&to_gray(dynamic.to_luma8()))?;
    info!("found {} face(s)", detections.len());

    let output = Output {
        image: args.image.display().to_string(),
        width,
        height,
        faces_detected: detections.len(),
        faces: detections.clone(),
    };
    let output_str = if args.json {
        serde_json::to_string_pretty(&output)?
    } else {
        format_human_readable(&output)
    };

    if let Some(ref path) = args.output {
        fs::write(path, &output_str)?;
        info!("output written to {}", path.display());
    } else {
        println!("{output_str}");
    }

    if let Some(ref path) = args.draw {
        let mut canvas = dynamic.to_rgb8();
        for d in &detections {
            draw_box(&mut canvas, d);
        }
        canvas.save(path)?;
        info!("annotated image written to {}", path.display());
    }

    Ok(())
}

/// Samples random window crops from background images and turns them into
/// feature vectors; also serves as the trainer's replenishment source for
/// hard-negative bootstrapping.
struct RandomCrops<'a> {
    backgrounds: Vec<GrayImage>,
    extractor: &'a HaarExtractor,
    rng: StdRng,
}

impl NegativeSource for RandomCrops<'_> {
    fn replenish(&mut self, needed: usize) -> Vec<Vec<f64>> {
        let window = self.extractor.window_size();
        let mut out = Vec::with_capacity(needed);
        for _ in 0..needed {
            let img = &self.backgrounds[self.rng.gen_range(0..self.backgrounds.len())];
            let x = self.rng.gen_range(0..=(img.width() - window));
            let y = self.rng.gen_range(0..=(img.height() - window));
            let crop = GrayImage::from_fn(window, window, |cx, cy| {
                img.get_pixel((x + cx) as i32, (y + cy) as i32)
            });
            if let Ok(features) = self.extractor.extract_image(&crop) {
                out.push(features);
            }
        }
        debug!("sampled {} negative windows", out.len());
        out
    }
}

/// Routes training progress to the log.
struct LogObserver;

impl TrainObserver for LogObserver {
    fn stage_started(&mut self, stage: usize) {
        info!("stage {stage}: training");
    }

    fn round_completed(&mut self, stage: usize, round: usize, weighted_error: f64) {
        debug!("stage {stage} round {round}: weighted error {weighted_error:.4}");
    }

    fn stage_completed(
        &mut self,
        stage: usize,
        detection_rate: f64,
        false_positive_rate: f64,
        hard_negatives: usize,
    ) {
        info!(
            "stage {stage}: detection {detection_rate:.3}, false positive \
             {false_positive_rate:.3}, {hard_negatives} hard negatives remain"
        );
    }
}

/// Output structure for JSON serialization
#[derive(Serialize)]
struct Output {
    image: String,
    width: u32,
    height: u32,
    faces_detected: usize,
    faces: Vec<Detection>,
}

fn format_human_readable(output: &Output) -> String {
    let mut s = String::new();

    s.push_str(&format!(
        "Image: {} ({}x{})\n",
        output.image, output.width, output.height
    ));
    s.push_str(&format!("Faces detected: {}\n", output.faces_detected));

    if output.faces.is_empty() {
        s.push_str("\nNo faces found.\n");
        return s;
    }

    for (i, face) in output.faces.iter().enumerate() {
        s.push_str(&format!(
            "  Face {}: {}x{} at ({}, {})\n",
            i + 1,
            face.width,
            face.height,
            face.x,
            face.y
        ));
    }

    s
}

fn draw_box(canvas: &mut image::RgbImage, d: &Detection) {
    let white = image::Rgb([255u8, 255, 255]);
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return;
    }

    let x0 = d.x.clamp(0, w as i32 - 1) as u32;
    let y0 = d.y.clamp(0, h as i32 - 1) as u32;
    let x1 = (d.x + d.width as i32).clamp(0, w as i32 - 1) as u32;
    let y1 = (d.y + d.height as i32).clamp(0, h as i32 - 1) as u32;

    for x in x0..=x1 {
        canvas.put_pixel(x, y0, white);
        canvas.put_pixel(x, y1, white);
    }
    for y in y0..=y1 {
        canvas.put_pixel(x0, y, white);
        canvas.put_pixel(x1, y, white);
    }
}

/// Image files in `dir`, sorted for reproducible runs.
fn image_paths(dir: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| {
                matches!(
                    e.to_ascii_lowercase().as_str(),
                    "png" | "jpg" | "jpeg" | "bmp" | "pgm"
                )
            });
        if path.is_file() && supported {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn to_gray(luma: image::ImageBuffer<image::Luma<u8>, Vec<u8>>) -> GrayImage {
    let (width, height) = luma.dimensions();
    GrayImage::new(luma.into_raw(), width, height)
}
