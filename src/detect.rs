//! Multi-scale sliding-window detection and overlap-based merging.

use log::debug;
use rayon::prelude::*;

use crate::cascade::Cascade;
use crate::error::{Error, Result};
use crate::features::FeatureExtractor;
use crate::image::{GrayImage, ImageAccess};
use crate::integral::IntegralImage;
use crate::types::{CancelToken, Detection};

/// Detection-time policy.
#[derive(Debug, Clone, Copy)]
pub struct DetectParams {
    /// Number of pyramid iterations; the loop also stops as soon as the
    /// working image can no longer hold one window.
    pub scales: usize,
    /// Downscale ratio between pyramid iterations, in (0, 1).
    pub scale_factor: f64,
    /// Minimum intersection-over-union for two raw boxes to be grouped.
    pub overlap_threshold: f64,
    /// Groups smaller than this are discarded as noise.
    pub min_neighbors: usize,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scales: 12,
            scale_factor: 0.75,
            overlap_threshold: 0.5,
            min_neighbors: 3,
        }
    }
}

/// Slides a trained cascade's window across an image pyramid and merges
/// the raw hits into object-level boxes.
///
/// Window classification is stateless over a read-only integral image and
/// cascade, so each pyramid level is scanned in parallel; per-worker hit
/// lists are concatenated afterward.
pub struct Detector<E: FeatureExtractor> {
    cascade: Cascade,
    extractor: E,
    params: DetectParams,
}

impl<E: FeatureExtractor> Detector<E> {
    pub fn new(cascade: Cascade, extractor: E, params: DetectParams) -> Result<Self> {
        if extractor.window_size() != cascade.window_size() {
            return Err(Error::InvalidConfig(format!(
                "extractor window {} does not match cascade window {}",
                extractor.window_size(),
                cascade.window_size()
            )));
        }
        if params.scales == 0 {
            return Err(Error::InvalidConfig(
                "detection needs at least one scale".into(),
            ));
        }
        if !(params.scale_factor > 0.0 && params.scale_factor < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "scale factor must lie in (0, 1), got {}",
                params.scale_factor
            )));
        }
        if !(params.overlap_threshold > 0.0 && params.overlap_threshold < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "overlap threshold must lie in (0, 1), got {}",
                params.overlap_threshold
            )));
        }
        if params.min_neighbors == 0 {
            return Err(Error::InvalidConfig(
                "min_neighbors must be at least 1".into(),
            ));
        }

        Ok(Self {
            cascade,
            extractor,
            params,
        })
    }

    pub fn cascade(&self) -> &Cascade {
        &self.cascade
    }

    pub fn params(&self) -> &DetectParams {
        &self.params
    }

    /// Detect objects in `image`, returning merged boxes in original-image
    /// coordinates.
    pub fn detect(&self, image: &GrayImage) -> Result<Vec<Detection>> {
        self.detect_with_cancel(image, &CancelToken::new())
    }

    /// Like [`detect`](Self::detect), but checks `cancel` between pyramid
    /// iterations and aborts with [`Error::Cancelled`].
    pub fn detect_with_cancel(
        &self,
        image: &GrayImage,
        cancel: &CancelToken,
    ) -> Result<Vec<Detection>> {
        let window = self.cascade.window_size();
        if image.width() < window || image.height() < window {
            return Err(Error::InvalidConfig(format!(
                "{}x{} image cannot hold a {window}px detection window",
                image.width(),
                image.height()
            )));
        }

        let mut raw = Vec::new();
        let mut working = image.clone();
        let mut scale = 1.0;

        for iteration in 0..self.params.scales {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if working.width() < window || working.height() < window {
                debug!(
                    "pyramid exhausted at iteration {iteration}: {}x{} < {window}px window",
                    working.width(),
                    working.height()
                );
                break;
            }

            let integral = IntegralImage::compute(&working);
            let hits = self.scan_level(&integral, scale);
            debug!(
                "scale iteration {iteration}: {}x{}, {} raw hits",
                working.width(),
                working.height(),
                hits.len()
            );
            raw.extend(hits);

            if iteration + 1 < self.params.scales {
                working = working.scaled(self.params.scale_factor);
                scale *= self.params.scale_factor;
            }
        }

        Ok(merge_detections(
            &raw,
            self.params.overlap_threshold,
            self.params.min_neighbors,
        ))
    }

    /// Classify every window position of one pyramid level. `scale` is the
    /// level's cumulative downscale factor, used to map hits back to
    /// original coordinates.
    fn scan_level(&self, integral: &IntegralImage, scale: f64) -> Vec<Detection> {
        let window = self.cascade.window_size();
        let max_x = integral.width() - window;
        let max_y = integral.height() - window;

        (0..=max_y)
            .into_par_iter()
            .flat_map_iter(|y| {
                (0..=max_x).filter_map(move |x| {
                    let features = self.extractor.extract(integral, x, y);
                    if self.cascade.classify(&features) > 0 {
                        Some(Detection::from_window(x, y, window, scale))
                    } else {
                        None
                    }
                })
            })
            .collect()
    }
}

/// Collapse raw per-window hits into object-level boxes.
///
/// Boxes are grouped transitively by pairwise intersection-over-union above
/// `overlap_threshold`; groups with fewer than `min_neighbors` members are
/// dropped as noise, and each surviving group becomes its coordinate-wise
/// average box. Output order follows the first raw hit of each group.
pub fn merge_detections(
    detections: &[Detection],
    overlap_threshold: f64,
    min_neighbors: usize,
) -> Vec<Detection> {
    if detections.is_empty() {
        return Vec::new();
    }

    let mut parent: Vec<usize> = (0..detections.len()).collect();

    fn find(parent: &mut [usize], i: usize) -> usize {
        let mut root = i;
        while parent[root] != root {
            root = parent[root];
        }
        let mut i = i;
        while parent[i] != root {
            let next = parent[i];
            parent[i] = root;
            i = next;
        }
        root
    }

    for i in 0..detections.len() {
        for j in (i + 1)..detections.len() {
            if detections[i].overlap_ratio(&detections[j]) > overlap_threshold {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    parent[rj.max(ri)] = rj.min(ri);
                }
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); detections.len()];
    for i in 0..detections.len() {
        let root = find(&mut parent, i);
        groups[root].push(i);
    }

    let min_neighbors = min_neighbors.max(1);
    let mut merged = Vec::new();
    for group in groups.iter().filter(|g| g.len() >= min_neighbors) {
        let n = group.len() as f64;
        let (mut x, mut y, mut w, mut h) = (0.0, 0.0, 0.0, 0.0);
        for &i in group {
            let d = &detections[i];
            x += f64::from(d.x);
            y += f64::from(d.y);
            w += f64::from(d.width);
            h += f64::from(d.height);
        }
        merged.push(Detection::new(
            (x / n).round() as i32,
            (y / n).round() as i32,
            (w / n).round() as u32,
            (h / n).round() as u32,
        ));
    }
    merged
}
