//! # cascade-face
//!
//! Pure Rust face detection with boosted classifier cascades.
//!
//! This crate provides:
//! - **Boosting**: AdaBoost over single-feature decision stumps
//! - **Cascades**: chains of boosted classifiers with early rejection
//! - **Detection**: multi-scale sliding-window search with overlap merging
//!
//! Implements the classic boosted-cascade detector in the style of
//! "Rapid Object Detection using a Boosted Cascade of Simple Features"
//! (Viola & Jones, 2001).
//!
//! ## Algorithm Overview
//!
//! 1. Training images become fixed-length feature vectors (Haar-like
//!    rectangle contrasts over an integral image by default)
//! 2. Each boosting round picks the decision stump minimizing the weighted
//!    classification error, then reweights the samples toward its mistakes
//! 3. Boosted ensembles are chained into a cascade; every stage filters the
//!    negative pool down to its false positives before the next one trains
//! 4. Detection slides the cascade's window over an image pyramid and
//!    merges overlapping hits into object-level boxes
//!
//! ## Quick Start
//!
//! ```rust
//! use cascade_face::{Cascade, StrongClassifier, WeakClassifier};
//!
//! // Load a trained cascade
//! // let cascade = Cascade::load("cascade.bin").unwrap();
//!
//! // Or assemble one by hand for experimentation
//! let stump = WeakClassifier {
//!     feature_index: 0,
//!     threshold: 12.0,
//!     polarity: 1,
//!     alpha: 1.0,
//! };
//! let stage = StrongClassifier::from_members(vec![stump]);
//! let cascade = Cascade::new(vec![stage], 24).unwrap();
//!
//! // A window is accepted only if every stage accepts its features
//! assert_eq!(cascade.classify(&[20.0]), 1);
//! assert_eq!(cascade.classify(&[3.0]), -1);
//! ```
//!
//! ## Detection
//!
//! ```ignore
//! use cascade_face::{Cascade, DetectParams, Detector, GrayImage, HaarExtractor};
//!
//! let cascade = Cascade::load("cascade.bin")?;
//! let extractor = HaarExtractor::new(cascade.window_size())?;
//! let detector = Detector::new(cascade, extractor, DetectParams::default())?;
//!
//! let image = GrayImage::from_fn(640, 480, |x, y| ((x + y) % 256) as u8);
//! for face in detector.detect(&image)? {
//!     println!("face at ({}, {}) size {}x{}", face.x, face.y, face.width, face.height);
//! }
//! ```
//!
//! ## Custom Features
//!
//! The classifiers only ever see feature vectors. Implement the
//! [`FeatureExtractor`] trait to plug in your own window features; the
//! only requirements are determinism and a fixed vector length per
//! cascade.

mod cascade;
mod detect;
mod error;
mod features;
mod image;
mod integral;
mod strong;
mod types;
mod weak;

pub use cascade::{Cascade, CascadeTrainer, NegativeSource, TrainObserver, TrainParams};
pub use detect::{merge_detections, DetectParams, Detector};
pub use error::{Error, Result};
pub use features::{FeatureExtractor, HaarExtractor};
pub use image::{GrayImage, ImageAccess};
pub use integral::IntegralImage;
pub use strong::StrongClassifier;
pub use types::{CancelToken, Detection, Sample};
pub use weak::WeakClassifier;
