use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// An axis-aligned detection box in original-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Detection {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Map a window hit found on a downscaled pyramid level back to
    /// original-image coordinates. `scale` is the cumulative downscale
    /// factor of that level (1.0 for the original image).
    pub fn from_window(x: u32, y: u32, window: u32, scale: f64) -> Self {
        Self {
            x: (f64::from(x) / scale).round() as i32,
            y: (f64::from(y) / scale).round() as i32,
            width: (f64::from(window) / scale).round() as u32,
            height: (f64::from(window) / scale).round() as u32,
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Intersection-over-union with another box, in [0, 1].
    pub fn overlap_ratio(&self, other: &Detection) -> f64 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width as i32).min(other.x + other.width as i32);
        let y1 = (self.y + self.height as i32).min(other.y + other.height as i32);

        if x1 <= x0 || y1 <= y0 {
            return 0.0;
        }

        let intersection = (x1 - x0) as f64 * (y1 - y0) as f64;
        let union = self.area() as f64 + other.area() as f64 - intersection;
        intersection / union
    }
}

/// A training sample: a fixed-length feature vector with a ±1 label.
/// The weight is owned by the boosting loop and mutated between rounds;
/// features and label never change after extraction.
#[derive(Debug, Clone)]
pub struct Sample {
    pub features: Vec<f64>,
    pub label: i8,
    pub weight: f64,
}

impl Sample {
    pub fn positive(features: Vec<f64>) -> Self {
        Self {
            features,
            label: 1,
            weight: 0.0,
        }
    }

    pub fn negative(features: Vec<f64>) -> Self {
        Self {
            features,
            label: -1,
            weight: 0.0,
        }
    }
}

/// Reset all sample weights to the uniform distribution 1/N.
pub(crate) fn init_weights(samples: &mut [Sample]) {
    let w = 1.0 / samples.len() as f64;
    for s in samples.iter_mut() {
        s.weight = w;
    }
}

/// Rescale sample weights so they sum to 1. Returns false when the total
/// weight is zero, in which case the weights are left untouched.
pub(crate) fn normalize_weights(samples: &mut [Sample]) -> bool {
    let total: f64 = samples.iter().map(|s| s.weight).sum();
    if total <= 0.0 {
        return false;
    }
    for s in samples.iter_mut() {
        s.weight /= total;
    }
    true
}

/// Cooperative cancellation flag, shared between the caller and a running
/// `train` or `detect`. Checked between boosting rounds and between pyramid
/// scales; partial work is discarded on cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_of_identical_boxes_is_one() {
        let a = Detection::new(10, 10, 20, 20);
        assert!((a.overlap_ratio(&a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn overlap_of_disjoint_boxes_is_zero() {
        let a = Detection::new(0, 0, 10, 10);
        let b = Detection::new(100, 100, 10, 10);
        assert_eq!(a.overlap_ratio(&b), 0.0);
        assert_eq!(b.overlap_ratio(&a), 0.0);
    }

    #[test]
    fn overlap_is_symmetric() {
        let a = Detection::new(10, 10, 20, 20);
        let b = Detection::new(12, 11, 20, 20);
        let ab = a.overlap_ratio(&b);
        let ba = b.overlap_ratio(&a);
        assert!((ab - ba).abs() < 1e-12);

        // intersection 18x19 = 342, union 400 + 400 - 342 = 458
        assert!((ab - 342.0 / 458.0).abs() < 1e-12);
    }

    #[test]
    fn window_maps_back_through_cumulative_scale() {
        // Hit at (5, 5) with a 24px window, two downscales by 0.75:
        // cumulative factor 0.5625, so roughly (8.9, 8.9, 42.7, 42.7).
        let d = Detection::from_window(5, 5, 24, 0.5625);
        assert_eq!(d, Detection::new(9, 9, 43, 43));
    }

    #[test]
    fn window_at_unit_scale_is_identity() {
        let d = Detection::from_window(7, 3, 24, 1.0);
        assert_eq!(d, Detection::new(7, 3, 24, 24));
    }

    #[test]
    fn weight_helpers() {
        let mut samples = vec![
            Sample::positive(vec![1.0]),
            Sample::negative(vec![2.0]),
            Sample::negative(vec![3.0]),
            Sample::positive(vec![4.0]),
        ];
        init_weights(&mut samples);
        for s in &samples {
            assert!((s.weight - 0.25).abs() < 1e-12);
        }

        samples[0].weight = 3.0;
        samples[1].weight = 1.0;
        samples[2].weight = 0.0;
        samples[3].weight = 0.0;
        assert!(normalize_weights(&mut samples));
        assert!((samples[0].weight - 0.75).abs() < 1e-12);
        assert!((samples[1].weight - 0.25).abs() < 1e-12);

        for s in samples.iter_mut() {
            s.weight = 0.0;
        }
        assert!(!normalize_weights(&mut samples));
    }

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
