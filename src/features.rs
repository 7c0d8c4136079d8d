//! The feature-extraction seam between the integral image and the
//! classifiers.
//!
//! The boosting and cascade code never enumerates features itself; it only
//! requires a deterministic producer of fixed-length vectors. [`HaarExtractor`]
//! is the stock implementation: Haar-like rectangle contrasts evaluated as
//! integral-image sum differences.

use crate::error::{Error, Result};
use crate::image::ImageAccess;
use crate::integral::IntegralImage;

/// Produces the feature vector for a detection window.
///
/// Implementations must be deterministic (same window, same vector) and
/// return `feature_count()` values on every call; one cascade is only ever
/// paired with one extractor configuration.
pub trait FeatureExtractor: Sync {
    /// Side length of the square detection window.
    fn window_size(&self) -> u32;

    /// Fixed length of every extracted vector.
    fn feature_count(&self) -> usize;

    /// Extract features for the window whose top-left corner sits at
    /// (x, y) in the integral image.
    fn extract(&self, integral: &IntegralImage, x: u32, y: u32) -> Vec<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HaarKind {
    /// Left half minus right half.
    EdgeHorizontal,
    /// Top half minus bottom half.
    EdgeVertical,
    /// Outer thirds minus twice the middle third.
    LineHorizontal,
    /// Diagonal quadrants minus anti-diagonal quadrants.
    Checker,
}

#[derive(Debug, Clone, Copy)]
struct HaarFeature {
    kind: HaarKind,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl HaarFeature {
    fn value(&self, ii: &IntegralImage, ox: u32, oy: u32) -> f64 {
        let x = ox + self.x;
        let y = oy + self.y;
        let (w, h) = (self.width, self.height);

        match self.kind {
            HaarKind::EdgeHorizontal => {
                let half = w / 2;
                ii.rect_sum(x, y, x + half, y + h) - ii.rect_sum(x + half, y, x + w, y + h)
            }
            HaarKind::EdgeVertical => {
                let half = h / 2;
                ii.rect_sum(x, y, x + w, y + half) - ii.rect_sum(x, y + half, x + w, y + h)
            }
            HaarKind::LineHorizontal => {
                let third = w / 3;
                ii.rect_sum(x, y, x + third, y + h)
                    + ii.rect_sum(x + 2 * third, y, x + w, y + h)
                    - 2.0 * ii.rect_sum(x + third, y, x + 2 * third, y + h)
            }
            HaarKind::Checker => {
                let half_w = w / 2;
                let half_h = h / 2;
                ii.rect_sum(x, y, x + half_w, y + half_h)
                    + ii.rect_sum(x + half_w, y + half_h, x + w, y + h)
                    - ii.rect_sum(x + half_w, y, x + w, y + half_h)
                    - ii.rect_sum(x, y + half_h, x + half_w, y + h)
            }
        }
    }
}

/// Haar-like rectangle features enumerated on a fixed grid inside the
/// window: sizes in steps of 4 pixels, positions in steps of 2. The
/// enumeration order is part of a trained model's contract; it never
/// changes for a given window size.
pub struct HaarExtractor {
    window: u32,
    features: Vec<HaarFeature>,
}

const SIZE_STEP: u32 = 4;
const POSITION_STEP: u32 = 2;

impl HaarExtractor {
    pub fn new(window: u32) -> Result<Self> {
        if window < SIZE_STEP {
            return Err(Error::InvalidConfig(format!(
                "window size {window} is too small to host any feature"
            )));
        }

        let kinds = [
            HaarKind::EdgeHorizontal,
            HaarKind::EdgeVertical,
            HaarKind::LineHorizontal,
            HaarKind::Checker,
        ];

        let mut features = Vec::new();
        for kind in kinds {
            let mut height = SIZE_STEP;
            while height <= window {
                let mut width = SIZE_STEP;
                while width <= window {
                    if kind != HaarKind::LineHorizontal || width % 3 == 0 {
                        let mut y = 0;
                        while y + height <= window {
                            let mut x = 0;
                            while x + width <= window {
                                features.push(HaarFeature {
                                    kind,
                                    x,
                                    y,
                                    width,
                                    height,
                                });
                                x += POSITION_STEP;
                            }
                            y += POSITION_STEP;
                        }
                    }
                    width += SIZE_STEP;
                }
                height += SIZE_STEP;
            }
        }

        Ok(Self { window, features })
    }

    /// Feature vector of a whole image that is itself one window, e.g. a
    /// training crop. The image must match the window size exactly.
    pub fn extract_image<I: ImageAccess>(&self, image: &I) -> Result<Vec<f64>> {
        if image.width() != self.window || image.height() != self.window {
            return Err(Error::InvalidConfig(format!(
                "expected a {0}x{0} window, got {1}x{2}",
                self.window,
                image.width(),
                image.height()
            )));
        }
        let integral = IntegralImage::compute(image);
        Ok(self.extract(&integral, 0, 0))
    }
}

impl FeatureExtractor for HaarExtractor {
    fn window_size(&self) -> u32 {
        self.window
    }

    fn feature_count(&self) -> usize {
        self.features.len()
    }

    fn extract(&self, integral: &IntegralImage, x: u32, y: u32) -> Vec<f64> {
        self.features
            .iter()
            .map(|f| f.value(integral, x, y))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::GrayImage;

    #[test]
    fn horizontal_edge_contrast() {
        // Left half 10, right half 20.
        let img = GrayImage::from_fn(8, 8, |x, _| if x < 4 { 10 } else { 20 });
        let ii = IntegralImage::compute(&img);
        let feature = HaarFeature {
            kind: HaarKind::EdgeHorizontal,
            x: 0,
            y: 0,
            width: 8,
            height: 8,
        };
        // 4*8*10 - 4*8*20
        assert!((feature.value(&ii, 0, 0) - (-320.0)).abs() < 1e-9);
    }

    #[test]
    fn vertical_edge_contrast() {
        let img = GrayImage::from_fn(8, 8, |_, y| if y < 4 { 30 } else { 10 });
        let ii = IntegralImage::compute(&img);
        let feature = HaarFeature {
            kind: HaarKind::EdgeVertical,
            x: 0,
            y: 0,
            width: 8,
            height: 8,
        };
        assert!((feature.value(&ii, 0, 0) - 640.0).abs() < 1e-9);
    }

    #[test]
    fn checker_contrast_on_quadrants() {
        // Diagonal quadrants bright, anti-diagonal dark.
        let img = GrayImage::from_fn(8, 8, |x, y| {
            if (x < 4) == (y < 4) {
                100
            } else {
                0
            }
        });
        let ii = IntegralImage::compute(&img);
        let feature = HaarFeature {
            kind: HaarKind::Checker,
            x: 0,
            y: 0,
            width: 8,
            height: 8,
        };
        assert!((feature.value(&ii, 0, 0) - 3200.0).abs() < 1e-9);
    }

    #[test]
    fn uniform_image_yields_zero_contrast() {
        let extractor = HaarExtractor::new(12).unwrap();
        let img = GrayImage::from_fn(12, 12, |_, _| 77);
        let features = extractor.extract_image(&img).unwrap();
        assert_eq!(features.len(), extractor.feature_count());
        assert!(features.iter().all(|&v| v.abs() < 1e-9));
    }

    #[test]
    fn enumeration_is_deterministic() {
        let a = HaarExtractor::new(24).unwrap();
        let b = HaarExtractor::new(24).unwrap();
        assert_eq!(a.feature_count(), b.feature_count());

        let img = GrayImage::from_fn(24, 24, |x, y| ((x * 7 + y * 13) % 256) as u8);
        let ii = IntegralImage::compute(&img);
        assert_eq!(a.extract(&ii, 0, 0), b.extract(&ii, 0, 0));
    }

    #[test]
    fn offset_extraction_matches_cropped_window() {
        let img = GrayImage::from_fn(32, 32, |x, y| ((x * 3 + y * 5) % 256) as u8);
        let ii = IntegralImage::compute(&img);
        let extractor = HaarExtractor::new(12).unwrap();

        let at_offset = extractor.extract(&ii, 9, 7);

        let crop = GrayImage::from_fn(12, 12, |x, y| {
            img.get_pixel((x + 9) as i32, (y + 7) as i32)
        });
        let cropped = extractor.extract_image(&crop).unwrap();

        for (a, b) in at_offset.iter().zip(&cropped) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn wrong_window_dimensions_are_rejected() {
        let extractor = HaarExtractor::new(24).unwrap();
        let img = GrayImage::from_fn(20, 24, |_, _| 0);
        assert!(matches!(
            extractor.extract_image(&img),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn tiny_window_is_rejected() {
        assert!(matches!(
            HaarExtractor::new(2),
            Err(Error::InvalidConfig(_))
        ));
    }
}
