//! Single-feature decision stumps and weighted-error stump selection.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Sample;

/// Keeps alpha finite when a stump separates the training set perfectly.
const ERROR_CLAMP: f64 = 1e-10;

/// A decision stump over one feature of the sample vector.
///
/// With polarity +1 a feature value >= threshold predicts +1; polarity -1
/// inverts the rule. `alpha` is the AdaBoost confidence assigned at
/// selection time. Immutable once selected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeakClassifier {
    pub feature_index: usize,
    pub threshold: f64,
    pub polarity: i8,
    pub alpha: f64,
}

impl WeakClassifier {
    /// Classify a feature vector as +1 or -1.
    #[inline]
    pub fn predict(&self, features: &[f64]) -> i8 {
        if features[self.feature_index] >= self.threshold {
            self.polarity
        } else {
            -self.polarity
        }
    }

    /// Find the stump minimizing the weighted classification error over all
    /// feature indices, thresholds and polarities.
    ///
    /// The per-feature threshold sweep runs in parallel across feature
    /// indices. Ties are broken deterministically: lowest error, then lowest
    /// feature index, then lowest threshold, then polarity +1.
    ///
    /// Fails when the sample set is empty, carries no features, or has zero
    /// total weight; a stump with undefined alpha is never produced.
    pub fn select(samples: &[Sample]) -> Result<WeakClassifier> {
        if samples.is_empty() {
            return Err(Error::Training(
                "cannot select a classifier from an empty sample set".into(),
            ));
        }
        let num_features = samples[0].features.len();
        if num_features == 0 {
            return Err(Error::Training("samples carry no features".into()));
        }
        let total_weight: f64 = samples.iter().map(|s| s.weight).sum();
        if total_weight <= 0.0 {
            return Err(Error::Training(
                "all sample weights are zero; reweighting has collapsed".into(),
            ));
        }

        let best = (0..num_features)
            .into_par_iter()
            .map(|index| best_split(samples, index, total_weight))
            .min_by(|a, b| {
                a.error
                    .total_cmp(&b.error)
                    .then_with(|| a.feature_index.cmp(&b.feature_index))
                    .then_with(|| a.threshold.total_cmp(&b.threshold))
            })
            .ok_or_else(|| Error::Training("no candidate split found".into()))?;

        let eps = best.error.clamp(ERROR_CLAMP, 1.0 - ERROR_CLAMP);
        let alpha = 0.5 * ((1.0 - eps) / eps).ln();

        Ok(WeakClassifier {
            feature_index: best.feature_index,
            threshold: best.threshold,
            polarity: best.polarity,
            alpha: alpha.max(0.0),
        })
    }
}

struct Split {
    error: f64,
    feature_index: usize,
    threshold: f64,
    polarity: i8,
}

/// Sweep every useful threshold for one feature and return the best split.
///
/// Candidate thresholds are the distinct sample values: every partition of
/// the samples into `< t` / `>= t` is realized by one of them, including the
/// two constant classifiers at the minimum value.
fn best_split(samples: &[Sample], feature_index: usize, total_weight: f64) -> Split {
    let mut order: Vec<(f64, i8, f64)> = samples
        .iter()
        .map(|s| (s.features[feature_index], s.label, s.weight))
        .collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total_pos: f64 = order.iter().filter(|e| e.1 > 0).map(|e| e.2).sum();
    let total_neg = total_weight - total_pos;

    let mut best = Split {
        error: f64::INFINITY,
        feature_index,
        threshold: 0.0,
        polarity: 1,
    };

    // Weight of positives / negatives strictly below the current threshold.
    let mut pos_below = 0.0;
    let mut neg_below = 0.0;

    let mut i = 0;
    while i < order.len() {
        let threshold = order[i].0;

        // polarity +1 misclassifies positives below and negatives at/above;
        // polarity -1 is the mirror image.
        let err_pos = (pos_below + (total_neg - neg_below)) / total_weight;
        let err_neg = ((total_pos - pos_below) + neg_below) / total_weight;

        // Strict improvement only: the sweep ascends, so the first hit keeps
        // the lowest threshold, and +1 is evaluated before -1 at equal error.
        if err_pos < best.error {
            best.error = err_pos;
            best.threshold = threshold;
            best.polarity = 1;
        }
        if err_neg < best.error {
            best.error = err_neg;
            best.threshold = threshold;
            best.polarity = -1;
        }

        while i < order.len() && order[i].0 == threshold {
            if order[i].1 > 0 {
                pos_below += order[i].2;
            } else {
                neg_below += order[i].2;
            }
            i += 1;
        }
    }

    best
}
