//! AdaBoost: weighted ensembles of decision stumps.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{init_weights, normalize_weights, Sample};
use crate::weak::WeakClassifier;

/// A weighted ensemble of weak classifiers built by boosting.
///
/// Prediction is the sign of the alpha-weighted vote sum; an exact zero sum
/// counts as a rejection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrongClassifier {
    members: Vec<WeakClassifier>,
    trained: bool,
}

impl StrongClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an ensemble from already-selected stumps, e.g. a deserialized
    /// model or a hand-crafted classifier in tests.
    pub fn from_members(members: Vec<WeakClassifier>) -> Self {
        let trained = !members.is_empty();
        Self { members, trained }
    }

    pub fn members(&self) -> &[WeakClassifier] {
        &self.members
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Run AdaBoost for up to `rounds` rounds over the samples, whose
    /// weights are reset to uniform first. Stops early once the ensemble's
    /// misclassification rate on the training set drops to `target_error`.
    pub fn train(samples: &mut [Sample], rounds: usize, target_error: f64) -> Result<Self> {
        if rounds == 0 {
            return Err(Error::InvalidConfig(
                "boosting needs at least one round".into(),
            ));
        }
        if samples.is_empty() {
            return Err(Error::InvalidConfig("empty training set".into()));
        }

        init_weights(samples);
        let mut ensemble = Self::new();
        for _ in 0..rounds {
            ensemble.boost_round(samples)?;
            if ensemble.error_rate(samples) <= target_error {
                break;
            }
        }
        Ok(ensemble)
    }

    /// One boosting round: select the best stump for the current weights,
    /// append it, then reweight every sample by `exp(-label * alpha *
    /// prediction)` and renormalize. Returns the stump's weighted error.
    ///
    /// Exposed separately so a cascade stage can grow round by round while
    /// its acceptance rates are monitored.
    pub fn boost_round(&mut self, samples: &mut [Sample]) -> Result<f64> {
        let wc = WeakClassifier::select(samples)?;

        let mut weighted_error = 0.0;
        for s in samples.iter_mut() {
            let prediction = wc.predict(&s.features);
            if prediction != s.label {
                weighted_error += s.weight;
            }
            s.weight *= (-f64::from(s.label) * wc.alpha * f64::from(prediction)).exp();
        }
        if !normalize_weights(samples) {
            return Err(Error::Training(
                "sample weights collapsed to zero during reweighting".into(),
            ));
        }

        self.members.push(wc);
        self.trained = true;
        Ok(weighted_error)
    }

    /// Sign of the alpha-weighted vote sum: +1 iff strictly positive.
    pub fn predict(&self, features: &[f64]) -> i8 {
        let sum: f64 = self
            .members
            .iter()
            .map(|wc| wc.alpha * f64::from(wc.predict(features)))
            .sum();
        if sum > 0.0 {
            1
        } else {
            -1
        }
    }

    /// Fraction of samples the ensemble currently misclassifies.
    pub fn error_rate(&self, samples: &[Sample]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let wrong = samples
            .iter()
            .filter(|s| self.predict(&s.features) != s.label)
            .count();
        wrong as f64 / samples.len() as f64
    }
}
