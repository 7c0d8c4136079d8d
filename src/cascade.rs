//! Rejection cascades: ordered chains of strong classifiers with early
//! exit, stage-by-stage training, and model persistence.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::strong::StrongClassifier;
use crate::types::{init_weights, CancelToken, Sample};

/// Bound on consecutive replenishment requests per stage, so an exhausted
/// or unlucky background source cannot stall training forever.
const REPLENISH_ATTEMPTS: usize = 16;

/// An ordered chain of strong classifiers over a fixed detection window.
///
/// A window must be accepted by every stage; the first rejecting stage
/// short-circuits the evaluation. Stages are cheapest-first by
/// construction, which is what makes the cascade fast on background
/// windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cascade {
    stages: Vec<StrongClassifier>,
    window_size: u32,
}

impl Cascade {
    /// Assemble a cascade from trained stages, validating the same
    /// invariants enforced on deserialized models.
    pub fn new(stages: Vec<StrongClassifier>, window_size: u32) -> Result<Self> {
        let cascade = Self {
            stages,
            window_size,
        };
        cascade.validate()?;
        Ok(cascade)
    }

    pub fn stages(&self) -> &[StrongClassifier] {
        &self.stages
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Classify a window's feature vector: -1 at the first rejecting stage,
    /// +1 only when every stage accepts. Stages after the first rejection
    /// are never evaluated.
    pub fn classify(&self, features: &[f64]) -> i8 {
        for stage in &self.stages {
            if stage.predict(features) < 0 {
                return -1;
            }
        }
        1
    }

    /// Load a cascade from a bincode file, refusing anything that does not
    /// decode into a structurally valid model.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let cascade: Self = bincode::deserialize(&bytes)?;
        cascade.validate()?;
        Ok(cascade)
    }

    /// Save the cascade to a bincode file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let bytes = bincode::serialize(self).map_err(Error::Deserialization)?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::InvalidModel("window size is zero".into()));
        }
        if self.stages.is_empty() {
            return Err(Error::InvalidModel("cascade has no stages".into()));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.members().is_empty() {
                return Err(Error::InvalidModel(format!("stage {i} has no members")));
            }
            for wc in stage.members() {
                if !wc.alpha.is_finite() || wc.alpha < 0.0 {
                    return Err(Error::InvalidModel(format!(
                        "stage {i} carries an invalid alpha {}",
                        wc.alpha
                    )));
                }
                if !wc.threshold.is_finite() {
                    return Err(Error::InvalidModel(format!(
                        "stage {i} carries a non-finite threshold"
                    )));
                }
                if wc.polarity != 1 && wc.polarity != -1 {
                    return Err(Error::InvalidModel(format!(
                        "stage {i} carries polarity {}, expected +1 or -1",
                        wc.polarity
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Per-stage training policy. All rates are measured on the stage's own
/// training set; none of these numbers are baked into the algorithm.
#[derive(Debug, Clone, Copy)]
pub struct TrainParams {
    /// Number of cascade stages to build.
    pub stages: usize,
    /// Boosting-round budget per stage.
    pub max_rounds_per_stage: usize,
    /// A stage keeps growing until it accepts at least this fraction of
    /// positives...
    pub min_detection_rate: f64,
    /// ...while accepting at most this fraction of negatives.
    pub max_false_positive_rate: f64,
    /// Replenish the negative pool from the background source when fewer
    /// than this many hard negatives survive a stage.
    pub min_negatives: usize,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            stages: 8,
            max_rounds_per_stage: 32,
            min_detection_rate: 0.95,
            max_false_positive_rate: 0.5,
            min_negatives: 100,
        }
    }
}

/// Receives training progress events. All methods default to no-ops, so
/// implementors override only what they report on; the core itself never
/// prints.
pub trait TrainObserver {
    fn stage_started(&mut self, _stage: usize) {}

    /// A boosting round finished; `weighted_error` is the selected stump's
    /// weighted error on the stage's training set.
    fn round_completed(&mut self, _stage: usize, _round: usize, _weighted_error: f64) {}

    /// A stage was accepted. Rates are measured on the stage's training
    /// set; `hard_negatives` counts the negatives that survived filtering.
    fn stage_completed(
        &mut self,
        _stage: usize,
        _detection_rate: f64,
        _false_positive_rate: f64,
        _hard_negatives: usize,
    ) {
    }
}

/// Supplies fresh negative feature vectors sampled from background imagery
/// once the hard-negative pool runs low. Returning an empty batch signals
/// exhaustion.
pub trait NegativeSource {
    fn replenish(&mut self, needed: usize) -> Vec<Vec<f64>>;
}

/// Builds a [`Cascade`] stage by stage.
///
/// Each stage is boosted one round at a time until it meets the configured
/// detection/false-positive targets or exhausts its round budget. Accepted
/// stages filter the negative pool down to the false positives the cascade
/// so far still lets through, so later stages specialize on harder cases.
pub struct CascadeTrainer<'a> {
    window_size: u32,
    params: TrainParams,
    observer: Option<&'a mut dyn TrainObserver>,
    source: Option<&'a mut dyn NegativeSource>,
    cancel: Option<&'a CancelToken>,
}

impl<'a> CascadeTrainer<'a> {
    pub fn new(window_size: u32, params: TrainParams) -> Self {
        Self {
            window_size,
            params,
            observer: None,
            source: None,
            cancel: None,
        }
    }

    /// Report progress to `observer` during training.
    pub fn observer(mut self, observer: &'a mut dyn TrainObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Pull replacement negatives from `source` when the pool runs low.
    pub fn negative_source(mut self, source: &'a mut dyn NegativeSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Check `token` between boosting rounds and stages; a cancelled token
    /// aborts with [`Error::Cancelled`].
    pub fn cancel_token(mut self, token: &'a CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Train a cascade from positive and negative samples. The sample sets
    /// are consumed; weights are managed internally per stage.
    pub fn train(
        mut self,
        positives: Vec<Sample>,
        mut negatives: Vec<Sample>,
    ) -> Result<Cascade> {
        self.validate_inputs(&positives, &negatives)?;
        let feature_len = positives[0].features.len();

        let mut stages: Vec<StrongClassifier> = Vec::with_capacity(self.params.stages);

        for stage_idx in 0..self.params.stages {
            self.check_cancelled()?;
            if negatives.is_empty() {
                warn!(
                    "negative pool exhausted after {} of {} stages; stopping early",
                    stages.len(),
                    self.params.stages
                );
                break;
            }

            if let Some(obs) = self.observer.as_mut() {
                obs.stage_started(stage_idx);
            }

            let mut working: Vec<Sample> = positives
                .iter()
                .cloned()
                .chain(negatives.iter().cloned())
                .collect();
            init_weights(&mut working);

            let mut stage = StrongClassifier::new();
            let mut targets_met = false;
            for round in 0..self.params.max_rounds_per_stage {
                self.check_cancelled()?;
                let weighted_error = stage.boost_round(&mut working)?;
                if let Some(obs) = self.observer.as_mut() {
                    obs.round_completed(stage_idx, round, weighted_error);
                }

                let (detection_rate, false_positive_rate) = stage_rates(&stage, &working);
                if detection_rate >= self.params.min_detection_rate
                    && false_positive_rate <= self.params.max_false_positive_rate
                {
                    targets_met = true;
                    break;
                }
            }

            let (detection_rate, false_positive_rate) = stage_rates(&stage, &working);
            if !targets_met {
                warn!(
                    "stage {stage_idx}: rate targets not reached within {} rounds \
                     (detection {detection_rate:.3}, false positive {false_positive_rate:.3})",
                    self.params.max_rounds_per_stage
                );
            }
            debug!(
                "stage {stage_idx}: {} rounds, detection {detection_rate:.3}, \
                 false positive {false_positive_rate:.3}",
                stage.members().len()
            );

            stages.push(stage);

            // Hard-negative bootstrapping: keep only the negatives the
            // cascade so far still accepts.
            negatives.retain(|s| accepts(&stages, &s.features));

            if let Some(obs) = self.observer.as_mut() {
                obs.stage_completed(
                    stage_idx,
                    detection_rate,
                    false_positive_rate,
                    negatives.len(),
                );
            }

            if negatives.len() < self.params.min_negatives && stage_idx + 1 < self.params.stages
            {
                self.replenish_negatives(&stages, &mut negatives, feature_len)?;
            }
        }

        Cascade::new(stages, self.window_size)
    }

    fn replenish_negatives(
        &mut self,
        stages: &[StrongClassifier],
        negatives: &mut Vec<Sample>,
        feature_len: usize,
    ) -> Result<()> {
        let Some(source) = self.source.as_mut() else {
            return Ok(());
        };

        let mut attempts = 0;
        while negatives.len() < self.params.min_negatives && attempts < REPLENISH_ATTEMPTS {
            let batch = source.replenish(self.params.min_negatives - negatives.len());
            if batch.is_empty() {
                break;
            }
            for features in batch {
                if features.len() != feature_len {
                    return Err(Error::InvalidConfig(format!(
                        "negative source returned a {}-feature vector, expected {feature_len}",
                        features.len()
                    )));
                }
                // Only windows the cascade so far still accepts are useful
                // to the next stage.
                if accepts(stages, &features) {
                    negatives.push(Sample::negative(features));
                }
            }
            attempts += 1;
        }
        debug!(
            "replenished negative pool to {} samples in {attempts} batches",
            negatives.len()
        );
        Ok(())
    }

    fn validate_inputs(&self, positives: &[Sample], negatives: &[Sample]) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::InvalidConfig("window size must be positive".into()));
        }
        if self.params.stages == 0 {
            return Err(Error::InvalidConfig(
                "cascade needs at least one stage".into(),
            ));
        }
        if self.params.max_rounds_per_stage == 0 {
            return Err(Error::InvalidConfig(
                "stages need at least one boosting round".into(),
            ));
        }
        for (name, rate) in [
            ("min_detection_rate", self.params.min_detection_rate),
            ("max_false_positive_rate", self.params.max_false_positive_rate),
        ] {
            if !(rate > 0.0 && rate <= 1.0) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must lie in (0, 1], got {rate}"
                )));
            }
        }
        if positives.is_empty() || negatives.is_empty() {
            return Err(Error::InvalidConfig(
                "training needs both positive and negative samples".into(),
            ));
        }

        let feature_len = positives[0].features.len();
        if feature_len == 0 {
            return Err(Error::InvalidConfig("samples carry no features".into()));
        }
        if positives
            .iter()
            .chain(negatives)
            .any(|s| s.features.len() != feature_len)
        {
            return Err(Error::InvalidConfig(
                "inconsistent feature vector lengths across samples".into(),
            ));
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// True when every stage accepts the feature vector.
fn accepts(stages: &[StrongClassifier], features: &[f64]) -> bool {
    stages.iter().all(|s| s.predict(features) > 0)
}

/// Detection rate and false-positive rate of one stage over a sample set.
fn stage_rates(stage: &StrongClassifier, samples: &[Sample]) -> (f64, f64) {
    let mut positives = 0usize;
    let mut negatives = 0usize;
    let mut detected = 0usize;
    let mut false_positives = 0usize;

    for s in samples {
        let accepted = stage.predict(&s.features) > 0;
        if s.label > 0 {
            positives += 1;
            if accepted {
                detected += 1;
            }
        } else {
            negatives += 1;
            if accepted {
                false_positives += 1;
            }
        }
    }

    let detection_rate = if positives > 0 {
        detected as f64 / positives as f64
    } else {
        1.0
    };
    let false_positive_rate = if negatives > 0 {
        false_positives as f64 / negatives as f64
    } else {
        0.0
    };
    (detection_rate, false_positive_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weak::WeakClassifier;

    fn accept_all_stage() -> StrongClassifier {
        StrongClassifier::from_members(vec![WeakClassifier {
            feature_index: 0,
            threshold: f64::MIN,
            polarity: 1,
            alpha: 1.0,
        }])
    }

    fn reject_all_stage() -> StrongClassifier {
        StrongClassifier::from_members(vec![WeakClassifier {
            feature_index: 0,
            threshold: f64::MAX,
            polarity: 1,
            alpha: 1.0,
        }])
    }

    #[test]
    fn rejection_short_circuits_later_stages() {
        // Stage 2 indexes feature 5 of a 1-feature vector: evaluating it
        // would panic, so a clean -1 proves it was never consulted.
        let out_of_range = StrongClassifier::from_members(vec![WeakClassifier {
            feature_index: 5,
            threshold: 0.0,
            polarity: 1,
            alpha: 1.0,
        }]);
        let cascade = Cascade::new(vec![reject_all_stage(), out_of_range], 24).unwrap();

        assert_eq!(cascade.classify(&[0.5]), -1);
    }

    #[test]
    fn acceptance_requires_every_stage() {
        let cascade = Cascade::new(vec![accept_all_stage(), accept_all_stage()], 24).unwrap();
        assert_eq!(cascade.classify(&[0.5]), 1);

        let cascade = Cascade::new(vec![accept_all_stage(), reject_all_stage()], 24).unwrap();
        assert_eq!(cascade.classify(&[0.5]), -1);
    }

    #[test]
    fn invalid_cascades_are_rejected() {
        assert!(matches!(
            Cascade::new(Vec::new(), 24),
            Err(Error::InvalidModel(_))
        ));
        assert!(matches!(
            Cascade::new(vec![StrongClassifier::new()], 24),
            Err(Error::InvalidModel(_))
        ));
        assert!(matches!(
            Cascade::new(vec![accept_all_stage()], 0),
            Err(Error::InvalidModel(_))
        ));

        let bad_alpha = StrongClassifier::from_members(vec![WeakClassifier {
            feature_index: 0,
            threshold: 0.0,
            polarity: 1,
            alpha: f64::NAN,
        }]);
        assert!(matches!(
            Cascade::new(vec![bad_alpha], 24),
            Err(Error::InvalidModel(_))
        ));
    }

    #[test]
    fn save_load_round_trip() {
        let cascade = Cascade::new(vec![accept_all_stage(), reject_all_stage()], 24).unwrap();

        let path = std::env::temp_dir().join("cascade_face_round_trip.bin");
        cascade.save(&path).unwrap();
        let loaded = Cascade::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, cascade);
        for features in [[0.0], [1.0], [100.0]] {
            assert_eq!(loaded.classify(&features), cascade.classify(&features));
        }
    }

    #[test]
    fn garbage_bytes_refuse_to_load() {
        let path = std::env::temp_dir().join("cascade_face_garbage.bin");
        std::fs::write(&path, b"not a cascade").unwrap();
        let result = Cascade::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(Error::Deserialization(_))));
    }

    #[test]
    fn structurally_empty_model_refuses_to_load() {
        // A zero-stage cascade encodes fine but must not load.
        let empty = Cascade {
            stages: Vec::new(),
            window_size: 24,
        };
        let path = std::env::temp_dir().join("cascade_face_empty.bin");
        empty.save(&path).unwrap();
        let result = Cascade::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(Error::InvalidModel(_))));
    }

    // Positives cluster high on feature 0 and feature 1; the initial
    // negatives are low on feature 0 only.
    fn training_sets() -> (Vec<Sample>, Vec<Sample>) {
        let positives = vec![
            Sample::positive(vec![5.0, 5.0]),
            Sample::positive(vec![6.0, 6.0]),
            Sample::positive(vec![7.0, 7.0]),
        ];
        let negatives = vec![
            Sample::negative(vec![1.0, 5.0]),
            Sample::negative(vec![2.0, 6.0]),
            Sample::negative(vec![3.0, 7.0]),
        ];
        (positives, negatives)
    }

    /// Backgrounds that the first stage (a split on feature 0) accepts but
    /// that a split on feature 1 rejects: hard negatives by construction.
    struct HardBackgrounds {
        calls: usize,
    }

    impl NegativeSource for HardBackgrounds {
        fn replenish(&mut self, _needed: usize) -> Vec<Vec<f64>> {
            self.calls += 1;
            if self.calls > 1 {
                return Vec::new();
            }
            vec![vec![10.0, 1.0], vec![11.0, 2.0], vec![12.0, 1.5]]
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        stages_started: usize,
        rounds: usize,
        stages_completed: usize,
    }

    impl TrainObserver for CountingObserver {
        fn stage_started(&mut self, _stage: usize) {
            self.stages_started += 1;
        }
        fn round_completed(&mut self, _stage: usize, _round: usize, _weighted_error: f64) {
            self.rounds += 1;
        }
        fn stage_completed(
            &mut self,
            _stage: usize,
            _detection_rate: f64,
            _false_positive_rate: f64,
            _hard_negatives: usize,
        ) {
            self.stages_completed += 1;
        }
    }

    #[test]
    fn trains_two_stages_with_hard_negative_bootstrapping() {
        let (positives, negatives) = training_sets();
        let mut source = HardBackgrounds { calls: 0 };
        let mut observer = CountingObserver::default();

        let params = TrainParams {
            stages: 2,
            max_rounds_per_stage: 4,
            min_detection_rate: 0.9,
            max_false_positive_rate: 0.5,
            min_negatives: 2,
        };
        let cascade = CascadeTrainer::new(24, params)
            .observer(&mut observer)
            .negative_source(&mut source)
            .train(positives, negatives)
            .unwrap();

        // Stage 1 splits on feature 0, wiping out the easy negatives; the
        // replenished hard negatives force stage 2 to cut in the other
        // direction.
        assert_eq!(cascade.stages().len(), 2);
        assert_eq!(source.calls, 1);
        assert_eq!(observer.stages_started, 2);
        assert_eq!(observer.stages_completed, 2);
        assert!(observer.rounds >= 2);

        assert_eq!(cascade.classify(&[6.0, 6.0]), 1);
        assert_eq!(cascade.classify(&[1.0, 6.0]), -1); // easy reject, stage 1
        assert_eq!(cascade.classify(&[10.0, 1.0]), -1); // hard reject, stage 2
    }

    #[test]
    fn stops_early_when_negatives_run_dry() {
        let (positives, negatives) = training_sets();
        let params = TrainParams {
            stages: 4,
            max_rounds_per_stage: 4,
            min_detection_rate: 0.9,
            max_false_positive_rate: 0.5,
            min_negatives: 2,
        };
        // No negative source: the pool empties after the first stage.
        let cascade = CascadeTrainer::new(24, params)
            .train(positives, negatives)
            .unwrap();
        assert_eq!(cascade.stages().len(), 1);
    }

    #[test]
    fn configuration_errors_fail_fast() {
        let (positives, negatives) = training_sets();

        let zero_stages = TrainParams {
            stages: 0,
            ..TrainParams::default()
        };
        assert!(matches!(
            CascadeTrainer::new(24, zero_stages).train(positives.clone(), negatives.clone()),
            Err(Error::InvalidConfig(_))
        ));

        let bad_rate = TrainParams {
            min_detection_rate: 1.5,
            ..TrainParams::default()
        };
        assert!(matches!(
            CascadeTrainer::new(24, bad_rate).train(positives.clone(), negatives.clone()),
            Err(Error::InvalidConfig(_))
        ));

        assert!(matches!(
            CascadeTrainer::new(24, TrainParams::default())
                .train(Vec::new(), negatives.clone()),
            Err(Error::InvalidConfig(_))
        ));

        let mut ragged = positives.clone();
        ragged.push(Sample::positive(vec![1.0, 2.0, 3.0]));
        assert!(matches!(
            CascadeTrainer::new(24, TrainParams::default()).train(ragged, negatives),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn cancellation_aborts_training() {
        let (positives, negatives) = training_sets();
        let token = CancelToken::new();
        token.cancel();

        let result = CascadeTrainer::new(24, TrainParams::default())
            .cancel_token(&token)
            .train(positives, negatives);
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
