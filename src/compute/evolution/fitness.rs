//! Fitness evaluation against a reference sound.
//!
//! A candidate is rendered with the same length, rate and note as the
//! reference, both are reduced to spectral feature frames, and the mean
//! per-frame squared distance is mapped to a score in `(0, 1]`.

use std::sync::Arc;

use crate::compute::{FeatureExtractor, FeatureFrame, SynthError, Synthesizer};
use crate::schema::{ConfigError, EvaluationConfig, Instrument, validate_note};

/// Evaluation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Synth(#[from] SynthError),
    #[error("Reference has {reference} feature frames, candidate has {test}")]
    FrameCountMismatch { reference: usize, test: usize },
}

/// Scores instruments by spectral similarity to a reference signal.
pub struct FitnessEvaluator {
    synthesizer: Arc<dyn Synthesizer>,
    extractor: Arc<dyn FeatureExtractor>,
    reference_signal: Vec<f32>,
    sample_rate: f64,
    target_note: u8,
    reference_features: Vec<FeatureFrame>,
}

impl FitnessEvaluator {
    /// Create an evaluator with a one-sample silent reference.
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        extractor: Arc<dyn FeatureExtractor>,
        config: &EvaluationConfig,
    ) -> Self {
        let mut evaluator = Self {
            synthesizer,
            extractor,
            reference_signal: vec![0.0; 1],
            sample_rate: config.sample_rate(),
            target_note: config.target_note,
            reference_features: Vec::new(),
        };
        evaluator.update_reference_features();
        evaluator
    }

    fn update_reference_features(&mut self) {
        self.reference_features = self.extractor.extract(&self.reference_signal, self.sample_rate);
    }

    pub fn reference_signal(&self) -> &[f32] {
        &self.reference_signal
    }

    /// Replace the reference sound. Features are recomputed.
    pub fn set_reference_signal(&mut self, signal: Vec<f32>) {
        self.reference_signal = signal;
        self.update_reference_features();
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Change the rate used for rendering and analysis.
    ///
    /// Unsupported rates are rejected and leave the evaluator unchanged.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<(), ConfigError> {
        self.synthesizer.check_sample_rate(sample_rate)?;
        if sample_rate == self.sample_rate {
            return Ok(());
        }
        self.sample_rate = sample_rate;
        self.update_reference_features();
        Ok(())
    }

    pub fn target_note(&self) -> u8 {
        self.target_note
    }

    pub fn set_target_note(&mut self, note: u8) -> Result<(), ConfigError> {
        validate_note(i32::from(note))?;
        self.target_note = note;
        Ok(())
    }

    pub fn reference_features(&self) -> &[FeatureFrame] {
        &self.reference_features
    }

    /// Render `num_frames` samples at the current rate and note.
    pub fn synthesize(
        &self,
        instrument: &Instrument,
        num_frames: usize,
    ) -> Result<Vec<f32>, EvaluationError> {
        Ok(self
            .synthesizer
            .synthesize(instrument, num_frames, self.sample_rate, self.target_note)?)
    }

    /// Render an instrument with the reference length, rate and note.
    pub fn render(&self, instrument: &Instrument) -> Result<Vec<f32>, EvaluationError> {
        self.synthesize(instrument, self.reference_signal.len())
    }

    /// Mean over frames of the summed squared coefficient differences.
    pub fn error(&self, instrument: &Instrument) -> Result<f64, EvaluationError> {
        let signal = self.render(instrument)?;
        let features = self.extractor.extract(&signal, self.sample_rate);
        if features.len() != self.reference_features.len() {
            return Err(EvaluationError::FrameCountMismatch {
                reference: self.reference_features.len(),
                test: features.len(),
            });
        }
        if features.is_empty() {
            return Ok(0.0);
        }

        let total: f64 = features
            .iter()
            .zip(&self.reference_features)
            .map(|(test, reference)| {
                test.iter()
                    .zip(reference)
                    .map(|(t, r)| {
                        let d = f64::from(t - r);
                        d * d
                    })
                    .sum::<f64>()
            })
            .sum();
        Ok(total / features.len() as f64)
    }

    /// Score in `(0, 1]`, 1.0 for a perfect match.
    pub fn evaluate(&self, instrument: &Instrument) -> Result<f64, EvaluationError> {
        Ok(score_from_error(self.error(instrument)?))
    }
}

/// Map a non-negative error to `min(1, 1/error)`, 1.0 at zero.
pub fn score_from_error(error: f64) -> f64 {
    if error > 0.0 { (1.0 / error).min(1.0) } else { 1.0 }
}
