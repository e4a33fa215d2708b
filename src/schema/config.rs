//! Engine and run configuration.

use serde::{Deserialize, Serialize};

use crate::compute::{ChipFamily, SynthError};

use super::instrument::Instrument;

/// Evolution engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Population capacity.
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Per-gene mutation probability (0.0-1.0).
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Random seed for reproducibility. Entropy is used when absent.
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Initial evaluation context.
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Spectral feature parameters.
    #[serde(default)]
    pub features: FeatureConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            mutation_rate: default_mutation_rate(),
            random_seed: None,
            evaluation: EvaluationConfig::default(),
            features: FeatureConfig::default(),
        }
    }
}

fn default_population_size() -> usize {
    100
}
fn default_mutation_rate() -> f64 {
    0.01
}

impl EngineConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population_size == 0 {
            return Err(ConfigError::InvalidPopulationSize);
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(ConfigError::InvalidMutationRate(self.mutation_rate));
        }
        self.evaluation.validate()?;
        self.features.validate()
    }
}

/// Initial reference context of the fitness evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Chip family whose native rate is used until a reference is loaded.
    #[serde(default)]
    pub chip: ChipFamily,
    /// MIDI note played when synthesizing candidates.
    #[serde(default = "default_target_note")]
    pub target_note: u8,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            chip: ChipFamily::default(),
            target_note: default_target_note(),
        }
    }
}

fn default_target_note() -> u8 {
    69
}

impl EvaluationConfig {
    pub fn sample_rate(&self) -> f64 {
        self.chip.sample_rate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_note(i32::from(self.target_note))
    }
}

/// Check that a note lies in the MIDI range.
pub fn validate_note(note: i32) -> Result<(), ConfigError> {
    if (0..=127).contains(&note) {
        Ok(())
    } else {
        Err(ConfigError::InvalidNote(note))
    }
}

/// Short-time spectral analysis parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Analysis window length in seconds.
    #[serde(default = "default_window_duration")]
    pub window_duration: f64,
    /// Distance between frame starts in seconds.
    #[serde(default = "default_hop_duration")]
    pub hop_duration: f64,
    /// Number of mel filters.
    #[serde(default = "default_num_filters")]
    pub num_filters: usize,
    /// Number of cepstral coefficients kept per frame.
    #[serde(default = "default_num_coeffs")]
    pub num_coeffs: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_duration: default_window_duration(),
            hop_duration: default_hop_duration(),
            num_filters: default_num_filters(),
            num_coeffs: default_num_coeffs(),
        }
    }
}

fn default_window_duration() -> f64 {
    0.025
}
fn default_hop_duration() -> f64 {
    0.010
}
fn default_num_filters() -> usize {
    50
}
fn default_num_coeffs() -> usize {
    16
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.window_duration.is_finite() && self.window_duration > 0.0) {
            return Err(ConfigError::InvalidWindow(self.window_duration));
        }
        if !(self.hop_duration.is_finite() && self.hop_duration > 0.0) {
            return Err(ConfigError::InvalidHop(self.hop_duration));
        }
        if self.num_filters == 0 {
            return Err(ConfigError::InvalidFilterCount);
        }
        if self.num_coeffs == 0 || self.num_coeffs > self.num_filters {
            return Err(ConfigError::InvalidCoefficientCount {
                coeffs: self.num_coeffs,
                filters: self.num_filters,
            });
        }
        Ok(())
    }
}

/// Where the target sound comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReferenceSource {
    /// Render a known patch at the chip rate.
    Instrument {
        instrument: Instrument,
        /// Rendered length in seconds.
        #[serde(default = "default_reference_duration")]
        duration: f64,
    },
    /// Raw mono samples, resampled to the chip rate.
    Samples {
        samples: Vec<f32>,
        sample_rate: f64,
        /// Played note. Detected from the samples when absent.
        #[serde(default)]
        target_note: Option<u8>,
    },
}

impl Default for ReferenceSource {
    fn default() -> Self {
        Self::Instrument {
            instrument: Instrument::electric_piano(),
            duration: default_reference_duration(),
        }
    }
}

fn default_reference_duration() -> f64 {
    0.5
}

impl ReferenceSource {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Instrument { duration, .. } => {
                if !(duration.is_finite() && *duration > 0.0) {
                    return Err(ConfigError::InvalidDuration(*duration));
                }
            }
            Self::Samples {
                samples,
                sample_rate,
                target_note,
            } => {
                if samples.is_empty() {
                    return Err(ConfigError::EmptyReference);
                }
                if !(sample_rate.is_finite() && *sample_rate > 0.0) {
                    return Err(ConfigError::InvalidSourceRate(*sample_rate));
                }
                if let Some(note) = target_note {
                    validate_note(i32::from(*note))?;
                }
            }
        }
        Ok(())
    }
}

/// Top-level configuration of a command line run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub reference: ReferenceSource,
    /// Number of generations to run before stopping.
    #[serde(default = "default_generations")]
    pub generations: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            reference: ReferenceSource::default(),
            generations: default_generations(),
        }
    }
}

fn default_generations() -> u64 {
    200
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.reference.validate()?;
        if self.generations == 0 {
            return Err(ConfigError::InvalidGenerations);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Population size must be non-zero")]
    InvalidPopulationSize,
    #[error("Mutation rate {0} must be within [0, 1]")]
    InvalidMutationRate(f64),
    #[error("Note {0} is outside the MIDI range 0-127")]
    InvalidNote(i32),
    #[error("Window duration {0} must be positive")]
    InvalidWindow(f64),
    #[error("Hop duration {0} must be positive")]
    InvalidHop(f64),
    #[error("Filter count must be non-zero")]
    InvalidFilterCount,
    #[error("Coefficient count {coeffs} must be within 1..={filters}")]
    InvalidCoefficientCount { coeffs: usize, filters: usize },
    #[error("Reference duration {0} must be positive")]
    InvalidDuration(f64),
    #[error("Reference signal is empty")]
    EmptyReference,
    #[error("Source sample rate {0} must be positive")]
    InvalidSourceRate(f64),
    #[error("Generation count must be non-zero")]
    InvalidGenerations,
    #[error(transparent)]
    SampleRate(#[from] SynthError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.population_size, 100);
        assert_eq!(config.mutation_rate, 0.01);
        assert_eq!(config.evaluation.target_note, 69);
        assert_eq!(config.features.num_filters, 50);
        assert_eq!(config.features.num_coeffs, 16);
        assert!(config.validate().is_ok());
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_engine_config() {
        let config = EngineConfig {
            population_size: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidPopulationSize));

        let config = EngineConfig {
            mutation_rate: 1.5,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidMutationRate(1.5)));

        let config = EngineConfig {
            evaluation: EvaluationConfig {
                target_note: 200,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidNote(200)));
    }

    #[test]
    fn test_invalid_feature_config() {
        let features = FeatureConfig {
            num_coeffs: 60,
            ..Default::default()
        };
        assert!(matches!(
            features.validate(),
            Err(ConfigError::InvalidCoefficientCount { coeffs: 60, filters: 50 })
        ));

        let features = FeatureConfig {
            hop_duration: 0.0,
            ..Default::default()
        };
        assert_eq!(features.validate(), Err(ConfigError::InvalidHop(0.0)));
    }

    #[test]
    fn test_reference_validation() {
        let reference = ReferenceSource::Samples {
            samples: Vec::new(),
            sample_rate: 44100.0,
            target_note: None,
        };
        assert_eq!(reference.validate(), Err(ConfigError::EmptyReference));

        let reference = ReferenceSource::Samples {
            samples: vec![0.0; 10],
            sample_rate: 44100.0,
            target_note: Some(128),
        };
        assert_eq!(reference.validate(), Err(ConfigError::InvalidNote(128)));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "engine": { "population_size": 20, "random_seed": 7 },
            "reference": { "type": "Samples", "samples": [0.0, 0.5], "sample_rate": 44100.0 }
        }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.engine.population_size, 20);
        assert_eq!(config.engine.random_seed, Some(7));
        assert_eq!(config.engine.mutation_rate, 0.01);
        assert_eq!(config.generations, 200);
        assert!(matches!(
            config.reference,
            ReferenceSource::Samples { target_note: None, .. }
        ));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = RunConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: RunConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
