//! fm-evolve - Evolutionary search for FM synthesizer instruments.
//!
//! This crate searches the parameter space of a four-operator OPN-family FM
//! voice for an instrument whose sound matches a reference recording. A
//! genetic algorithm runs on a background worker thread; candidates are
//! rendered by a software FM synthesizer and compared to the reference
//! through mel-frequency cepstral features.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Instrument patches, the gene schema and configuration types
//! - `compute`: Synthesis, feature extraction, music helpers and the
//!   evolutionary search (`compute::evolution`)
//!
//! # Example
//!
//! ```rust,no_run
//! use fm_evolve::{
//!     compute::evolution::{EvolutionEngine, GenomeRng},
//!     schema::{EngineConfig, GeneSchema, Instrument},
//! };
//!
//! let engine = EvolutionEngine::new(EngineConfig::default(), GeneSchema::opn2()).unwrap();
//!
//! // Use a known patch as the target sound
//! let reference = {
//!     let state = engine.lock();
//!     let frames = (state.evaluator.sample_rate() * 0.5) as usize;
//!     state.evaluator.synthesize(&Instrument::electric_piano(), frames).unwrap()
//! };
//! engine.set_reference_signal(reference);
//!
//! // Score a random candidate
//! let candidate = GenomeRng::new(7).random_individual(engine.schema());
//! let score = engine.lock().evaluator.evaluate(&candidate.instrument).unwrap();
//! println!("Score: {}", score);
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::evolution::{EngineError, EvolutionEngine, FitnessEvaluator, Individual};
pub use compute::{ChipFamily, FmSynth, MfccExtractor};
pub use schema::{EngineConfig, GeneSchema, Instrument, RunConfig};
