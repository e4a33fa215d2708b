//! Evolutionary search for FM instrument patches.
//!
//! This module provides a genetic algorithm that searches the gene space of
//! an [`Instrument`](crate::schema::Instrument) for a patch whose sound
//! matches a reference recording.
//!
//! # Overview
//!
//! The evolutionary search system consists of:
//!
//! - **Genome Operations** (`genome`): Random generation, recombination, and mutation
//! - **Population** (`population`): Fixed-capacity slots with evaluation state
//! - **Fitness** (`fitness`): Spectral distance to the reference sound
//! - **Generation Operators** (`search`): Evaluation, selection, recombination, mutation
//! - **Engine** (`engine`): Worker thread with pause, stop and callbacks
//!
//! # Example
//!
//! ```rust,no_run
//! use fm_evolve::schema::{EngineConfig, GeneSchema, Instrument, ReferenceSource};
//! use fm_evolve::compute::evolution::EvolutionEngine;
//!
//! let mut engine = EvolutionEngine::new(EngineConfig::default(), GeneSchema::opn2())?;
//! engine.load_reference(&ReferenceSource::Instrument {
//!     instrument: Instrument::electric_piano(),
//!     duration: 0.5,
//! })?;
//! engine.set_generation_callback(|generation, fittest| {
//!     println!("Generation {}: algorithm {}", generation, fittest.instrument.algorithm);
//! });
//! engine.start()?;
//! std::thread::sleep(std::time::Duration::from_secs(10));
//! engine.stop();
//! # Ok::<(), fm_evolve::compute::evolution::EngineError>(())
//! ```
//!
//! # Generation
//!
//! Each generation evaluates unevaluated slots in parallel, divides every
//! score by the population mean, keeps slots at or above the mean (with
//! extra copies for the fittest), refills the remaining slots with children
//! of the survivors and mutates. If nothing survives the population is
//! replaced with random individuals.

mod engine;
mod fitness;
mod genome;
mod population;
mod search;
mod signal;

pub use engine::{EngineError, EngineState, EvolutionEngine};
pub use fitness::{EvaluationError, FitnessEvaluator, score_from_error};
pub use genome::{GenomeRng, Individual};
pub use population::{NoCapacity, Population, SlotStatus};
pub use search::{
    Callbacks, EvolutionError, FitnessCallback, GenerationCallback, GenerationContext,
    GenerationOutcome, evaluate_population, fittest_index, mutate_population,
    recombine_population, relative_fitness, select, step_generation,
};
pub use signal::ControlSignal;
