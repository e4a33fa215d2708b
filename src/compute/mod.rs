//! Compute module - Synthesis, feature extraction and evolutionary search.

mod features;
mod music;
mod synth;

pub mod evolution;

pub use features::*;
pub use music::*;
pub use synth::*;
