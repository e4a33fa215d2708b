//! Schema module - Instrument patches, gene layout and configuration types.

mod config;
mod genes;
mod instrument;

pub use config::*;
pub use genes::*;
pub use instrument::*;
