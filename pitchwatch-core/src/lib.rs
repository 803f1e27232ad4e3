// pitchwatch-core/src/lib.rs

//! The core logic for the pitch monitor.
//! This crate is responsible for audio capture, pitch estimation,
//! note mapping and publishing results to a shared state. It is
//! completely headless and contains no display code.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod fft;
pub mod gate;
pub mod note;
pub mod pitch;
pub mod state;

pub use config::{CorrelationStrategy, EngineConfig, EstimatorConfig, MappingConfig};
pub use engine::{Accepted, BlockProcessor, DetectionEngine};
pub use error::{Error, Result};
pub use note::{NoteLabel, NoteMapper, NoteReading};
pub use pitch::PitchEstimator;
pub use state::EngineState;
