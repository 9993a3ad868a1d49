#![warn(missing_docs)]
//! rankbench Core - Harness Engine
//!
//! This crate provides the machinery that measures challenger modules:
//! - Calibrated accumulating wall-clock timer
//! - Resident-set memory probe
//! - Dynamic module loader enforcing the three-entry-point contract
//! - Seeded workload generation
//! - The per-challenger benchmark pipeline
//! - Crash-aware scoreboard ranking
//! - The worker-process main loop for isolated execution

mod measure;
mod memory;
mod module;
mod pipeline;
mod scoreboard;
mod workload;
mod worker;

pub use measure::HighResTimer;
pub use memory::MemoryProbe;
pub use module::{Challenger, ChallengerModule, LoadError};
pub use pipeline::{run_pipeline, PhaseEvent, PipelineOutcome};
pub use scoreboard::{ChallengerResult, Scoreboard, CRASHED_TIME};
pub use workload::{Seed, Workload};
pub use worker::WorkerMain;
