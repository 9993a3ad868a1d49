//! IPC Message Types
//!
//! All messages are rkyv-serialized with byte validation, so a torn or
//! corrupted frame is rejected instead of misread.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// Stages of the per-challenger benchmark pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub enum Phase {
    /// Module load and entry-point binding.
    Load,
    /// Workload regeneration from the recorded seed.
    Generate,
    /// Empty-index smoke test.
    Ruggedness,
    /// `create` over the full point set.
    LoadPoints,
    /// The timed query loop.
    Query,
    /// `destroy` and memory accounting.
    Release,
}

impl Phase {
    /// Short lower-case label for diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Load => "module load",
            Phase::Generate => "workload generation",
            Phase::Ruggedness => "ruggedness check",
            Phase::LoadPoints => "points load",
            Phase::Query => "query",
            Phase::Release => "release",
        }
    }

    /// The stage that follows this one. `Release` is terminal and returns
    /// itself; used to attribute a worker death to the stage in flight.
    pub fn next(&self) -> Phase {
        match self {
            Phase::Load => Phase::Generate,
            Phase::Generate => Phase::Ruggedness,
            Phase::Ruggedness => Phase::LoadPoints,
            Phase::LoadPoints => Phase::Query,
            Phase::Query => Phase::Release,
            Phase::Release => Phase::Release,
        }
    }
}

/// Everything a worker needs to rebuild the run's workload bit-identically.
///
/// The point set itself never crosses the pipe; the worker regenerates it
/// from the recorded seed, so every challenger observes the same input.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkloadSpec {
    /// Number of generated points.
    pub point_count: u32,
    /// Number of generated query rectangles.
    pub query_count: u32,
    /// Top-k cap per query.
    pub result_count: u32,
    /// The four recorded seed words.
    pub seed: [u32; 4],
}

/// Worker capabilities advertised during the hello handshake.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerCapabilities {
    /// Protocol version for compatibility.
    pub protocol_version: u32,
    /// Number of logical CPUs available.
    pub cpu_count: u32,
    /// CPU model string (for verbose diagnostics).
    pub cpu_model: String,
    /// Whether the resident-memory probe is functional on this platform.
    pub has_memory_probe: bool,
}

impl Default for WorkerCapabilities {
    fn default() -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            cpu_count: num_cpus(),
            cpu_model: cpu_model_string(),
            has_memory_probe: cfg!(target_os = "linux"),
        }
    }
}

/// Commands sent from supervisor to worker.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum SupervisorCommand {
    /// Benchmark one challenger module against the described workload.
    Run {
        /// Filesystem path of the challenger module.
        module_path: String,
        /// Workload to regenerate and measure against.
        workload: WorkloadSpec,
    },

    /// Request graceful shutdown.
    Shutdown,

    /// Ping for health check.
    Ping,
}

/// Messages sent from worker to supervisor.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Initial handshake with worker capabilities.
    Hello(WorkerCapabilities),

    /// A pipeline stage finished; resets the supervisor's stage deadline.
    PhaseDone {
        /// The stage that completed.
        phase: Phase,
        /// Wall clock spent in it, milliseconds.
        elapsed_ms: f64,
    },

    /// Every stage ran; the challenger earned a timed scoreboard entry.
    Complete {
        /// `create` time over the full point set (not ranked).
        load_ms: f64,
        /// The ranked metric: accumulated query-loop time.
        search_ms: f64,
        /// Whole megabytes retained across load + query.
        memory_mb: u64,
        /// Whether `destroy` returned null as the contract asks.
        destroy_clean: bool,
        /// Queries whose results broke the search contract.
        contract_violations: u32,
    },

    /// A stage failed; no later stage was attempted.
    Failure {
        /// The stage that failed.
        phase: Phase,
        /// Human-readable diagnostic.
        message: String,
        /// Optional backtrace when one was captured.
        backtrace: Option<String>,
    },
}

// Helper functions

fn num_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|p| p.get() as u32)
        .unwrap_or(1)
}

fn cpu_model_string() -> String {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|line| line.starts_with("model name"))
                    .and_then(|line| line.split(':').nth(1))
                    .map(|s| s.trim().to_string())
            })
            .unwrap_or_else(|| "Unknown CPU".to_string())
    }

    #[cfg(not(target_os = "linux"))]
    {
        "Unknown CPU".to_string()
    }
}
