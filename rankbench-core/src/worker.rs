//! Worker Process Entry Point
//!
//! The challenger side of the supervisor-worker split. A worker is this
//! same binary relaunched with `--bench-worker`; it inherits fd 3/4 for IPC
//! (announced via `RANKBENCH_IPC_FD`), loads exactly the challenger the
//! supervisor names, regenerates the workload from the recorded seed, and
//! streams stage progress back while the supervisor holds the deadline.
//!
//! On Unix a SIGTERM handler allows graceful shutdown; on non-Unix the
//! worker falls back to stdin/stdout transport and skips signal handling.

use crate::measure::HighResTimer;
use crate::module::ChallengerModule;
use crate::pipeline::{run_pipeline, PipelineOutcome};
use crate::workload::{Seed, Workload};
use rankbench_ipc::{
    FrameReader, FrameWriter, Phase, SupervisorCommand, WorkerCapabilities, WorkerMessage,
    WorkloadSpec,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// Global flag set by the SIGTERM handler to request graceful shutdown.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Whether a graceful shutdown has been requested via SIGTERM.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Install a SIGTERM handler that sets the shutdown flag. The handler is
/// async-signal-safe (only stores an atomic).
#[cfg(unix)]
fn install_sigterm_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigterm_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigterm_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

/// No-op on non-Unix (no SIGTERM equivalent).
#[cfg(not(unix))]
fn install_sigterm_handler() {}

/// IPC transport: either the inherited fd pair or stdin/stdout fallback.
enum IpcTransport {
    #[cfg(unix)]
    Fds {
        read_fd: i32,
        write_fd: i32,
    },
    Stdio,
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var("RANKBENCH_IPC_FD") {
        let parts: Vec<&str> = val.split(',').collect();
        if parts.len() == 2 {
            if let (Ok(r), Ok(w)) = (parts[0].parse::<i32>(), parts[1].parse::<i32>()) {
                return IpcTransport::Fds {
                    read_fd: r,
                    write_fd: w,
                };
            }
        }
        eprintln!(
            "rankbench: warning: invalid RANKBENCH_IPC_FD={val:?} (expected <read_fd>,<write_fd>), falling back to stdio"
        );
    }
    IpcTransport::Stdio
}

/// Worker main loop.
pub struct WorkerMain {
    reader: FrameReader<Box<dyn std::io::Read>>,
    writer: FrameWriter<Box<dyn std::io::Write>>,
}

impl WorkerMain {
    /// Create a worker over fd 3/4 if `RANKBENCH_IPC_FD` is set, otherwise
    /// stdin/stdout.
    pub fn new() -> Self {
        match detect_transport() {
            #[cfg(unix)]
            IpcTransport::Fds { read_fd, write_fd } => {
                // SAFETY: the supervisor set these fds up for us and nothing
                // else in this process owns them.
                let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
                Self {
                    reader: FrameReader::new(Box::new(read_file) as Box<dyn std::io::Read>),
                    writer: FrameWriter::new(Box::new(write_file) as Box<dyn std::io::Write>),
                }
            }
            IpcTransport::Stdio => Self {
                reader: FrameReader::new(Box::new(std::io::stdin()) as Box<dyn std::io::Read>),
                writer: FrameWriter::new(Box::new(std::io::stdout()) as Box<dyn std::io::Write>),
            },
        }
    }

    /// Run the worker main loop until shutdown.
    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        install_sigterm_handler();

        self.writer
            .write(&WorkerMessage::Hello(WorkerCapabilities::default()))?;

        loop {
            if shutdown_requested() {
                break;
            }

            let command: SupervisorCommand = self.reader.read()?;

            match command {
                SupervisorCommand::Run {
                    module_path,
                    workload,
                } => {
                    self.run_challenge(&module_path, &workload)?;
                    if shutdown_requested() {
                        break;
                    }
                }
                SupervisorCommand::Shutdown => {
                    break;
                }
                SupervisorCommand::Ping => {}
            }
        }

        Ok(())
    }

    /// Benchmark one challenger and stream the verdict back.
    fn run_challenge(
        &mut self,
        module_path: &str,
        spec: &WorkloadSpec,
    ) -> Result<(), Box<dyn std::error::Error>> {
        // Load and bind. A missing file or symbol is a clean failure the
        // supervisor turns into "excluded", not a crash.
        let mut timer = HighResTimer::start_new();
        let mut module = match ChallengerModule::load(Path::new(module_path)) {
            Ok(module) => module,
            Err(e) => {
                self.writer.write(&WorkerMessage::Failure {
                    phase: Phase::Load,
                    message: e.to_string(),
                    backtrace: None,
                })?;
                return Ok(());
            }
        };
        self.writer.write(&WorkerMessage::PhaseDone {
            phase: Phase::Load,
            elapsed_ms: timer.elapsed(),
        })?;

        // Regenerate the workload from the recorded seed. Every worker
        // derives the identical point set, so nothing big crosses the pipe
        // and no challenger can see another's mutations.
        let mut timer = HighResTimer::start_new();
        let workload = Workload::generate(
            spec.point_count,
            spec.query_count,
            spec.result_count,
            Seed(spec.seed),
        );
        self.writer.write(&WorkerMessage::PhaseDone {
            phase: Phase::Generate,
            elapsed_ms: timer.elapsed(),
        })?;

        // Drive the pipeline, forwarding stage progress as it happens so
        // the supervisor can stream the run log and re-arm its deadline.
        let mut forward_error = None;
        let outcome = run_pipeline(&mut module, &workload, &mut |event| {
            let message = WorkerMessage::PhaseDone {
                phase: event.phase,
                elapsed_ms: event.elapsed_ms,
            };
            if let Err(e) = self.writer.write(&message) {
                forward_error = Some(e);
            }
        });
        if let Some(e) = forward_error {
            return Err(Box::new(e));
        }

        let verdict = match outcome {
            PipelineOutcome::Completed {
                load_ms,
                search_ms,
                memory_mb,
                destroy_clean,
                contract_violations,
            } => WorkerMessage::Complete {
                load_ms,
                search_ms,
                memory_mb,
                destroy_clean,
                contract_violations,
            },
            PipelineOutcome::Faulted { phase, message } => WorkerMessage::Failure {
                phase,
                message,
                backtrace: None,
            },
        };
        self.writer.write(&verdict)?;

        Ok(())
    }
}

impl Default for WorkerMain {
    fn default() -> Self {
        Self::new()
    }
}
