//! Challenger Supervisor
//!
//! Runs each challenger in a freshly spawned worker process so that the
//! most severe native faults (segfaults, aborts, runaway loops) take down
//! only the worker. The supervisor polls the worker pipe under a wall-clock
//! deadline per pipeline stage; a stalled stage is handled exactly like a
//! crash — SIGTERM, short grace, SIGKILL, sentinel result, next challenger.

use rankbench_ipc::{
    FrameError, FrameReader, FrameWriter, Phase, SupervisorCommand, WorkerMessage, WorkloadSpec,
    PROTOCOL_VERSION,
};
use std::env;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Supervisor-side failures around a worker process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The worker process could not be spawned.
    #[error("failed to spawn worker: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// A frame could not be read or written.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// The worker process died or closed its pipe unexpectedly.
    #[error("worker crashed: {0}")]
    WorkerCrashed(String),

    /// The worker spoke something other than the expected protocol.
    #[error("worker protocol error: expected {expected}, got {got}")]
    Protocol {
        /// What the supervisor was waiting for.
        expected: String,
        /// What actually arrived.
        got: String,
    },
}

impl From<FrameError> for SupervisorError {
    fn from(e: FrameError) -> Self {
        SupervisorError::Ipc(e.to_string())
    }
}

/// How one challenger's isolated run ended.
#[derive(Debug)]
pub enum ChallengerVerdict {
    /// Every stage ran; candidate for a timed scoreboard entry.
    Completed {
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
    /// The module could not be loaded; the challenger leaves the run with
    /// no scoreboard entry.
    ExcludedLoad {
        /// Diagnostic for the run log.
        message: String,
    },
    /// A stage faulted, stalled past its deadline, or took the worker down;
    /// ranked with the crash sentinel.
    Crashed {
        /// The stage in flight when the run ended.
        phase: Phase,
        /// Diagnostic for the run log.
        message: String,
    },
}

/// Result of polling the worker pipe for data.
#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for data on a file descriptor with a millisecond timeout.
fn wait_for_data(fd: i32, timeout_ms: i32) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        PollResult::Error(std::io::Error::last_os_error())
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // Data first: even a closing pipe may still hold a final message.
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Create a pipe pair, returning `(read_fd, write_fd)`.
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // Close-on-exec on both ends; the child clears it for the two it keeps.
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Send SIGTERM to a process.
fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Handle to one spawned worker process.
pub struct WorkerHandle {
    child: Child,
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
    stage_timeout: Duration,
    msg_read_fd: RawFd,
}

impl WorkerHandle {
    /// Spawn this binary as a worker, wiring fd 3/4 for IPC.
    pub fn spawn(stage_timeout: Duration) -> Result<Self, SupervisorError> {
        let binary = env::current_exe().map_err(SupervisorError::SpawnFailed)?;

        // cmd pipe: supervisor writes commands → worker reads from fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // msg pipe: worker writes messages to fd 4 → supervisor reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        let mut command = Command::new(&binary);
        command
            .arg("--bench-worker")
            .env("RANKBENCH_IPC_FD", "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // In the child: dup cmd_read→3, msg_write→4. The parent-side ends
        // close first so a dup2 target can never collide with one of them
        // (with a quiet fd table the four pipe ends are exactly 3..=6).
        unsafe {
            command.pre_exec(move || {
                libc::close(cmd_write);
                libc::close(msg_read);

                if cmd_read != 3 {
                    libc::dup2(cmd_read, 3);
                    libc::close(cmd_read);
                }
                let flags = libc::fcntl(3, libc::F_GETFD);
                libc::fcntl(3, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                if msg_write != 4 {
                    libc::dup2(msg_write, 4);
                    libc::close(msg_write);
                }
                let flags = libc::fcntl(4, libc::F_GETFD);
                libc::fcntl(4, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };
        debug!(pid = child.id(), "spawned worker");

        // Close the child-side ends in the parent.
        close_fd(cmd_read);
        close_fd(msg_write);

        // SAFETY: the parent-side ends are owned solely by this handle.
        let writer_file = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

        let mut handle = Self {
            child,
            reader: FrameReader::new(reader_file),
            writer: FrameWriter::new(writer_file),
            stage_timeout,
            msg_read_fd: msg_read,
        };

        handle.wait_for_hello()?;
        Ok(handle)
    }

    /// Wait for the hello message and validate the protocol version.
    fn wait_for_hello(&mut self) -> Result<(), SupervisorError> {
        let msg: WorkerMessage = self.reader.read()?;

        match msg {
            WorkerMessage::Hello(caps) => {
                if caps.protocol_version != PROTOCOL_VERSION {
                    return Err(SupervisorError::Protocol {
                        expected: format!("protocol version {}", PROTOCOL_VERSION),
                        got: format!("protocol version {}", caps.protocol_version),
                    });
                }
                debug!(cpu = %caps.cpu_model, cpus = caps.cpu_count, "worker ready");
                Ok(())
            }
            other => Err(SupervisorError::Protocol {
                expected: "Hello".to_string(),
                got: format!("{:?}", other),
            }),
        }
    }

    /// Ask the worker to benchmark one challenger.
    fn send_run(&mut self, module_path: &str, spec: &WorkloadSpec) -> Result<(), SupervisorError> {
        self.writer.write(&SupervisorCommand::Run {
            module_path: module_path.to_string(),
            workload: spec.clone(),
        })?;
        Ok(())
    }

    /// Collect messages until a verdict, holding a fresh deadline for every
    /// stage. `on_phase` fires for each completed stage.
    fn await_verdict(
        &mut self,
        on_phase: &mut dyn FnMut(Phase, f64),
    ) -> Result<ChallengerVerdict, SupervisorError> {
        // Until the first PhaseDone arrives the module load is in flight.
        let mut in_flight = Phase::Load;
        let mut stage_deadline = Instant::now() + self.stage_timeout;

        loop {
            let now = Instant::now();
            if now >= stage_deadline {
                return self.handle_timeout(in_flight);
            }
            let remaining = stage_deadline - now;

            // Even with buffered bytes we verify the worker is alive: the
            // buffer might hold an incomplete frame nobody will finish.
            if self.reader.has_buffered_data() {
                if !self.is_alive() {
                    return Ok(self.worker_died(in_flight, "died with partial data buffered"));
                }
            } else {
                let poll_timeout = remaining.min(Duration::from_millis(100));
                match wait_for_data(self.msg_read_fd, poll_timeout.as_millis() as i32) {
                    PollResult::DataAvailable => {
                        if !self.is_alive() {
                            return Ok(self.worker_died(in_flight, "died with data in pipe"));
                        }
                    }
                    PollResult::Timeout => {
                        if !self.is_alive() {
                            return Ok(self.worker_died(in_flight, "exited unexpectedly"));
                        }
                        continue;
                    }
                    PollResult::PipeClosed => {
                        return Ok(self.worker_died(in_flight, "pipe closed unexpectedly"));
                    }
                    PollResult::Error(e) => {
                        return Err(SupervisorError::WorkerCrashed(format!("pipe error: {e}")));
                    }
                }
            }

            let msg: WorkerMessage = match self.reader.read() {
                Ok(msg) => msg,
                Err(FrameError::EndOfStream) => {
                    return Ok(self.worker_died(in_flight, "closed connection unexpectedly"));
                }
                Err(e) => {
                    if !self.is_alive() {
                        return Ok(self.worker_died(in_flight, "died mid-frame"));
                    }
                    return Err(SupervisorError::Ipc(e.to_string()));
                }
            };

            match msg {
                WorkerMessage::PhaseDone { phase, elapsed_ms } => {
                    on_phase(phase, elapsed_ms);
                    in_flight = phase.next();
                    stage_deadline = Instant::now() + self.stage_timeout;
                }
                WorkerMessage::Complete {
                    load_ms,
                    search_ms,
                    memory_mb,
                    destroy_clean,
                    contract_violations,
                } => {
                    return Ok(ChallengerVerdict::Completed {
                        load_ms,
                        search_ms,
                        memory_mb,
                        destroy_clean,
                        contract_violations,
                    });
                }
                WorkerMessage::Failure { phase, message, .. } => {
                    return Ok(match phase {
                        // A clean load failure drops the challenger; any
                        // later failure earns the crash sentinel.
                        Phase::Load => ChallengerVerdict::ExcludedLoad { message },
                        _ => ChallengerVerdict::Crashed { phase, message },
                    });
                }
                WorkerMessage::Hello(_) => {
                    return Err(SupervisorError::Protocol {
                        expected: "PhaseDone/Complete/Failure".to_string(),
                        got: "Hello".to_string(),
                    });
                }
            }
        }
    }

    /// Translate a dead worker into a crash verdict for the stage in flight.
    fn worker_died(&mut self, phase: Phase, what: &str) -> ChallengerVerdict {
        // Reap the corpse so Drop has nothing left to do.
        let _ = self.child.wait();
        ChallengerVerdict::Crashed {
            phase,
            message: format!("worker process {what}"),
        }
    }

    /// Stage deadline hit: SIGTERM, short grace, SIGKILL, crash verdict.
    fn handle_timeout(&mut self, phase: Phase) -> Result<ChallengerVerdict, SupervisorError> {
        let _ = send_sigterm(self.child.id());
        std::thread::sleep(Duration::from_millis(100));
        if self.is_alive() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();

        Ok(ChallengerVerdict::Crashed {
            phase,
            message: format!(
                "stage deadline of {:.0}s exceeded",
                self.stage_timeout.as_secs_f64()
            ),
        })
    }

    /// Request graceful shutdown and reap the worker.
    pub fn shutdown(mut self) -> Result<(), SupervisorError> {
        self.writer.write(&SupervisorCommand::Shutdown)?;
        let _ = self.child.wait();
        Ok(())
    }

    /// Whether the worker process is still running.
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(_) => false,
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            // Graceful first, then the hammer.
            let _ = send_sigterm(self.child.id());
            std::thread::sleep(Duration::from_millis(50));
            if self.is_alive() {
                let _ = self.child.kill();
            }
            let _ = self.child.wait();
        }
    }
}

/// Drives challengers through isolated worker processes, one worker per
/// challenger so nothing survives from one run into the next.
pub struct Supervisor {
    spec: WorkloadSpec,
    stage_timeout: Duration,
}

impl Supervisor {
    /// Create a supervisor for the given workload and per-stage deadline.
    pub fn new(spec: WorkloadSpec, stage_timeout: Duration) -> Self {
        Self {
            spec,
            stage_timeout,
        }
    }

    /// Benchmark one challenger in a fresh worker process. Supervisor-side
    /// failures collapse into a crash verdict; nothing here aborts the run.
    pub fn run_challenger(
        &self,
        module_path: &str,
        on_phase: &mut dyn FnMut(Phase, f64),
    ) -> ChallengerVerdict {
        let mut worker = match WorkerHandle::spawn(self.stage_timeout) {
            Ok(worker) => worker,
            Err(e) => {
                return ChallengerVerdict::Crashed {
                    phase: Phase::Load,
                    message: format!("could not isolate challenger: {e}"),
                };
            }
        };

        if let Err(e) = worker.send_run(module_path, &self.spec) {
            return ChallengerVerdict::Crashed {
                phase: Phase::Load,
                message: format!("could not reach worker: {e}"),
            };
        }

        let verdict = match worker.await_verdict(on_phase) {
            Ok(verdict) => verdict,
            Err(e) => ChallengerVerdict::Crashed {
                phase: Phase::Load,
                message: e.to_string(),
            },
        };

        let _ = worker.shutdown();
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supervisor_holds_spec_and_deadline() {
        let spec = WorkloadSpec {
            point_count: 100,
            query_count: 10,
            result_count: 5,
            seed: [1, 2, 3, 4],
        };
        let supervisor = Supervisor::new(spec, Duration::from_secs(30));
        assert_eq!(supervisor.stage_timeout, Duration::from_secs(30));
        assert_eq!(supervisor.spec.point_count, 100);
    }

    #[test]
    #[ignore] // Requires the built rankbench binary as current_exe
    fn spawn_and_shutdown_worker() {
        let worker = WorkerHandle::spawn(Duration::from_secs(10)).expect("spawn worker");
        worker.shutdown().expect("shutdown");
    }
}
