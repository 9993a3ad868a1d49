#![warn(missing_docs)]
//! rankbench IPC Protocol
//!
//! Binary message protocol for the supervisor-worker split. Messages travel
//! as length-prefixed rkyv frames over a pipe pair inherited by the worker
//! process, so a dying worker tears the stream instead of corrupting it.

mod framing;
mod messages;

pub use framing::{read_frame, write_frame, FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE};
pub use messages::{Phase, SupervisorCommand, WorkerCapabilities, WorkerMessage, WorkloadSpec};

/// Protocol version for compatibility checking during the hello handshake.
pub const PROTOCOL_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_order_covers_pipeline() {
        // `next` walks the stage ladder and parks at Release.
        let mut phase = Phase::Load;
        let mut seen = vec![phase];
        loop {
            let next = phase.next();
            if next == phase {
                break;
            }
            seen.push(next);
            phase = next;
        }
        assert_eq!(
            seen,
            vec![
                Phase::Load,
                Phase::Generate,
                Phase::Ruggedness,
                Phase::LoadPoints,
                Phase::Query,
                Phase::Release,
            ]
        );
    }

    #[test]
    fn capabilities_default() {
        let caps = WorkerCapabilities::default();
        assert_eq!(caps.protocol_version, PROTOCOL_VERSION);
        assert!(caps.cpu_count >= 1);
    }
}
