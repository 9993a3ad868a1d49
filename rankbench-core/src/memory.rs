//! Resident-Set Memory Probe
//!
//! Before/after snapshots of the current process's resident set size. The
//! start snapshot is taken before a challenger builds its index; the stop
//! snapshot lands right before the context is released, so the reported
//! figure is what the challenger held onto across load + query.
//!
//! On Linux the resident set comes from `/proc/self/statm`; other platforms
//! report zero.

/// Before/after resident-memory probe.
#[derive(Debug, Default, Clone)]
pub struct MemoryProbe {
    start_bytes: u64,
    stop_bytes: Option<u64>,
}

impl MemoryProbe {
    /// Create an unarmed probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current resident set as the baseline, clearing any
    /// previous stop mark.
    pub fn start(&mut self) {
        self.start_bytes = resident_bytes();
        self.stop_bytes = None;
    }

    /// Snapshot the current resident set as the end mark.
    pub fn stop(&mut self) {
        self.stop_bytes = Some(resident_bytes());
    }

    /// Whole megabytes retained between the two snapshots, taking the end
    /// snapshot now if `stop` was never called. Saturates at zero: the
    /// figure is an unsigned quantity.
    pub fn used_mb(&mut self) -> u64 {
        if self.stop_bytes.is_none() {
            self.stop();
        }
        let stop = self.stop_bytes.unwrap_or(0);
        stop.saturating_sub(self.start_bytes) / (1024 * 1024)
    }
}

/// Resident set size of the current process in bytes, 0 if unreadable.
#[cfg(target_os = "linux")]
fn resident_bytes() -> u64 {
    // statm fields are in pages: size resident shared text lib data dt
    let statm = match std::fs::read_to_string("/proc/self/statm") {
        Ok(s) => s,
        Err(_) => return 0,
    };
    let resident_pages: u64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|field| field.parse().ok())
        .unwrap_or(0);

    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return 0;
    }
    resident_pages * page_size as u64
}

#[cfg(not(target_os = "linux"))]
fn resident_bytes() -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_is_latched_after_stop() {
        let mut probe = MemoryProbe::new();
        probe.start();
        let first = probe.used_mb();
        // Growth after the implicit stop must not change the reading.
        let _ballast = vec![1u8; 8 * 1024 * 1024];
        let second = probe.used_mb();
        assert_eq!(first, second);
    }

    #[test]
    fn growth_saturates_never_underflows() {
        let mut probe = MemoryProbe::new();
        probe.start();
        // Whatever the platform reports, the delta is unsigned.
        assert!(probe.used_mb() < 1_000_000);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn resident_bytes_reads_something() {
        // Any live process has a nonzero resident set.
        assert!(resident_bytes() > 0);
    }
}
