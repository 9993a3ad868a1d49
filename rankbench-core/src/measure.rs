//! Calibrated Wall-Clock Timing
//!
//! Accumulating start/stop timer over the monotonic `std::time::Instant`
//! clock, with the fixed cost of the measurement primitive itself measured
//! once at construction and subtracted from every reading.

use std::time::{Duration, Instant};

/// Accumulating millisecond timer.
///
/// A timer may be started and stopped any number of times before reading;
/// `elapsed` reports the sum of all spans minus the calibration overhead.
/// Readings are clamped at zero and never negative.
#[derive(Debug, Clone)]
pub struct HighResTimer {
    start: Instant,
    running: bool,
    total: Duration,
    overhead: Duration,
}

impl HighResTimer {
    /// Create a calibrated timer. Calibration runs an empty start/stop pair
    /// and remembers the span as the fixed cost of timing itself.
    pub fn new() -> Self {
        let mut timer = Self {
            start: Instant::now(),
            running: false,
            total: Duration::ZERO,
            overhead: Duration::ZERO,
        };
        timer.start();
        timer.stop();
        timer.overhead = timer.total;
        timer.reset();
        timer
    }

    /// Create a calibrated timer and start it immediately.
    pub fn start_new() -> Self {
        let mut timer = Self::new();
        timer.start();
        timer
    }

    /// Begin or resume timing, discarding any pending stop mark.
    #[inline]
    pub fn start(&mut self) {
        self.running = true;
        self.start = Instant::now();
    }

    /// End or pause timing, folding the open span into the running total.
    #[inline]
    pub fn stop(&mut self) {
        if self.running {
            self.total += self.start.elapsed();
            self.running = false;
        }
    }

    /// Zero the running total.
    pub fn reset(&mut self) {
        self.total = Duration::ZERO;
    }

    /// Accumulated milliseconds, net of the calibration overhead. Stops the
    /// timer first if it is still running, so a second reading without an
    /// intervening `start` returns the same value.
    pub fn elapsed(&mut self) -> f64 {
        if self.running {
            self.stop();
        }
        match self.total.checked_sub(self.overhead) {
            Some(net) => net.as_secs_f64() * 1e3,
            // Overhead miscalibration or clock anomaly: report zero, never
            // a negative elapsed time.
            None => 0.0,
        }
    }
}

impl Default for HighResTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn elapsed_is_never_negative() {
        let mut timer = HighResTimer::new();
        timer.start();
        timer.stop();
        assert!(timer.elapsed() >= 0.0);
    }

    #[test]
    fn elapsed_is_stable_without_restart() {
        let mut timer = HighResTimer::new();
        timer.start();
        std::thread::sleep(Duration::from_millis(5));
        let first = timer.elapsed();
        let second = timer.elapsed();
        assert_eq!(first, second);
    }

    #[test]
    fn spans_accumulate() {
        let mut timer = HighResTimer::new();
        timer.start();
        std::thread::sleep(Duration::from_millis(5));
        timer.stop();
        let one = timer.elapsed();

        timer.start();
        std::thread::sleep(Duration::from_millis(5));
        timer.stop();
        let two = timer.elapsed();

        assert!(two > one);
        // Two ~5ms spans; generous upper bound for noisy schedulers.
        assert!(two >= 5.0);
        assert!(two < 500.0);
    }

    #[test]
    fn reset_zeroes_the_total() {
        let mut timer = HighResTimer::new();
        timer.start();
        std::thread::sleep(Duration::from_millis(5));
        timer.stop();
        assert!(timer.elapsed() > 0.0);

        timer.reset();
        assert_eq!(timer.elapsed(), 0.0);
    }

    #[test]
    fn elapsed_stops_a_running_timer() {
        let mut timer = HighResTimer::new();
        timer.start();
        std::thread::sleep(Duration::from_millis(5));
        let reading = timer.elapsed();
        assert!(reading >= 1.0);

        // The implicit stop latched; time keeps not accumulating.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(timer.elapsed(), reading);
    }
}
