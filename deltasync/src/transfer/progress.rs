//! Progress aggregation and transfer-speed measurement.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One progress update, as surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressReport {
    /// Overall completion, 0-100, relative to the full target length.
    pub percent: u8,
    /// Target bytes accounted for so far (recovered + downloaded).
    pub bytes_received: u64,
    /// Target length in bytes.
    pub bytes_total: u64,
    /// Current transfer speed in `unit`s.
    pub speed: f64,
    /// Unit the speed is expressed in.
    pub unit: &'static str,
}

impl ProgressReport {
    /// Build a report, scaling the raw byte rate to a readable unit.
    pub fn new(bytes_received: u64, bytes_total: u64, bytes_per_sec: f64) -> Self {
        let percent = if bytes_total == 0 {
            100
        } else {
            ((bytes_received as f64 * 100.0) / bytes_total as f64).min(100.0) as u8
        };
        let (speed, unit) = humanize_speed(bytes_per_sec);
        Self {
            percent,
            bytes_received,
            bytes_total,
            speed,
            unit,
        }
    }
}

/// Scale a byte rate into the unit ladder used for display.
pub fn humanize_speed(bytes_per_sec: f64) -> (f64, &'static str) {
    if bytes_per_sec < 1024.0 {
        (bytes_per_sec, "bytes/sec")
    } else if bytes_per_sec < 1024.0 * 1024.0 {
        (bytes_per_sec / 1024.0, "kB/s")
    } else {
        (bytes_per_sec / (1024.0 * 1024.0), "MB/s")
    }
}

/// Transfer speed over a sliding time window.
///
/// Samples are cumulative byte counts; the instantaneous rate is the
/// byte delta across the window divided by its time span, so a stalled
/// transfer decays to zero instead of being averaged against the whole
/// session.
#[derive(Debug)]
pub struct SpeedMeter {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedMeter {
    /// Meter with the default 3-second window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(3))
    }

    /// Meter with a custom window.
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Record the cumulative byte count at `now`.
    pub fn record(&mut self, total_bytes: u64, now: Instant) {
        self.samples.push_back((now, total_bytes));
        if let Some(horizon) = now.checked_sub(self.window) {
            while self.samples.len() > 2
                && self.samples.front().is_some_and(|&(at, _)| at < horizon)
            {
                self.samples.pop_front();
            }
        }
    }

    /// Current rate in bytes per second.
    pub fn bytes_per_sec(&self) -> f64 {
        let (Some(&(first_at, first_bytes)), Some(&(last_at, last_bytes))) =
            (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let elapsed = last_at.duration_since(first_at).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (last_bytes - first_bytes) as f64 / elapsed
    }
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new()
    }
}
