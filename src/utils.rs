use std::time::{Duration, Instant};

/// Format a `Duration` with automatic unit scaling, e.g. `1.94ms` or `2.34s`.
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Whole milliseconds for a database column, saturating at `i64::MAX`.
pub fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Times one named step and warns when it runs past its threshold.
pub struct Stopwatch {
    label: &'static str,
    threshold: Duration,
    started: Instant,
}

impl Stopwatch {
    pub fn start(label: &'static str, threshold: Duration) -> Self {
        Self {
            label,
            threshold,
            started: Instant::now(),
        }
    }

    /// Stop timing and return the elapsed time.
    pub fn finish(self) -> Duration {
        let elapsed = self.started.elapsed();
        if elapsed > self.threshold {
            tracing::warn!(
                step = self.label,
                duration = fmt_duration(elapsed),
                threshold = fmt_duration(self.threshold),
                "Slow step"
            );
        }
        elapsed
    }
}
