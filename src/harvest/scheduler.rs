use crate::data::kv::StateStore;
use crate::harvest::coordinator::BatchCoordinator;
use crate::utils::fmt_duration;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, info, warn};

/// How long to wait before the first cycle so a restart keeps the remaining cooldown.
pub fn initial_delay(last_start: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> Duration {
    let Some(last) = last_start else {
        return Duration::ZERO;
    };
    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
    interval.saturating_sub(elapsed)
}

/// Starts a harvest cycle every `interval`.
pub struct Scheduler {
    coordinator: Arc<BatchCoordinator>,
    state: Option<StateStore>,
    interval: Duration,
}

impl Scheduler {
    /// `state` persists the last start time; without it every process start triggers a cycle.
    pub fn new(coordinator: Arc<BatchCoordinator>, state: Option<StateStore>, interval: Duration) -> Self {
        Self {
            coordinator,
            state,
            interval,
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(interval = fmt_duration(self.interval), "Scheduler service started");

        let persisted = match &self.state {
            Some(state) => state.last_cycle_start().await.unwrap_or_else(|e| {
                warn!(error = ?e, "Failed to load persisted cycle start");
                None
            }),
            None => None,
        };
        let delay = initial_delay(persisted, Utc::now(), self.interval);
        if let Some(last) = persisted {
            info!(last_cycle_start = %last, first_cycle_in = fmt_duration(delay), "Loaded persisted scheduler timestamp");
        }

        let mut next_run = time::Instant::now() + delay;

        loop {
            tokio::select! {
                _ = time::sleep_until(next_run) => {
                    next_run = time::Instant::now() + self.interval;

                    let Some(cycle) = self.coordinator.start_cycle() else {
                        info!("Previous harvest cycle still running, skipping");
                        continue;
                    };
                    debug!(cycle_id = %cycle.id, "Scheduled cycle started");

                    if let Some(state) = &self.state
                        && let Err(e) = state.record_cycle_start(cycle.id, Utc::now()).await
                    {
                        warn!(error = ?e, "Failed to persist cycle start timestamp");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Scheduler exiting gracefully");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn first_run_is_immediate() {
        assert_eq!(initial_delay(None, Utc::now(), DAY), Duration::ZERO);
    }

    #[test]
    fn recent_start_keeps_remaining_cooldown() {
        let now = Utc::now();
        let last = now - TimeDelta::hours(20);
        assert_eq!(initial_delay(Some(last), now, DAY), Duration::from_secs(4 * 60 * 60));
    }

    #[test]
    fn stale_start_runs_immediately() {
        let now = Utc::now();
        let last = now - TimeDelta::days(3);
        assert_eq!(initial_delay(Some(last), now, DAY), Duration::ZERO);
    }

    #[test]
    fn future_timestamp_waits_full_interval() {
        let now = Utc::now();
        let last = now + TimeDelta::minutes(5);
        assert_eq!(initial_delay(Some(last), now, DAY), DAY);
    }
}
