//! Periodic scanning.
//!
//! The scheduler only decides *when* to run a cycle; the cycle itself lives
//! in [`Reconciler`]. After a failed cycle the next one is delayed with
//! exponential backoff instead of the regular interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::messenger::RetryPolicy;
use crate::reconcile::{Reconciler, ScanReport};
use crate::timeline::TimelineHandle;

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(10);

/// Counters for a finished run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub failures: u64,
    pub skipped: u64,
}

pub struct ScanScheduler {
    reconciler: Arc<Reconciler>,
    timeline: TimelineHandle,
    interval: Duration,
    backoff: RetryPolicy,
}

impl ScanScheduler {
    pub fn new(reconciler: Arc<Reconciler>, timeline: TimelineHandle) -> Self {
        Self {
            reconciler,
            timeline,
            interval: DEFAULT_SCAN_INTERVAL,
            backoff: RetryPolicy::default(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay before the next cycle given the current run of consecutive failures.
    fn next_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            self.interval
        } else {
            self.backoff.backoff_delay(consecutive_failures - 1)
        }
    }

    /// Scan immediately, then keep scanning until `shutdown` becomes `true`
    /// (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        let mut consecutive_failures: u32 = 0;
        info!(interval_secs = self.interval.as_secs(), "scan scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            // A shutdown abandons the cycle in flight; merges already done are kept
            let outcome = tokio::select! {
                outcome = self.reconciler.scan_cycle(&self.timeline) => outcome,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match outcome {
                Ok(ScanReport { skipped: true, .. }) => {
                    stats.skipped += 1;
                }
                Ok(report) => {
                    stats.cycles += 1;
                    consecutive_failures = 0;
                    debug!(new = report.new_messages, "scheduled scan finished");
                }
                Err(e) => {
                    stats.cycles += 1;
                    stats.failures += 1;
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    warn!(error = %e, failures = consecutive_failures, "scheduled scan failed");
                }
            }

            let delay = self.next_delay(consecutive_failures);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(cycles = stats.cycles, failures = stats.failures, "scan scheduler stopped");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::harness::MemoryRelay;
    use crate::reconcile::ScanConfig;
    use crate::store::InMemoryStore;
    use dank_crypto::generate_identity_keypair;

    fn scheduler(relay: &MemoryRelay) -> (ScanScheduler, TimelineHandle) {
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(generate_identity_keypair()),
            Arc::new(relay.clone()),
            Arc::new(InMemoryStore::new()),
            Arc::new(StaticDirectory::new()),
            ScanConfig::default(),
        ));
        let (timeline, _task) = TimelineHandle::spawn();
        (ScanScheduler::new(reconciler, timeline.clone()), timeline)
    }

    #[tokio::test]
    async fn test_next_delay() {
        let relay = MemoryRelay::new();
        let (s, _) = scheduler(&relay);
        let s = s.with_backoff(RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        });

        assert_eq!(s.next_delay(0), DEFAULT_SCAN_INTERVAL);
        assert_eq!(s.next_delay(1), Duration::from_secs(1));
        assert_eq!(s.next_delay(2), Duration::from_secs(2));
        assert_eq!(s.next_delay(10), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_shutdown() {
        let relay = MemoryRelay::new();
        let (s, _timeline) = scheduler(&relay);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(s.with_interval(Duration::from_secs(10)).run(rx));
        tokio::time::sleep(Duration::from_secs(25)).await;
        tx.send(true).unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_counted_and_recovered() {
        let relay = MemoryRelay::new();
        relay.set_offline(true);
        let (s, _timeline) = scheduler(&relay);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(s.run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        relay.set_offline(false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.cycles, 2);
    }
}
