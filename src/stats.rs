//! Pipeline counters and the periodic health reporter.

use crate::alerts::AlertKind;
use crate::pipeline::PipelineContext;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// How often the reporter snapshots and logs the counters.
const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Shared atomic counters for the event pipeline.
#[derive(Default)]
pub struct PipelineStats {
    received: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
    queue_depth: AtomicUsize,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub dropped: u64,
    pub errors: u64,
    pub queue_depth: usize,
}

impl PipelineStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}

/// Health conditions the reporter can raise, at most one each per cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthAlert {
    /// Queue above 80% of capacity. Log-only.
    QueueFilling { depth: usize, capacity: usize },
    /// Queue above 95% of capacity. Escalated to the developer.
    QueueCritical { depth: usize, capacity: usize },
    /// Processing error rate above 10% once at least 100 events were received.
    ErrorRate { errors: u64, received: u64 },
    /// Drop rate above 5%.
    DropRate { dropped: u64, received: u64 },
}

/// Evaluate escalation thresholds for one snapshot.
pub fn evaluate(snapshot: &StatsSnapshot, capacity: usize) -> Vec<HealthAlert> {
    let mut alerts = Vec::new();

    if capacity > 0 {
        let usage = snapshot.queue_depth as f64 / capacity as f64;
        if usage > 0.95 {
            alerts.push(HealthAlert::QueueCritical {
                depth: snapshot.queue_depth,
                capacity,
            });
        } else if usage > 0.80 {
            alerts.push(HealthAlert::QueueFilling {
                depth: snapshot.queue_depth,
                capacity,
            });
        }
    }

    if snapshot.received >= 100 {
        let error_rate = snapshot.errors as f64 / snapshot.received as f64;
        if error_rate > 0.10 {
            alerts.push(HealthAlert::ErrorRate {
                errors: snapshot.errors,
                received: snapshot.received,
            });
        }
    }

    if snapshot.dropped > 0 && snapshot.received > 0 {
        let drop_rate = snapshot.dropped as f64 / snapshot.received as f64;
        if drop_rate > 0.05 {
            alerts.push(HealthAlert::DropRate {
                dropped: snapshot.dropped,
                received: snapshot.received,
            });
        }
    }

    alerts
}

/// Spawn the periodic stats logger and threshold escalation loop.
pub fn spawn_reporter(ctx: Arc<PipelineContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let capacity = ctx.config.pipeline.queue_capacity;
        let mut ticker = tokio::time::interval(REPORT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup isn't noisy.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let snapshot = ctx.stats.snapshot();

            tracing::info!(
                received = snapshot.received,
                processed = snapshot.processed,
                dropped = snapshot.dropped,
                queue_depth = snapshot.queue_depth,
                errors = snapshot.errors,
                "pipeline stats"
            );

            for alert in evaluate(&snapshot, capacity) {
                match alert {
                    HealthAlert::QueueFilling { depth, capacity } => {
                        tracing::warn!(depth, capacity, "event queue filling up");
                    }
                    HealthAlert::QueueCritical { depth, capacity } => {
                        tracing::warn!(depth, capacity, "event queue nearly full");
                        ctx.alerts
                            .notify(
                                AlertKind::QueueWarning,
                                &format!("event queue {depth}/{capacity}, processing is lagging"),
                            )
                            .await;
                    }
                    HealthAlert::ErrorRate { errors, received } => {
                        tracing::warn!(errors, received, "high processing error rate");
                        ctx.alerts
                            .notify(
                                AlertKind::ErrorRateWarning,
                                &format!("high processing error rate: {errors}/{received}"),
                            )
                            .await;
                    }
                    HealthAlert::DropRate { dropped, received } => {
                        tracing::warn!(dropped, received, "high event drop rate");
                        ctx.alerts
                            .notify(
                                AlertKind::DropRateWarning,
                                &format!("high event drop rate: {dropped}/{received}"),
                            )
                            .await;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(received: u64, processed: u64, dropped: u64, errors: u64, depth: usize) -> StatsSnapshot {
        StatsSnapshot {
            received,
            processed,
            dropped,
            errors,
            queue_depth: depth,
        }
    }

    #[test]
    fn test_quiet_pipeline_raises_nothing() {
        assert!(evaluate(&snapshot(50, 50, 0, 0, 10), 1000).is_empty());
    }

    #[test]
    fn test_queue_thresholds() {
        let warn = evaluate(&snapshot(0, 0, 0, 0, 850), 1000);
        assert_eq!(
            warn,
            vec![HealthAlert::QueueFilling { depth: 850, capacity: 1000 }]
        );

        let critical = evaluate(&snapshot(0, 0, 0, 0, 990), 1000);
        assert_eq!(
            critical,
            vec![HealthAlert::QueueCritical { depth: 990, capacity: 1000 }]
        );
    }

    #[test]
    fn test_error_rate_needs_enough_events() {
        // 50% errors but under the 100-event floor: no alert.
        assert!(evaluate(&snapshot(40, 20, 0, 20, 0), 1000).is_empty());

        let alerts = evaluate(&snapshot(200, 150, 0, 30, 0), 1000);
        assert_eq!(
            alerts,
            vec![HealthAlert::ErrorRate { errors: 30, received: 200 }]
        );
    }

    #[test]
    fn test_drop_rate_threshold() {
        assert!(evaluate(&snapshot(100, 95, 4, 0, 0), 1000).is_empty());

        let alerts = evaluate(&snapshot(100, 90, 10, 0, 0), 1000);
        assert_eq!(
            alerts,
            vec![HealthAlert::DropRate { dropped: 10, received: 100 }]
        );
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = PipelineStats::default();
        stats.record_received();
        stats.record_received();
        stats.record_processed();
        stats.record_dropped();
        stats.record_error();
        stats.set_queue_depth(7);

        let snap = stats.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.queue_depth, 7);
    }
}
