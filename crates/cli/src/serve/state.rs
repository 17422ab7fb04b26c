//! Application state and process-scoped counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lastmile_auth::{AccessEnforcer, PolicyTable};
use lastmile_dispatch::{AssignmentOrchestrator, Degraded, RoutePlanner};
use lastmile_storage::MemoryStorage;
use lastmile_tracking::Tracker;
use serde::Serialize;

/// Counters since process start. Lost on restart.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    pub(crate) auth_rejected: AtomicU64,
    pub(crate) demo_fallbacks: AtomicU64,
    pub(crate) positions_accepted: AtomicU64,
    pub(crate) positions_duplicate: AtomicU64,
    pub(crate) positions_rejected: AtomicU64,
    pub(crate) positions_unpersisted: AtomicU64,
    pub(crate) publish_failures: AtomicU64,
    pub(crate) streams_opened: AtomicU64,
    pub(crate) route_optimizations: AtomicU64,
    pub(crate) route_optimize_failures: AtomicU64,
    pub(crate) assignments: AtomicU64,
    pub(crate) completions: AtomicU64,
    pub(crate) degraded_audit: AtomicU64,
    pub(crate) degraded_route_plan: AtomicU64,
    pub(crate) degraded_notification: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MetricsSnapshot {
    auth_rejected: u64,
    demo_fallbacks: u64,
    positions_accepted: u64,
    positions_duplicate: u64,
    positions_rejected: u64,
    positions_unpersisted: u64,
    publish_failures: u64,
    streams_opened: u64,
    active_streams: usize,
    route_optimizations: u64,
    route_optimize_failures: u64,
    assignments: u64,
    completions: u64,
    degraded: DegradedSnapshot,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DegradedSnapshot {
    audit: u64,
    route_plan: u64,
    notification: u64,
}

impl Metrics {
    pub(crate) fn record_degraded(&self, steps: &[Degraded]) {
        for step in steps {
            bump(match step {
                Degraded::Audit => &self.degraded_audit,
                Degraded::RoutePlan => &self.degraded_route_plan,
                Degraded::Notification => &self.degraded_notification,
            });
        }
    }

    pub(crate) fn snapshot(&self, active_streams: usize) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            auth_rejected: get(&self.auth_rejected),
            demo_fallbacks: get(&self.demo_fallbacks),
            positions_accepted: get(&self.positions_accepted),
            positions_duplicate: get(&self.positions_duplicate),
            positions_rejected: get(&self.positions_rejected),
            positions_unpersisted: get(&self.positions_unpersisted),
            publish_failures: get(&self.publish_failures),
            streams_opened: get(&self.streams_opened),
            active_streams,
            route_optimizations: get(&self.route_optimizations),
            route_optimize_failures: get(&self.route_optimize_failures),
            assignments: get(&self.assignments),
            completions: get(&self.completions),
            degraded: DegradedSnapshot {
                audit: get(&self.degraded_audit),
                route_plan: get(&self.degraded_route_plan),
                notification: get(&self.degraded_notification),
            },
        }
    }
}

/// Application state shared across request handlers.
pub(crate) struct AppState {
    pub(crate) storage: Arc<MemoryStorage>,
    pub(crate) tracker: Tracker,
    pub(crate) enforcer: AccessEnforcer,
    /// Access metadata keyed by method and router path pattern.
    pub(crate) policies: PolicyTable,
    pub(crate) planner: Arc<dyn RoutePlanner>,
    pub(crate) orchestrator: AssignmentOrchestrator,
    pub(crate) metrics: Metrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_steps_are_counted_by_label() {
        let m = Metrics::default();
        m.record_degraded(&[Degraded::RoutePlan, Degraded::Notification, Degraded::RoutePlan]);
        bump(&m.assignments);

        let snap = serde_json::to_value(m.snapshot(3)).unwrap();
        assert_eq!(snap["degraded"]["routePlan"], 2);
        assert_eq!(snap["degraded"]["notification"], 1);
        assert_eq!(snap["degraded"]["audit"], 0);
        assert_eq!(snap["assignments"], 1);
        assert_eq!(snap["activeStreams"], 3);
    }
}
