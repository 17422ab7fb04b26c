//! Keeps "who delivers what" and "what route they drive" consistent.
//!
//! Only the order mutation is authoritative. Audit, route recompute and the
//! driver notification are best-effort: their failures are logged, reported
//! as [`Degraded`] labels, and never fail the call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lastmile_storage::{
    now_rfc3339, AuditRecord, AuditStore, DriverStore, OrderRecord, OrderStatus, OrderStore,
    RoutePlanRecord, RoutePlanStore,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{AssignError, RecomputeError};
use crate::notify::{NotificationEvent, Notifier};
use crate::planner::{OptimizeRequest, RoutePlanner, RouteStop};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-collaborator call limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorTimeouts {
    pub storage: Duration,
    pub planner: Duration,
    pub notify: Duration,
}

impl Default for OrchestratorTimeouts {
    fn default() -> Self {
        OrchestratorTimeouts {
            storage: DEFAULT_TIMEOUT,
            planner: DEFAULT_TIMEOUT,
            notify: DEFAULT_TIMEOUT,
        }
    }
}

impl OrchestratorTimeouts {
    pub fn uniform(limit: Duration) -> Self {
        OrchestratorTimeouts {
            storage: limit,
            planner: limit,
            notify: limit,
        }
    }
}

pub struct Collaborators {
    pub orders: Arc<dyn OrderStore>,
    pub drivers: Arc<dyn DriverStore>,
    pub audit: Arc<dyn AuditStore>,
    pub plans: Arc<dyn RoutePlanStore>,
    pub planner: Arc<dyn RoutePlanner>,
    pub notifier: Arc<dyn Notifier>,
}

/// A best-effort step that did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Degraded {
    Audit,
    RoutePlan,
    Notification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    Delivered,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    pub stop_count: usize,
    pub total_distance_km: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration_sec: Option<u64>,
    pub provider: String,
    pub computed_at: String,
}

impl From<&RoutePlanRecord> for RouteSummary {
    fn from(plan: &RoutePlanRecord) -> Self {
        RouteSummary {
            stop_count: plan.sequence.len(),
            total_distance_km: plan.total_distance_km,
            estimated_duration_sec: plan.estimated_duration_sec,
            provider: plan.provider.clone(),
            computed_at: plan.computed_at.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResult {
    pub order_id: String,
    pub driver_id: String,
    pub status: AssignmentStatus,
    /// `None` when the route could not be recomputed.
    pub route_summary: Option<RouteSummary>,
    #[serde(skip)]
    pub degraded: Vec<Degraded>,
}

pub struct AssignmentOrchestrator {
    deps: Collaborators,
    timeouts: OrchestratorTimeouts,
    tracking_base: Option<String>,
}

async fn bounded<T, E>(
    limit: Duration,
    fut: impl Future<Output = Result<T, E>>,
) -> Option<Result<T, E>> {
    tokio::time::timeout(limit, fut).await.ok()
}

impl AssignmentOrchestrator {
    pub fn new(deps: Collaborators) -> Self {
        AssignmentOrchestrator {
            deps,
            timeouts: OrchestratorTimeouts::default(),
            tracking_base: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: OrchestratorTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Public base URL used to build tracking links, e.g. `https://host`.
    pub fn with_tracking_base(mut self, base: impl Into<String>) -> Self {
        self.tracking_base = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    /// `<base>/track/<order>/sse`, when a base is configured.
    pub fn tracking_url(&self, order_id: &str) -> Option<String> {
        self.tracking_base
            .as_ref()
            .map(|base| format!("{}/track/{}/sse", base, order_id))
    }

    /// Bind an order to a driver, then audit, re-plan and notify.
    ///
    /// Reassigning away from another driver also re-plans that driver's
    /// route and tells them it changed.
    pub async fn assign(
        &self,
        order_id: &str,
        driver_id: &str,
        actor: &str,
    ) -> Result<AssignmentResult, AssignError> {
        let limit = self.timeouts.storage;
        bounded(limit, self.deps.drivers.get_driver(driver_id))
            .await
            .ok_or(AssignError::Timeout("driver lookup", limit))??;

        let previous = bounded(limit, self.deps.orders.get_order(order_id))
            .await
            .ok_or(AssignError::Timeout("order lookup", limit))??
            .driver_id;

        let order = bounded(limit, self.deps.orders.assign_driver(order_id, driver_id))
            .await
            .ok_or(AssignError::Timeout("order assignment", limit))??;
        info!(order_id, driver_id, actor, "order assigned");

        let mut degraded = Vec::new();
        self.audit(
            actor,
            "assign_order",
            json!({ "orderId": order_id, "driverId": driver_id }),
            &mut degraded,
        )
        .await;
        let route_summary = self.replan(driver_id, &mut degraded).await;
        self.notify(
            driver_id,
            NotificationEvent::Assignment {
                order_id: order.id.clone(),
                tracking_url: self.tracking_url(&order.id),
            },
            &mut degraded,
        )
        .await;
        if let Some(previous) = previous.filter(|p| p != driver_id) {
            self.release(&previous, &mut degraded).await;
        }

        Ok(AssignmentResult {
            order_id: order.id,
            driver_id: driver_id.to_string(),
            status: AssignmentStatus::Assigned,
            route_summary,
            degraded,
        })
    }

    /// Mark an assigned order delivered.
    ///
    /// With `driver_scope` set, the order must belong to that driver.
    pub async fn complete(
        &self,
        order_id: &str,
        actor: &str,
        driver_scope: Option<&str>,
    ) -> Result<AssignmentResult, AssignError> {
        let limit = self.timeouts.storage;
        let order: OrderRecord = bounded(limit, self.deps.orders.get_order(order_id))
            .await
            .ok_or(AssignError::Timeout("order lookup", limit))??;

        let Some(driver_id) = order.driver_id.clone() else {
            return Err(AssignError::InvalidState(format!(
                "order '{}' is {} and has no driver",
                order_id, order.status
            )));
        };
        if let Some(scope) = driver_scope {
            if scope != driver_id {
                return Err(AssignError::Forbidden(format!(
                    "order '{}' is not assigned to driver '{}'",
                    order_id, scope
                )));
            }
        }

        bounded(limit, self.deps.orders.mark_delivered(order_id))
            .await
            .ok_or(AssignError::Timeout("order completion", limit))??;
        info!(order_id, driver_id = %driver_id, actor, "order delivered");

        let mut degraded = Vec::new();
        self.audit(
            actor,
            "complete_delivery",
            json!({ "orderId": order_id, "driverId": driver_id }),
            &mut degraded,
        )
        .await;
        let route_summary = self.replan(&driver_id, &mut degraded).await;
        self.notify(
            &driver_id,
            NotificationEvent::DeliveryCompleted {
                order_id: order_id.to_string(),
            },
            &mut degraded,
        )
        .await;

        Ok(AssignmentResult {
            order_id: order_id.to_string(),
            driver_id,
            status: AssignmentStatus::Delivered,
            route_summary,
            degraded,
        })
    }

    /// Plan a route over the driver's assigned drop-offs and store it.
    ///
    /// A driver with nothing assigned gets an empty plan without consulting
    /// the planner.
    pub async fn recompute_route(&self, driver_id: &str) -> Result<RoutePlanRecord, RecomputeError> {
        let storage = self.timeouts.storage;
        let orders = bounded(
            storage,
            self.deps
                .orders
                .orders_for_driver(driver_id, Some(OrderStatus::Assigned)),
        )
        .await
        .ok_or(RecomputeError::Timeout("order listing", storage))?
        .map_err(RecomputeError::Orders)?;

        let plan = if orders.is_empty() {
            RoutePlanRecord {
                driver_id: driver_id.to_string(),
                sequence: Vec::new(),
                polyline: None,
                total_distance_km: 0.0,
                estimated_duration_sec: Some(0),
                eta_per_stop: Some(Vec::new()),
                provider: "empty".to_string(),
                computed_at: now_rfc3339(),
            }
        } else {
            let request = OptimizeRequest {
                driver_id: driver_id.to_string(),
                stops: orders
                    .iter()
                    .map(|o| RouteStop {
                        lat: o.dropoff.lat,
                        lng: o.dropoff.lng,
                        order_id: Some(o.id.clone()),
                    })
                    .collect(),
                origin: None,
            };
            let limit = self.timeouts.planner;
            let planned = bounded(limit, self.deps.planner.optimize(&request))
                .await
                .ok_or(RecomputeError::Timeout("route planner", limit))??;
            RoutePlanRecord {
                driver_id: driver_id.to_string(),
                sequence: planned
                    .sequence
                    .iter()
                    .map(|&i| orders[i].id.clone())
                    .collect(),
                polyline: planned.polyline,
                total_distance_km: planned.total_distance_km,
                estimated_duration_sec: planned.estimated_duration_sec,
                eta_per_stop: planned.eta_per_stop,
                provider: planned.provider,
                computed_at: now_rfc3339(),
            }
        };

        bounded(storage, self.deps.plans.save_plan(plan.clone()))
            .await
            .ok_or(RecomputeError::Timeout("route plan save", storage))?
            .map_err(RecomputeError::Save)?;
        Ok(plan)
    }

    async fn audit(
        &self,
        actor: &str,
        action: &str,
        details: serde_json::Value,
        degraded: &mut Vec<Degraded>,
    ) {
        let record = AuditRecord {
            actor: actor.to_string(),
            action: action.to_string(),
            details,
            created_at: now_rfc3339(),
        };
        match bounded(self.timeouts.storage, self.deps.audit.append(record)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(action, error = %e, "audit append degraded");
                degraded.push(Degraded::Audit);
            }
            None => {
                warn!(action, "audit append timed out");
                degraded.push(Degraded::Audit);
            }
        }
    }

    async fn replan(&self, driver_id: &str, degraded: &mut Vec<Degraded>) -> Option<RouteSummary> {
        match self.recompute_route(driver_id).await {
            Ok(plan) => Some(RouteSummary::from(&plan)),
            Err(e) => {
                warn!(driver_id, error = %e, "route recompute degraded");
                degraded.push(Degraded::RoutePlan);
                None
            }
        }
    }

    async fn release(&self, driver_id: &str, degraded: &mut Vec<Degraded>) {
        info!(driver_id, "re-planning route after reassignment");
        if let Some(summary) = self.replan(driver_id, degraded).await {
            let event = NotificationEvent::RouteUpdated {
                stop_count: summary.stop_count,
                provider: summary.provider,
            };
            self.notify(driver_id, event, degraded).await;
        }
    }

    async fn notify(&self, driver_id: &str, event: NotificationEvent, degraded: &mut Vec<Degraded>) {
        match bounded(self.timeouts.notify, self.deps.notifier.notify(driver_id, &event)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(driver_id, error = %e, "driver notification degraded");
                degraded.push(Degraded::Notification);
            }
            None => {
                warn!(driver_id, "driver notification timed out");
                degraded.push(Degraded::Notification);
            }
        }
    }
}
