use std::future::Future;

use super::{make_order, TestResult};
use crate::record::{now_rfc3339, AuditRecord, OrderStatus, RoutePlanRecord};
use crate::{DeliveryStorage, StorageError};

pub(super) async fn run_order_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "orders",
            "assign_binds_driver",
            assign_binds_driver(factory).await,
        ),
        TestResult::from_result(
            "orders",
            "assign_unknown_order_is_not_found",
            assign_unknown_order_is_not_found(factory).await,
        ),
        TestResult::from_result(
            "orders",
            "delivered_order_cannot_be_reassigned",
            delivered_order_cannot_be_reassigned(factory).await,
        ),
        TestResult::from_result(
            "orders",
            "pending_order_cannot_be_delivered",
            pending_order_cannot_be_delivered(factory).await,
        ),
        TestResult::from_result(
            "orders",
            "orders_for_driver_filters_status",
            orders_for_driver_filters_status(factory).await,
        ),
        TestResult::from_result(
            "orders",
            "audit_is_append_only_newest_first",
            audit_is_append_only_newest_first(factory).await,
        ),
        TestResult::from_result(
            "orders",
            "route_plan_latest_wins",
            route_plan_latest_wins(factory).await,
        ),
    ]
}

async fn assign_binds_driver<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    storage
        .insert_order(make_order("o-1"))
        .await
        .map_err(|e| e.to_string())?;
    let updated = storage
        .assign_driver("o-1", "d-1")
        .await
        .map_err(|e| format!("assign: {e}"))?;
    let read = storage.get_order("o-1").await.map_err(|e| e.to_string())?;

    if updated.status != OrderStatus::Assigned || read.status != OrderStatus::Assigned {
        return Err(format!("expected assigned, got {}", read.status));
    }
    if read.driver_id.as_deref() != Some("d-1") {
        return Err(format!("expected driver d-1, got {:?}", read.driver_id));
    }
    if read.assigned_at.is_none() {
        return Err("assigned_at not set".into());
    }
    Ok(())
}

async fn assign_unknown_order_is_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    match storage.assign_driver("ghost", "d-1").await {
        Err(StorageError::OrderNotFound { order_id }) if order_id == "ghost" => Ok(()),
        other => Err(format!("expected OrderNotFound, got {:?}", other)),
    }
}

async fn delivered_order_cannot_be_reassigned<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    storage
        .insert_order(make_order("o-1"))
        .await
        .map_err(|e| e.to_string())?;
    storage
        .assign_driver("o-1", "d-1")
        .await
        .map_err(|e| e.to_string())?;
    storage
        .mark_delivered("o-1")
        .await
        .map_err(|e| format!("deliver: {e}"))?;

    match storage.assign_driver("o-1", "d-2").await {
        Err(StorageError::InvalidTransition { from, to, .. })
            if from == OrderStatus::Delivered && to == OrderStatus::Assigned =>
        {
            Ok(())
        }
        other => Err(format!("expected InvalidTransition, got {:?}", other)),
    }
}

async fn pending_order_cannot_be_delivered<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    storage
        .insert_order(make_order("o-1"))
        .await
        .map_err(|e| e.to_string())?;
    match storage.mark_delivered("o-1").await {
        Err(StorageError::InvalidTransition { from, .. }) if from == OrderStatus::Pending => Ok(()),
        other => Err(format!("expected InvalidTransition, got {:?}", other)),
    }
}

async fn orders_for_driver_filters_status<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    for id in ["o-1", "o-2", "o-3"] {
        storage
            .insert_order(make_order(id))
            .await
            .map_err(|e| e.to_string())?;
        storage
            .assign_driver(id, "d-1")
            .await
            .map_err(|e| e.to_string())?;
    }
    storage
        .mark_delivered("o-2")
        .await
        .map_err(|e| e.to_string())?;

    let active = storage
        .orders_for_driver("d-1", Some(OrderStatus::Assigned))
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = active.iter().map(|o| o.id.as_str()).collect();
    if ids != ["o-1", "o-3"] {
        return Err(format!("expected [o-1, o-3], got {:?}", ids));
    }

    let all = storage
        .orders_for_driver("d-1", None)
        .await
        .map_err(|e| e.to_string())?;
    if all.len() != 3 {
        return Err(format!("expected 3 orders, got {}", all.len()));
    }
    Ok(())
}

async fn audit_is_append_only_newest_first<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    for action in ["assign_order", "complete_delivery"] {
        storage
            .append(AuditRecord {
                actor: "admin-1".into(),
                action: action.into(),
                details: serde_json::json!({"orderId": "o-1"}),
                created_at: now_rfc3339(),
            })
            .await
            .map_err(|e| e.to_string())?;
    }
    let recent = storage.recent_audit(10).await.map_err(|e| e.to_string())?;
    let actions: Vec<&str> = recent.iter().map(|r| r.action.as_str()).collect();
    if actions != ["complete_delivery", "assign_order"] {
        return Err(format!("unexpected audit order: {:?}", actions));
    }
    Ok(())
}

async fn route_plan_latest_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    for (seq, provider) in [(vec!["o-1"], "fallback"), (vec!["o-2", "o-1"], "vendor")] {
        storage
            .save_plan(RoutePlanRecord {
                driver_id: "d-1".into(),
                sequence: seq.into_iter().map(String::from).collect(),
                polyline: None,
                total_distance_km: 1.0,
                estimated_duration_sec: None,
                eta_per_stop: None,
                provider: provider.into(),
                computed_at: now_rfc3339(),
            })
            .await
            .map_err(|e| e.to_string())?;
    }
    let plan = storage
        .latest_plan("d-1")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("no plan stored")?;
    if plan.provider != "vendor" || plan.sequence != ["o-2", "o-1"] {
        return Err(format!("stale plan returned: {:?}", plan));
    }
    if storage
        .latest_plan("d-2")
        .await
        .map_err(|e| e.to_string())?
        .is_some()
    {
        return Err("plan returned for unknown driver".into());
    }
    Ok(())
}
