use std::future::Future;
use std::sync::Arc;

use super::{make_order, make_sample, TestResult};
use crate::DeliveryStorage;

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "racing_duplicates_collapse_to_one_row",
            racing_duplicates_collapse_to_one_row(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "parallel_deliveries_do_not_interfere",
            parallel_deliveries_do_not_interfere(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "racing_assignments_leave_one_binding",
            racing_assignments_leave_one_binding(factory).await,
        ),
    ]
}

/// N tasks submit the same `(delivery, key)` at once. Exactly one row is
/// stored and every task sees its id.
async fn racing_duplicates_collapse_to_one_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            s.insert_or_get(make_sample("ord-1", Some("retry-1"), i as f64))
                .await
        }));
    }

    let mut ids = Vec::new();
    let mut fresh = 0;
    for h in handles {
        let w = h
            .await
            .map_err(|e| format!("join: {e}"))?
            .map_err(|e| format!("insert: {e}"))?;
        if !w.duplicate {
            fresh += 1;
        }
        ids.push(w.record.id);
    }

    if fresh != 1 {
        return Err(format!("expected exactly 1 fresh insert, got {fresh}"));
    }
    if ids.iter().any(|id| *id != ids[0]) {
        return Err(format!("callers saw different ids: {:?}", ids));
    }
    let rows = storage
        .most_recent("ord-1", N * 2)
        .await
        .map_err(|e| e.to_string())?;
    if rows.len() != 1 {
        return Err(format!("expected 1 stored row, found {}", rows.len()));
    }
    Ok(())
}

async fn parallel_deliveries_do_not_interfere<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let delivery = format!("ord-{i}");
            for _ in 0..3 {
                s.insert_or_get(make_sample(&delivery, None, 1.0)).await?;
            }
            s.most_recent(&delivery, 10).await
        }));
    }

    for h in handles {
        let rows = h
            .await
            .map_err(|e| format!("join: {e}"))?
            .map_err(|e| e.to_string())?;
        if rows.len() != 3 {
            return Err(format!("expected 3 rows per delivery, found {}", rows.len()));
        }
    }
    Ok(())
}

async fn racing_assignments_leave_one_binding<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    storage
        .insert_order(make_order("o-1"))
        .await
        .map_err(|e| e.to_string())?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            s.assign_driver("o-1", &format!("d-{i}")).await
        }));
    }
    for h in handles {
        h.await
            .map_err(|e| format!("join: {e}"))?
            .map_err(|e| format!("assign: {e}"))?;
    }

    let order = storage.get_order("o-1").await.map_err(|e| e.to_string())?;
    match order.driver_id {
        Some(ref d) if d.starts_with("d-") => Ok(()),
        other => Err(format!("expected a single driver binding, got {:?}", other)),
    }
}
