use std::future::Future;

use super::{make_sample, TestResult};
use crate::DeliveryStorage;

pub(super) async fn run_position_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "positions",
            "duplicate_key_returns_first_row",
            duplicate_key_returns_first_row(factory).await,
        ),
        TestResult::from_result(
            "positions",
            "same_key_different_delivery_is_distinct",
            same_key_different_delivery_is_distinct(factory).await,
        ),
        TestResult::from_result(
            "positions",
            "unkeyed_samples_always_insert",
            unkeyed_samples_always_insert(factory).await,
        ),
        TestResult::from_result(
            "positions",
            "most_recent_is_newest_first",
            most_recent_is_newest_first(factory).await,
        ),
        TestResult::from_result(
            "positions",
            "most_recent_unknown_delivery_is_empty",
            most_recent_unknown_delivery_is_empty(factory).await,
        ),
    ]
}

async fn duplicate_key_returns_first_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let first = storage
        .insert_or_get(make_sample("ord-1", Some("k1"), 12.97))
        .await
        .map_err(|e| format!("first insert: {e}"))?;
    // Same key, different payload: the first row still wins.
    let second = storage
        .insert_or_get(make_sample("ord-1", Some("k1"), 13.50))
        .await
        .map_err(|e| format!("second insert: {e}"))?;

    if first.duplicate {
        return Err("first insert reported as duplicate".into());
    }
    if !second.duplicate {
        return Err("second insert not reported as duplicate".into());
    }
    if second.record != first.record {
        return Err(format!(
            "expected first row back, got id {} lat {}",
            second.record.id, second.record.lat
        ));
    }

    let rows = storage
        .most_recent("ord-1", 10)
        .await
        .map_err(|e| format!("most_recent: {e}"))?;
    if rows.len() != 1 {
        return Err(format!("expected 1 row, found {}", rows.len()));
    }
    Ok(())
}

async fn same_key_different_delivery_is_distinct<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let a = storage
        .insert_or_get(make_sample("ord-1", Some("k1"), 1.0))
        .await
        .map_err(|e| e.to_string())?;
    let b = storage
        .insert_or_get(make_sample("ord-2", Some("k1"), 1.0))
        .await
        .map_err(|e| e.to_string())?;
    if b.duplicate || a.record.id == b.record.id {
        return Err("idempotency key leaked across deliveries".into());
    }
    Ok(())
}

async fn unkeyed_samples_always_insert<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    for _ in 0..3 {
        let w = storage
            .insert_or_get(make_sample("ord-1", None, 1.0))
            .await
            .map_err(|e| e.to_string())?;
        if w.duplicate {
            return Err("unkeyed sample reported as duplicate".into());
        }
    }
    let rows = storage
        .most_recent("ord-1", 10)
        .await
        .map_err(|e| e.to_string())?;
    if rows.len() != 3 {
        return Err(format!("expected 3 rows, found {}", rows.len()));
    }
    Ok(())
}

async fn most_recent_is_newest_first<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut ids = Vec::new();
    for i in 0..5 {
        let mut sample = make_sample("ord-1", None, i as f64);
        // Client clocks run backwards here; arrival order must still win.
        sample.observed_at = format!("2025-01-01T00:00:0{}Z", 9 - i);
        let w = storage
            .insert_or_get(sample)
            .await
            .map_err(|e| e.to_string())?;
        ids.push(w.record.id);
    }

    let rows = storage
        .most_recent("ord-1", 2)
        .await
        .map_err(|e| e.to_string())?;
    let got: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let want = vec![ids[4], ids[3]];
    if got != want {
        return Err(format!("expected {:?}, got {:?}", want, got));
    }
    Ok(())
}

async fn most_recent_unknown_delivery_is_empty<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let rows = storage
        .most_recent("nope", 5)
        .await
        .map_err(|e| e.to_string())?;
    if !rows.is_empty() {
        return Err(format!("expected no rows, found {}", rows.len()));
    }
    Ok(())
}
