//! Conformance test suite for lastmile storage backends.
//!
//! This module provides a backend-agnostic test suite that any
//! [`DeliveryStorage`] implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Positions**: idempotent inserts, arrival ordering, per-delivery isolation
//! - **Orders**: binding, completion, status transitions, driver lookups
//! - **Concurrency**: racing duplicate submissions collapse to one row
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use lastmile_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod orders;
mod positions;

use std::fmt;
use std::future::Future;

use crate::record::{GeoPoint, NewPositionSample, OrderRecord};
use crate::DeliveryStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "positions", "orders").
    pub category: String,
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in self.results.iter().filter(|r| !r.passed) {
            writeln!(
                f,
                "  FAIL [{}/{}]: {}",
                r.category,
                r.name,
                r.message.as_deref().unwrap_or("(no message)")
            )?;
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: DeliveryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(positions::run_position_tests(&factory).await);
    results.extend(orders::run_order_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_sample(delivery_id: &str, key: Option<&str>, lat: f64) -> NewPositionSample {
    NewPositionSample {
        delivery_id: delivery_id.to_string(),
        driver_id: "driver-1".to_string(),
        lat,
        lng: 77.59,
        speed: Some(8.5),
        heading: None,
        observed_at: "2025-01-01T00:00:00Z".to_string(),
        idempotency_key: key.map(str::to_string),
    }
}

fn make_order(id: &str) -> OrderRecord {
    OrderRecord::pending(
        id,
        GeoPoint {
            lat: 12.97,
            lng: 77.59,
        },
    )
}
