//! In-memory backend implementing every collaborator trait.
//!
//! Each table sits behind its own `tokio::sync::Mutex`, so unrelated tables
//! never contend. Tables can be individually faulted to simulate an
//! unreachable database in tests and demos.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::record::{
    now_rfc3339, AuditRecord, DriverRecord, NewPositionSample, OrderRecord, OrderStatus,
    PositionRecord, PositionWrite, RoutePlanRecord,
};
use crate::traits::{AuditStore, DriverStore, OrderStore, PositionStore, RoutePlanStore};

/// Table selector for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Positions,
    Orders,
    Drivers,
    Audit,
    RoutePlans,
}

/// Position samples of one delivery plus its idempotency index.
#[derive(Default)]
struct DeliveryLog {
    samples: Vec<PositionRecord>,
    /// idempotency key -> index into `samples`.
    by_key: HashMap<String, usize>,
}

#[derive(Default)]
struct PositionTable {
    next_id: i64,
    deliveries: HashMap<String, DeliveryLog>,
}

#[derive(Default)]
struct Faults {
    positions: AtomicBool,
    orders: AtomicBool,
    drivers: AtomicBool,
    audit: AtomicBool,
    route_plans: AtomicBool,
}

impl Faults {
    fn flag(&self, table: Table) -> &AtomicBool {
        match table {
            Table::Positions => &self.positions,
            Table::Orders => &self.orders,
            Table::Drivers => &self.drivers,
            Table::Audit => &self.audit,
            Table::RoutePlans => &self.route_plans,
        }
    }

    fn check(&self, table: Table) -> Result<(), StorageError> {
        if self.flag(table).load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("{:?} table is faulted", table)));
        }
        Ok(())
    }
}

/// Volatile storage; everything is lost on restart.
#[derive(Default)]
pub struct MemoryStorage {
    positions: Mutex<PositionTable>,
    orders: Mutex<BTreeMap<String, OrderRecord>>,
    drivers: Mutex<HashMap<String, DriverRecord>>,
    audit: Mutex<Vec<AuditRecord>>,
    plans: Mutex<HashMap<String, RoutePlanRecord>>,
    faults: Faults,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `table` fail with `StorageError::Unavailable`
    /// until cleared.
    pub fn set_faulted(&self, table: Table, faulted: bool) {
        self.faults.flag(table).store(faulted, Ordering::SeqCst);
    }

    /// Total number of stored position rows across all deliveries.
    pub async fn position_count(&self) -> usize {
        let table = self.positions.lock().await;
        table.deliveries.values().map(|log| log.samples.len()).sum()
    }
}

#[async_trait]
impl PositionStore for MemoryStorage {
    async fn insert_or_get(
        &self,
        sample: NewPositionSample,
    ) -> Result<PositionWrite, StorageError> {
        self.faults.check(Table::Positions)?;

        // Lookup and insert happen under the same guard.
        let mut table = self.positions.lock().await;
        let key = sample.idempotency_key.clone().filter(|k| !k.is_empty());

        if let Some(ref k) = key {
            if let Some(log) = table.deliveries.get(&sample.delivery_id) {
                if let Some(&idx) = log.by_key.get(k) {
                    return Ok(PositionWrite {
                        record: log.samples[idx].clone(),
                        duplicate: true,
                    });
                }
            }
        }

        table.next_id += 1;
        let record = PositionRecord {
            id: table.next_id,
            delivery_id: sample.delivery_id.clone(),
            driver_id: sample.driver_id,
            lat: sample.lat,
            lng: sample.lng,
            speed: sample.speed,
            heading: sample.heading,
            observed_at: sample.observed_at,
            received_at: now_rfc3339(),
            idempotency_key: key.clone(),
        };

        let log = table.deliveries.entry(sample.delivery_id).or_default();
        log.samples.push(record.clone());
        if let Some(k) = key {
            let idx = log.samples.len() - 1;
            log.by_key.insert(k, idx);
        }

        Ok(PositionWrite {
            record,
            duplicate: false,
        })
    }

    async fn most_recent(
        &self,
        delivery_id: &str,
        limit: usize,
    ) -> Result<Vec<PositionRecord>, StorageError> {
        self.faults.check(Table::Positions)?;
        let table = self.positions.lock().await;
        Ok(table
            .deliveries
            .get(delivery_id)
            .map(|log| log.samples.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl OrderStore for MemoryStorage {
    async fn insert_order(&self, order: OrderRecord) -> Result<(), StorageError> {
        self.faults.check(Table::Orders)?;
        self.orders.lock().await.insert(order.id.clone(), order);
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderRecord, StorageError> {
        self.faults.check(Table::Orders)?;
        self.orders
            .lock()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| StorageError::OrderNotFound {
                order_id: order_id.to_string(),
            })
    }

    async fn assign_driver(
        &self,
        order_id: &str,
        driver_id: &str,
    ) -> Result<OrderRecord, StorageError> {
        self.faults.check(Table::Orders)?;
        let mut orders = self.orders.lock().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| StorageError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;

        match order.status {
            OrderStatus::Pending | OrderStatus::Assigned => {}
            from => {
                return Err(StorageError::InvalidTransition {
                    order_id: order_id.to_string(),
                    from,
                    to: OrderStatus::Assigned,
                })
            }
        }

        order.status = OrderStatus::Assigned;
        order.driver_id = Some(driver_id.to_string());
        order.assigned_at = Some(now_rfc3339());
        Ok(order.clone())
    }

    async fn mark_delivered(&self, order_id: &str) -> Result<OrderRecord, StorageError> {
        self.faults.check(Table::Orders)?;
        let mut orders = self.orders.lock().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| StorageError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;

        if order.status != OrderStatus::Assigned {
            return Err(StorageError::InvalidTransition {
                order_id: order_id.to_string(),
                from: order.status,
                to: OrderStatus::Delivered,
            });
        }

        order.status = OrderStatus::Delivered;
        order.delivered_at = Some(now_rfc3339());
        Ok(order.clone())
    }

    async fn orders_for_driver(
        &self,
        driver_id: &str,
        status: Option<OrderStatus>,
    ) -> Result<Vec<OrderRecord>, StorageError> {
        self.faults.check(Table::Orders)?;
        let orders = self.orders.lock().await;
        Ok(orders
            .values()
            .filter(|o| o.driver_id.as_deref() == Some(driver_id))
            .filter(|o| status.map_or(true, |s| o.status == s))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DriverStore for MemoryStorage {
    async fn insert_driver(&self, driver: DriverRecord) -> Result<(), StorageError> {
        self.faults.check(Table::Drivers)?;
        self.drivers.lock().await.insert(driver.id.clone(), driver);
        Ok(())
    }

    async fn get_driver(&self, driver_id: &str) -> Result<DriverRecord, StorageError> {
        self.faults.check(Table::Drivers)?;
        self.drivers
            .lock()
            .await
            .get(driver_id)
            .filter(|d| d.active)
            .cloned()
            .ok_or_else(|| StorageError::DriverNotFound {
                driver_id: driver_id.to_string(),
            })
    }
}

#[async_trait]
impl AuditStore for MemoryStorage {
    async fn append(&self, record: AuditRecord) -> Result<(), StorageError> {
        self.faults.check(Table::Audit)?;
        self.audit.lock().await.push(record);
        Ok(())
    }

    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>, StorageError> {
        self.faults.check(Table::Audit)?;
        let audit = self.audit.lock().await;
        Ok(audit.iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl RoutePlanStore for MemoryStorage {
    async fn save_plan(&self, plan: RoutePlanRecord) -> Result<(), StorageError> {
        self.faults.check(Table::RoutePlans)?;
        self.plans.lock().await.insert(plan.driver_id.clone(), plan);
        Ok(())
    }

    async fn latest_plan(&self, driver_id: &str) -> Result<Option<RoutePlanRecord>, StorageError> {
        self.faults.check(Table::RoutePlans)?;
        Ok(self.plans.lock().await.get(driver_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::run_conformance_suite;

    #[tokio::test]
    async fn memory_storage_passes_conformance() {
        let report = run_conformance_suite(|| async { MemoryStorage::new() }).await;
        assert!(report.failed == 0, "{report}");
        assert!(report.total > 0);
    }

    #[tokio::test]
    async fn faulted_table_fails_only_that_table() {
        let storage = MemoryStorage::new();
        storage
            .insert_driver(DriverRecord {
                id: "d1".into(),
                name: "Asha".into(),
                active: true,
            })
            .await
            .unwrap();

        storage.set_faulted(Table::Audit, true);
        let err = storage
            .append(AuditRecord {
                actor: "admin-1".into(),
                action: "assign_order".into(),
                details: serde_json::json!({}),
                created_at: now_rfc3339(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert!(storage.get_driver("d1").await.is_ok());

        storage.set_faulted(Table::Audit, false);
        assert!(storage.recent_audit(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn inactive_driver_is_not_found() {
        let storage = MemoryStorage::new();
        storage
            .insert_driver(DriverRecord {
                id: "d2".into(),
                name: "Ravi".into(),
                active: false,
            })
            .await
            .unwrap();
        assert!(matches!(
            storage.get_driver("d2").await,
            Err(StorageError::DriverNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn empty_idempotency_key_is_not_indexed() {
        let storage = MemoryStorage::new();
        let sample = NewPositionSample {
            delivery_id: "ord-1".into(),
            driver_id: "d1".into(),
            lat: 1.0,
            lng: 2.0,
            speed: None,
            heading: None,
            observed_at: now_rfc3339(),
            idempotency_key: Some(String::new()),
        };
        let a = storage.insert_or_get(sample.clone()).await.unwrap();
        let b = storage.insert_or_get(sample).await.unwrap();
        assert_ne!(a.record.id, b.record.id);
        assert!(!b.duplicate);
        assert_eq!(a.record.idempotency_key, None);
        assert_eq!(storage.position_count().await, 2);
    }
}
