use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{
    AuditRecord, DriverRecord, NewPositionSample, OrderRecord, OrderStatus, PositionRecord,
    PositionWrite, RoutePlanRecord,
};

/// Durable storage for driver position samples.
///
/// ## Idempotency
///
/// `insert_or_get` must perform its duplicate check and its insert as one
/// atomic step (a unique constraint on `(delivery_id, idempotency_key)` or a
/// single critical section). Two concurrent submissions with the same
/// non-empty key must produce exactly one row, and both callers must observe
/// that row's id.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be used in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait PositionStore: Send + Sync + 'static {
    /// Insert a sample, or return the existing row when the sample carries a
    /// non-empty idempotency key already seen for its delivery.
    async fn insert_or_get(&self, sample: NewPositionSample)
        -> Result<PositionWrite, StorageError>;

    /// The last `limit` samples of a delivery in insertion order, newest first.
    async fn most_recent(
        &self,
        delivery_id: &str,
        limit: usize,
    ) -> Result<Vec<PositionRecord>, StorageError>;
}

/// The slice of the orders collaborator the dispatch core depends on.
#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    /// Create or replace an order. Used for seeding.
    async fn insert_order(&self, order: OrderRecord) -> Result<(), StorageError>;

    /// Returns `Err(StorageError::OrderNotFound)` if the order does not exist.
    async fn get_order(&self, order_id: &str) -> Result<OrderRecord, StorageError>;

    /// Bind an order to a driver, moving it to `Assigned`.
    ///
    /// Pending and already-assigned orders may be (re)bound; delivered or
    /// cancelled orders return `Err(StorageError::InvalidTransition)`.
    async fn assign_driver(
        &self,
        order_id: &str,
        driver_id: &str,
    ) -> Result<OrderRecord, StorageError>;

    /// Move an assigned order to `Delivered`.
    async fn mark_delivered(&self, order_id: &str) -> Result<OrderRecord, StorageError>;

    /// All orders bound to a driver, optionally filtered by status, in id order.
    async fn orders_for_driver(
        &self,
        driver_id: &str,
        status: Option<OrderStatus>,
    ) -> Result<Vec<OrderRecord>, StorageError>;
}

#[async_trait]
pub trait DriverStore: Send + Sync + 'static {
    /// Create or replace a driver. Used for seeding.
    async fn insert_driver(&self, driver: DriverRecord) -> Result<(), StorageError>;

    /// Returns `Err(StorageError::DriverNotFound)` for unknown or inactive drivers.
    async fn get_driver(&self, driver_id: &str) -> Result<DriverRecord, StorageError>;
}

/// Append-only audit trail. There is deliberately no update or delete.
#[async_trait]
pub trait AuditStore: Send + Sync + 'static {
    async fn append(&self, record: AuditRecord) -> Result<(), StorageError>;

    /// The last `limit` records, newest first.
    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>, StorageError>;
}

/// Latest-wins store of computed route plans, one per driver.
#[async_trait]
pub trait RoutePlanStore: Send + Sync + 'static {
    async fn save_plan(&self, plan: RoutePlanRecord) -> Result<(), StorageError>;

    async fn latest_plan(&self, driver_id: &str) -> Result<Option<RoutePlanRecord>, StorageError>;
}

/// A backend implementing every collaborator trait.
pub trait DeliveryStorage:
    PositionStore + OrderStore + DriverStore + AuditStore + RoutePlanStore
{
}

impl<T> DeliveryStorage for T where
    T: PositionStore + OrderStore + DriverStore + AuditStore + RoutePlanStore
{
}
