use crate::record::OrderStatus;

/// All errors that can be returned by a lastmile storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No order with the given id.
    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: String },

    /// No driver with the given id, or the driver is deactivated.
    #[error("driver not found: {driver_id}")]
    DriverNotFound { driver_id: String },

    /// The order's current status does not allow the requested change.
    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// The backend could not be reached at all.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
