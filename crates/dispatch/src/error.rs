use std::time::Duration;

use lastmile_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("route request invalid: {0}")]
    InvalidRequest(String),

    #[error("route vendor unreachable: {0}")]
    Unreachable(String),

    #[error("route vendor timed out after {0:?}")]
    Timeout(Duration),

    #[error("route vendor returned an unusable plan: {0}")]
    BadResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("notification timed out after {0:?}")]
    Timeout(Duration),
}

/// Why a route recompute produced no fresh plan.
#[derive(Debug, thiserror::Error)]
pub enum RecomputeError {
    #[error("could not load driver orders: {0}")]
    Orders(StorageError),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error("could not store route plan: {0}")]
    Save(StorageError),

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
}

/// Failures of the authoritative step of an orchestration call.
#[derive(Debug, thiserror::Error)]
pub enum AssignError {
    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("driver not found: {0}")]
    DriverNotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for AssignError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::OrderNotFound { order_id } => AssignError::OrderNotFound(order_id),
            StorageError::DriverNotFound { driver_id } => AssignError::DriverNotFound(driver_id),
            e @ StorageError::InvalidTransition { .. } => AssignError::InvalidState(e.to_string()),
            other => AssignError::Storage(other),
        }
    }
}
