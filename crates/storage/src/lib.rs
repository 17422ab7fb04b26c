pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{MemoryStorage, Table};
pub use record::{
    now_rfc3339, AuditRecord, DriverRecord, GeoPoint, NewPositionSample, OrderRecord,
    OrderStatus, PositionRecord, PositionWrite, RoutePlanRecord,
};
pub use traits::{AuditStore, DeliveryStorage, DriverStore, OrderStore, PositionStore, RoutePlanStore};
