use std::fmt;

use serde::{Deserialize, Serialize};

/// Current UTC time as an RFC 3339 string.
pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// A position sample as submitted by a driver client, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPositionSample {
    pub delivery_id: String,
    pub driver_id: String,
    pub lat: f64,
    pub lng: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    /// Client-reported observation time. ISO 8601 / RFC 3339 timestamp string.
    /// Display only; never used for ordering.
    pub observed_at: String,
    pub idempotency_key: Option<String>,
}

/// A stored position sample.
///
/// `id` comes from a per-store increasing sequence, so comparing ids of two
/// samples of the same delivery gives their arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRecord {
    pub id: i64,
    pub delivery_id: String,
    pub driver_id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    pub observed_at: String,
    /// Server receive time. ISO 8601 / RFC 3339 timestamp string.
    pub received_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Outcome of an idempotent position insert.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionWrite {
    pub record: PositionRecord,
    /// True when an earlier sample with the same idempotency key was returned
    /// instead of inserting a new row.
    pub duplicate: bool,
}

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Assigned,
    Delivered,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Assigned => "assigned",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub driver_id: Option<String>,
    pub dropoff: GeoPoint,
    #[serde(default)]
    pub assigned_at: Option<String>,
    #[serde(default)]
    pub delivered_at: Option<String>,
}

impl OrderRecord {
    /// A fresh, unassigned order.
    pub fn pending(id: impl Into<String>, dropoff: GeoPoint) -> Self {
        OrderRecord {
            id: id.into(),
            status: OrderStatus::Pending,
            driver_id: None,
            dropoff,
            assigned_at: None,
            delivered_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub id: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// An append-only audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub actor: String,
    pub action: String,
    pub details: serde_json::Value,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
}

/// The latest computed route for a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlanRecord {
    pub driver_id: String,
    /// Order ids in visiting order.
    pub sequence: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polyline: Option<String>,
    pub total_distance_km: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration_sec: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_per_stop: Option<Vec<u64>>,
    /// Which planner produced the plan (`"vendor"`, `"fallback"`, `"empty"`).
    pub provider: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub computed_at: String,
}
