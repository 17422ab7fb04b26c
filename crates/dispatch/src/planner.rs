//! Route planning: the vendor contract, an HTTP client for it, and the
//! fallback planner used when no vendor is configured.

use std::time::Duration;

use async_trait::async_trait;
use lastmile_storage::GeoPoint;
use serde::{Deserialize, Serialize};

use crate::error::PlannerError;

/// Assumed average urban driving speed for fallback estimates.
const FALLBACK_SPEED_KMH: f64 = 25.0;

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStop {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRequest {
    pub driver_id: String,
    pub stops: Vec<RouteStop>,
    /// Where the driver starts; the first stop when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<GeoPoint>,
}

impl OptimizeRequest {
    pub fn validate(&self) -> Result<(), PlannerError> {
        if self.driver_id.trim().is_empty() {
            return Err(PlannerError::InvalidRequest("driverId is required".into()));
        }
        for (i, s) in self.stops.iter().enumerate() {
            let ok = s.lat.is_finite()
                && s.lng.is_finite()
                && (-90.0..=90.0).contains(&s.lat)
                && (-180.0..=180.0).contains(&s.lng);
            if !ok {
                return Err(PlannerError::InvalidRequest(format!(
                    "stop {} has invalid coordinates",
                    i
                )));
            }
        }
        Ok(())
    }
}

/// A planned route. `sequence` holds indices into the request's stops in
/// visiting order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedRoute {
    pub sequence: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polyline: Option<String>,
    pub total_distance_km: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration_sec: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_per_stop: Option<Vec<u64>>,
    /// `"vendor"` or `"fallback"`.
    pub provider: String,
}

#[async_trait]
pub trait RoutePlanner: Send + Sync {
    async fn optimize(&self, request: &OptimizeRequest) -> Result<PlannedRoute, PlannerError>;
}

fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Local greedy nearest-neighbour planner. Clearly marked as
/// `provider: "fallback"` so nobody mistakes it for an optimized route.
#[derive(Debug, Default, Clone)]
pub struct FallbackPlanner;

#[async_trait]
impl RoutePlanner for FallbackPlanner {
    async fn optimize(&self, request: &OptimizeRequest) -> Result<PlannedRoute, PlannerError> {
        request.validate()?;
        let points: Vec<GeoPoint> = request
            .stops
            .iter()
            .map(|s| GeoPoint { lat: s.lat, lng: s.lng })
            .collect();

        let mut remaining: Vec<usize> = (0..points.len()).collect();
        let mut sequence = Vec::with_capacity(points.len());
        let mut eta = Vec::with_capacity(points.len());
        let mut here = request.origin.or_else(|| points.first().copied());
        let mut total_km = 0.0;

        while let Some(pos) = here {
            let Some((slot, &next)) = remaining.iter().enumerate().min_by(|a, b| {
                haversine_km(pos, points[*a.1]).total_cmp(&haversine_km(pos, points[*b.1]))
            }) else {
                break;
            };
            total_km += haversine_km(pos, points[next]);
            eta.push((total_km / FALLBACK_SPEED_KMH * 3600.0).round() as u64);
            sequence.push(next);
            remaining.swap_remove(slot);
            here = Some(points[next]);
        }

        Ok(PlannedRoute {
            sequence,
            polyline: None,
            total_distance_km: (total_km * 1000.0).round() / 1000.0,
            estimated_duration_sec: eta.last().copied().or(Some(0)),
            eta_per_stop: Some(eta),
            provider: "fallback".to_string(),
        })
    }
}

/// One entry of a vendor `sequence`: a stop index or an order id.
#[derive(Deserialize)]
#[serde(untagged)]
enum SequenceEntry {
    Index(usize),
    OrderId(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VendorResponse {
    sequence: Vec<SequenceEntry>,
    #[serde(default)]
    polyline: Option<String>,
    total_distance_km: f64,
    #[serde(default)]
    estimated_duration_sec: Option<u64>,
    #[serde(default)]
    eta_per_stop: Option<Vec<u64>>,
}

impl VendorResponse {
    /// Normalize the vendor sequence to a permutation of stop indices.
    fn into_planned(self, request: &OptimizeRequest) -> Result<PlannedRoute, PlannerError> {
        let n = request.stops.len();
        let mut seen = vec![false; n];
        let mut sequence = Vec::with_capacity(n);
        for entry in self.sequence {
            let idx = match entry {
                SequenceEntry::Index(i) => i,
                SequenceEntry::OrderId(id) => request
                    .stops
                    .iter()
                    .position(|s| s.order_id.as_deref() == Some(id.as_str()))
                    .ok_or_else(|| PlannerError::BadResponse(format!("unknown order '{}'", id)))?,
            };
            if idx >= n || seen[idx] {
                return Err(PlannerError::BadResponse(format!(
                    "sequence entry {} is out of range or repeated",
                    idx
                )));
            }
            seen[idx] = true;
            sequence.push(idx);
        }
        if sequence.len() != n {
            return Err(PlannerError::BadResponse(format!(
                "sequence covers {} of {} stops",
                sequence.len(),
                n
            )));
        }
        Ok(PlannedRoute {
            sequence,
            polyline: self.polyline,
            total_distance_km: self.total_distance_km,
            estimated_duration_sec: self.estimated_duration_sec,
            eta_per_stop: self.eta_per_stop,
            provider: "vendor".to_string(),
        })
    }
}

/// Client for the third-party routing vendor.
///
/// Uses `ureq` (sync) wrapped in `tokio::task::spawn_blocking`, bounded by
/// the agent timeout and an outer `tokio::time::timeout`.
pub struct HttpRoutePlanner {
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpRoutePlanner {
    pub fn new(url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        HttpRoutePlanner {
            url: url.into(),
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl RoutePlanner for HttpRoutePlanner {
    async fn optimize(&self, request: &OptimizeRequest) -> Result<PlannedRoute, PlannerError> {
        request.validate()?;

        let url = self.url.clone();
        let api_key = self.api_key.clone();
        let timeout = self.timeout;
        let body = serde_json::to_value(request)
            .map_err(|e| PlannerError::InvalidRequest(e.to_string()))?;

        let task = tokio::task::spawn_blocking(move || {
            let agent: ureq::Agent = ureq::Agent::config_builder()
                .timeout_global(Some(timeout))
                .build()
                .into();

            let mut req = agent.post(&url);
            if let Some(ref key) = api_key {
                let auth = format!("Bearer {}", key);
                req = req.header("Authorization", auth.as_str());
            }

            let response = req
                .send_json(&body)
                .map_err(|e| PlannerError::Unreachable(e.to_string()))?;
            response
                .into_body()
                .read_json::<VendorResponse>()
                .map_err(|e| PlannerError::BadResponse(e.to_string()))
        });

        let vendor = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => {
                return Err(PlannerError::Unreachable(format!("task join error: {}", join)))
            }
            Err(_) => return Err(PlannerError::Timeout(timeout)),
        };
        vendor.into_planned(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(lat: f64, lng: f64, id: &str) -> RouteStop {
        RouteStop {
            lat,
            lng,
            order_id: Some(id.to_string()),
        }
    }

    fn request(stops: Vec<RouteStop>) -> OptimizeRequest {
        OptimizeRequest {
            driver_id: "d1".into(),
            stops,
            origin: None,
        }
    }

    #[test]
    fn haversine_known_distance() {
        // Bengaluru MG Road to Indiranagar, roughly 4 km.
        let d = haversine_km(
            GeoPoint { lat: 12.9756, lng: 77.6050 },
            GeoPoint { lat: 12.9784, lng: 77.6408 },
        );
        assert!((3.5..4.5).contains(&d), "got {d}");
    }

    #[tokio::test]
    async fn fallback_visits_nearest_first() {
        let req = OptimizeRequest {
            origin: Some(GeoPoint { lat: 0.0, lng: 0.0 }),
            ..request(vec![stop(0.0, 3.0, "far"), stop(0.0, 1.0, "near"), stop(0.0, 2.0, "mid")])
        };
        let plan = FallbackPlanner.optimize(&req).await.unwrap();
        assert_eq!(plan.sequence, vec![1, 2, 0]);
        assert_eq!(plan.provider, "fallback");
        let eta = plan.eta_per_stop.unwrap();
        assert_eq!(eta.len(), 3);
        assert!(eta.windows(2).all(|w| w[0] <= w[1]));
        assert!(plan.total_distance_km > 300.0);
    }

    #[tokio::test]
    async fn fallback_empty_route() {
        let plan = FallbackPlanner.optimize(&request(vec![])).await.unwrap();
        assert!(plan.sequence.is_empty());
        assert_eq!(plan.total_distance_km, 0.0);
        assert_eq!(plan.estimated_duration_sec, Some(0));
    }

    #[tokio::test]
    async fn invalid_stop_rejected() {
        let err = FallbackPlanner
            .optimize(&request(vec![stop(100.0, 0.0, "x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::InvalidRequest(_)));
    }

    #[test]
    fn vendor_sequence_accepts_order_ids_and_indices() {
        let req = request(vec![stop(1.0, 1.0, "a"), stop(2.0, 2.0, "b"), stop(3.0, 3.0, "c")]);
        let body: VendorResponse = serde_json::from_value(serde_json::json!({
            "sequence": ["c", 0, "b"],
            "totalDistanceKm": 12.5,
            "etaPerStop": [60, 120, 180]
        }))
        .unwrap();
        let plan = body.into_planned(&req).unwrap();
        assert_eq!(plan.sequence, vec![2, 0, 1]);
        assert_eq!(plan.provider, "vendor");
    }

    #[test]
    fn vendor_sequence_must_be_a_permutation() {
        let req = request(vec![stop(1.0, 1.0, "a"), stop(2.0, 2.0, "b")]);
        for seq in [serde_json::json!([0, 0]), serde_json::json!([0]), serde_json::json!([0, 5])] {
            let body: VendorResponse = serde_json::from_value(serde_json::json!({
                "sequence": seq,
                "totalDistanceKm": 1.0
            }))
            .unwrap();
            assert!(matches!(
                body.into_planned(&req),
                Err(PlannerError::BadResponse(_))
            ));
        }
    }

    #[tokio::test]
    async fn unreachable_vendor_is_an_error() {
        let planner =
            HttpRoutePlanner::new("http://127.0.0.1:9/optimize", None, Duration::from_secs(2));
        let err = planner
            .optimize(&request(vec![stop(1.0, 1.0, "a")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlannerError::Unreachable(_) | PlannerError::Timeout(_)
        ));
    }
}
