//! HTTP route handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures_util::{Stream, StreamExt};
use lastmile_auth::{bearer_token, Access, Principal, Role};
use lastmile_dispatch::{AssignError, OptimizeRequest, PlannerError};
use lastmile_storage::RoutePlanStore;
use lastmile_tracking::{BusEvent, LedgerError, PositionInput};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::json_error;
use super::state::{bump, AppState};

/// `n` for `/track/{id}/recent` when the query omits it.
const DEFAULT_RECENT: usize = 20;
const MAX_RECENT: usize = 500;

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

fn principal_of(access: &Access) -> Option<&Principal> {
    access.principal()
}

/// POST /track/{delivery_id}
///
/// Persistence loss is not surfaced to the driver client: the sample still
/// goes out live and the response says `persisted: false`.
pub(crate) async fn handle_track(
    State(state): State<Arc<AppState>>,
    Path(delivery_id): Path<String>,
    Extension(access): Extension<Access>,
    headers: HeaderMap,
    Json(mut body): Json<serde_json::Value>,
) -> Response {
    // Drivers may omit their own id.
    if let (Some(obj), Some(driver_id)) = (
        body.as_object_mut(),
        principal_of(&access).and_then(|p| p.driver_id.clone()),
    ) {
        obj.entry("driverId").or_insert_with(|| json!(driver_id));
    }

    let mut input: PositionInput = match serde_json::from_value(body) {
        Ok(i) => i,
        Err(e) => {
            bump(&state.metrics.positions_rejected);
            return json_error(StatusCode::BAD_REQUEST, &format!("invalid position: {}", e))
                .into_response();
        }
    };
    input.idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string);

    match state.tracker.submit(&delivery_id, input).await {
        Ok(submission) => {
            if submission.duplicate {
                bump(&state.metrics.positions_duplicate);
            } else {
                bump(&state.metrics.positions_accepted);
                if !submission.published {
                    bump(&state.metrics.publish_failures);
                }
            }
            let body = json!({
                "ok": true,
                "id": submission.position.id,
                "duplicate": submission.duplicate,
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(LedgerError::InvalidSample(reason)) => {
            bump(&state.metrics.positions_rejected);
            json_error(StatusCode::BAD_REQUEST, &reason).into_response()
        }
        Err(LedgerError::Persistence(_)) => {
            bump(&state.metrics.positions_unpersisted);
            (StatusCode::OK, Json(json!({ "ok": true, "persisted": false }))).into_response()
        }
    }
}

/// GET /track/{delivery_id}/sse
pub(crate) async fn handle_track_stream(
    State(state): State<Arc<AppState>>,
    Path(delivery_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    bump(&state.metrics.streams_opened);
    debug!(%delivery_id, "subscriber stream opened");

    let events = state.tracker.bus().subscribe(&delivery_id).await.map(|ev| {
        let event = match ev {
            BusEvent::Position(p) => Event::default()
                .event("position")
                .data(serde_json::to_string(&p).unwrap_or_default()),
            BusEvent::Heartbeat(ts) => Event::default()
                .event("heartbeat")
                .data(json!({ "ts": ts }).to_string()),
        };
        Ok(event)
    });
    Sse::new(events)
}

#[derive(Deserialize)]
pub(crate) struct RecentParams {
    n: Option<usize>,
}

/// GET /track/{delivery_id}/recent?n=
pub(crate) async fn handle_recent(
    State(state): State<Arc<AppState>>,
    Path(delivery_id): Path<String>,
    Query(params): Query<RecentParams>,
) -> Response {
    let n = params.n.unwrap_or(DEFAULT_RECENT).clamp(1, MAX_RECENT);
    match state.tracker.ledger().most_recent(&delivery_id, n).await {
        Ok(samples) => (StatusCode::OK, Json(json!({ "samples": samples }))).into_response(),
        Err(e) => {
            warn!(%delivery_id, error = %e, "recent positions unavailable");
            let body = json!({ "samples": [], "error": "positions temporarily unavailable" });
            (StatusCode::OK, Json(body)).into_response()
        }
    }
}

/// POST /routes/optimize
///
/// Downstream failures answer 200 with an `error` body echoing the request.
pub(crate) async fn handle_optimize(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let request: OptimizeRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            return json_error(StatusCode::BAD_REQUEST, &format!("invalid route request: {}", e))
                .into_response()
        }
    };

    bump(&state.metrics.route_optimizations);
    match state.planner.optimize(&request).await {
        Ok(plan) => {
            let ordered: Vec<_> = plan.sequence.iter().map(|&i| &request.stops[i]).collect();
            let body = json!({
                "driverId": request.driver_id,
                "plan": plan,
                "orderedStops": ordered,
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(PlannerError::InvalidRequest(reason)) => {
            json_error(StatusCode::BAD_REQUEST, &reason).into_response()
        }
        Err(e) => {
            warn!(driver_id = %request.driver_id, error = %e, "route optimization degraded");
            bump(&state.metrics.route_optimize_failures);
            let body = json!({
                "error": "route_optimization_unavailable",
                "message": e.to_string(),
                "driverId": request.driver_id,
                "stops": request.stops,
            });
            (StatusCode::OK, Json(body)).into_response()
        }
    }
}

/// GET /routes/{driver_id}
pub(crate) async fn handle_get_route(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
    Extension(access): Extension<Access>,
) -> Response {
    if let Some(p) = principal_of(&access) {
        if p.role == Role::Driver && p.driver_id.as_deref() != Some(driver_id.as_str()) {
            return json_error(StatusCode::FORBIDDEN, "drivers may only read their own route")
                .into_response();
        }
    }

    match state.storage.latest_plan(&driver_id).await {
        Ok(Some(plan)) => (StatusCode::OK, Json(plan)).into_response(),
        Ok(None) => json_error(
            StatusCode::NOT_FOUND,
            &format!("no route plan for driver '{}'", driver_id),
        )
        .into_response(),
        Err(e) => json_error(StatusCode::SERVICE_UNAVAILABLE, &e.to_string()).into_response(),
    }
}

fn assign_error(e: AssignError) -> Response {
    let status = match &e {
        AssignError::OrderNotFound(_) | AssignError::DriverNotFound(_) => StatusCode::NOT_FOUND,
        AssignError::InvalidState(_) => StatusCode::CONFLICT,
        AssignError::Forbidden(_) => StatusCode::FORBIDDEN,
        AssignError::Timeout(..) => StatusCode::GATEWAY_TIMEOUT,
        AssignError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    json_error(status, &e.to_string()).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AssignBody {
    order_id: String,
    driver_id: String,
}

/// POST /assignments/assign
pub(crate) async fn handle_assign(
    State(state): State<Arc<AppState>>,
    Extension(access): Extension<Access>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let body: AssignBody = match serde_json::from_value(body) {
        Ok(b) => b,
        Err(e) => {
            return json_error(StatusCode::BAD_REQUEST, &format!("invalid assignment: {}", e))
                .into_response()
        }
    };
    let actor = principal_of(&access).map_or_else(|| "anonymous".to_string(), |p| p.actor());

    match state
        .orchestrator
        .assign(&body.order_id, &body.driver_id, &actor)
        .await
    {
        Ok(result) => {
            bump(&state.metrics.assignments);
            state.metrics.record_degraded(&result.degraded);
            let body = json!({
                "status": "assigned",
                "orderId": result.order_id,
                "driverId": result.driver_id,
                "trackingUrl": state.orchestrator.tracking_url(&result.order_id),
                "routeSummary": result.route_summary,
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => assign_error(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompleteBody {
    order_id: String,
}

/// POST /assignments/complete
pub(crate) async fn handle_complete(
    State(state): State<Arc<AppState>>,
    Extension(access): Extension<Access>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let body: CompleteBody = match serde_json::from_value(body) {
        Ok(b) => b,
        Err(e) => {
            return json_error(StatusCode::BAD_REQUEST, &format!("invalid completion: {}", e))
                .into_response()
        }
    };
    let Some(principal) = principal_of(&access) else {
        return json_error(StatusCode::UNAUTHORIZED, "authentication required").into_response();
    };
    let scope = (principal.role == Role::Driver)
        .then(|| principal.driver_id.as_deref())
        .flatten();

    match state
        .orchestrator
        .complete(&body.order_id, &principal.actor(), scope)
        .await
    {
        Ok(result) => {
            bump(&state.metrics.completions);
            state.metrics.record_degraded(&result.degraded);
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => assign_error(e),
    }
}

/// POST /auth/logout
pub(crate) async fn handle_logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let Some(token) = bearer_token(header) else {
        return json_error(StatusCode::UNAUTHORIZED, "authentication required").into_response();
    };
    let revoked = state.enforcer.revocations().revoke(token, None).await;
    (StatusCode::OK, Json(json!({ "revoked": revoked }))).into_response()
}

/// GET /metrics
pub(crate) async fn handle_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active = state.tracker.bus().active_subscriptions();
    (StatusCode::OK, Json(state.metrics.snapshot(active)))
}
