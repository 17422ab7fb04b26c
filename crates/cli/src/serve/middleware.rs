//! HTTP middleware: per-route access enforcement.

use std::sync::Arc;

use axum::extract::{MatchedPath, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lastmile_auth::{bearer_token, Access};
use serde_json::json;
use tracing::{debug, warn};

use super::json_error;
use super::state::{bump, AppState};

/// Resolve the request's [`Access`] from the route's policy and insert it
/// into the request extensions.
///
/// A matched route without a policy is refused with 403. Unmatched paths
/// pass through to the 404 fallback.
pub(crate) async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(path) = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
    else {
        return next.run(request).await;
    };
    let method = request.method().as_str().to_string();

    let Some(policy) = state.policies.lookup(&method, &path).cloned() else {
        warn!(%method, %path, "route has no access policy; refusing");
        bump(&state.metrics.auth_rejected);
        return json_error(StatusCode::FORBIDDEN, "no access policy for this route")
            .into_response();
    };

    let token = bearer_token(
        request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    )
    .map(str::to_string);

    match state.enforcer.authorize(token.as_deref(), &policy).await {
        Ok(access) => {
            if matches!(access, Access::Demo(_)) {
                bump(&state.metrics.demo_fallbacks);
            }
            request.extensions_mut().insert(access);
            next.run(request).await
        }
        Err(e) => {
            debug!(%method, %path, error = %e, "request rejected");
            bump(&state.metrics.auth_rejected);
            let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::UNAUTHORIZED);
            let kind = if status == StatusCode::FORBIDDEN {
                "forbidden"
            } else {
                "unauthorized"
            };
            let body = json!({ "error": kind, "message": e.to_string() });
            (status, Json(body)).into_response()
        }
    }
}
