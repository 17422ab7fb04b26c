//! `lastmile serve` -- HTTP JSON API for tracking and dispatch.
//!
//! Access is decided per route from an explicit [`PolicyTable`]: staff routes
//! fail closed, driver-facing routes fall back to the sandbox principal when
//! `demo_fallback` is on.
//!
//! Endpoints:
//! - GET  /health                      - Server status (public)
//! - POST /track/{delivery_id}         - Submit a position sample (driver)
//! - GET  /track/{delivery_id}/sse     - Live position stream
//! - GET  /track/{delivery_id}/recent  - Recent samples, newest first (staff)
//! - POST /routes/optimize             - Plan a stop order
//! - GET  /routes/{driver_id}          - Latest stored route plan
//! - POST /assignments/assign          - Bind an order to a driver (staff)
//! - POST /assignments/complete        - Mark an order delivered
//! - POST /auth/logout                 - Revoke the presented token
//! - GET  /metrics                     - Process counters (staff)

mod handlers;
mod middleware;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use lastmile_auth::{
    AccessEnforcer, HttpEnricher, IdentityVerifier, MemoryKv, PolicyTable, RevocationStore, Role,
    RoutePolicy, TokenCodec,
};
use lastmile_dispatch::{
    AssignmentOrchestrator, Collaborators, FallbackPlanner, HttpRoutePlanner, OrchestratorTimeouts,
    PubSubNotifier, RoutePlanner,
};
use lastmile_storage::MemoryStorage;
use lastmile_tracking::{BroadcastHub, LivePositionBus, PositionLedger, Tracker};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::{ConfigError, ServerConfig};
use crate::seed::{apply_seed, SeedFile};

use self::handlers::{
    handle_assign, handle_complete, handle_get_route, handle_health, handle_logout,
    handle_metrics, handle_not_found, handle_optimize, handle_recent, handle_track,
    handle_track_stream,
};
use self::middleware::auth_middleware;
use self::state::{AppState, Metrics};

/// Maximum request body size: 1 MB.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

const STAFF: &[Role] = &[Role::Admin, Role::Dispatcher, Role::Support];
const ASSIGNERS: &[Role] = &[Role::Admin, Role::Dispatcher];
const ANY_ROLE: &[Role] = &[Role::Admin, Role::Dispatcher, Role::Support, Role::Driver];

/// Access metadata for every route in [`build_router`].
pub(crate) fn policy_table() -> PolicyTable {
    PolicyTable::new()
        .with("GET", "/health", RoutePolicy::public())
        .with("POST", "/track/{delivery_id}", RoutePolicy::roles(&[Role::Driver]))
        .with("GET", "/track/{delivery_id}/sse", RoutePolicy::authenticated())
        .with("GET", "/track/{delivery_id}/recent", RoutePolicy::roles(STAFF))
        .with("POST", "/routes/optimize", RoutePolicy::authenticated())
        .with("GET", "/routes/{driver_id}", RoutePolicy::roles(ANY_ROLE))
        .with("POST", "/assignments/assign", RoutePolicy::roles(ASSIGNERS))
        .with(
            "POST",
            "/assignments/complete",
            RoutePolicy::roles(&[Role::Driver, Role::Admin, Role::Dispatcher]),
        )
        .with("POST", "/auth/logout", RoutePolicy::roles(ANY_ROLE))
        .with("GET", "/metrics", RoutePolicy::roles(STAFF))
}

/// Wire every component from configuration over an in-memory backend.
pub(crate) fn build_state(config: &ServerConfig) -> Result<AppState, ConfigError> {
    let secret = config.validate()?;
    let timeout = config.downstream_timeout();
    let storage = Arc::new(MemoryStorage::new());
    let hub = Arc::new(BroadcastHub::new());

    let mut verifier = IdentityVerifier::new(TokenCodec::new(secret));
    if let Some(url) = &config.decrypt_url {
        verifier = verifier.with_enricher(Arc::new(HttpEnricher::new(url.clone(), timeout)));
    }
    let revocations = Arc::new(RevocationStore::new(Arc::new(MemoryKv::new())));
    let enforcer = AccessEnforcer::new(Arc::new(verifier), revocations)
        .with_demo_fallback(config.demo_fallback);

    let ledger = Arc::new(PositionLedger::new(storage.clone()));
    let bus = Arc::new(
        LivePositionBus::new(hub.clone(), ledger.clone()).with_heartbeat(config.heartbeat()),
    );
    let tracker = Tracker::new(ledger, bus);

    let planner: Arc<dyn RoutePlanner> = match &config.route_vendor_url {
        Some(url) => Arc::new(HttpRoutePlanner::new(
            url.clone(),
            config.route_vendor_key.clone(),
            timeout,
        )),
        None => Arc::new(FallbackPlanner),
    };

    let orchestrator = AssignmentOrchestrator::new(Collaborators {
        orders: storage.clone(),
        drivers: storage.clone(),
        audit: storage.clone(),
        plans: storage.clone(),
        planner: planner.clone(),
        notifier: Arc::new(PubSubNotifier::new(hub)),
    })
    .with_timeouts(OrchestratorTimeouts::uniform(timeout))
    .with_tracking_base(config.public_base_url());

    Ok(AppState {
        storage,
        tracker,
        enforcer,
        policies: policy_table(),
        planner,
        orchestrator,
        metrics: Metrics::default(),
    })
}

pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/track/{delivery_id}", post(handle_track))
        .route("/track/{delivery_id}/sse", get(handle_track_stream))
        .route("/track/{delivery_id}/recent", get(handle_recent))
        .route("/routes/optimize", post(handle_optimize))
        .route("/routes/{driver_id}", get(handle_get_route))
        .route("/assignments/assign", post(handle_assign))
        .route("/assignments/complete", post(handle_complete))
        .route("/auth/logout", post(handle_logout))
        .route("/metrics", get(handle_metrics))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Start the HTTP server.
///
/// When TLS cert/key paths are provided, the server listens over HTTPS
/// using `axum-server` with rustls. Otherwise it uses plain HTTP.
pub async fn start_server(
    config: ServerConfig,
    seed: Option<SeedFile>,
    _tls_cert: Option<PathBuf>,
    _tls_key: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = build_state(&config)?;
    if let Some(seed) = seed {
        apply_seed(state.storage.as_ref(), seed).await?;
    }

    info!(
        enrichment = config.decrypt_url.is_some(),
        route_vendor = config.route_vendor_url.is_some(),
        demo_fallback = config.demo_fallback,
        heartbeat_secs = config.heartbeat_secs,
        "server configured"
    );

    let app = build_router(Arc::new(state));
    let addr = format!("0.0.0.0:{}", config.port);

    // TLS support via axum-server + rustls (requires `tls` feature)
    #[cfg(feature = "tls")]
    if let (Some(cert_path), Some(key_path)) = (&_tls_cert, &_tls_key) {
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;
        let socket_addr: std::net::SocketAddr = addr.parse()?;
        info!(port = config.port, "lastmile listening on https");
        axum_server::bind_rustls(socket_addr, tls)
            .serve(app.into_make_service())
            .await?;
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(port = config.port, "lastmile listening on http");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
