//! HTTP surface: key publication and health.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use trustcore_authn::Jwks;
use trustcore_storage::StoreMetrics;

use crate::app::TrustCore;

/// Path of the public key set.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";
/// Path of the health report.
pub const HEALTH_PATH: &str = "/health";

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// `healthy`, `degraded`, or `unhealthy`.
    pub status: &'static str,
    /// Why the store is not healthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Store counters and circuit state.
    pub store: StoreMetrics,
    /// Key id new tokens are signed with.
    pub active_kid: Option<String>,
    /// Number of loaded grants, absent before the first load.
    pub grants: Option<usize>,
}

/// Builds the router over a started [`TrustCore`].
pub fn build_router(core: Arc<TrustCore>) -> Router {
    Router::new()
        .route(JWKS_PATH, get(jwks))
        .route(HEALTH_PATH, get(health))
        .with_state(core)
}

async fn jwks(State(core): State<Arc<TrustCore>>) -> Json<Jwks> {
    Json(core.tokens().jwks())
}

/// 503 when the store is not serving (circuit open or store closed).
async fn health(State(core): State<Arc<TrustCore>>) -> Response {
    let status = core.store().health();
    let report = HealthReport {
        status: status.label(),
        reason: status.reason().map(str::to_owned),
        store: core.store().metrics(),
        active_kid: core.rotator().ring().active_kid(),
        grants: core.permissions().grants().map(|g| g.len()),
    };
    let code =
        if status.is_serving() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(report)).into_response()
}
