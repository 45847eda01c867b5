//! # air-server
//!
//! HTTP API for the AIR policy engine. Provides:
//!
//! - Policy CRUD and kill switch status
//! - The autonomy tier registry
//! - Request evaluation and metric ingestion
//! - Agent trust profiles and Prometheus metrics

pub mod error;
pub mod metrics;

use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{Request, StatusCode, header},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use air_config::AirConfig;
use air_core::AirError;
use air_policy::{
    EvaluationDecision, EvaluationRequest, IngestSummary, MetricsReport, Policy, PolicyEngine,
    PolicyStore, SwitchStatus, TierDescriptor, TrustScore,
};

pub use error::{ApiError, ApiResult};

const SERVICE_NAME: &str = "air-policy-engine";

/// Shared server state.
pub struct AppState {
    pub engine: Arc<PolicyEngine>,
    pub config: Arc<RwLock<AirConfig>>,
    /// Prometheus-compatible metrics.
    pub metrics: metrics::Metrics,
}

impl AppState {
    pub fn new(engine: Arc<PolicyEngine>, config: Arc<RwLock<AirConfig>>) -> Self {
        Self {
            engine,
            config,
            metrics: metrics::Metrics::new(),
        }
    }

    /// Engine and state built from configuration alone.
    pub fn from_config(config: Arc<RwLock<AirConfig>>) -> air_core::Result<Self> {
        let engine = PolicyEngine::from_config(Arc::clone(&config))?;
        Ok(Self::new(Arc::new(engine), config))
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct KillSwitchReport {
    policy_id: String,
    switches: Vec<SwitchStatus>,
}

/// Build the Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = state.config.read().server.cors;

    let api_routes = Router::new()
        .route("/v1/health", get(health_handler))
        .route("/v1/policies", post(create_policy_handler).get(list_policies_handler))
        .route(
            "/v1/policies/{id}",
            get(get_policy_handler)
                .put(replace_policy_handler)
                .delete(delete_policy_handler),
        )
        .route("/v1/policies/{id}/kill-switches", get(kill_switches_handler))
        .route("/v1/tiers", get(tiers_handler))
        .route("/v1/tiers/{name}", get(tier_handler))
        .route("/v1/evaluate", post(evaluate_handler))
        .route("/v1/metrics", post(ingest_metrics_handler))
        .route("/v1/agents/{agent_id}/trust", get(trust_handler));

    let mut router = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            count_requests,
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

/// Counts every request, and every response with an error status.
async fn count_requests(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    state.metrics.inc_http_requests();
    let response = next.run(request).await;
    if response.status().is_client_error() || response.status().is_server_error() {
        state.metrics.inc_http_errors();
    }
    response
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus-compatible metrics endpoint.
async fn metrics_handler(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    let body = state
        .metrics
        .render_prometheus(state.engine.store().len());
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

// ── Policies ───────────────────────────────────────────────────

async fn create_policy_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Policy>, JsonRejection>,
) -> ApiResult<Json<Policy>> {
    let Json(policy) = body?;
    let (record, _) = state.engine.put_policy(policy)?;
    Ok(Json(record.policy.clone()))
}

async fn list_policies_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Policy>> {
    Json(state.engine.list_policies())
}

async fn get_policy_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Policy>> {
    Ok(Json(state.engine.get_policy(&id)?))
}

async fn replace_policy_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<Policy>, JsonRejection>,
) -> ApiResult<Json<Policy>> {
    let Json(policy) = body?;
    let record = state.engine.replace_policy(&id, policy)?;
    Ok(Json(record.policy.clone()))
}

async fn delete_policy_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.delete_policy(&id)?;
    Ok(Json(json!({ "status": "deleted", "id": id })))
}

async fn kill_switches_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<KillSwitchReport>> {
    let switches = state.engine.tracker().status(&id)?;
    Ok(Json(KillSwitchReport {
        policy_id: id,
        switches,
    }))
}

// ── Tiers ──────────────────────────────────────────────────────

async fn tiers_handler() -> Json<Vec<TierDescriptor>> {
    Json(air_policy::list_tiers())
}

async fn tier_handler(Path(name): Path<String>) -> ApiResult<Json<TierDescriptor>> {
    // An unknown name in a URL is a missing resource, not a misconfiguration.
    air_policy::tier(&name)
        .map(Json)
        .map_err(|_| AirError::not_found("tier", name).into())
}

// ── Evaluation & metrics ───────────────────────────────────────

async fn evaluate_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EvaluationRequest>, JsonRejection>,
) -> ApiResult<Json<EvaluationDecision>> {
    let Json(req) = body?;
    if req.agent_id.trim().is_empty() {
        return Err(AirError::validation("agent_id", "must not be empty").into());
    }
    if req.action.trim().is_empty() {
        return Err(AirError::validation("action", "must not be empty").into());
    }
    let decision = state.engine.evaluate(&req).await;
    state.metrics.record_decision(decision.action);
    Ok(Json(decision))
}

async fn ingest_metrics_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<MetricsReport>, JsonRejection>,
) -> ApiResult<Json<IngestSummary>> {
    let Json(report) = body?;
    if report.agent_id.trim().is_empty() {
        return Err(AirError::validation("agent_id", "must not be empty").into());
    }
    let summary = state.engine.tracker().ingest_report(&report);
    state
        .metrics
        .record_report(summary.duplicate_for.len(), summary.tripped.len());
    Ok(Json(summary))
}

async fn trust_handler(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Json<TrustScore> {
    let score = state.engine.trust_profile(&agent_id).await;
    state.metrics.record_trust(score.source);
    Json(score)
}

/// Start the HTTP server and run until Ctrl-C.
pub async fn start_server(state: Arc<AppState>) -> air_core::Result<()> {
    let listen = state.config.read().server.listen.clone();
    let router = build_router(state);

    info!(listen = %listen, "starting policy engine");

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| AirError::Config(format!("failed to bind {listen}: {e}")))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
