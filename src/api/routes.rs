use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, RawQuery, State},
    http::{header, HeaderMap, Method},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::api::health::UpstreamHealth;
use crate::api::latency::LatencyStats;
use crate::db::MetadataStore;
use crate::error::AppError;
use crate::fetcher::MarketClient;
use crate::jobs::Orchestrator;
use crate::limiter::{LimiterStatus, RateLimiter};
use crate::trading::{CreateBuyOrder, EnrichedBuyOrder, TradeDesk};
use crate::types::{Constraints, Item, JobSnapshot};

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub client: Arc<MarketClient>,
    pub limiter: Arc<RateLimiter>,
    pub health: Arc<UpstreamHealth>,
    pub latency: Arc<LatencyStats>,
    pub metadata: MetadataStore,
    pub trade_desk: TradeDesk,
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/trading-calc", post(submit_analysis))
        .route("/trading-calc/progress", get(analysis_progress))
        .route("/cancel-analysis", post(cancel_all_analyses))
        .route("/cancel-analysis/:job_id", post(cancel_analysis))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/rate-limit/status", get(get_rate_limit_status))
        .route(
            "/order-metadata/:username",
            get(list_order_metadata).delete(delete_all_order_metadata),
        )
        .route(
            "/order-metadata/:username/:order_id",
            get(get_order_metadata)
                .put(put_order_metadata)
                .delete(delete_order_metadata),
        )
        .route(
            "/trading/:username/buy-orders",
            get(list_buy_orders)
                .post(create_buy_order)
                .delete(delete_all_buy_orders),
        )
        .route("/trading/:username/orders/:order_id", delete(delete_order))
        .route("/api/*path", get(relay).post(relay))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / query types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default, alias = "all_items")]
    pub items: Vec<Item>,
    #[serde(flatten)]
    pub constraints: Constraints,
}

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    pub job_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub success: bool,
    pub order_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BuyOrdersResponse {
    pub success: bool,
    pub orders: Vec<EnrichedBuyOrder>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub jobs_running: usize,
    pub jobs_total: usize,
    pub rate_limit_detected: bool,
}

#[derive(Debug, Serialize)]
pub struct LatencyResponse {
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub sample_count: u64,
}

#[derive(Debug, Serialize)]
pub struct RateLimitResponse {
    #[serde(flatten)]
    pub limiter: LimiterStatus,
    pub rate_limit_detected: bool,
    pub ms_since_rate_limit: u64,
    pub rate_limit_hits: u64,
}

// ---------------------------------------------------------------------------
// Analysis jobs
// ---------------------------------------------------------------------------

async fn submit_analysis(
    State(state): State<ApiState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, AppError> {
    let Json(req) = payload.map_err(|e| AppError::InvalidSubmission(e.body_text()))?;
    let job_id = state.orchestrator.submit(req.items, req.constraints)?;
    Ok(Json(SubmitResponse { job_id }))
}

async fn analysis_progress(
    State(state): State<ApiState>,
    Query(params): Query<ProgressQuery>,
) -> Result<Json<JobSnapshot>, AppError> {
    let job_id = params
        .job_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing job_id".to_string()))?;
    let snapshot = state.orchestrator.poll(&job_id)?;
    debug!(
        job_id = %job_id,
        "[POLL] {}/{} results={} status={}",
        snapshot.progress, snapshot.total, snapshot.results.len(), snapshot.status
    );
    Ok(Json(snapshot))
}

async fn cancel_all_analyses(State(state): State<ApiState>) -> Json<AckResponse> {
    let running = state.orchestrator.cancel_all();
    Json(AckResponse {
        success: true,
        message: format!("Analysis cancelled ({running} running jobs)."),
    })
}

async fn cancel_analysis(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<AckResponse>, AppError> {
    if job_id == "all" {
        return Ok(cancel_all_analyses(State(state)).await);
    }
    state.orchestrator.cancel(&job_id)?;
    Ok(Json(AckResponse {
        success: true,
        message: format!("Job {job_id} cancellation requested."),
    }))
}

// ---------------------------------------------------------------------------
// Observability
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let registry = state.orchestrator.registry();
    Json(HealthResponse {
        status: "ok",
        jobs_running: registry.running_count(),
        jobs_total: registry.len(),
        rate_limit_detected: state.health.rate_limited(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50_ms, p95_ms, p99_ms) = state.latency.percentiles_ms();
    Json(LatencyResponse {
        p50_ms,
        p95_ms,
        p99_ms,
        sample_count: state.latency.len(),
    })
}

async fn get_rate_limit_status(State(state): State<ApiState>) -> Json<RateLimitResponse> {
    Json(RateLimitResponse {
        limiter: state.limiter.status(),
        rate_limit_detected: state.health.rate_limited(),
        ms_since_rate_limit: state.health.ms_since_rate_limit(),
        rate_limit_hits: state.health.rate_limit_hits(),
    })
}

// ---------------------------------------------------------------------------
// Order metadata
// ---------------------------------------------------------------------------

async fn list_order_metadata(
    State(state): State<ApiState>,
    Path(username): Path<String>,
) -> Result<Json<serde_json::Map<String, serde_json::Value>>, AppError> {
    Ok(Json(state.metadata.list(&username).await?))
}

async fn get_order_metadata(
    State(state): State<ApiState>,
    Path((username, order_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let value = state.metadata.get(&username, &order_id).await?;
    Ok(Json(value.unwrap_or(serde_json::Value::Null)))
}

async fn put_order_metadata(
    State(state): State<ApiState>,
    Path((username, order_id)): Path<(String, String)>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<AckResponse>, AppError> {
    let Json(metadata) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    if !metadata.is_object() {
        return Err(AppError::BadRequest("metadata must be a JSON object".to_string()));
    }
    state.metadata.set(&username, &order_id, &metadata).await?;
    Ok(Json(AckResponse {
        success: true,
        message: format!("Metadata saved for order {order_id}."),
    }))
}

async fn delete_order_metadata(
    State(state): State<ApiState>,
    Path((username, order_id)): Path<(String, String)>,
) -> Result<Json<AckResponse>, AppError> {
    let removed = state.metadata.delete(&username, &order_id).await?;
    Ok(Json(AckResponse {
        success: removed,
        message: if removed {
            format!("Metadata removed for order {order_id}.")
        } else {
            format!("No metadata for order {order_id}.")
        },
    }))
}

async fn delete_all_order_metadata(
    State(state): State<ApiState>,
    Path(username): Path<String>,
) -> Result<Json<AckResponse>, AppError> {
    let removed = state.metadata.delete_all(&username).await?;
    Ok(Json(AckResponse {
        success: true,
        message: format!("Removed metadata for {removed} orders."),
    }))
}

// ---------------------------------------------------------------------------
// The user's own buy orders
// ---------------------------------------------------------------------------

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn create_buy_order(
    State(state): State<ApiState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<CreateBuyOrder>, JsonRejection>,
) -> Result<Json<CreateOrderResponse>, AppError> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let order_id = state
        .trade_desk
        .create_buy_order(&username, authorization(&headers), &req)
        .await?;
    Ok(Json(CreateOrderResponse {
        success: true,
        order_id,
        message: "Order created successfully".to_string(),
    }))
}

async fn list_buy_orders(
    State(state): State<ApiState>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BuyOrdersResponse>, AppError> {
    let orders = state
        .trade_desk
        .my_buy_orders(&username, authorization(&headers))
        .await?;
    Ok(Json(BuyOrdersResponse {
        success: true,
        orders,
    }))
}

async fn delete_order(
    State(state): State<ApiState>,
    Path((username, order_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<AckResponse>, AppError> {
    state
        .trade_desk
        .delete_order(&username, &order_id, authorization(&headers))
        .await?;
    Ok(Json(AckResponse {
        success: true,
        message: "Order deleted successfully".to_string(),
    }))
}

async fn delete_all_buy_orders(
    State(state): State<ApiState>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AckResponse>, AppError> {
    let outcome = state
        .trade_desk
        .delete_all_buy_orders(&username, authorization(&headers))
        .await?;
    let message = if outcome.failed == 0 {
        format!("Successfully deleted {} buy orders", outcome.deleted)
    } else {
        format!("Deleted {} buy orders, {} failed", outcome.deleted, outcome.failed)
    };
    Ok(Json(AckResponse {
        success: true,
        message,
    }))
}

// ---------------------------------------------------------------------------
// CORS relay to the marketplace API
// ---------------------------------------------------------------------------

async fn relay(
    State(state): State<ApiState>,
    method: Method,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let path_and_query = match query {
        Some(q) if !q.is_empty() => format!("{path}?{q}"),
        _ => path,
    };
    let body = (method == Method::POST).then(|| body.to_vec());

    let upstream = state
        .client
        .relay(method, &path_and_query, authorization(&headers), body)
        .await?;
    Ok((
        upstream.status,
        [(header::CONTENT_TYPE, upstream.content_type)],
        upstream.body,
    )
        .into_response())
}
