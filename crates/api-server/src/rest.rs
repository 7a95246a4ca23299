//! REST API handlers for recommendations, stocking, model lifecycle and
//! operational endpoints.

use crate::service::{RecommendedItem, Recommender};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use market_core::types::{Interaction, Strategy, UserId, Vendor, VendorId};
use market_core::RecsError;
use market_embedding::{ModelInfo, TrainingExample, TrainingStatus};
use market_stocking::{ProductDemand, StockingPlan};
use market_store::{demo_fixture, FixtureSummary, InMemoryStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Upper bound on `top_k` for embedding retrieval.
const MAX_TOP_K: usize = 1000;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub recommender: Arc<Recommender>,
    pub store: Arc<InMemoryStore>,
    pub node_id: String,
    pub start_time: Instant,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn reject(
    status: StatusCode,
    error: &str,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

/// Map an engine error onto an HTTP status. Internal causes are logged and
/// not echoed back.
fn engine_error(e: RecsError) -> (StatusCode, Json<ErrorResponse>) {
    metrics::counter!("api.errors").increment(1);
    match e {
        RecsError::NotFound(msg) => reject(StatusCode::NOT_FOUND, "not_found", msg),
        RecsError::Validation(msg) => reject(StatusCode::BAD_REQUEST, "invalid_request", msg),
        RecsError::InvalidState(msg) => {
            warn!(reason = %msg, "Request hit engine in invalid state");
            reject(StatusCode::SERVICE_UNAVAILABLE, "invalid_state", msg)
        }
        RecsError::Upstream(msg) => {
            error!(reason = %msg, "Collaborator failure");
            reject(StatusCode::BAD_GATEWAY, "upstream_failure", msg)
        }
        other => {
            error!(error = %other, "Request failed");
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal processing error",
            )
        }
    }
}

fn no_results(what: &str, id: i64) -> (StatusCode, Json<ErrorResponse>) {
    metrics::counter!("recs.empty_results", "kind" => what.to_string()).increment(1);
    reject(
        StatusCode::NOT_FOUND,
        "no_results",
        format!("no {} available for {}", what, id),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct TopKQuery {
    pub top_k: Option<usize>,
}

async fn serve_recommendations(
    state: AppState,
    strategy: Strategy,
    user_id: UserId,
    top_k: Option<usize>,
) -> ApiResult<RecommendationResponse> {
    if let Some(k) = top_k {
        if k == 0 || k > MAX_TOP_K {
            metrics::counter!("api.validation_errors").increment(1);
            return Err(reject(
                StatusCode::BAD_REQUEST,
                "invalid_top_k",
                format!("top_k must be between 1 and {}", MAX_TOP_K),
            ));
        }
    }

    metrics::counter!("recs.requests", "strategy" => strategy.as_str()).increment(1);
    let items = state
        .recommender
        .recommend(strategy, user_id, top_k)
        .map_err(engine_error)?;
    if items.is_empty() {
        return Err(no_results("recommendations", user_id));
    }

    Ok(Json(RecommendationResponse {
        request_id: Uuid::new_v4(),
        user_id,
        strategy,
        items,
    }))
}

/// GET /v1/recommendations/:user_id: items the user interacted with.
pub async fn handle_direct(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<RecommendationResponse> {
    serve_recommendations(state, Strategy::Direct, user_id, None).await
}

/// GET /v1/recommendations/collaborative/:user_id
pub async fn handle_user_based(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<RecommendationResponse> {
    serve_recommendations(state, Strategy::UserBased, user_id, None).await
}

/// GET /v1/recommendations/item-based/:user_id
pub async fn handle_item_based(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<RecommendationResponse> {
    serve_recommendations(state, Strategy::ItemBased, user_id, None).await
}

/// GET /v1/recommendations/content/:user_id
pub async fn handle_content_based(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<RecommendationResponse> {
    serve_recommendations(state, Strategy::ContentBased, user_id, None).await
}

/// GET /v1/recommendations/hybrid/:user_id
pub async fn handle_hybrid(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<RecommendationResponse> {
    serve_recommendations(state, Strategy::Hybrid, user_id, None).await
}

/// GET /v1/recommendations/embedding/:user_id?top_k=N
pub async fn handle_embedding(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<TopKQuery>,
) -> ApiResult<RecommendationResponse> {
    serve_recommendations(state, Strategy::Embedding, user_id, query.top_k).await
}

/// GET /v1/vendor-recommendations/:user_id
pub async fn handle_vendors(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Vec<Vendor>> {
    metrics::counter!("recs.requests", "strategy" => "vendors").increment(1);
    let vendors = state
        .recommender
        .recommend_vendors(user_id)
        .map_err(engine_error)?;
    if vendors.is_empty() {
        return Err(no_results("vendors", user_id));
    }
    Ok(Json(vendors))
}

/// GET /v1/stocking/:seller_id
pub async fn handle_stocking(
    State(state): State<AppState>,
    Path(seller_id): Path<VendorId>,
) -> ApiResult<StockingPlan> {
    metrics::counter!("stocking.plans").increment(1);
    let plan = state
        .recommender
        .plan_stocking(seller_id)
        .map_err(engine_error)?;
    if plan.is_empty() {
        return Err(no_results("stocking suggestions", seller_id));
    }
    Ok(Json(plan))
}

/// GET /v1/demand/:seller_id
pub async fn handle_demand(
    State(state): State<AppState>,
    Path(seller_id): Path<VendorId>,
) -> ApiResult<Vec<ProductDemand>> {
    metrics::counter!("stocking.forecasts").increment(1);
    let demand = state
        .recommender
        .forecast_seller_demand(seller_id)
        .map_err(engine_error)?;
    if demand.iter().all(|d| d.forecast.is_empty()) {
        return Err(no_results("demand forecast", seller_id));
    }
    Ok(Json(demand))
}

/// POST /v1/model/train: start a retrain on a blocking worker.
/// Returns immediately; poll `/v1/model/status` for the outcome. A second
/// request while a run is claimed gets 409.
pub async fn handle_train(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<TrainAccepted>), (StatusCode, Json<ErrorResponse>)> {
    let worker = state.recommender.spawn_training().map_err(|e| {
        warn!(error = %e, "Training request refused");
        reject(StatusCode::CONFLICT, "training_in_progress", e.to_string())
    })?;

    let request_id = Uuid::new_v4();
    tokio::spawn(async move {
        match worker.await {
            Ok(Ok(report)) => {
                metrics::counter!("model.trainings", "outcome" => "succeeded").increment(1);
                info!(%request_id, loss = report.total_loss, "Training finished");
            }
            Ok(Err(e)) => {
                metrics::counter!("model.trainings", "outcome" => "failed").increment(1);
                warn!(%request_id, error = %e, "Training failed");
            }
            Err(e) => {
                metrics::counter!("model.trainings", "outcome" => "failed").increment(1);
                error!(%request_id, error = %e, "Training worker aborted");
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(TrainAccepted {
            request_id,
            status: "training_started".to_string(),
        }),
    ))
}

/// GET /v1/model/status
pub async fn handle_model_status(State(state): State<AppState>) -> Json<ModelStatusResponse> {
    let engine = state.recommender.engine();
    Json(ModelStatusResponse {
        training: engine.status(),
        model: engine.model_info(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct EvaluateRequest {
    #[serde(default)]
    pub examples: Vec<TrainingExample>,
    pub batch_size: Option<usize>,
}

/// POST /v1/model/evaluate: body optional; defaults to the full log.
pub async fn handle_evaluate(
    State(state): State<AppState>,
    body: Option<Json<EvaluateRequest>>,
) -> ApiResult<BTreeMap<String, f64>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let recommender = state.recommender.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        recommender.evaluate(request.examples, request.batch_size)
    })
    .await
    .map_err(|e| {
        error!(error = %e, "Evaluation worker failed");
        reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal processing error",
        )
    })?;
    outcome.map(Json).map_err(engine_error)
}

/// POST /v1/interactions: append one interaction to the log.
pub async fn handle_record_interaction(
    State(state): State<AppState>,
    Json(interaction): Json<Interaction>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state
        .store
        .record_interaction(interaction)
        .map_err(engine_error)?;
    metrics::counter!("interactions.recorded").increment(1);
    Ok(StatusCode::CREATED)
}

/// POST /v1/dev/seed: load the demo catalog and interactions.
pub async fn handle_seed_demo(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<FixtureSummary>), (StatusCode, Json<ErrorResponse>)> {
    let summary = state
        .store
        .apply_fixture(demo_fixture())
        .map_err(engine_error)?;
    info!(
        vendors = summary.vendors,
        items = summary.items,
        interactions = summary.interactions,
        "Demo data seeded"
    );
    Ok((StatusCode::CREATED, Json(summary)))
}

/// GET /health: health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        model_ready: state.recommender.engine().is_ready(),
    })
}

/// GET /ready: readiness probe. 200 once a model is serving.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.recommender.engine().is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live: liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize)]
pub struct RecommendationResponse {
    pub request_id: Uuid,
    pub user_id: UserId,
    pub strategy: Strategy,
    pub items: Vec<RecommendedItem>,
}

#[derive(Serialize)]
pub struct TrainAccepted {
    pub request_id: Uuid,
    pub status: String,
}

#[derive(Serialize)]
pub struct ModelStatusResponse {
    pub training: TrainingStatus,
    pub model: Option<ModelInfo>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub model_ready: bool,
}
