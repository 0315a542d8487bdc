//! HTTP API
//!
//! 求值入口与依赖图查询的 axum 路由。错误统一映射为
//! {"code", "message"} 结构，环路错误附带环路路径。

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use campaign_shared::error::CampaignError;
use expression_engine::TracedEvaluation;
use graph_service::{CampaignKey, CycleReport, DependencyGraphView, GraphCacheService, Node};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::invalidation::MutationNotifier;
use crate::service::{EvaluateRequest, EvaluateResponse, RulesEvaluationService};

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RulesEvaluationService>,
    pub graphs: Arc<GraphCacheService>,
    pub notifier: Arc<MutationNotifier>,
}

/// 构建服务路由
pub fn router(state: AppState) -> Router {
    let graph_prefix = "/api/v1/campaigns/{campaign_id}/branches/{branch_id}/graph";
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/evaluate", post(evaluate))
        .route("/api/v1/evaluate/trace", post(evaluate_trace))
        .route(graph_prefix, get(graph_snapshot))
        .route(&format!("{graph_prefix}/validate"), get(validate_graph))
        .route(
            &format!("{graph_prefix}/evaluation-order"),
            get(evaluation_order),
        )
        .route(
            &format!("{graph_prefix}/nodes/{{node_id}}/dependencies"),
            get(node_dependencies),
        )
        .route(
            &format!("{graph_prefix}/nodes/{{node_id}}/dependents"),
            get(node_dependents),
        )
        .route(&format!("{graph_prefix}/invalidate"), post(invalidate_graph))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// API 错误包装，负责 CampaignError 到 HTTP 状态码的映射
pub struct ApiError(CampaignError);

impl From<CampaignError> for ApiError {
    fn from(err: CampaignError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CampaignError::NotFound { .. } => StatusCode::NOT_FOUND,
            CampaignError::Validation(_) | CampaignError::DepthExceeded { .. } => {
                StatusCode::BAD_REQUEST
            }
            CampaignError::Cycle { .. } => StatusCode::CONFLICT,
            CampaignError::BackendUnavailable { .. } | CampaignError::Redis(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = json!({
            "code": self.0.code(),
            "message": self.0.to_string(),
        });
        if let CampaignError::Cycle { cycles } = &self.0 {
            body["cycles"] = json!(cycles);
        }
        (status, Json(body)).into_response()
    }
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn evaluate(
    State(state): State<AppState>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, ApiError> {
    Ok(Json(state.service.evaluate(&request).await?))
}

/// 追踪求值请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRequest {
    pub expression: Value,
    pub context: Value,
}

async fn evaluate_trace(
    State(state): State<AppState>,
    Json(request): Json<TraceRequest>,
) -> Json<TracedEvaluation> {
    Json(
        state
            .service
            .evaluate_with_trace(&request.expression, &request.context),
    )
}

async fn graph_snapshot(
    State(state): State<AppState>,
    Path((campaign_id, branch_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DependencyGraphView>, ApiError> {
    let key = CampaignKey::new(campaign_id, branch_id);
    Ok(Json(state.graphs.snapshot(&key).await?))
}

async fn validate_graph(
    State(state): State<AppState>,
    Path((campaign_id, branch_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CycleReport>, ApiError> {
    let key = CampaignKey::new(campaign_id, branch_id);
    Ok(Json(state.graphs.validate(&key).await?))
}

async fn evaluation_order(
    State(state): State<AppState>,
    Path((campaign_id, branch_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<String>>, ApiError> {
    let key = CampaignKey::new(campaign_id, branch_id);
    Ok(Json(state.graphs.evaluation_order(&key).await?))
}

async fn node_dependencies(
    State(state): State<AppState>,
    Path((campaign_id, branch_id, node_id)): Path<(Uuid, Uuid, String)>,
) -> Result<Json<Vec<Node>>, ApiError> {
    let key = CampaignKey::new(campaign_id, branch_id);
    Ok(Json(state.graphs.dependencies_of(&key, &node_id).await?))
}

async fn node_dependents(
    State(state): State<AppState>,
    Path((campaign_id, branch_id, node_id)): Path<(Uuid, Uuid, String)>,
) -> Result<Json<Vec<Node>>, ApiError> {
    let key = CampaignKey::new(campaign_id, branch_id);
    Ok(Json(state.graphs.dependents_of(&key, &node_id).await?))
}

/// 手动触发分支失效：广播消息，所有实例（含本实例）经监听任务应用
async fn invalidate_graph(
    State(state): State<AppState>,
    Path((campaign_id, branch_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let key = CampaignKey::new(campaign_id, branch_id);
    state.notifier.broadcast(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
