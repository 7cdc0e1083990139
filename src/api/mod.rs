//! REST 接口: 每个请求先写注册中心, 再同步提交给引擎

use crate::components::EventExtractor;
use crate::engine::{EngineSnapshot, RuleEngine};
use crate::registry::RuleRegistry;
use crate::types::{DataProcess, DataTarget, RuleAction, RuleContext, RuleDefinition, RuleError, RuleStatus};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

// API 响应格式
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            data: None,
        }
    }
}

/// 引擎错误到 HTTP 响应的映射
#[derive(Debug)]
pub struct ApiError(pub RuleError);

impl From<RuleError> for ApiError {
    fn from(e: RuleError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RuleError::NotFound(_) | RuleError::ProductNotFound(_) => StatusCode::NOT_FOUND,
            RuleError::Duplicate(_) => StatusCode::CONFLICT,
            RuleError::InvalidAction(_)
            | RuleError::InvalidOperation { .. }
            | RuleError::Config(_) => StatusCode::BAD_REQUEST,
            RuleError::EngineStopped => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ApiResponse::<()>::error(status.as_u16() as i32, &self.0.to_string());
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// 应用状态
#[derive(Clone)]
struct AppState {
    engine: Arc<RuleEngine>,
}

// 规则请求体
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRequest {
    #[serde(default)]
    pub data_format: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub data_process: DataProcess,
    pub data_target: DataTarget,
}

#[derive(Debug, Deserialize)]
struct ControlQuery {
    action: String,
}

pub fn router(engine: Arc<RuleEngine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rules", get(list_rules))
        .route(
            "/rules/:product_id/:rule_name",
            post(create_rule)
                .delete(remove_rule)
                .patch(update_rule)
                .put(control_rule),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

async fn health() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("ok"))
}

// 引擎中已加载的规则
async fn list_rules(State(state): State<AppState>) -> ApiResult<EngineSnapshot> {
    let snapshot = state.engine.snapshot().await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

// 创建规则
async fn create_rule(
    State(state): State<AppState>,
    Path((product_id, rule_name)): Path<(String, String)>,
    Json(req): Json<RuleRequest>,
) -> ApiResult<RuleDefinition> {
    let mut rule = RuleDefinition::new(&product_id, &rule_name, req.data_process, req.data_target);
    if let Some(format) = req.data_format {
        rule.data_format = format;
    }
    rule.description = req.description.unwrap_or_default();

    let registry = state.engine.registry();
    registry.put_rule(rule.clone()).await?;

    let ctx = RuleContext::synchronous(&product_id, &rule_name, RuleAction::Create);
    if let Err(e) = state.engine.handle_rule(ctx).await {
        // 引擎拒绝时撤销注册
        if let Err(rollback) = registry.remove_rule(&product_id, &rule_name).await {
            warn!(product_id = %product_id, rule_name = %rule_name, "rollback of rule insert failed: {}", rollback);
        }
        return Err(e.into());
    }
    Ok(Json(ApiResponse::success(rule)))
}

// 删除规则
async fn remove_rule(
    State(state): State<AppState>,
    Path((product_id, rule_name)): Path<(String, String)>,
) -> ApiResult<()> {
    let registry = state.engine.registry();
    let previous = registry.get_rule(&product_id, &rule_name).await?;
    registry.remove_rule(&product_id, &rule_name).await?;

    let ctx = RuleContext::synchronous(&product_id, &rule_name, RuleAction::Remove);
    if let Err(e) = tolerate_unloaded(state.engine.handle_rule(ctx).await) {
        restore_definition(&registry, previous, true).await;
        return Err(e.into());
    }
    Ok(Json(ApiResponse::success(())))
}

// 更新规则, 保留状态和创建时间
async fn update_rule(
    State(state): State<AppState>,
    Path((product_id, rule_name)): Path<(String, String)>,
    Json(req): Json<RuleRequest>,
) -> ApiResult<RuleDefinition> {
    let registry = state.engine.registry();
    let previous = registry.get_rule(&product_id, &rule_name).await?;
    let mut rule = previous.clone();
    rule.data_process = req.data_process;
    rule.data_target = req.data_target;
    if let Some(format) = req.data_format {
        rule.data_format = format;
    }
    if let Some(description) = req.description {
        rule.description = description;
    }
    rule.time_updated = Utc::now();

    // 引擎未加载该规则时不会构建流水线, 先校验源主题和条件
    EventExtractor::new(&rule)?;
    registry.update_rule(rule.clone()).await?;

    let ctx = RuleContext::synchronous(&product_id, &rule_name, RuleAction::Update);
    if let Err(e) = tolerate_unloaded(state.engine.handle_rule(ctx).await) {
        restore_definition(&registry, previous, false).await;
        return Err(e.into());
    }
    Ok(Json(ApiResponse::success(rule)))
}

// 启动/停止规则
async fn control_rule(
    State(state): State<AppState>,
    Path((product_id, rule_name)): Path<(String, String)>,
    Query(query): Query<ControlQuery>,
) -> ApiResult<RuleStatus> {
    let action = query.action.parse::<RuleAction>()?;
    let status = match action {
        RuleAction::Start => RuleStatus::Started,
        RuleAction::Stop => RuleStatus::Stopped,
        other => return Err(RuleError::InvalidAction(other.to_string()).into()),
    };

    let registry = state.engine.registry();
    let previous = registry.get_rule(&product_id, &rule_name).await?.status;
    registry.set_rule_status(&product_id, &rule_name, status).await?;

    let ctx = RuleContext::synchronous(&product_id, &rule_name, action);
    let result = match state.engine.handle_rule(ctx).await {
        // 规则未加载时由 create 按持久化状态加载
        Err(e) if is_unloaded(&e) && action == RuleAction::Start => {
            let ctx = RuleContext::synchronous(&product_id, &rule_name, RuleAction::Create);
            state.engine.handle_rule(ctx).await
        }
        other => tolerate_unloaded(other),
    };

    if let Err(e) = result {
        // 引擎拒绝时恢复持久化状态, 避免恢复流程重放失败的启动
        if let Err(rollback) = registry.set_rule_status(&product_id, &rule_name, previous).await {
            warn!(product_id = %product_id, rule_name = %rule_name, "rollback of rule status failed: {}", rollback);
        }
        return Err(e.into());
    }
    Ok(Json(ApiResponse::success(status)))
}

/// 引擎拒绝命令后写回原有定义
async fn restore_definition(registry: &Arc<dyn RuleRegistry>, previous: RuleDefinition, removed: bool) {
    let (product_id, rule_name) = (previous.product_id.clone(), previous.rule_name.clone());
    let result = if removed {
        registry.put_rule(previous).await
    } else {
        registry.update_rule(previous).await
    };
    if let Err(e) = result {
        warn!(product_id = %product_id, rule_name = %rule_name, "rollback of rule definition failed: {}", e);
    }
}

/// 规则在注册中心存在但引擎尚未加载 (例如空闲规则在重启后不会恢复)
fn is_unloaded(e: &RuleError) -> bool {
    matches!(e, RuleError::NotFound(_) | RuleError::InvalidOperation { .. })
}

fn tolerate_unloaded(result: Result<(), RuleError>) -> Result<(), RuleError> {
    match result {
        Err(e) if is_unloaded(&e) => Ok(()),
        other => other,
    }
}
