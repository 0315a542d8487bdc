//! 规则求值服务
//!
//! 求值入口：先查结果缓存，未命中（或缓存后端熔断）时直接求值，
//! 并尽力回填缓存。缓存后端故障只影响性能，不影响正确性——
//! 任何缓存读写失败都降级为直接求值并照常返回结果。

use std::sync::Arc;
use std::time::Duration;

use campaign_shared::circuit_breaker::CircuitBreaker;
use campaign_shared::error::{CampaignError, Result};
use expression_engine::{
    EngineError, EvaluationContext, Evaluator, TracedEvaluation, is_truthy,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::expression_source::ExpressionSource;
use crate::fingerprint::fingerprint;
use crate::result_cache::{CachedEvaluation, ResultCacheBackend};

/// 求值请求
///
/// `expression`（内联）与 `condition_id`（存储表达式）二选一。
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    pub campaign_id: Uuid,
    pub branch_id: Uuid,
    #[serde(default)]
    pub expression: Option<Value>,
    #[serde(default)]
    pub condition_id: Option<Uuid>,
    pub context: Value,
}

impl EvaluateRequest {
    pub fn inline(campaign_id: Uuid, branch_id: Uuid, expression: Value, context: Value) -> Self {
        Self {
            campaign_id,
            branch_id,
            expression: Some(expression),
            condition_id: None,
            context,
        }
    }
}

/// 求值响应
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
    pub value: Value,
    pub truthy: bool,
    /// 是否命中结果缓存
    pub cached: bool,
    pub fingerprint: String,
    pub unresolved: Vec<String>,
}

/// 规则求值服务
pub struct RulesEvaluationService {
    evaluator: Evaluator,
    backend: Arc<dyn ResultCacheBackend>,
    breaker: CircuitBreaker,
    result_ttl: Duration,
    expressions: Option<Arc<dyn ExpressionSource>>,
}

impl RulesEvaluationService {
    pub fn new(
        backend: Arc<dyn ResultCacheBackend>,
        breaker: CircuitBreaker,
        result_ttl: Duration,
    ) -> Self {
        Self {
            evaluator: Evaluator::new(),
            backend,
            breaker,
            result_ttl,
            expressions: None,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.evaluator = Evaluator::new().with_max_depth(max_depth);
        self
    }

    /// 启用按条件 ID 取存储表达式
    pub fn with_expression_source(mut self, source: Arc<dyn ExpressionSource>) -> Self {
        self.expressions = Some(source);
        self
    }

    /// 解析请求携带的表达式：内联优先，否则按条件 ID 取回
    async fn resolve_expression(&self, request: &EvaluateRequest) -> Result<Value> {
        match (&request.expression, request.condition_id) {
            (Some(expression), None) => Ok(expression.clone()),
            (None, Some(condition_id)) => {
                let source = self.expressions.as_ref().ok_or_else(|| {
                    CampaignError::Validation("该部署未启用存储表达式求值".to_string())
                })?;
                source.expression(condition_id).await
            }
            _ => Err(CampaignError::Validation(
                "expression 与 conditionId 必须恰好提供一个".to_string(),
            )),
        }
    }

    /// 求值一条表达式
    ///
    /// 表达式校验失败直接报错；校验通过后的求值不会失败，
    /// 缺失变量降级为 missing 哨兵并记入 `unresolved`。
    #[tracing::instrument(skip(self, request), fields(
        campaign_id = %request.campaign_id,
        branch_id = %request.branch_id,
    ))]
    pub async fn evaluate(&self, request: &EvaluateRequest) -> Result<EvaluateResponse> {
        let expression = self.resolve_expression(request).await?;
        let expr = self.evaluator.parse(&expression).map_err(engine_error)?;

        let fp = fingerprint(&expression, &request.context);
        let campaign = request.campaign_id.to_string();
        let branch = request.branch_id.to_string();

        if self.breaker.allow_request() {
            match self.backend.get(&campaign, &branch, &fp).await {
                Ok(Some(entry)) => {
                    self.breaker.record_success();
                    counter!("evaluation_cache_hits_total").increment(1);
                    debug!(fingerprint = %fp, "求值结果缓存命中");
                    return Ok(respond(entry, true, fp));
                }
                Ok(None) => self.breaker.record_success(),
                Err(e) => {
                    self.breaker.record_failure();
                    warn!(error = %e, "结果缓存读取失败, 降级为直接求值");
                }
            }
        } else {
            counter!("evaluation_breaker_bypass_total").increment(1);
        }
        counter!("evaluation_cache_misses_total").increment(1);

        let outcome = self
            .evaluator
            .evaluate(&expr, &EvaluationContext::new(request.context.clone()));
        let entry = CachedEvaluation {
            value: outcome.value,
            unresolved: outcome.unresolved.into_iter().collect(),
        };

        // 回填失败不影响本次结果
        if self.breaker.allow_request() {
            match self
                .backend
                .set(&campaign, &branch, &fp, &entry, self.result_ttl)
                .await
            {
                Ok(()) => self.breaker.record_success(),
                Err(e) => {
                    self.breaker.record_failure();
                    warn!(error = %e, "结果缓存写入失败, 结果照常返回");
                }
            }
        }

        Ok(respond(entry, false, fp))
    }

    /// 带逐步追踪的求值
    ///
    /// 追踪是诊断输出，不走结果缓存。
    pub fn evaluate_with_trace(&self, expression: &Value, context: &Value) -> TracedEvaluation {
        self.evaluator.evaluate_with_trace(expression, context)
    }

    /// 缓存后端熔断器状态（监控用）
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

fn respond(entry: CachedEvaluation, cached: bool, fingerprint: String) -> EvaluateResponse {
    EvaluateResponse {
        truthy: is_truthy(&entry.value),
        value: entry.value,
        cached,
        fingerprint,
        unresolved: entry.unresolved,
    }
}

/// 表达式引擎错误映射到服务错误
fn engine_error(err: EngineError) -> CampaignError {
    match err {
        EngineError::DepthExceeded { depth, max } => CampaignError::DepthExceeded { depth, max },
        other => CampaignError::Validation(other.to_string()),
    }
}
