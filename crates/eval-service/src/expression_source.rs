//! 存储表达式来源
//!
//! 求值请求可以携带内联表达式，也可以只给条件 ID 由服务端取回
//! 已存储的表达式。取回走关系型事实源，不经过依赖图。

use async_trait::async_trait;
use campaign_shared::error::{CampaignError, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// 按条件 ID 取存储表达式
#[async_trait]
pub trait ExpressionSource: Send + Sync {
    async fn expression(&self, condition_id: Uuid) -> Result<Value>;
}

/// PostgreSQL 实现
#[derive(Clone)]
pub struct PgExpressionSource {
    pool: PgPool,
}

impl PgExpressionSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExpressionSource for PgExpressionSource {
    async fn expression(&self, condition_id: Uuid) -> Result<Value> {
        let row: Option<(Value,)> = sqlx::query_as(
            "SELECT expression FROM campaign_conditions WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(condition_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(expression,)| expression)
            .ok_or_else(|| CampaignError::NotFound {
                entity: "Condition".to_string(),
                id: condition_id.to_string(),
            })
    }
}
