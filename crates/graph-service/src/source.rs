//! PostgreSQL 数据源
//!
//! 构图所需的条件/变量查询。筛选在 SQL 层完成：只取激活、未软删、
//! 实例级（entity_id 非空）的条件和战役作用域的变量。

use async_trait::async_trait;
use campaign_shared::error::{CampaignError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::prelude::FromRow;
use uuid::Uuid;

use crate::builder::CampaignSource;
use crate::models::{CampaignKey, ConditionRecord, VariableRecord, VariableScope};

/// 基于 PostgreSQL 的图数据源
#[derive(Clone)]
pub struct PgCampaignSource {
    pool: PgPool,
}

impl PgCampaignSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ConditionRow {
    id: Uuid,
    name: String,
    entity_id: Option<Uuid>,
    entity_type: Option<String>,
    expression: Value,
    effect: Option<Value>,
    priority: i32,
    active: bool,
    version: i64,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<ConditionRow> for ConditionRecord {
    type Error = CampaignError;

    fn try_from(row: ConditionRow) -> Result<Self> {
        let effect = row.effect.map(serde_json::from_value).transpose()?;
        Ok(ConditionRecord {
            id: row.id,
            name: row.name,
            entity_id: row.entity_id,
            entity_type: row.entity_type,
            expression: row.expression,
            effect,
            priority: row.priority,
            active: row.active,
            version: row.version,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(FromRow)]
struct VariableRow {
    id: Uuid,
    name: String,
    scope: String,
    value: Value,
    version: i64,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<VariableRow> for VariableRecord {
    type Error = CampaignError;

    fn try_from(row: VariableRow) -> Result<Self> {
        let scope = match row.scope.as_str() {
            "campaign" => VariableScope::Campaign,
            "world" => VariableScope::World,
            other => {
                return Err(CampaignError::Internal(format!(
                    "未知变量作用域: {other}"
                )));
            }
        };
        Ok(VariableRecord {
            id: row.id,
            name: row.name,
            scope,
            value: row.value,
            version: row.version,
            deleted_at: row.deleted_at,
        })
    }
}

#[async_trait]
impl CampaignSource for PgCampaignSource {
    async fn active_conditions(&self, key: &CampaignKey) -> Result<Vec<ConditionRecord>> {
        let rows: Vec<ConditionRow> = sqlx::query_as(
            r#"
            SELECT id, name, entity_id, entity_type, expression, effect,
                   priority, active, version, deleted_at
            FROM campaign_conditions
            WHERE campaign_id = $1
              AND branch_id = $2
              AND active = TRUE
              AND deleted_at IS NULL
              AND entity_id IS NOT NULL
            ORDER BY id
            "#,
        )
        .bind(key.campaign_id)
        .bind(key.branch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ConditionRecord::try_from).collect()
    }

    async fn campaign_variables(&self, key: &CampaignKey) -> Result<Vec<VariableRecord>> {
        let rows: Vec<VariableRow> = sqlx::query_as(
            r#"
            SELECT id, name, scope, value, version, deleted_at
            FROM campaign_variables
            WHERE campaign_id = $1
              AND branch_id = $2
              AND scope = 'campaign'
              AND deleted_at IS NULL
            ORDER BY name
            "#,
        )
        .bind(key.campaign_id)
        .bind(key.branch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(VariableRecord::try_from).collect()
    }
}
