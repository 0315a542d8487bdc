//! 战役数据模型
//!
//! 依赖图的输入侧：条件与变量的持久化记录，以及标识一张图的
//! (campaign, branch) 复合键。记录层不关心图算法，只负责回答
//! "这条记录是否参与依赖图" 的筛选问题。

use chrono::{DateTime, Utc};
use expression_engine::Effect;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 依赖图的缓存键：每个战役分支一张独立的图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignKey {
    pub campaign_id: Uuid,
    pub branch_id: Uuid,
}

impl CampaignKey {
    pub fn new(campaign_id: Uuid, branch_id: Uuid) -> Self {
        Self {
            campaign_id,
            branch_id,
        }
    }
}

impl std::fmt::Display for CampaignKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.campaign_id, self.branch_id)
    }
}

/// 变量作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    /// 战役级变量，参与该战役的依赖图
    Campaign,
    /// 世界级变量，跨战役共享，不进入单个战役的图
    World,
}

/// 条件记录
///
/// `expression` 保存为原始 JSON，由表达式引擎在构图时解析；
/// `effect` 为可选的写入描述符，没有效果的条件只产生读依赖。
#[derive(Debug, Clone)]
pub struct ConditionRecord {
    pub id: Uuid,
    pub name: String,
    /// 绑定的实体实例；类型级条件（entity_id 为空）不参与图
    pub entity_id: Option<Uuid>,
    pub entity_type: Option<String>,
    pub expression: Value,
    pub effect: Option<Effect>,
    pub priority: i32,
    pub active: bool,
    pub version: i64,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ConditionRecord {
    /// 实例级、激活且未删除的条件才进入依赖图
    pub fn is_graph_participant(&self) -> bool {
        self.active && self.deleted_at.is_none() && self.entity_id.is_some()
    }
}

/// 变量记录
#[derive(Debug, Clone)]
pub struct VariableRecord {
    pub id: Uuid,
    pub name: String,
    pub scope: VariableScope,
    pub value: Value,
    pub version: i64,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl VariableRecord {
    pub fn is_graph_participant(&self) -> bool {
        self.scope == VariableScope::Campaign && self.deleted_at.is_none()
    }
}

/// 变量节点 ID："variable:{name}"
pub fn variable_node_id(name: &str) -> String {
    format!("variable:{name}")
}

/// 条件节点 ID："condition:{uuid}"
pub fn condition_node_id(id: Uuid) -> String {
    format!("condition:{id}")
}

/// 实体节点 ID："entity:{uuid}"
pub fn entity_node_id(id: Uuid) -> String {
    format!("entity:{id}")
}

/// 取路径的根段作为变量名
///
/// 表达式里的读路径可以带点号深入变量内部（"region.climate"），
/// 依赖图按变量粒度建边，因此只取根段。
pub fn root_variable(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}
