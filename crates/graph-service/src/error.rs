//! 依赖图错误类型

use campaign_shared::error::CampaignError;
use thiserror::Error;

/// 依赖图操作错误
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("节点未找到: {id}")]
    NodeNotFound { id: String },

    /// 加边时端点尚未注册。图的写入顺序约定是先节点后边，
    /// 出现该错误说明构建逻辑有缺陷而非数据问题。
    #[error("边端点缺失: {from} -> {to}")]
    EdgeEndpointMissing { from: String, to: String },

    #[error("依赖图存在环路 ({} 条)", cycles.len())]
    Cycle { cycles: Vec<Vec<String>> },

    #[error(transparent)]
    Shared(#[from] CampaignError),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, GraphError>;

impl From<GraphError> for CampaignError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::NodeNotFound { id } => CampaignError::NotFound {
                entity: "GraphNode".to_string(),
                id,
            },
            GraphError::EdgeEndpointMissing { from, to } => {
                CampaignError::Internal(format!("边端点缺失: {from} -> {to}"))
            }
            GraphError::Cycle { cycles } => CampaignError::Cycle { cycles },
            GraphError::Shared(inner) => inner,
        }
    }
}
