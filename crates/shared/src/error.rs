//! 统一错误处理模块
//!
//! 定义服务层共享的错误类型，使用 thiserror 提供结构化的错误信息。
//! 环路与校验类错误需要携带足够的上下文供前端展示（环路路径、深度限制等），
//! 而不是笼统的 "internal error"。

use thiserror::Error;

/// 服务层错误类型
#[derive(Debug, Error)]
pub enum CampaignError {
    // ==================== 数据源错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ==================== 缓存/广播后端错误 ====================
    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("缓存/广播后端不可用: {service}")]
    BackendUnavailable { service: String },

    // ==================== 表达式校验错误 ====================
    #[error("表达式校验失败: {0}")]
    Validation(String),

    #[error("表达式嵌套深度 {depth} 超出上限 {max}")]
    DepthExceeded { depth: usize, max: usize },

    // ==================== 依赖图错误 ====================
    #[error("依赖图存在环路: {}", format_cycles(.cycles))]
    Cycle { cycles: Vec<Vec<String>> },

    // ==================== 通用错误 ====================
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, CampaignError>;

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| c.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}

impl CampaignError {
    /// 获取错误码，用于 API 响应和日志聚合
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Redis(_) => "REDIS_ERROR",
            Self::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::DepthExceeded { .. } => "DEPTH_EXCEEDED",
            Self::Cycle { .. } => "CYCLE_DETECTED",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 瞬时性的数据源/后端错误由调用方重试（例如 get_graph 的调用方），
    /// 校验与环路错误重试没有意义。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Redis(_) | Self::BackendUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = CampaignError::NotFound {
            entity: "Condition".to_string(),
            id: "abc".to_string(),
        };
        assert_eq!(err.code(), "NOT_FOUND");

        let err = CampaignError::Cycle {
            cycles: vec![vec!["condition:a".into(), "variable:x".into(), "condition:a".into()]],
        };
        assert_eq!(err.code(), "CYCLE_DETECTED");
    }

    #[test]
    fn test_cycle_message_contains_path() {
        let err = CampaignError::Cycle {
            cycles: vec![vec!["condition:a".into(), "variable:x".into(), "condition:a".into()]],
        };
        let msg = err.to_string();
        assert!(msg.contains("condition:a -> variable:x -> condition:a"));
    }

    #[test]
    fn test_is_retryable() {
        let backend = CampaignError::BackendUnavailable {
            service: "redis".to_string(),
        };
        assert!(backend.is_retryable());

        let validation = CampaignError::Validation("bad expression".to_string());
        assert!(!validation.is_retryable());
    }
}
