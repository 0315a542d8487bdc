//! 表达式引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("表达式结构非法: {0}")]
    Malformed(String),

    #[error("未知操作符: {0}")]
    UnknownOperator(String),

    #[error("表达式嵌套深度 {depth} 超出上限 {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("操作符 {op} 参数数量不足: 需要至少 {expected} 个, 实际 {actual} 个")]
    Arity {
        op: String,
        expected: usize,
        actual: usize,
    },

    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
