//! 表达式引擎
//!
//! 战役条件所使用的声明式布尔/算术表达式的求值核心，提供：
//! - JSON 表达式的解析与校验（封闭操作符集合 + 嵌套深度上限）
//! - 无副作用的递归求值，未解析变量降级为 missing 哨兵而非异常
//! - 带逐步追踪的求值（面向用户的 "为什么为真" 调试输出）
//! - 读/写依赖提取，供依赖图构建使用

pub mod ast;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod extractor;
pub mod operators;
pub mod trace;

pub use ast::{DEFAULT_MAX_DEPTH, Expr, validate};
pub use context::EvaluationContext;
pub use error::{EngineError, Result};
pub use evaluator::{Evaluator, Outcome, is_truthy};
pub use extractor::{Effect, EffectOp, EffectTarget, extract_reads, extract_writes};
pub use operators::Operator;
pub use trace::{TraceStep, TracedEvaluation};
