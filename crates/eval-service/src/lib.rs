//! 规则求值服务
//!
//! 对外提供表达式求值（带结果缓存与熔断降级）、求值追踪、
//! 依赖图查询和跨实例缓存失效。

pub mod clock;
pub mod expression_source;
pub mod fingerprint;
pub mod http;
pub mod invalidation;
pub mod result_cache;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use expression_source::{ExpressionSource, PgExpressionSource};
pub use fingerprint::fingerprint;
pub use http::{AppState, router};
pub use invalidation::{MutationNotifier, start_invalidation_listener};
pub use result_cache::{
    CachedEvaluation, MemoryResultCache, RedisResultCache, ResultCacheBackend,
};
pub use service::{EvaluateRequest, EvaluateResponse, RulesEvaluationService};
