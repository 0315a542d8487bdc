//! 共享库
//!
//! 包含各服务共用的配置、错误处理、Redis 缓存、熔断器与
//! 失效广播（pub/sub）等基础设施代码。

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod observability;
pub mod pubsub;
