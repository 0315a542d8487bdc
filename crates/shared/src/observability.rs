//! 日志初始化模块
//!
//! 基于 tracing-subscriber 的统一日志初始化，按配置选择 json 或 pretty 格式。

use crate::config::ObservabilityConfig;
use tracing_subscriber::EnvFilter;

/// 初始化全局日志订阅器
///
/// 环境变量 RUST_LOG 优先于配置文件中的 log_level。
/// 重复初始化（例如多个测试共享进程）静默忽略。
pub fn init(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let result = if config.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}
