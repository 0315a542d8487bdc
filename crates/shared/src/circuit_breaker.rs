//! 熔断器 (Circuit Breaker) 模块
//!
//! 三态熔断器，用于保护对缓存/广播后端（Redis）的调用：
//! 连续失败达到阈值后跳闸（Open），求值服务转入直接求值的降级模式；
//! 恢复窗口到期后进入半开（HalfOpen）放行探测请求，探测成功则恢复（Closed）。
//!
//! 状态转换涉及多个字段的一致性更新，统一由 parking_lot::Mutex 保护。
//! 临界区只有几次字段读写，锁竞争可以忽略。

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// 正常放行所有请求
    Closed,
    /// 已跳闸，拒绝所有请求（调用方走降级路径）
    Open,
    /// 恢复窗口到期，放行少量探测请求
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// 熔断器配置
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后跳闸
    pub failure_threshold: u32,
    /// 跳闸后多久进入半开状态
    pub recovery_timeout: Duration,
    /// 半开状态需要连续成功多少次探测才恢复
    pub half_open_probes: u32,
    /// 熔断器名称，用于日志和指标区分不同的后端
    pub name: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_probes: 3,
            name: "default".to_string(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_half_open_probes(mut self, probes: u32) -> Self {
        self.half_open_probes = probes;
        self
    }
}

/// 熔断器内部状态
struct Inner {
    state: CircuitState,
    /// Closed→Open 转换依据
    consecutive_failures: u32,
    /// Open→HalfOpen 计时起点
    tripped_at: Option<Instant>,
    /// HalfOpen 已放行/已成功的探测数
    probes_inflight: u32,
    probes_succeeded: u32,
}

/// 熔断器
///
/// 线程安全，通过 Arc 在多个请求处理任务间共享。
/// 典型用法：
/// ```ignore
/// if breaker.allow_request() {
///     match backend_call().await {
///         Ok(v) => { breaker.record_success(); /* 使用缓存结果 */ }
///         Err(_) => { breaker.record_failure(); /* 降级为直接求值 */ }
///     }
/// } else {
///     // 跳过缓存读写，直接求值
/// }
/// ```
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        info!(
            name = %config.name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout.as_millis() as u64,
            half_open_probes = config.half_open_probes,
            "熔断器已创建"
        );

        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                tripped_at: None,
                probes_inflight: 0,
                probes_succeeded: 0,
            })),
        }
    }

    /// 获取当前状态（用于监控和测试断言）
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        if inner.state == CircuitState::Open && self.recovery_elapsed(&inner) {
            return CircuitState::HalfOpen;
        }
        inner.state
    }

    /// 判断是否允许发起后端调用
    ///
    /// Closed：始终允许。
    /// Open：恢复窗口未到期拒绝；到期转入 HalfOpen 并放行第一个探测。
    /// HalfOpen：在探测配额内放行。
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.recovery_elapsed(&inner) {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probes_inflight = 1;
                    true
                } else {
                    record_rejection(&self.config.name);
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probes_inflight < self.config.half_open_probes {
                    inner.probes_inflight += 1;
                    true
                } else {
                    record_rejection(&self.config.name);
                    false
                }
            }
        }
    }

    /// 记录后端调用成功
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.probes_succeeded += 1;
                if inner.probes_succeeded >= self.config.half_open_probes {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            // Open 状态不放行请求，不应观察到成功
            CircuitState::Open => {}
        }
    }

    /// 记录后端调用失败
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.tripped_at = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // 探测失败，立即重新跳闸并重开恢复窗口
                inner.tripped_at = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {
                inner.tripped_at = Some(Instant::now());
            }
        }
    }

    fn recovery_elapsed(&self, inner: &Inner) -> bool {
        inner
            .tripped_at
            .map(|t| t.elapsed() >= self.config.recovery_timeout)
            .unwrap_or(false)
    }

    /// 状态转换（在锁内调用）
    fn transition(&self, inner: &mut Inner, new_state: CircuitState) {
        let old_state = inner.state;
        inner.state = new_state;

        match new_state {
            CircuitState::HalfOpen => {
                inner.probes_inflight = 0;
                inner.probes_succeeded = 0;
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.tripped_at = None;
            }
            CircuitState::Open => {}
        }

        record_transition(&self.config.name, old_state, new_state);

        match new_state {
            CircuitState::Open => warn!(
                name = %self.config.name,
                from = %old_state,
                "熔断器跳闸：后端连续失败达到阈值，转入降级模式"
            ),
            CircuitState::HalfOpen => info!(
                name = %self.config.name,
                probes = self.config.half_open_probes,
                "熔断器进入半开状态：放行探测请求"
            ),
            CircuitState::Closed => info!(
                name = %self.config.name,
                "熔断器恢复：后端已恢复正常"
            ),
        }
    }
}

// ─── 指标 ─────────────────────────────────────────────────

fn record_transition(name: &str, from: CircuitState, to: CircuitState) {
    metrics::counter!(
        "circuit_breaker_transitions_total",
        "name" => name.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

fn record_rejection(name: &str) {
    metrics::counter!(
        "circuit_breaker_rejections_total",
        "name" => name.to_string()
    )
    .increment(1);
}
