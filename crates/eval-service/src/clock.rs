//! 时钟抽象
//!
//! 内存结果缓存的 TTL 判定依赖当前时刻，抽成 trait 后测试可以用
//! 手动时钟精确推进时间，不必真实 sleep。

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// 单调时钟
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// 系统时钟
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 手动推进的测试时钟
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// 向前推进指定时长
    pub fn advance(&self, delta: Duration) {
        *self.offset.lock() += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}
