use chrono::{DateTime, Utc};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// # Summary
/// 计算 `start` 之后 `timeout` 的截止时刻，不会溢出。
///
/// # Logic
/// 超出平台 `Instant` 可表示范围时逐次减半时长，取能表示的最远时刻，
/// 因此极大的超时等价于不设上限。
pub fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    let mut span = timeout;
    loop {
        if let Some(deadline) = start.checked_add(span) {
            return deadline;
        }
        span /= 2;
    }
}

/// # Summary
/// 时钟接口，用于隔离物理系统时钟。
/// 产物命名与进程句柄时间戳都经由此接口取时间，测试可注入固定时钟。
pub trait Clock: Send + Sync {
    /// 获取当前时间
    fn now(&self) -> DateTime<Utc>;
}

/// # Summary
/// 真实时钟，直接返回操作系统当前时间。
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// # Summary
/// 手动时钟，时间只在调用 `set_time` / `advance` 时变化。
///
/// # Invariants
/// - 并发安全：内部利用 `RwLock` 保护当前时间。
pub struct ManualClock {
    current_time: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// 使用指定的初始时间创建手动时钟
    pub fn new(initial_time: DateTime<Utc>) -> Self {
        Self {
            current_time: RwLock::new(initial_time),
        }
    }

    /// 强制修改时钟的当前时间
    pub fn set_time(&self, new_time: DateTime<Utc>) {
        let mut time = self.current_time.write().unwrap_or_else(|e| e.into_inner());
        *time = new_time;
    }

    /// 将时钟向前拨动指定时长
    pub fn advance(&self, by: chrono::Duration) {
        let mut time = self.current_time.write().unwrap_or_else(|e| e.into_inner());
        *time += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current_time.read().unwrap_or_else(|e| e.into_inner())
    }
}
