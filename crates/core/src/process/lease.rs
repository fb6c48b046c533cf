use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// # Summary
/// 终端独占闸门。同一终端实例同一时刻只允许一个任务驱动。
///
/// # Invariants
/// - 克隆出的闸门共享同一把锁。
/// - 获取是非阻塞的：已被持有时立即返回 `None`。
#[derive(Debug, Clone, Default)]
pub struct ExclusiveGate {
    inner: Arc<Mutex<()>>,
}

impl ExclusiveGate {
    /// 创建新的闸门
    pub fn new() -> Self {
        Self::default()
    }

    /// # Summary
    /// 尝试获取独占租约。
    ///
    /// # Returns
    /// 成功返回 `RunLease`，租约被 drop 时自动释放；已被持有返回 `None`。
    pub fn try_acquire(&self) -> Option<RunLease> {
        self.inner
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| RunLease {
                _guard: guard,
                acquired_at: Instant::now(),
            })
    }

    /// 当前是否有租约在外
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// # Summary
/// 独占令牌 (RAII)。任何退出路径上 drop 即释放。
pub struct RunLease {
    _guard: OwnedMutexGuard<()>,
    acquired_at: Instant,
}

impl RunLease {
    /// 租约已持有的时长
    pub fn held_for(&self) -> std::time::Duration {
        self.acquired_at.elapsed()
    }
}

impl std::fmt::Debug for RunLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLease")
            .field("held_for", &self.held_for())
            .finish()
    }
}
