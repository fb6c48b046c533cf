use crate::process::entity::{
    ProcessExit, ProcessHandle, StartOptions, StatusReport, StopOutcome, WatchConfig,
    WatchHandle, WatchdogEvent,
};
use crate::process::error::SupervisorError;
use crate::process::lease::RunLease;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// # Summary
/// 终端进程启动器端口。屏蔽操作系统差异。
#[async_trait]
pub trait TerminalLauncher: Send + Sync {
    /// # Summary
    /// 创建终端进程，不等待就绪。
    ///
    /// # Returns
    /// 可控制的进程对象；可执行文件缺失或创建失败时返回 `SupervisorError::Launch`。
    async fn launch(
        &self,
        options: &StartOptions,
    ) -> Result<Box<dyn TerminalProcess>, SupervisorError>;

    /// # Summary
    /// 在操作系统进程表中查找正在运行的终端实例，例如用户手动打开的或上一次命令启动的。
    ///
    /// # Returns
    /// 找到时返回可控制的进程对象，其退出码不可知。
    async fn find_running(&self) -> Result<Option<Box<dyn TerminalProcess>>, SupervisorError>;
}

/// # Summary
/// 一个已创建的终端进程。
#[async_trait]
pub trait TerminalProcess: Send + Sync {
    fn pid(&self) -> u32;

    /// 非阻塞检查是否已退出
    async fn try_exit(&mut self) -> Result<Option<ProcessExit>, SupervisorError>;

    /// 启动阶段的就绪探测
    async fn is_ready(&mut self) -> Result<bool, SupervisorError>;

    /// 运行阶段的响应性探测
    async fn is_responsive(&mut self) -> Result<bool, SupervisorError>;

    /// 请求协作式关闭
    async fn request_close(&mut self) -> Result<(), SupervisorError>;

    /// 强制终止
    async fn kill(&mut self) -> Result<(), SupervisorError>;
}

/// # Summary
/// 进程托管端口。
///
/// # Invariants
/// - 任意时刻至多一个活跃进程。
/// - 所有等待都受显式时限约束。
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// 启动终端并等待就绪；已有存活进程时直接返回其句柄
    async fn start(&self, options: StartOptions) -> Result<ProcessHandle, SupervisorError>;

    /// 停止终端；`force` 为真时在宽限期后升级为强制终止
    async fn stop(&self, force: bool) -> Result<StopOutcome, SupervisorError>;

    /// stop(false) → 静置 `wait` → start
    async fn restart(&self, wait: Duration) -> Result<ProcessHandle, SupervisorError>;

    /// 非阻塞状态快照
    async fn status(&self) -> Result<StatusReport, SupervisorError>;

    /// 尝试获取独占租约
    fn try_lease(&self) -> Option<RunLease>;
}

/// # Summary
/// 看门狗事件观察者。回调在看门狗任务内同步执行，不应阻塞。
pub trait WatchObserver: Send + Sync {
    fn on_event(&self, event: WatchdogEvent);
}

impl<F> WatchObserver for F
where
    F: Fn(WatchdogEvent) + Send + Sync,
{
    fn on_event(&self, event: WatchdogEvent) {
        self(event)
    }
}

/// # Summary
/// 看门狗端口。
#[async_trait]
pub trait Watchdog: Send + Sync {
    /// # Summary
    /// 启动后台监控循环。
    ///
    /// # Returns
    /// 已有循环在运行时返回 `SupervisorError::WatchActive`，且不会产生第二个循环。
    async fn watch(
        &self,
        config: WatchConfig,
        observer: Arc<dyn WatchObserver>,
    ) -> Result<WatchHandle, SupervisorError>;

    /// 取消循环并等待其结束；返回是否确实停止了一个循环
    async fn unwatch(&self) -> bool;

    fn is_watching(&self) -> bool;
}
