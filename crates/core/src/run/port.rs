use crate::run::entity::{RunResult, RunSpec};
use crate::run::error::RunError;
use async_trait::async_trait;

/// # Summary
/// 回测执行端口。
#[async_trait]
pub trait BacktestRunner: Send + Sync {
    /// # Summary
    /// 执行一次受监管、受时限约束的回测。
    ///
    /// # Returns
    /// 已受理的任务总是返回 `Ok(RunResult)`，失败体现在 `outcome` 中；
    /// 终端被占用时返回 `Err(RunError::Busy)`。
    async fn run(&self, spec: RunSpec) -> Result<RunResult, RunError>;
}
