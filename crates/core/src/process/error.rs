use crate::common::failure::{Failure, FailureKind};
use thiserror::Error;

/// # Summary
/// 进程托管域错误枚举。
///
/// # Invariants
/// - 所有底层 IO / 系统调用错误都在 Supervisor 内被归类为以下变体，不向上透传。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    // 可执行文件缺失、进程创建失败或就绪探测超时
    #[error("Launch failure: {0}")]
    Launch(String),
    // 存活 / 响应性探测失败
    #[error("Probe error: {0}")]
    Probe(String),
    // 关闭或终止信号无法送达
    #[error("Control error: {0}")]
    Control(String),
    // 旧进程未确认终止，拒绝新的启动
    #[error("Process still running: {0}")]
    StillRunning(String),
    // 已有看门狗循环在运行
    #[error("Watch loop already active")]
    WatchActive,
}

impl SupervisorError {
    /// 归入统一失败分类
    pub fn kind(&self) -> FailureKind {
        match self {
            SupervisorError::Launch(_) => FailureKind::LaunchFailure,
            SupervisorError::Probe(_) | SupervisorError::Control(_) => FailureKind::ProbeError,
            SupervisorError::StillRunning(_) => FailureKind::Timeout,
            SupervisorError::WatchActive => FailureKind::Busy,
        }
    }
}

impl From<&SupervisorError> for Failure {
    fn from(err: &SupervisorError) -> Self {
        Failure::new(err.kind(), err.to_string())
    }
}
