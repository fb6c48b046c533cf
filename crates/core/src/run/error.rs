use crate::artifact::error::ArtifactError;
use crate::common::failure::{Failure, FailureKind};
use crate::process::error::SupervisorError;
use thiserror::Error;

/// # Summary
/// 回测执行域错误。
///
/// # Invariants
/// - `BacktestRunner::run` 只以 `Busy` 拒绝任务，其余变体都会被折叠进 `RunResult`。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("Terminal busy: another run holds the lease")]
    Busy,
    #[error("Invalid run specification: {0}")]
    InvalidSpec(String),
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

impl RunError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RunError::Busy => FailureKind::Busy,
            RunError::InvalidSpec(_) | RunError::Artifact(_) => FailureKind::ConfigError,
            RunError::Supervisor(e) => e.kind(),
        }
    }
}

impl From<&RunError> for Failure {
    fn from(err: &RunError) -> Self {
        Failure::new(err.kind(), err.to_string())
    }
}
