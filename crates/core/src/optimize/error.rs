use crate::common::failure::{Failure, FailureKind};
use thiserror::Error;

/// # Summary
/// 优化与前推验证的前置校验错误。执行期间的单次失败不会产生此错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptimizeError {
    #[error("Invalid parameter range '{name}': {reason}")]
    InvalidRange { name: String, reason: String },
    #[error("Sweep too large: {count} candidates exceeds limit {limit}")]
    TooManyCandidates { count: usize, limit: usize },
    #[error("Invalid walk-forward windows: {0}")]
    InvalidWindows(String),
    #[error("Invalid sweep: {0}")]
    InvalidSweep(String),
}

impl OptimizeError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::ConfigError
    }
}

impl From<&OptimizeError> for Failure {
    fn from(err: &OptimizeError) -> Self {
        Failure::new(err.kind(), err.to_string())
    }
}
