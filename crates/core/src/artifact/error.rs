use crate::common::failure::{Failure, FailureKind};
use thiserror::Error;

/// 产物读写错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("Artifact I/O error: {0}")]
    Io(String),
    #[error("Report parse error: {0}")]
    Parse(String),
}

impl ArtifactError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::ConfigError
    }
}

impl From<std::io::Error> for ArtifactError {
    fn from(err: std::io::Error) -> Self {
        ArtifactError::Io(err.to_string())
    }
}

impl From<&ArtifactError> for Failure {
    fn from(err: &ArtifactError) -> Self {
        Failure::new(err.kind(), err.to_string())
    }
}
