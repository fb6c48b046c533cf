use crate::common::failure::FailureKind;
use thiserror::Error;

/// # Summary
/// 通知服务错误枚举。
///
/// # Invariants
/// - 只在通知渠道内部流转，分发器记录后丢弃，不会抵达业务调用方。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// 网络连接或传输错误
    #[error("Network error: {0}")]
    Network(String),

    /// 配置错误 (如缺少 Token)
    #[error("Configuration error: {0}")]
    Config(String),

    /// 推送平台返回的错误 (如 Telegram API Error)
    #[error("Platform error: {0}")]
    Platform(String),
}

impl NotifyError {
    pub fn kind(&self) -> FailureKind {
        match self {
            NotifyError::Config(_) => FailureKind::ConfigError,
            NotifyError::Network(_) | NotifyError::Platform(_) => FailureKind::ProbeError,
        }
    }
}
