use crate::notify::entity::Severity;
use crate::notify::error::NotifyError;
use async_trait::async_trait;

/// # Summary
/// 单个通知渠道。
///
/// # Invariants
/// - 实现必须是 `Send` 和 `Sync` 以支持并发调用。
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 渠道名，用于日志
    fn name(&self) -> &str;

    /// # Summary
    /// 发送带有级别、主题和内容的通知。
    ///
    /// # Returns
    /// * 成功返回 `Ok(())`。
    /// * 失败返回 `Err(NotifyError)`。
    async fn notify(
        &self,
        severity: Severity,
        subject: &str,
        content: &str,
    ) -> Result<(), NotifyError>;
}

/// # Summary
/// 业务侧使用的告警出口：同步、不会失败、不阻塞调用方。
pub trait AlertSink: Send + Sync {
    fn notify(&self, severity: Severity, subject: &str, content: &str);
}
