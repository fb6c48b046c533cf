use async_trait::async_trait;
use shiken_core::notify::entity::Severity;
use shiken_core::notify::error::NotifyError;
use shiken_core::notify::port::Notifier;
use tracing::{debug, error, info, warn};

/// 把通知写入 tracing 日志的渠道，总是可用
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(
        &self,
        severity: Severity,
        subject: &str,
        content: &str,
    ) -> Result<(), NotifyError> {
        match severity {
            Severity::Debug => debug!(target: "shiken::alert", subject, content, "Alert"),
            Severity::Info => info!(target: "shiken::alert", subject, content, "Alert"),
            Severity::Warning => warn!(target: "shiken::alert", subject, content, "Alert"),
            Severity::Critical => error!(target: "shiken::alert", subject, content, "Alert"),
        }
        Ok(())
    }
}
