use shiken_core::notify::entity::Severity;
use shiken_core::notify::port::{AlertSink, Notifier};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug)]
struct Alert {
    severity: Severity,
    subject: String,
    content: String,
}

/// # Summary
/// 告警分发器：同步入队，后台任务逐条发往所有渠道。
///
/// # Invariants
/// - `notify` 不阻塞、不失败，低于 `min_severity` 的告警直接丢弃。
/// - 同一渠道内告警按入队顺序发送。
/// - 某个渠道失败只记录日志，不影响其他渠道。
/// - 分发器 (及其所有克隆) 被释放后，队列排空，后台任务结束。
#[derive(Clone)]
pub struct NotifyDispatcher {
    tx: mpsc::UnboundedSender<Alert>,
    min_severity: Severity,
}

impl NotifyDispatcher {
    /// # Summary
    /// 启动后台发送任务。必须在 tokio 运行时内调用。
    ///
    /// # Returns
    /// 分发器与后台任务句柄；等待句柄即可确认队列已发送完毕。
    pub fn spawn(
        channels: Vec<Arc<dyn Notifier>>,
        min_severity: Severity,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(deliver(rx, channels));
        (Self { tx, min_severity }, worker)
    }

    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }
}

async fn deliver(mut rx: mpsc::UnboundedReceiver<Alert>, channels: Vec<Arc<dyn Notifier>>) {
    while let Some(alert) = rx.recv().await {
        for channel in &channels {
            if let Err(e) = channel
                .notify(alert.severity, &alert.subject, &alert.content)
                .await
            {
                warn!(
                    channel = channel.name(),
                    subject = %alert.subject,
                    kind = %e.kind(),
                    error = %e,
                    "Notification delivery failed"
                );
            }
        }
    }
    debug!("Notification worker stopped");
}

impl AlertSink for NotifyDispatcher {
    fn notify(&self, severity: Severity, subject: &str, content: &str) {
        if severity < self.min_severity {
            debug!(%severity, subject, "Alert below minimum severity dropped");
            return;
        }
        let alert = Alert {
            severity,
            subject: subject.to_string(),
            content: content.to_string(),
        };
        if let Err(e) = self.tx.send(alert) {
            warn!(subject = %e.0.subject, "Notification worker gone, alert dropped");
        }
    }
}
