use async_trait::async_trait;
use lettre::message::{Mailbox, Message, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use shiken_core::config::EmailConfig;
use shiken_core::notify::entity::Severity;
use shiken_core::notify::error::NotifyError;
use shiken_core::notify::port::Notifier;

/// # Summary
/// 通过 SMTP 发送邮件的通知渠道。
///
/// # Invariants
/// - 地址在构造时解析，发送时不会再因地址失败。
/// - `AsyncSmtpTransport` 在多次发送之间复用。
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    /// # Summary
    /// 创建 `EmailNotifier`。
    ///
    /// # Logic
    /// 1. 解析发件人与收件人地址。
    /// 2. 以 STARTTLS (587) 建立带认证的 relay 传输。
    ///
    /// # Arguments
    /// * `host` - SMTP 服务器 (如 "smtp.gmail.com")。
    /// * `user` / `pass` - SMTP 认证。
    /// * `from` / `to` - 发件人与收件人。
    pub fn new(
        host: &str,
        user: &str,
        pass: &str,
        from: &str,
        to: &str,
    ) -> Result<Self, NotifyError> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| NotifyError::Config(format!("Invalid from address: {}", e)))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| NotifyError::Config(format!("Invalid to address: {}", e)))?;

        let creds = Credentials::new(user.to_string(), pass.to_string());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| NotifyError::Config(format!("Invalid SMTP host: {}", e)))?
            .credentials(creds)
            .build();

        Ok(Self { mailer, from, to })
    }

    /// 从配置段构造
    pub fn from_config(config: &EmailConfig) -> Result<Self, NotifyError> {
        Self::new(
            &config.smtp_host,
            &config.smtp_user,
            &config.smtp_pass,
            &config.from,
            &config.to,
        )
    }

    fn build_message(
        &self,
        severity: Severity,
        subject: &str,
        content: &str,
    ) -> Result<Message, NotifyError> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(format!("[shiken {}] {}", severity, subject))
            .header(ContentType::TEXT_PLAIN)
            .body(content.to_string())
            .map_err(|e| NotifyError::Platform(format!("Failed to build email: {}", e)))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn notify(
        &self,
        severity: Severity,
        subject: &str,
        content: &str,
    ) -> Result<(), NotifyError> {
        let email = self.build_message(severity, subject, content)?;
        self.mailer
            .send(email)
            .await
            .map_err(|e| NotifyError::Network(format!("SMTP error: {}", e)))?;
        Ok(())
    }
}
