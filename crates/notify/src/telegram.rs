use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shiken_core::notify::entity::Severity;
use shiken_core::notify::error::NotifyError;
use shiken_core::notify::port::Notifier;
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// # Summary
/// 通过 Telegram Bot API 发送消息的通知渠道。
///
/// # Invariants
/// * `bot_token` 有效，且 bot 可以访问 `chat_id`。
/// * 消息以 HTML 模式发送，主题与正文都会转义。
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

/// `sendMessage` 请求体
#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
}

/// Bot API 的统一响应外壳
#[derive(Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

impl TelegramNotifier {
    /// # Summary
    /// 创建 `TelegramNotifier`。
    ///
    /// # Arguments
    /// * `bot_token` - Bot API token。
    /// * `chat_id` - 目标会话。
    ///
    /// # Returns
    /// * token 或 chat_id 为空、HTTP 客户端无法构建时返回 `NotifyError::Config`。
    pub fn new(bot_token: String, chat_id: String) -> Result<Self, NotifyError> {
        if bot_token.trim().is_empty() || chat_id.trim().is_empty() {
            return Err(NotifyError::Config(
                "Telegram bot_token and chat_id are required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            bot_token,
            chat_id,
            api_base: DEFAULT_API_BASE.to_string(),
            client,
        })
    }

    /// 替换 API 地址 (自建网关或测试)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn render(severity: Severity, subject: &str, content: &str) -> String {
        format!(
            "{} <b>{}</b>\n{}",
            severity.badge(),
            escape_html(subject),
            escape_html(content)
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    /// # Summary
    /// 向配置的会话发送通知。
    ///
    /// # Logic
    /// 1. 拼接 `sendMessage` 地址。
    /// 2. 级别标记 + 加粗主题 + 正文。
    /// 3. HTTP 状态与响应体中的 `ok` 任一失败都视为平台错误。
    async fn notify(
        &self,
        severity: Severity,
        subject: &str,
        content: &str,
    ) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let payload = TelegramMessage {
            chat_id: &self.chat_id,
            text: Self::render(severity, subject, content),
            parse_mode: "HTML",
        };

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NotifyError::Network(e.without_url().to_string()))?;
        if !status.is_success() {
            return Err(NotifyError::Platform(format!(
                "Telegram API error ({}): {}",
                status, body
            )));
        }
        match serde_json::from_str::<TelegramResponse>(&body) {
            Ok(reply) if reply.ok => Ok(()),
            Ok(reply) => Err(NotifyError::Platform(format!(
                "Telegram API rejected message: {}",
                reply.description.unwrap_or_default()
            ))),
            Err(e) => Err(NotifyError::Platform(format!(
                "Unexpected Telegram response: {}",
                e
            ))),
        }
    }
}
