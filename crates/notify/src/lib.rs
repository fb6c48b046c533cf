//! # shiken-notify
//!
//! 通知渠道实现 (Telegram、SMTP 邮件、日志) 与异步分发器。
//! 业务侧只看到 `AlertSink`，发送失败在这里记录后丢弃。

pub mod dispatcher;
pub mod email;
pub mod log;
pub mod telegram;

pub use dispatcher::NotifyDispatcher;
pub use email::EmailNotifier;
pub use log::LogNotifier;
pub use telegram::TelegramNotifier;
