use crate::notify::entity::Severity;
use crate::optimize::entity::Criterion;
use crate::run::entity::TickModel;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub terminal: TerminalConfig,
    pub backtest: BacktestConfig,
    pub optimization: OptimizationConfig,
    pub watchdog: WatchdogConfig,
    pub notify: NotifyConfig,
    pub log: LogConfig,
}

/// # Summary
/// 外部终端的安装位置与生命周期时限。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    // 终端可执行文件
    pub executable: PathBuf,
    // 终端数据目录 (MQL5/ 所在目录)，报告与配置产物落在其下
    pub data_dir: PathBuf,
    // 默认登录账户
    pub account: Option<String>,
    pub startup_timeout_secs: u64,
    pub stop_grace_secs: u64,
    // stop 与下一次 start 之间的静置时间
    pub settle_secs: u64,
    // 就绪标记文件，存在即视为就绪
    pub ready_marker: Option<PathBuf>,
    // 心跳文件，超过 heartbeat_stale_secs 未更新视为无响应
    pub heartbeat_path: Option<PathBuf>,
    pub heartbeat_stale_secs: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(r"C:\Program Files\MetaTrader 5\terminal64.exe"),
            data_dir: PathBuf::from("terminal"),
            account: None,
            startup_timeout_secs: 30,
            stop_grace_secs: 10,
            settle_secs: 5,
            ready_marker: None,
            heartbeat_path: None,
            heartbeat_stale_secs: 120,
        }
    }
}

impl TerminalConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

/// # Summary
/// 单次回测的默认模板参数。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub deposit: f64,
    pub currency: String,
    pub leverage: u32,
    pub model: TickModel,
    pub timeout_secs: u64,
    // 报告轮询间隔
    pub poll_interval_ms: u64,
    // 保留配置产物，便于排查
    pub keep_artifacts: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            deposit: 300.0,
            currency: "USD".to_string(),
            leverage: 200,
            model: TickModel::OhlcM1,
            timeout_secs: 300,
            poll_interval_ms: 3000,
            keep_artifacts: false,
        }
    }
}

impl BacktestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// # Summary
/// 参数扫描与前推验证的默认值。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    pub top_n: usize,
    pub criterion: Criterion,
    // 扫描规模上限，超出直接拒绝
    pub max_candidates: usize,
    pub wf_windows: u32,
    pub wf_test_ratio: f64,
    pub wf_efficiency_threshold: f64,
    // 前推验证中单次回测的超时
    pub timeout_per_window_secs: u64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            criterion: Criterion::ProfitFactor,
            max_candidates: 10_000,
            wf_windows: 4,
            wf_test_ratio: 0.3,
            wf_efficiency_threshold: 0.7,
            timeout_per_window_secs: 900,
        }
    }
}

/// # Summary
/// 看门狗默认值。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub interval_secs: u64,
    pub auto_restart: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            auto_restart: true,
        }
    }
}

/// # Summary
/// 通知渠道配置。未填写凭据的渠道不启用。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub min_severity: Severity,
    pub telegram: Option<TelegramConfig>,
    pub email: Option<EmailConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            min_severity: Severity::Info,
            telegram: None,
            email: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub from: String,
    pub to: String,
}

/// 日志输出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub dir: PathBuf,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_prefix: "shiken.log".to_string(),
        }
    }
}
