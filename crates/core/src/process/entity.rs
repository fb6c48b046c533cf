use crate::common::failure::Failure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// # Summary
/// 终端的启动方式。
///
/// # Invariants
/// - `Headless` 进程在测试完成后会自行退出，其退出不视为崩溃。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    // 常驻图形界面
    Interactive,
    // 携带配置产物执行单次测试
    Headless,
}

/// # Summary
/// 外部终端实例的身份句柄。
///
/// # Invariants
/// - 由 Supervisor 独占持有，启动成功时创建，确认终止时销毁。
/// - 任意时刻至多存在一个活跃句柄。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessHandle {
    // 操作系统进程号
    pub pid: u32,
    // 启动完成时间
    pub started_at: DateTime<Utc>,
    // 最近一次探测到可响应的时间
    pub last_responsive_at: Option<DateTime<Utc>>,
    // 累计重启次数
    pub restart_count: u32,
    // 启动方式
    pub mode: LaunchMode,
}

/// # Summary
/// 被托管进程的生命周期状态机。
///
/// # Invariants
/// - `Starting` 受启动超时约束，只会转入 `Running` 或回落到 `NotRunning`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    NotRunning,
    Starting,
    Running,
    Unresponsive,
    Stopping,
}

/// # Summary
/// 启动器观测到的原始退出状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    // 退出码，被信号终止时为空
    pub code: Option<i32>,
    // 是否正常退出
    pub success: bool,
}

/// # Summary
/// Supervisor 记录的最近一次退出信息。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub pid: u32,
    pub code: Option<i32>,
    pub success: bool,
    pub observed_at: DateTime<Utc>,
    // 退出是否在预期内 (调用过 stop，或 headless 自行结束)
    pub expected: bool,
}

/// # Summary
/// 启动参数。
///
/// # Invariants
/// - `config` 非空即为 headless 启动，终端读取该配置产物执行测试。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {
    // 登录账户 (/login:)
    pub account: Option<String>,
    // 以最小化窗口启动
    pub minimized: bool,
    // headless 模式下的配置产物路径 (/config:)
    pub config: Option<PathBuf>,
}

impl StartOptions {
    /// 常驻界面启动
    pub fn interactive(account: Option<String>) -> Self {
        Self {
            account,
            minimized: true,
            config: None,
        }
    }

    /// 携带配置产物的单次测试启动
    pub fn headless(config: PathBuf) -> Self {
        Self {
            account: None,
            minimized: true,
            config: Some(config),
        }
    }

    /// 根据是否携带配置产物推断启动方式
    pub fn mode(&self) -> LaunchMode {
        if self.config.is_some() {
            LaunchMode::Headless
        } else {
            LaunchMode::Interactive
        }
    }
}

/// # Summary
/// `stop` 的结果。
///
/// # Invariants
/// - 停止一个未运行的进程不是错误：`was_running = false, stopped = true`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOutcome {
    pub was_running: bool,
    // 进程已确认终止
    pub stopped: bool,
    // 是否升级为强制终止
    pub forced: bool,
    pub message: String,
}

/// # Summary
/// `status` 的非阻塞快照。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: ProcessState,
    pub is_running: bool,
    pub is_responsive: bool,
    pub handle: Option<ProcessHandle>,
    pub last_exit: Option<ExitInfo>,
    pub uptime_secs: Option<i64>,
}

/// # Summary
/// 自动重启的结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RestartOutcome {
    Restarted(ProcessHandle),
    Failed(Failure),
}

/// # Summary
/// 看门狗事件。由观察者消费后即丢弃。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchdogEvent {
    // 进程在未请求停止的情况下消失
    CrashDetected {
        last: ProcessHandle,
        exit: Option<ExitInfo>,
    },
    // 崩溃后的自动重启
    AutoRestart {
        restart_count: u32,
        outcome: RestartOutcome,
    },
    // 进程存在但无响应
    Unresponsive { handle: ProcessHandle },
    // 探测本身失败，循环继续
    WatchError {
        detail: String,
        last: Option<ProcessHandle>,
    },
}

impl WatchdogEvent {
    /// 事件名，与序列化标签一致
    pub fn name(&self) -> &'static str {
        match self {
            WatchdogEvent::CrashDetected { .. } => "crash_detected",
            WatchdogEvent::AutoRestart { .. } => "auto_restart",
            WatchdogEvent::Unresponsive { .. } => "unresponsive",
            WatchdogEvent::WatchError { .. } => "watch_error",
        }
    }
}

/// # Summary
/// 看门狗循环参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    // 探测间隔
    pub interval: Duration,
    // 崩溃后是否自动重启
    pub auto_restart: bool,
    // 重启时 stop 与 start 之间的静置时间
    pub restart_wait: Duration,
}

/// # Summary
/// 已启动的看门狗循环的描述。停止循环通过 `Watchdog::unwatch` 完成。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchHandle {
    pub started_at: DateTime<Utc>,
    pub interval: Duration,
    pub auto_restart: bool,
}
