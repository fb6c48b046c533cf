use serde::{Deserialize, Serialize};

/// # Summary
/// 跨层统一的失败分类。
/// 各领域错误枚举都通过 `kind()` 归入这里的某一类，调用方据此决定是否重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    // 可执行文件缺失或就绪探测超时
    LaunchFailure,
    // 独占令牌已被其他任务持有
    Busy,
    // 产物未在截止时间内出现 / 进程未在截止时间内响应
    Timeout,
    // 进程在运行中意外消失
    CrashFailure,
    // 运行规格非法或报告无法解析
    ConfigError,
    // 响应性探测本身失败
    ProbeError,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::LaunchFailure => "launch_failure",
            FailureKind::Busy => "busy",
            FailureKind::Timeout => "timeout",
            FailureKind::CrashFailure => "crash_failure",
            FailureKind::ConfigError => "config_error",
            FailureKind::ProbeError => "probe_error",
        };
        write!(f, "{}", s)
    }
}

/// # Summary
/// 对外暴露的失败记录：分类 + 可读消息。
///
/// # Invariants
/// - 不携带底层错误对象，只保留字符串，保证可序列化与可克隆。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    /// 构造失败记录
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}
