use shiken_core::config::LogConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// # Summary
/// 初始化全局日志。
///
/// # Logic
/// 1. 级别取自 `RUST_LOG`，缺省为 `info`。
/// 2. 控制台输出到 stderr，stdout 只留给命令结果。
/// 3. 同时按天滚动写入 `{dir}/{file_prefix}.YYYY-MM-DD`。
///
/// # Returns
/// 文件写入线程的守卫，必须持有到进程结束，否则尾部日志会丢失。
pub fn init(config: &LogConfig) -> WorkerGuard {
    let appender = tracing_appender::rolling::daily(&config.dir, &config.file_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();
    guard
}
