mod cli;
mod commands;
mod logging;
mod settings;

use clap::Parser;
use cli::Cli;
use shiken_artifact::{FsArtifactStore, HtmlReportParser};
use shiken_core::common::failure::Failure;
use shiken_core::common::time::SystemClock;
use shiken_core::config::NotifyConfig;
use shiken_core::notify::port::Notifier;
use shiken_manager::StudyManager;
use shiken_notify::{EmailNotifier, LogNotifier, NotifyDispatcher, TelegramNotifier};
use shiken_process::{SupervisorSettings, SystemLauncher, TerminalSupervisor};
use shiken_runner::{RunnerSettings, TerminalRunner};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// 退出前等待告警队列排空的上限
const ALERT_FLUSH_TIMEOUT: Duration = Duration::from_secs(15);

/// 日志渠道总是启用，其余渠道按配置启用
fn notifiers(config: &NotifyConfig) -> Vec<Arc<dyn Notifier>> {
    let mut channels: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
    if let Some(telegram) = &config.telegram {
        match TelegramNotifier::new(telegram.bot_token.clone(), telegram.chat_id.clone()) {
            Ok(notifier) => channels.push(Arc::new(notifier)),
            Err(e) => warn!(error = %e, "Telegram channel disabled"),
        }
    }
    if let Some(email) = &config.email {
        match EmailNotifier::from_config(email) {
            Ok(notifier) => channels.push(Arc::new(notifier)),
            Err(e) => warn!(error = %e, "Email channel disabled"),
        }
    }
    channels
}

/// # Summary
/// 命令行入口，纯粹的 DI 容器。
/// 负责实例化所有具体实现并通过 `Arc<dyn Trait>` 注入到 StudyManager。
///
/// # Logic
/// 1. 解析命令行，加载分层配置，初始化日志。
/// 2. 实例化基础设施层 (进程托管、产物存储、报告解析、通知渠道)。
/// 3. 实例化回测执行器并构造 StudyManager。
/// 4. 执行子命令，结果以 JSON 打印到 stdout。
/// 5. 释放管理器，等待告警发送完毕后退出。
#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // 1. 命令行、配置与日志
    let cli = Cli::parse();
    let config = settings::load(cli.config.as_deref())?;
    let _log_guard = logging::init(&config.log);
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("TLS crypto provider already installed");
    }
    info!(
        executable = %config.terminal.executable.display(),
        data_dir = %config.terminal.data_dir.display(),
        "Shiken starting"
    );

    // 2. 基础设施层
    let clock = Arc::new(SystemClock);
    let launcher = Arc::new(SystemLauncher::from_config(&config.terminal));
    let supervisor = TerminalSupervisor::new(
        launcher,
        clock.clone(),
        SupervisorSettings::from(&config.terminal),
    );
    let artifacts = Arc::new(FsArtifactStore::new(&config.terminal.data_dir, clock));
    let parser = Arc::new(HtmlReportParser::new()?);
    let (dispatcher, alert_worker) =
        NotifyDispatcher::spawn(notifiers(&config.notify), config.notify.min_severity);

    // 3. 执行器与应用服务层
    let runner = Arc::new(TerminalRunner::new(
        supervisor.clone(),
        artifacts.clone(),
        parser.clone(),
        RunnerSettings::from(&config),
    ));
    let manager = StudyManager::new(
        supervisor.clone(),
        supervisor,
        runner,
        artifacts,
        parser,
        Arc::new(dispatcher),
        config.optimization.max_candidates,
    );

    // 4. 执行命令
    let exit = match commands::execute(&manager, &config, cli.command).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(kind = %e.kind(), error = %e, "Command failed");
            let failure = Failure::from(&e);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "error": failure }))?
            );
            ExitCode::FAILURE
        }
    };

    // 5. 最后一个发送端随管理器释放，后台任务排空队列后结束
    drop(manager);
    match tokio::time::timeout(ALERT_FLUSH_TIMEOUT, alert_worker).await {
        Ok(Ok(())) => debug!("Alert queue flushed"),
        Ok(Err(e)) => warn!(error = %e, "Alert worker failed"),
        Err(_) => warn!("Timed out waiting for pending alerts"),
    }
    Ok(exit)
}
