use crate::cli::{Command, OptimizeArgs, WalkForwardArgs, WatchArgs};
use serde::Serialize;
use serde_json::{Value, json};
use shiken_core::common::failure::{Failure, FailureKind};
use shiken_core::config::AppConfig;
use shiken_core::process::entity::{WatchConfig, WatchdogEvent};
use shiken_core::run::error::RunError;
use shiken_manager::{ManagerError, StudyManager};
use shiken_optimizer::WalkForwardPlan;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// 命令执行错误
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error(transparent)]
    Spec(#[from] RunError),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Signal error: {0}")]
    Signal(#[from] std::io::Error),
}

impl AppError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AppError::Manager(e) => e.kind(),
            AppError::Spec(e) => e.kind(),
            AppError::Json(_) => FailureKind::ConfigError,
            AppError::Signal(_) => FailureKind::ProbeError,
        }
    }
}

impl From<&AppError> for Failure {
    fn from(e: &AppError) -> Self {
        match e {
            AppError::Manager(inner) => inner.into(),
            AppError::Spec(inner) => inner.into(),
            other => Failure::new(other.kind(), other.to_string()),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, AppError> {
    Ok(serde_json::to_value(value)?)
}

/// # Summary
/// 执行一条子命令，结果以 JSON 返回。
///
/// # Logic
/// 命令行未给出的选项一律取 `config` 中的默认值。
pub async fn execute(
    manager: &StudyManager,
    config: &AppConfig,
    command: Command,
) -> Result<Value, AppError> {
    match command {
        Command::Status => to_json(&manager.process_status().await?),
        Command::Start { account } => {
            let account = account.or_else(|| config.terminal.account.clone());
            to_json(&manager.start_terminal(account).await?)
        }
        Command::Stop { force } => to_json(&manager.stop_terminal(force).await?),
        Command::Restart { wait_secs } => {
            let wait = wait_secs.map_or_else(|| config.terminal.settle(), Duration::from_secs);
            to_json(&manager.restart_terminal(wait).await?)
        }
        Command::Backtest(args) => {
            let spec = args.to_spec(&config.backtest)?;
            to_json(&manager.run_backtest(spec).await?)
        }
        Command::Optimize(args) => optimize(manager, config, args).await,
        Command::WalkForward(args) => walk_forward(manager, config, args).await,
        Command::Watch(args) => watch(manager, config, args).await,
        Command::Report { strategy } => to_json(&manager.latest_report(&strategy).await?),
    }
}

async fn optimize(
    manager: &StudyManager,
    config: &AppConfig,
    args: OptimizeArgs,
) -> Result<Value, AppError> {
    let template = args.spec.to_spec(&config.backtest)?;
    let criterion = args.sweep.criterion.unwrap_or(config.optimization.criterion);
    let top_n = args.top_n.unwrap_or(config.optimization.top_n);
    let report = manager
        .run_optimization(&template, &args.sweep.ranges(), criterion, top_n)
        .await?;
    to_json(&report)
}

async fn walk_forward(
    manager: &StudyManager,
    config: &AppConfig,
    args: WalkForwardArgs,
) -> Result<Value, AppError> {
    let defaults = &config.optimization;
    let mut template = args.spec.to_spec(&config.backtest)?;
    // 前推窗口内的回测有单独的超时默认值
    if args.spec.timeout_secs.is_none() {
        template = template.with_timeout(Duration::from_secs(defaults.timeout_per_window_secs));
    }
    let plan = WalkForwardPlan {
        date_from: template.from(),
        date_to: template.to(),
        n_windows: args.windows.unwrap_or(defaults.wf_windows),
        test_ratio: args.test_ratio.unwrap_or(defaults.wf_test_ratio),
        efficiency_threshold: args.threshold.unwrap_or(defaults.wf_efficiency_threshold),
    };
    let criterion = args.sweep.criterion.unwrap_or(defaults.criterion);
    let report = manager
        .walk_forward_test(&template, &args.sweep.ranges(), criterion, &plan)
        .await?;
    to_json(&report)
}

fn print_event(event: WatchdogEvent) {
    match serde_json::to_string(&event) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!(event = event.name(), error = %e, "Failed to serialize watchdog event"),
    }
}

/// # Summary
/// 托管终端直到收到 Ctrl-C。
///
/// # Logic
/// 1. `--start` 时先启动终端；已在运行的终端由看门狗在第一个周期接管。
/// 2. 每个事件以单行 JSON 打印到 stdout，同时经告警渠道发出。
/// 3. 收到信号后停止看门狗，终端保持运行。
async fn watch(
    manager: &StudyManager,
    config: &AppConfig,
    args: WatchArgs,
) -> Result<Value, AppError> {
    let started = if args.start {
        let account = args.account.or_else(|| config.terminal.account.clone());
        Some(manager.start_terminal(account).await?)
    } else {
        None
    };
    let watch_config = WatchConfig {
        interval: Duration::from_secs(
            args.interval_secs
                .unwrap_or(config.watchdog.interval_secs),
        ),
        auto_restart: config.watchdog.auto_restart && !args.no_restart,
        restart_wait: config.terminal.settle(),
    };
    let handle = manager
        .watch_process(watch_config, Arc::new(print_event))
        .await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping watchdog");
    let stopped = manager.unwatch_process().await;
    Ok(json!({
        "started": to_json(&started)?,
        "watch": to_json(&handle)?,
        "stopped": stopped,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;
    use shiken_artifact::{FsArtifactStore, HtmlReportParser};
    use shiken_core::common::time::SystemClock;
    use shiken_core::run::entity::{Metrics, RunOutcome, RunSpec};
    use shiken_core::testing::{FakeTerminal, RecordingSink, ScriptedRunner};
    use shiken_process::{SupervisorSettings, TerminalSupervisor};

    fn completed(spec: &RunSpec) -> Result<RunOutcome, RunError> {
        let tp = spec.params().get("TP").map_or(0.0, |v| v.as_f64());
        Ok(RunOutcome::Completed(Metrics {
            profit_factor: 1.0 + tp / 100.0,
            trade_count: 12,
            ..Metrics::default()
        }))
    }

    fn manager(dir: &std::path::Path) -> anyhow::Result<(Arc<StudyManager>, Arc<ScriptedRunner>)> {
        let supervisor = TerminalSupervisor::new(
            Arc::new(FakeTerminal::new()),
            Arc::new(SystemClock),
            SupervisorSettings {
                startup_timeout: Duration::from_millis(200),
                stop_grace: Duration::from_millis(100),
                probe_interval: Duration::from_millis(5),
            },
        );
        let runner = Arc::new(ScriptedRunner::new(completed));
        let manager = StudyManager::new(
            supervisor.clone(),
            supervisor,
            runner.clone(),
            Arc::new(FsArtifactStore::new(dir, Arc::new(SystemClock))),
            Arc::new(HtmlReportParser::new()?),
            Arc::new(RecordingSink::default()),
            100,
        );
        Ok((manager, runner))
    }

    async fn run(manager: &StudyManager, args: &[&str]) -> Result<Value, AppError> {
        let cli = Cli::try_parse_from(args.iter().copied()).unwrap();
        execute(manager, &AppConfig::default(), cli.command).await
    }

    #[tokio::test]
    async fn test_terminal_lifecycle_commands() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (manager, _) = manager(dir.path())?;

        let status = run(&manager, &["shiken", "status"]).await?;
        assert_eq!(status["is_running"], json!(false));

        let handle = run(&manager, &["shiken", "start", "--account", "51234"]).await?;
        assert!(handle["pid"].as_u64().is_some());
        let restarted = run(&manager, &["shiken", "restart", "--wait-secs", "0"]).await?;
        assert_ne!(restarted["pid"], handle["pid"]);

        let stopped = run(&manager, &["shiken", "stop"]).await?;
        assert_eq!(stopped["was_running"], json!(true));
        assert_eq!(stopped["stopped"], json!(true));
        Ok(())
    }

    #[tokio::test]
    async fn test_optimize_uses_config_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (manager, runner) = manager(dir.path())?;

        let report = run(
            &manager,
            &[
                "shiken", "optimize", "--strategy", "Grid", "--symbol", "EURUSD", "--from",
                "2024-01-01", "--to", "2024-03-01", "--param", "TP=10:30:10",
            ],
        )
        .await?;

        assert_eq!(report["total_candidates"], json!(3));
        assert_eq!(runner.calls().len(), 3);
        assert_eq!(runner.calls()[0].timeout(), AppConfig::default().backtest.timeout());
        Ok(())
    }

    #[tokio::test]
    async fn test_walk_forward_uses_window_timeout() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (manager, runner) = manager(dir.path())?;

        run(
            &manager,
            &[
                "shiken", "walk-forward", "--strategy", "Grid", "--symbol", "EURUSD", "--from",
                "2024-01-01", "--to", "2024-05-01", "--param", "TP=10:20:10", "--windows", "2",
                "--test-ratio", "0.5",
            ],
        )
        .await?;

        let calls = runner.calls();
        // 每个窗口 2 次样本内 + 1 次样本外
        assert_eq!(calls.len(), 6);
        let expected = Duration::from_secs(AppConfig::default().optimization.timeout_per_window_secs);
        assert!(calls.iter().all(|spec| spec.timeout() == expected));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_spec_maps_to_config_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (manager, runner) = manager(dir.path())?;

        let err = run(
            &manager,
            &[
                "shiken", "backtest", "--strategy", "Grid", "--symbol", "EURUSD", "--from",
                "2024-03-01", "--to", "2024-01-01",
            ],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Spec(_)));
        assert_eq!(Failure::from(&err).kind, FailureKind::ConfigError);
        assert!(runner.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_report_without_files_is_null() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (manager, _) = manager(dir.path())?;
        assert_eq!(run(&manager, &["shiken", "report", "Grid"]).await?, Value::Null);
        Ok(())
    }
}
