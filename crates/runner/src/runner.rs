use async_trait::async_trait;
use shiken_core::artifact::entity::{ArtifactPaths, Observation};
use shiken_core::artifact::port::{ArtifactStore, ReportParser};
use shiken_core::common::failure::{Failure, FailureKind};
use shiken_core::common::time::deadline_after;
use shiken_core::config::AppConfig;
use shiken_core::process::entity::StartOptions;
use shiken_core::process::port::Supervisor;
use shiken_core::run::entity::{RunOutcome, RunResult, RunSpec};
use shiken_core::run::error::RunError;
use shiken_core::run::port::BacktestRunner;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// 执行器参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    // 报告轮询间隔
    pub poll_interval: Duration,
    // 停止常驻终端后的静置时间
    pub settle: Duration,
    // 保留配置产物
    pub keep_artifacts: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            settle: Duration::from_secs(5),
            keep_artifacts: false,
        }
    }
}

impl From<&AppConfig> for RunnerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.backtest.poll_interval(),
            settle: config.terminal.settle(),
            keep_artifacts: config.backtest.keep_artifacts,
        }
    }
}

/// # Summary
/// 通过外部终端执行回测。
///
/// # Invariants
/// - 整个回测期间持有独占租约，任何退出路径都会释放。
/// - 总耗时受 `RunSpec::timeout` 约束，超时后强制停止终端。
/// - 已受理的任务总是产出 `RunResult`，不会自动重试。
pub struct TerminalRunner {
    supervisor: Arc<dyn Supervisor>,
    store: Arc<dyn ArtifactStore>,
    parser: Arc<dyn ReportParser>,
    settings: RunnerSettings,
}

impl TerminalRunner {
    pub fn new(
        supervisor: Arc<dyn Supervisor>,
        store: Arc<dyn ArtifactStore>,
        parser: Arc<dyn ReportParser>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            supervisor,
            store,
            parser,
            settings,
        }
    }

    /// # Summary
    /// 确保终端空闲：headless 测试需要独占终端的配置。
    ///
    /// # Returns
    /// 无法停止时返回描述失败的 `Failure`。
    async fn vacate(&self) -> Result<(), Failure> {
        let status = self
            .supervisor
            .status()
            .await
            .map_err(|e| Failure::from(&e))?;
        if !status.is_running {
            return Ok(());
        }

        info!("Stopping running terminal before backtest");
        let outcome = self
            .supervisor
            .stop(true)
            .await
            .map_err(|e| Failure::from(&e))?;
        if !outcome.stopped {
            return Err(Failure::new(FailureKind::LaunchFailure, outcome.message));
        }
        tokio::time::sleep(self.settings.settle).await;
        Ok(())
    }

    /// # Summary
    /// 执行一次回测的主体流程。
    ///
    /// # Logic
    /// 1. 腾出终端。
    /// 2. 写出配置产物。
    /// 3. headless 启动终端。
    /// 4. 在时限内等待报告稳定。
    /// 5. 解析报告。
    async fn execute(&self, spec: &RunSpec, paths: &ArtifactPaths, deadline: Instant) -> RunOutcome {
        if let Err(failure) = self.vacate().await {
            return RunOutcome::Crashed(failure);
        }

        if let Err(e) = self.store.write_config(spec, paths).await {
            error!(run_id = %paths.run_id, error = %e, "Config artifact write failed");
            return RunOutcome::ConfigError(Failure::from(&e));
        }

        let options = StartOptions::headless(paths.config.clone());
        if let Err(e) = self.supervisor.start(options).await {
            error!(run_id = %paths.run_id, error = %e, "Headless launch failed");
            return RunOutcome::Crashed(Failure::new(FailureKind::LaunchFailure, e.to_string()));
        }

        if let Some(outcome) = self.await_report(spec, paths, deadline).await {
            return outcome;
        }

        match self.parser.parse_report(&paths.report).await {
            Ok(metrics) => {
                info!(
                    run_id = %paths.run_id,
                    pf = metrics.profit_factor,
                    dd = metrics.drawdown,
                    trades = metrics.trade_count,
                    "Backtest completed"
                );
                RunOutcome::Completed(metrics)
            }
            Err(e) => {
                error!(run_id = %paths.run_id, error = %e, "Report unreadable");
                RunOutcome::ConfigError(Failure::from(&e))
            }
        }
    }

    /// # Summary
    /// 轮询报告直至稳定。
    ///
    /// # Logic
    /// 1. 每轮先检查时限，到期则强制停止终端并返回超时。
    /// 2. 报告非空且连续两次观测一致即视为写完。
    /// 3. 终端以失败状态退出视为崩溃；正常退出则继续等待报告落盘。
    ///
    /// # Returns
    /// 报告就绪返回 `None`，否则返回终止结果。
    async fn await_report(
        &self,
        spec: &RunSpec,
        paths: &ArtifactPaths,
        deadline: Instant,
    ) -> Option<RunOutcome> {
        let mut previous: Option<Observation> = None;
        let mut exited = false;
        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!(run_id = %paths.run_id, timeout = ?spec.timeout(), "Backtest timed out");
                self.abort().await;
                return Some(RunOutcome::TimedOut(Failure::new(
                    FailureKind::Timeout,
                    format!("report not ready within {:?}", spec.timeout()),
                )));
            }

            match self.store.observe(&paths.report).await {
                Ok(Some(current)) => {
                    if current.is_stable_after(previous.as_ref()) {
                        debug!(run_id = %paths.run_id, size = current.size, "Report stable");
                        return None;
                    }
                    previous = Some(current);
                }
                Ok(None) => previous = None,
                Err(e) => warn!(run_id = %paths.run_id, error = %e, "Report observation failed"),
            }

            if !exited {
                match self.supervisor.status().await {
                    Ok(status) if !status.is_running => {
                        if let Some(exit) = status.last_exit
                            && !exit.success
                        {
                            error!(run_id = %paths.run_id, code = ?exit.code, "Terminal crashed during backtest");
                            return Some(RunOutcome::Crashed(Failure::new(
                                FailureKind::CrashFailure,
                                format!("terminal exited with code {:?} before report was ready", exit.code),
                            )));
                        }
                        debug!(run_id = %paths.run_id, "Terminal exited, waiting for report");
                        exited = true;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(run_id = %paths.run_id, error = %e, "Status probe failed"),
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.settings.poll_interval.min(remaining)).await;
        }
    }

    /// 超时后终止仍在运行的终端
    async fn abort(&self) {
        match self.supervisor.stop(true).await {
            Ok(outcome) if outcome.was_running && !outcome.stopped => {
                error!(message = %outcome.message, "Terminal survived forced stop");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Forced stop failed"),
        }
    }
}

#[async_trait]
impl BacktestRunner for TerminalRunner {
    async fn run(&self, spec: RunSpec) -> Result<RunResult, RunError> {
        let lease = self.supervisor.try_lease().ok_or(RunError::Busy)?;
        let started = Instant::now();
        let deadline = Instant::from_std(deadline_after(started.into_std(), spec.timeout()));
        let paths = self.store.allocate(&spec);
        info!(
            run_id = %paths.run_id,
            strategy = spec.strategy(),
            symbol = spec.symbol(),
            from = %spec.from(),
            to = %spec.to(),
            "Backtest started"
        );

        let outcome = self.execute(&spec, &paths, deadline).await;

        if !self.settings.keep_artifacts
            && let Err(e) = self.store.discard(&paths.config).await
        {
            warn!(run_id = %paths.run_id, error = %e, "Config artifact cleanup failed");
        }
        drop(lease);

        Ok(RunResult {
            run_id: paths.run_id.clone(),
            outcome,
            artifacts: Some(paths),
            elapsed: started.elapsed(),
        })
    }
}
