use serde::Serialize;
use shiken_core::artifact::error::ArtifactError;
use shiken_core::artifact::port::{ArtifactStore, ReportParser};
use shiken_core::common::failure::{Failure, FailureKind};
use shiken_core::notify::entity::Severity;
use shiken_core::notify::port::AlertSink;
use shiken_core::optimize::entity::{
    Criterion, ParamRanges, SweepReport, WalkForwardReport, WalkForwardVerdict,
};
use shiken_core::optimize::error::OptimizeError;
use shiken_core::process::entity::{
    ProcessHandle, RestartOutcome, StartOptions, StatusReport, StopOutcome, WatchConfig,
    WatchHandle, WatchdogEvent,
};
use shiken_core::process::error::SupervisorError;
use shiken_core::process::lease::RunLease;
use shiken_core::process::port::{Supervisor, WatchObserver, Watchdog};
use shiken_core::run::entity::{Metrics, ParamSet, RunOutcome, RunResult, RunSpec};
use shiken_core::run::error::RunError;
use shiken_core::run::port::BacktestRunner;
use shiken_optimizer::{SweepOptimizer, WalkForwardPlan, WalkForwardValidator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// # Summary
/// Manager 层的统一错误类型。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ManagerError {
    #[error("Terminal is busy: a backtest holds the exclusivity lease")]
    Busy,
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Optimize(#[from] OptimizeError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl ManagerError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ManagerError::Busy => FailureKind::Busy,
            ManagerError::Supervisor(e) => e.kind(),
            ManagerError::Run(e) => e.kind(),
            ManagerError::Optimize(e) => e.kind(),
            ManagerError::Artifact(e) => e.kind(),
        }
    }
}

impl From<&ManagerError> for Failure {
    fn from(err: &ManagerError) -> Self {
        Failure::new(err.kind(), err.to_string())
    }
}

/// 最近一份报告及其指标
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSnapshot {
    pub path: PathBuf,
    pub metrics: Metrics,
}

fn format_params(params: &ParamSet) -> String {
    if params.is_empty() {
        return "(defaults)".to_string();
    }
    params
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_metrics(metrics: &Metrics) -> String {
    format!(
        "PF {:.2} | DD {:.2}% | Net {:.2} | Trades {} | Win {:.1}%",
        metrics.profit_factor,
        metrics.drawdown,
        metrics.net_profit,
        metrics.trade_count,
        metrics.win_rate
    )
}

/// 看门狗事件对应的告警
fn describe(event: &WatchdogEvent) -> (Severity, &'static str, String) {
    match event {
        WatchdogEvent::CrashDetected { last, exit } => (
            Severity::Critical,
            "Terminal crashed",
            match exit.as_ref().and_then(|e| e.code) {
                Some(code) => format!("pid {} exited unexpectedly with code {}", last.pid, code),
                None => format!("pid {} disappeared unexpectedly", last.pid),
            },
        ),
        WatchdogEvent::AutoRestart {
            restart_count,
            outcome: RestartOutcome::Restarted(handle),
        } => (
            Severity::Warning,
            "Terminal restarted",
            format!("new pid {} (restart #{})", handle.pid, restart_count),
        ),
        WatchdogEvent::AutoRestart {
            outcome: RestartOutcome::Failed(failure),
            ..
        } => (Severity::Critical, "Terminal restart failed", failure.to_string()),
        WatchdogEvent::Unresponsive { handle } => (
            Severity::Warning,
            "Terminal unresponsive",
            format!("pid {} stopped responding", handle.pid),
        ),
        WatchdogEvent::WatchError { detail, .. } => {
            (Severity::Warning, "Watchdog error", detail.clone())
        }
    }
}

/// 先转发给调用方的观察者，再发出告警
struct AlertingObserver {
    inner: Arc<dyn WatchObserver>,
    alerts: Arc<dyn AlertSink>,
}

impl WatchObserver for AlertingObserver {
    fn on_event(&self, event: WatchdogEvent) {
        let (severity, subject, content) = describe(&event);
        self.inner.on_event(event);
        self.alerts.notify(severity, subject, &content);
    }
}

/// # Summary
/// 研究管理器，系统的应用服务层门面 (Facade)。
/// 编译期仅依赖 `shiken-core` 中的 Trait 定义，所有具体实现通过构造函数注入。
///
/// # Invariants
/// - 终端的启停与回测共用同一把独占租约：回测进行中，手动启停返回 `Busy`。
/// - 每次回测、优化、前推验证结束后发出一条告警，告警不会影响返回值。
pub struct StudyManager {
    supervisor: Arc<dyn Supervisor>,
    watchdog: Arc<dyn Watchdog>,
    runner: Arc<dyn BacktestRunner>,
    optimizer: Arc<SweepOptimizer>,
    validator: WalkForwardValidator,
    artifacts: Arc<dyn ArtifactStore>,
    parser: Arc<dyn ReportParser>,
    alerts: Arc<dyn AlertSink>,
}

impl StudyManager {
    /// # Summary
    /// 创建 StudyManager 实例。
    ///
    /// # Arguments
    /// * `supervisor` / `watchdog` - 进程托管与看门狗，通常是同一个对象。
    /// * `runner` - 回测执行器。
    /// * `artifacts` / `parser` - 报告查找与解析。
    /// * `alerts` - 告警出口。
    /// * `max_candidates` - 单次扫描的候选上限。
    ///
    /// # Returns
    /// * `Arc<Self>` - 可共享的管理器实例。
    pub fn new(
        supervisor: Arc<dyn Supervisor>,
        watchdog: Arc<dyn Watchdog>,
        runner: Arc<dyn BacktestRunner>,
        artifacts: Arc<dyn ArtifactStore>,
        parser: Arc<dyn ReportParser>,
        alerts: Arc<dyn AlertSink>,
        max_candidates: usize,
    ) -> Arc<Self> {
        let optimizer = Arc::new(SweepOptimizer::new(runner.clone(), max_candidates));
        let validator = WalkForwardValidator::new(optimizer.clone(), runner.clone(), max_candidates);
        Arc::new(Self {
            supervisor,
            watchdog,
            runner,
            optimizer,
            validator,
            artifacts,
            parser,
            alerts,
        })
    }

    /// # Summary
    /// 执行一次回测。
    ///
    /// # Returns
    /// 回测结果 (可能是超时、崩溃等失败状态)；终端被占用时返回 `Busy` 类错误。
    pub async fn run_backtest(&self, spec: RunSpec) -> Result<RunResult, ManagerError> {
        let label = format!("{} {} {}", spec.strategy_stem(), spec.symbol(), spec.timeframe());
        let result = self.runner.run(spec).await?;
        match &result.outcome {
            RunOutcome::Completed(metrics) => self.alerts.notify(
                Severity::Info,
                &format!("Backtest completed: {}", label),
                &format_metrics(metrics),
            ),
            outcome => self.alerts.notify(
                Severity::Warning,
                &format!("Backtest {}: {}", outcome.status(), label),
                &outcome
                    .failure()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            ),
        }
        Ok(result)
    }

    /// # Summary
    /// 在模板上扫描参数区间并排序。
    pub async fn run_optimization(
        &self,
        template: &RunSpec,
        ranges: &ParamRanges,
        criterion: Criterion,
        top_n: usize,
    ) -> Result<SweepReport, ManagerError> {
        let report = self
            .optimizer
            .optimize(template, ranges, criterion, top_n)
            .await?;
        let subject = format!("Optimization finished: {}", template.strategy_stem());
        match report.best() {
            Some(best) => self.alerts.notify(
                Severity::Info,
                &subject,
                &format!(
                    "{}/{} completed, best {} = {:.4} with {}",
                    report.completed,
                    report.total_candidates,
                    criterion,
                    best.score.unwrap_or_default(),
                    format_params(&best.params)
                ),
            ),
            None => self.alerts.notify(
                Severity::Warning,
                &subject,
                &format!("none of {} candidates completed", report.total_candidates),
            ),
        }
        Ok(report)
    }

    /// # Summary
    /// 前推验证。
    pub async fn walk_forward_test(
        &self,
        template: &RunSpec,
        ranges: &ParamRanges,
        criterion: Criterion,
        plan: &WalkForwardPlan,
    ) -> Result<WalkForwardReport, ManagerError> {
        let report = self
            .validator
            .validate(template, ranges, criterion, plan)
            .await?;
        let subject = format!("Walk-forward finished: {}", template.strategy_stem());
        let (severity, content) = match &report.verdict {
            WalkForwardVerdict::Robust => (
                Severity::Info,
                format!(
                    "robust, efficiency {:.2} over {} windows",
                    report.wf_efficiency.unwrap_or_default(),
                    report.usable_windows
                ),
            ),
            WalkForwardVerdict::NotRobust => (
                Severity::Warning,
                format!(
                    "not robust, efficiency {:.2} below {:.2}",
                    report.wf_efficiency.unwrap_or_default(),
                    report.efficiency_threshold
                ),
            ),
            WalkForwardVerdict::Inconclusive { reason } => {
                (Severity::Warning, format!("inconclusive: {}", reason))
            }
        };
        self.alerts.notify(severity, &subject, &content);
        Ok(report)
    }

    /// # Summary
    /// 启动看门狗。事件先交给 `observer`，再转为告警。
    pub async fn watch_process(
        &self,
        config: WatchConfig,
        observer: Arc<dyn WatchObserver>,
    ) -> Result<WatchHandle, ManagerError> {
        let observer = Arc::new(AlertingObserver {
            inner: observer,
            alerts: self.alerts.clone(),
        });
        let handle = self.watchdog.watch(config, observer).await?;
        info!(interval = ?config.interval, auto_restart = config.auto_restart, "Watchdog started");
        Ok(handle)
    }

    /// 停止看门狗，返回是否确实停止了一个循环
    pub async fn unwatch_process(&self) -> bool {
        self.watchdog.unwatch().await
    }

    pub async fn process_status(&self) -> Result<StatusReport, ManagerError> {
        Ok(self.supervisor.status().await?)
    }

    fn lease(&self) -> Result<RunLease, ManagerError> {
        self.supervisor.try_lease().ok_or(ManagerError::Busy)
    }

    /// 启动常驻终端
    pub async fn start_terminal(
        &self,
        account: Option<String>,
    ) -> Result<ProcessHandle, ManagerError> {
        let _lease = self.lease()?;
        Ok(self.supervisor.start(StartOptions::interactive(account)).await?)
    }

    pub async fn stop_terminal(&self, force: bool) -> Result<StopOutcome, ManagerError> {
        let _lease = self.lease()?;
        Ok(self.supervisor.stop(force).await?)
    }

    pub async fn restart_terminal(&self, wait: Duration) -> Result<ProcessHandle, ManagerError> {
        let _lease = self.lease()?;
        Ok(self.supervisor.restart(wait).await?)
    }

    /// # Summary
    /// 查找并解析某个策略最近一次的报告。
    ///
    /// # Returns
    /// 没有报告时返回 `Ok(None)`；报告存在但无法解析时返回 `Artifact` 错误。
    pub async fn latest_report(
        &self,
        strategy: &str,
    ) -> Result<Option<ReportSnapshot>, ManagerError> {
        let Some(path) = self.artifacts.latest_report(strategy).await? else {
            return Ok(None);
        };
        let metrics = self.parser.parse_report(&path).await?;
        Ok(Some(ReportSnapshot { path, metrics }))
    }
}
