use chrono::NaiveDate;
use shiken_artifact::{FsArtifactStore, HtmlReportParser};
use shiken_core::common::failure::{Failure, FailureKind};
use shiken_core::common::time::SystemClock;
use shiken_core::notify::entity::Severity;
use shiken_core::optimize::entity::{Criterion, ParamRange, ParamRanges, WalkForwardVerdict};
use shiken_core::process::entity::{WatchConfig, WatchdogEvent};
use shiken_core::process::port::Supervisor;
use shiken_core::run::entity::{Metrics, ParamValue, RunOutcome, RunSpec, RunStatus};
use shiken_core::testing::{FakeTerminal, RecordingObserver, RecordingSink, ScriptedRunner};
use shiken_manager::{ManagerError, StudyManager};
use shiken_optimizer::WalkForwardPlan;
use shiken_process::{SupervisorSettings, TerminalSupervisor};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const REPORT: &str = r#"<html><body><table>
<tr><td>Total Net Profit:</td><td><b>812.50</b></td></tr>
<tr><td>Profit Factor:</td><td><b>1.64</b></td></tr>
<tr><td>Balance Drawdown Maximal:</td><td><b>210.00 (7.40%)</b></td></tr>
<tr><td>Total Trades:</td><td><b>57</b></td></tr>
</table></body></html>"#;

struct Harness {
    manager: Arc<StudyManager>,
    fake: FakeTerminal,
    supervisor: Arc<TerminalSupervisor>,
    sink: Arc<RecordingSink>,
    store: Arc<FsArtifactStore>,
    _dir: TempDir,
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// TP 越接近 30 盈利因子越高；名为 Crashy 的策略总是崩溃
fn script(spec: &RunSpec) -> Result<RunOutcome, shiken_core::run::error::RunError> {
    if spec.strategy() == "Crashy" {
        return Ok(RunOutcome::Crashed(Failure::new(
            FailureKind::CrashFailure,
            "terminal exited with code 3",
        )));
    }
    let tp = match spec.params().get("TP") {
        Some(ParamValue::Int(v)) => *v,
        _ => 30,
    };
    #[allow(clippy::cast_precision_loss)]
    let distance = (tp - 30).abs() as f64;
    Ok(RunOutcome::Completed(Metrics {
        profit_factor: 2.0 - distance / 100.0,
        trade_count: 40,
        ..Metrics::default()
    }))
}

fn harness() -> anyhow::Result<Harness> {
    let dir = tempfile::tempdir()?;
    let fake = FakeTerminal::new();
    let settings = SupervisorSettings {
        startup_timeout: Duration::from_millis(200),
        stop_grace: Duration::from_millis(100),
        probe_interval: Duration::from_millis(5),
    };
    let supervisor =
        TerminalSupervisor::new(Arc::new(fake.clone()), Arc::new(SystemClock), settings);
    let store = Arc::new(FsArtifactStore::new(dir.path(), Arc::new(SystemClock)));
    let sink = Arc::new(RecordingSink::default());
    let manager = StudyManager::new(
        supervisor.clone(),
        supervisor.clone(),
        Arc::new(ScriptedRunner::new(script)),
        store.clone(),
        Arc::new(HtmlReportParser::new()?),
        sink.clone(),
        100,
    );
    Ok(Harness {
        manager,
        fake,
        supervisor,
        sink,
        store,
        _dir: dir,
    })
}

fn template(strategy: &str) -> anyhow::Result<RunSpec> {
    Ok(RunSpec::builder(strategy, "EURUSD")
        .range(date(2024, 1, 1), date(2024, 5, 1))
        .build()?)
}

fn tp_ranges() -> ParamRanges {
    ParamRanges::from([("TP".to_string(), ParamRange::new(20.0, 40.0, 10.0))])
}

#[tokio::test]
async fn test_backtest_notifies_outcome() -> anyhow::Result<()> {
    let h = harness()?;

    let ok = h.manager.run_backtest(template("Grid")?).await?;
    assert_eq!(ok.status(), RunStatus::Completed);
    let crashed = h.manager.run_backtest(template("Crashy")?).await?;
    assert_eq!(crashed.status(), RunStatus::Crashed);

    let alerts = h.sink.alerts();
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0].0, Severity::Info);
    assert!(alerts[0].1.starts_with("Backtest completed: Grid EURUSD"));
    assert!(alerts[0].2.contains("PF 2.00"));
    assert_eq!(alerts[1].0, Severity::Warning);
    assert!(alerts[1].1.starts_with("Backtest crashed: Crashy"));
    assert!(alerts[1].2.contains("code 3"));
    Ok(())
}

#[tokio::test]
async fn test_optimization_reports_best_candidate() -> anyhow::Result<()> {
    let h = harness()?;
    let report = h
        .manager
        .run_optimization(&template("Grid")?, &tp_ranges(), Criterion::ProfitFactor, 1)
        .await?;

    assert_eq!(report.best().unwrap().params["TP"], ParamValue::Int(30));
    let alerts = h.sink.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].2.contains("TP=30"));

    let err = h
        .manager
        .run_optimization(&template("Grid")?, &ParamRanges::new(), Criterion::ProfitFactor, 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::ConfigError);
    Ok(())
}

#[tokio::test]
async fn test_walk_forward_verdict_is_reported() -> anyhow::Result<()> {
    let h = harness()?;
    let plan = WalkForwardPlan {
        date_from: date(2024, 1, 1),
        date_to: date(2024, 5, 1),
        n_windows: 2,
        test_ratio: 0.5,
        efficiency_threshold: 0.7,
    };
    let report = h
        .manager
        .walk_forward_test(&template("Grid")?, &tp_ranges(), Criterion::ProfitFactor, &plan)
        .await?;

    // 样本内外得分相同，效率为 1
    assert_eq!(report.verdict, WalkForwardVerdict::Robust);
    assert_eq!(report.wf_efficiency, Some(1.0));
    let alerts = h.sink.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].1.starts_with("Walk-forward finished"));
    assert!(alerts[0].2.starts_with("robust"));
    Ok(())
}

#[tokio::test]
async fn test_terminal_control_respects_lease() -> anyhow::Result<()> {
    let h = harness()?;

    let lease = h.supervisor.try_lease().unwrap();
    let err = h.manager.start_terminal(None).await.unwrap_err();
    assert_eq!(err, ManagerError::Busy);
    assert_eq!(err.kind(), FailureKind::Busy);
    assert!(h.fake.launches().is_empty());
    drop(lease);

    let handle = h.manager.start_terminal(Some("51234".to_string())).await?;
    let status = h.manager.process_status().await?;
    assert!(status.is_running);
    assert_eq!(status.handle.map(|x| x.pid), Some(handle.pid));

    let restarted = h.manager.restart_terminal(Duration::ZERO).await?;
    assert_ne!(restarted.pid, handle.pid);
    assert_eq!(h.fake.launches()[1].account.as_deref(), Some("51234"));

    let outcome = h.manager.stop_terminal(false).await?;
    assert!(outcome.was_running);
    assert!(outcome.stopped);
    assert!(!h.manager.process_status().await?.is_running);
    Ok(())
}

#[tokio::test]
async fn test_watchdog_events_become_alerts() -> anyhow::Result<()> {
    let h = harness()?;
    h.manager.start_terminal(None).await?;
    let observer = Arc::new(RecordingObserver::default());
    let config = WatchConfig {
        interval: Duration::from_millis(20),
        auto_restart: true,
        restart_wait: Duration::ZERO,
    };
    h.manager.watch_process(config, observer.clone()).await?;

    h.fake.crash(3);
    let mut restarted = false;
    for _ in 0..200 {
        if h.sink.alerts().iter().any(|a| a.1 == "Terminal restarted") {
            restarted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.manager.unwatch_process().await);
    assert!(!h.manager.unwatch_process().await);
    assert!(restarted);

    let alerts = h.sink.alerts();
    let crash = alerts.iter().find(|a| a.1 == "Terminal crashed").unwrap();
    assert_eq!(crash.0, Severity::Critical);
    assert!(crash.2.contains("code 3"));

    let events = observer.events();
    assert!(matches!(events[0], WatchdogEvent::CrashDetected { .. }));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, WatchdogEvent::AutoRestart { .. }))
    );
    Ok(())
}

#[tokio::test]
async fn test_latest_report_is_parsed() -> anyhow::Result<()> {
    let h = harness()?;
    assert!(h.manager.latest_report("Grid").await?.is_none());

    let reports = h.store.reports_dir();
    tokio::fs::create_dir_all(&reports).await?;
    let path = reports.join("Grid_20240105_101500_abcdef12.htm");
    tokio::fs::write(&path, REPORT).await?;

    let snapshot = h.manager.latest_report("Grid.ex5").await?.unwrap();
    assert_eq!(snapshot.path, path);
    assert_eq!(snapshot.metrics.trade_count, 57);
    assert_eq!(snapshot.metrics.profit_factor, 1.64);
    assert_eq!(snapshot.metrics.drawdown, 7.4);

    tokio::fs::write(&path, "<html>garbage</html>").await?;
    let err = h.manager.latest_report("Grid").await.unwrap_err();
    assert!(matches!(err, ManagerError::Artifact(_)));
    Ok(())
}
