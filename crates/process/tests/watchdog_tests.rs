use shiken_core::common::time::SystemClock;
use shiken_core::process::entity::{RestartOutcome, StartOptions, WatchConfig, WatchdogEvent};
use shiken_core::process::error::SupervisorError;
use shiken_core::process::port::{Supervisor, Watchdog};
use shiken_core::testing::{FakeTerminal, RecordingObserver};
use shiken_process::{SupervisorSettings, TerminalSupervisor};
use std::sync::Arc;
use std::time::Duration;

fn supervisor(fake: &FakeTerminal) -> Arc<TerminalSupervisor> {
    let settings = SupervisorSettings {
        startup_timeout: Duration::from_millis(200),
        stop_grace: Duration::from_millis(100),
        probe_interval: Duration::from_millis(5),
    };
    TerminalSupervisor::new(Arc::new(fake.clone()), Arc::new(SystemClock), settings)
}

fn config(auto_restart: bool) -> WatchConfig {
    WatchConfig {
        interval: Duration::from_millis(20),
        auto_restart,
        restart_wait: Duration::ZERO,
    }
}

fn count(events: &[WatchdogEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}

async fn wait_until(observer: &RecordingObserver, name: &str) -> bool {
    for _ in 0..200 {
        if count(&observer.events(), name) > 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_second_watch_is_rejected() -> anyhow::Result<()> {
    let fake = FakeTerminal::new();
    let sup = supervisor(&fake);
    let observer = Arc::new(RecordingObserver::default());

    sup.watch(config(true), observer.clone()).await?;
    let err = sup.watch(config(true), observer.clone()).await.unwrap_err();
    assert_eq!(err, SupervisorError::WatchActive);
    assert!(sup.is_watching());

    assert!(sup.unwatch().await);
    assert!(!sup.is_watching());
    assert!(!sup.unwatch().await);

    // 停止后可以重新开始
    sup.watch(config(false), observer).await?;
    assert!(sup.unwatch().await);
    Ok(())
}

#[tokio::test]
async fn test_crash_triggers_single_detection_and_restart() -> anyhow::Result<()> {
    let fake = FakeTerminal::new();
    let sup = supervisor(&fake);
    let first = sup.start(StartOptions::interactive(None)).await?;
    let observer = Arc::new(RecordingObserver::default());
    sup.watch(config(true), observer.clone()).await?;

    fake.crash(3);
    assert!(wait_until(&observer, "auto_restart").await);
    // 再观察几个周期，确认不会重复上报
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sup.unwatch().await);

    let events = observer.events();
    assert_eq!(count(&events, "crash_detected"), 1);
    assert_eq!(count(&events, "auto_restart"), 1);

    let crash = events
        .iter()
        .find(|e| e.name() == "crash_detected")
        .expect("crash event");
    let WatchdogEvent::CrashDetected { last, exit } = crash else {
        unreachable!()
    };
    assert_eq!(last.pid, first.pid);
    assert_eq!(exit.as_ref().and_then(|e| e.code), Some(3));

    let restart = events
        .iter()
        .find(|e| e.name() == "auto_restart")
        .expect("restart event");
    let WatchdogEvent::AutoRestart { restart_count, outcome } = restart else {
        unreachable!()
    };
    assert_eq!(*restart_count, 1);
    let RestartOutcome::Restarted(handle) = outcome else {
        panic!("restart failed: {:?}", outcome);
    };
    assert_ne!(handle.pid, first.pid);
    assert_eq!(fake.live_pids(), vec![handle.pid]);
    assert!(sup.status().await?.is_running);
    Ok(())
}

#[tokio::test]
async fn test_crash_without_auto_restart_only_reports() -> anyhow::Result<()> {
    let fake = FakeTerminal::new();
    let sup = supervisor(&fake);
    sup.start(StartOptions::interactive(None)).await?;
    let observer = Arc::new(RecordingObserver::default());
    sup.watch(config(false), observer.clone()).await?;

    fake.crash(1);
    assert!(wait_until(&observer, "crash_detected").await);
    tokio::time::sleep(Duration::from_millis(60)).await;
    sup.unwatch().await;

    assert_eq!(count(&observer.events(), "auto_restart"), 0);
    assert_eq!(fake.launches().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_requested_stop_is_not_a_crash() -> anyhow::Result<()> {
    let fake = FakeTerminal::new();
    let sup = supervisor(&fake);
    sup.start(StartOptions::interactive(None)).await?;
    let observer = Arc::new(RecordingObserver::default());
    sup.watch(config(true), observer.clone()).await?;

    sup.stop(false).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    sup.unwatch().await;

    assert_eq!(count(&observer.events(), "crash_detected"), 0);
    assert_eq!(fake.launches().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unresponsive_terminal_is_reported() -> anyhow::Result<()> {
    let fake = FakeTerminal::new();
    let sup = supervisor(&fake);
    sup.start(StartOptions::interactive(None)).await?;
    let observer = Arc::new(RecordingObserver::default());
    sup.watch(config(true), observer.clone()).await?;

    fake.set_responsive(false);
    assert!(wait_until(&observer, "unresponsive").await);
    sup.unwatch().await;

    assert_eq!(count(&observer.events(), "crash_detected"), 0);
    Ok(())
}

#[tokio::test]
async fn test_probe_error_reported_and_loop_continues() -> anyhow::Result<()> {
    let fake = FakeTerminal::new();
    let sup = supervisor(&fake);
    sup.start(StartOptions::interactive(None)).await?;
    let observer = Arc::new(RecordingObserver::default());
    sup.watch(config(true), observer.clone()).await?;

    fake.set_probe_error(true);
    assert!(wait_until(&observer, "watch_error").await);
    fake.set_probe_error(false);
    fake.set_responsive(false);
    assert!(wait_until(&observer, "unresponsive").await);
    assert!(sup.is_watching());
    sup.unwatch().await;
    Ok(())
}

#[tokio::test]
async fn test_auto_restart_deferred_while_leased() -> anyhow::Result<()> {
    let fake = FakeTerminal::new();
    let sup = supervisor(&fake);
    sup.start(StartOptions::interactive(None)).await?;
    let observer = Arc::new(RecordingObserver::default());
    sup.watch(config(true), observer.clone()).await?;

    let lease = sup.try_lease().expect("lease");
    fake.crash(1);
    assert!(wait_until(&observer, "crash_detected").await);
    assert!(wait_until(&observer, "watch_error").await);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(count(&observer.events(), "auto_restart"), 0);
    // 推迟只上报一次
    assert_eq!(count(&observer.events(), "watch_error"), 1);

    drop(lease);
    assert!(wait_until(&observer, "auto_restart").await);
    sup.unwatch().await;
    assert_eq!(fake.live_pids().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_watch_adopts_external_terminal_and_reports_its_crash() -> anyhow::Result<()> {
    let fake = FakeTerminal::new();
    let external = fake.spawn_external();
    let sup = supervisor(&fake);
    let observer = Arc::new(RecordingObserver::default());
    sup.watch(config(false), observer.clone()).await?;

    // 等一个周期让看门狗接管外部终端
    tokio::time::sleep(Duration::from_millis(60)).await;
    fake.crash(2);
    assert!(wait_until(&observer, "crash_detected").await);
    sup.unwatch().await;

    let events = observer.events();
    let Some(WatchdogEvent::CrashDetected { last, .. }) =
        events.iter().find(|e| e.name() == "crash_detected")
    else {
        panic!("missing crash event");
    };
    assert_eq!(last.pid, external);
    assert!(fake.launches().is_empty());
    Ok(())
}
