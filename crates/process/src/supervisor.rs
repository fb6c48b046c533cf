use async_trait::async_trait;
use shiken_core::common::failure::Failure;
use shiken_core::common::time::{Clock, deadline_after};
use shiken_core::config::TerminalConfig;
use shiken_core::process::entity::{
    ExitInfo, LaunchMode, ProcessExit, ProcessHandle, ProcessState, RestartOutcome,
    StartOptions, StatusReport, StopOutcome, WatchConfig, WatchHandle, WatchdogEvent,
};
use shiken_core::process::error::SupervisorError;
use shiken_core::process::lease::{ExclusiveGate, RunLease};
use shiken_core::process::port::{
    Supervisor, TerminalLauncher, TerminalProcess, WatchObserver, Watchdog,
};
use std::sync::{Arc, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// 托管时限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    // 启动到就绪的最长等待
    pub startup_timeout: Duration,
    // 关闭请求后的宽限期
    pub stop_grace: Duration,
    // 就绪 / 退出探测间隔
    pub probe_interval: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(10),
            probe_interval: Duration::from_millis(500),
        }
    }
}

impl From<&TerminalConfig> for SupervisorSettings {
    fn from(config: &TerminalConfig) -> Self {
        Self {
            startup_timeout: config.startup_timeout(),
            stop_grace: config.stop_grace(),
            ..Self::default()
        }
    }
}

struct Managed {
    process: Box<dyn TerminalProcess>,
    handle: ProcessHandle,
    // 已发出关闭请求，此后的退出属于预期
    stop_requested: bool,
}

#[derive(Default)]
struct Lifecycle {
    current: Option<Managed>,
    restart_count: u32,
    // 最近一次常驻启动的参数，restart 沿用
    last_interactive: Option<StartOptions>,
}

/// 供 status 在生命周期操作进行中读取的快照
struct Snapshot {
    state: ProcessState,
    handle: Option<ProcessHandle>,
    last_exit: Option<ExitInfo>,
    // 尚未被看门狗报告的意外退出
    unreported_crash: Option<(ProcessHandle, ExitInfo)>,
}

struct WatchTask {
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// 崩溃后自动重启的进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestartDue {
    No,
    Due,
    // 终端被回测租用，等待租约释放
    Deferred,
}

/// # Summary
/// 终端进程托管者，同时实现 `Supervisor` 与 `Watchdog`。
///
/// # Invariants
/// - 生命周期操作 (start / stop / restart 与看门狗探测) 由同一把异步锁串行化。
/// - 任意时刻至多一个活跃进程；外部启动的终端在下一次生命周期操作时被接管。
/// - 看门狗只持有弱引用，托管者被释放后循环自动结束。
/// - 看门狗只在拿到独占租约时才会自动重启终端。
pub struct TerminalSupervisor {
    launcher: Arc<dyn TerminalLauncher>,
    clock: Arc<dyn Clock>,
    settings: SupervisorSettings,
    lifecycle: Mutex<Lifecycle>,
    snapshot: std::sync::Mutex<Snapshot>,
    gate: ExclusiveGate,
    watcher: std::sync::Mutex<Option<WatchTask>>,
    this: Weak<Self>,
}

impl TerminalSupervisor {
    /// # Summary
    /// 创建托管者。
    ///
    /// # Arguments
    /// * `launcher`: 终端启动器。
    /// * `clock`: 时间源，用于句柄与退出记录的时间戳。
    /// * `settings`: 启动 / 停止时限。
    pub fn new(
        launcher: Arc<dyn TerminalLauncher>,
        clock: Arc<dyn Clock>,
        settings: SupervisorSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            launcher,
            clock,
            settings,
            lifecycle: Mutex::new(Lifecycle::default()),
            snapshot: std::sync::Mutex::new(Snapshot {
                state: ProcessState::NotRunning,
                handle: None,
                last_exit: None,
                unreported_crash: None,
            }),
            gate: ExclusiveGate::new(),
            watcher: std::sync::Mutex::new(None),
            this: this.clone(),
        })
    }

    /// 与回测执行器共享的独占闸门
    pub fn gate(&self) -> ExclusiveGate {
        self.gate.clone()
    }

    fn snapshot(&self) -> MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, state: ProcessState, handle: Option<ProcessHandle>) {
        let mut snap = self.snapshot();
        snap.state = state;
        snap.handle = handle;
    }

    fn record_exit(&self, handle: &ProcessHandle, exit: ProcessExit, expected: bool) {
        let info = ExitInfo {
            pid: handle.pid,
            code: exit.code,
            success: exit.success,
            observed_at: self.clock.now(),
            expected,
        };
        let mut snap = self.snapshot();
        snap.state = ProcessState::NotRunning;
        snap.handle = None;
        if !expected {
            snap.unreported_crash = Some((handle.clone(), info.clone()));
        }
        snap.last_exit = Some(info);
    }

    /// # Summary
    /// 回收已退出的进程。
    ///
    /// # Logic
    /// 1. 非阻塞检查当前进程是否退出。
    /// 2. 退出则清空句柄并记录退出信息；未请求停止的常驻进程退出记为待报告的崩溃。
    async fn reap(&self, life: &mut Lifecycle) -> Result<(), SupervisorError> {
        let Some(managed) = life.current.as_mut() else {
            return Ok(());
        };
        let Some(exit) = managed.process.try_exit().await? else {
            return Ok(());
        };
        let expected = managed.stop_requested || managed.handle.mode == LaunchMode::Headless;
        let handle = managed.handle.clone();
        life.current = None;

        if expected {
            info!(pid = handle.pid, code = ?exit.code, "Terminal exited");
        } else {
            warn!(pid = handle.pid, code = ?exit.code, "Terminal exited unexpectedly");
        }
        self.record_exit(&handle, exit, expected);
        Ok(())
    }

    /// # Summary
    /// 接管不由本托管者启动的终端，例如用户手动打开的或上一条命令留下的实例。
    ///
    /// # Logic
    /// 已托管进程时不做查找；接管的进程按常驻模式记录，启动时刻取接管时刻。
    async fn adopt(&self, life: &mut Lifecycle) -> Result<(), SupervisorError> {
        if life.current.is_some() {
            return Ok(());
        }
        let Some(process) = self.launcher.find_running().await? else {
            return Ok(());
        };
        let handle = ProcessHandle {
            pid: process.pid(),
            started_at: self.clock.now(),
            last_responsive_at: None,
            restart_count: life.restart_count,
            mode: LaunchMode::Interactive,
        };
        info!(pid = handle.pid, "Attached to running terminal");
        life.current = Some(Managed {
            process,
            handle: handle.clone(),
            stop_requested: false,
        });
        self.publish(ProcessState::Running, Some(handle));
        Ok(())
    }

    /// 回收已退出的进程并接管外部终端
    async fn refresh(&self, life: &mut Lifecycle) -> Result<(), SupervisorError> {
        self.reap(life).await?;
        self.adopt(life).await
    }

    /// 在时限内等待进程退出，探测失败只记录日志
    async fn wait_exit(
        &self,
        process: &mut dyn TerminalProcess,
        timeout: Duration,
    ) -> Option<ProcessExit> {
        let deadline = Instant::from_std(deadline_after(std::time::Instant::now(), timeout));
        loop {
            match process.try_exit().await {
                Ok(Some(exit)) => return Some(exit),
                Ok(None) => {}
                Err(e) => warn!(pid = process.pid(), error = %e, "Exit probe failed"),
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            tokio::time::sleep(self.settings.probe_interval.min(deadline - now)).await;
        }
    }

    async fn wait_ready(&self, process: &mut dyn TerminalProcess) -> Result<(), SupervisorError> {
        let deadline = Instant::from_std(deadline_after(
            std::time::Instant::now(),
            self.settings.startup_timeout,
        ));
        loop {
            if let Some(exit) = process.try_exit().await? {
                return Err(SupervisorError::Launch(format!(
                    "terminal exited during startup (code {:?})",
                    exit.code
                )));
            }
            if process.is_ready().await? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SupervisorError::Launch(format!(
                    "terminal not ready within {:?}",
                    self.settings.startup_timeout
                )));
            }
            tokio::time::sleep(self.settings.probe_interval.min(deadline - now)).await;
        }
    }

    async fn start_locked(
        &self,
        life: &mut Lifecycle,
        options: StartOptions,
    ) -> Result<ProcessHandle, SupervisorError> {
        self.refresh(life).await?;
        let mode = options.mode();

        if let Some(existing) = life.current.as_ref() {
            if existing.handle.mode == LaunchMode::Interactive && mode == LaunchMode::Interactive {
                debug!(pid = existing.handle.pid, "Terminal already running");
                return Ok(existing.handle.clone());
            }
            return Err(SupervisorError::StillRunning(format!(
                "pid {} is active ({:?})",
                existing.handle.pid, existing.handle.mode
            )));
        }

        self.publish(ProcessState::Starting, None);
        let mut process = match self.launcher.launch(&options).await {
            Ok(process) => process,
            Err(e) => {
                error!(error = %e, "Terminal launch failed");
                self.publish(ProcessState::NotRunning, None);
                return Err(e);
            }
        };

        // headless 进程读取配置后直接运行测试，没有界面可等
        if mode == LaunchMode::Interactive {
            if let Err(e) = self.wait_ready(process.as_mut()).await {
                if let Err(kill_err) = process.kill().await {
                    warn!(pid = process.pid(), error = %kill_err, "Failed to kill half-started terminal");
                }
                self.publish(ProcessState::NotRunning, None);
                let err = match e {
                    SupervisorError::Launch(_) => e,
                    other => SupervisorError::Launch(other.to_string()),
                };
                error!(error = %err, "Terminal startup failed");
                return Err(err);
            }
            life.last_interactive = Some(options);
        }

        let now = self.clock.now();
        let handle = ProcessHandle {
            pid: process.pid(),
            started_at: now,
            last_responsive_at: Some(now),
            restart_count: life.restart_count,
            mode,
        };
        life.current = Some(Managed {
            process,
            handle: handle.clone(),
            stop_requested: false,
        });
        self.publish(ProcessState::Running, Some(handle.clone()));
        info!(pid = handle.pid, ?mode, "Terminal started");
        Ok(handle)
    }

    async fn stop_locked(
        &self,
        life: &mut Lifecycle,
        force: bool,
    ) -> Result<StopOutcome, SupervisorError> {
        self.refresh(life).await?;
        let Some(mut managed) = life.current.take() else {
            return Ok(StopOutcome {
                was_running: false,
                stopped: true,
                forced: false,
                message: "terminal not running".to_string(),
            });
        };

        let pid = managed.handle.pid;
        managed.stop_requested = true;
        self.publish(ProcessState::Stopping, Some(managed.handle.clone()));
        info!(pid, force, "Stopping terminal");

        if let Err(e) = managed.process.request_close().await {
            warn!(pid, error = %e, "Close request failed");
        }
        let grace = self.settings.stop_grace;
        let mut exit = self.wait_exit(managed.process.as_mut(), grace).await;

        let mut forced = false;
        if exit.is_none() && force {
            warn!(pid, "Graceful close timed out, killing terminal");
            forced = true;
            if let Err(e) = managed.process.kill().await {
                warn!(pid, error = %e, "Kill failed");
            }
            exit = self.wait_exit(managed.process.as_mut(), grace).await;
        }

        match exit {
            Some(exit) => {
                self.record_exit(&managed.handle, exit, true);
                info!(pid, forced, "Terminal stopped");
                Ok(StopOutcome {
                    was_running: true,
                    stopped: true,
                    forced,
                    message: if forced {
                        "terminal killed after timeout".to_string()
                    } else {
                        "terminal closed".to_string()
                    },
                })
            }
            None => {
                warn!(pid, "Terminal still running after stop");
                let handle = managed.handle.clone();
                life.current = Some(managed);
                self.publish(ProcessState::Running, Some(handle));
                Ok(StopOutcome {
                    was_running: true,
                    stopped: false,
                    forced,
                    message: format!("terminal did not exit within {:?}", grace),
                })
            }
        }
    }

    /// # Summary
    /// 看门狗的一次探测。
    ///
    /// # Logic
    /// 1. 回收已退出进程并接管外部终端；探测失败上报 `WatchError`。
    /// 2. 有待报告崩溃则上报 `CrashDetected`，开启自动重启时标记重启待办。
    /// 3. 否则探测常驻进程的响应性，无响应上报 `Unresponsive`。
    /// 4. 重启待办且终端空闲时尝试获取租约并重启；租约被占则推迟。
    async fn watch_tick(
        &self,
        config: &WatchConfig,
        observer: &dyn WatchObserver,
        restart: &mut RestartDue,
    ) {
        let (crash, idle) = {
            let mut life = self.lifecycle.lock().await;
            if let Err(e) = self.refresh(&mut life).await {
                let last = life.current.as_ref().map(|m| m.handle.clone());
                warn!(error = %e, "Watchdog probe failed");
                observer.on_event(WatchdogEvent::WatchError {
                    detail: e.to_string(),
                    last,
                });
                return;
            }

            let crash = self.snapshot().unreported_crash.take();
            if crash.is_none()
                && let Some(managed) = life.current.as_mut()
                && managed.handle.mode == LaunchMode::Interactive
            {
                match managed.process.is_responsive().await {
                    Ok(true) => {
                        managed.handle.last_responsive_at = Some(self.clock.now());
                        self.publish(ProcessState::Running, Some(managed.handle.clone()));
                    }
                    Ok(false) => {
                        warn!(pid = managed.handle.pid, "Terminal not responding");
                        self.publish(ProcessState::Unresponsive, Some(managed.handle.clone()));
                        observer.on_event(WatchdogEvent::Unresponsive {
                            handle: managed.handle.clone(),
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Responsiveness probe failed");
                        observer.on_event(WatchdogEvent::WatchError {
                            detail: e.to_string(),
                            last: Some(managed.handle.clone()),
                        });
                    }
                }
            }
            (crash, life.current.is_none())
        };

        if let Some((last, exit)) = crash {
            error!(pid = last.pid, code = ?exit.code, "Terminal crash detected");
            observer.on_event(WatchdogEvent::CrashDetected {
                last,
                exit: Some(exit),
            });
            if config.auto_restart {
                *restart = RestartDue::Due;
            }
        }

        if *restart == RestartDue::No || !idle {
            return;
        }

        let Some(lease) = self.gate.try_acquire() else {
            if *restart == RestartDue::Due {
                warn!("Auto-restart deferred: terminal leased by a running job");
                observer.on_event(WatchdogEvent::WatchError {
                    detail: "auto-restart deferred: terminal leased by a running job".to_string(),
                    last: None,
                });
                *restart = RestartDue::Deferred;
            }
            return;
        };

        *restart = RestartDue::No;
        let outcome = match self.restart(config.restart_wait).await {
            Ok(handle) => {
                info!(pid = handle.pid, restarts = handle.restart_count, "Terminal auto-restarted");
                RestartOutcome::Restarted(handle)
            }
            Err(e) => {
                error!(error = %e, "Auto-restart failed");
                RestartOutcome::Failed(Failure::from(&e))
            }
        };
        drop(lease);

        let restart_count = self.lifecycle.lock().await.restart_count;
        observer.on_event(WatchdogEvent::AutoRestart {
            restart_count,
            outcome,
        });
    }
}

#[async_trait]
impl Supervisor for TerminalSupervisor {
    async fn start(&self, options: StartOptions) -> Result<ProcessHandle, SupervisorError> {
        let mut life = self.lifecycle.lock().await;
        self.start_locked(&mut life, options).await
    }

    async fn stop(&self, force: bool) -> Result<StopOutcome, SupervisorError> {
        let mut life = self.lifecycle.lock().await;
        self.stop_locked(&mut life, force).await
    }

    async fn restart(&self, wait: Duration) -> Result<ProcessHandle, SupervisorError> {
        let outcome = self.stop(false).await?;
        if !outcome.stopped {
            return Err(SupervisorError::StillRunning(outcome.message));
        }
        tokio::time::sleep(wait).await;

        let mut life = self.lifecycle.lock().await;
        life.restart_count = life.restart_count.saturating_add(1);
        let options = life
            .last_interactive
            .clone()
            .unwrap_or_else(|| StartOptions::interactive(None));
        self.start_locked(&mut life, options).await
    }

    async fn status(&self) -> Result<StatusReport, SupervisorError> {
        let now = self.clock.now();
        match self.lifecycle.try_lock() {
            Ok(mut life) => {
                self.refresh(&mut life).await?;
                if let Some(managed) = life.current.as_mut() {
                    let responsive = managed.process.is_responsive().await?;
                    if responsive {
                        managed.handle.last_responsive_at = Some(now);
                    }
                    let state = if responsive {
                        ProcessState::Running
                    } else {
                        ProcessState::Unresponsive
                    };
                    self.publish(state, Some(managed.handle.clone()));
                }
            }
            Err(_) => debug!("Lifecycle operation in progress, reporting last snapshot"),
        }

        let snap = self.snapshot();
        Ok(StatusReport {
            state: snap.state,
            is_running: snap.handle.is_some(),
            is_responsive: snap.state == ProcessState::Running,
            handle: snap.handle.clone(),
            last_exit: snap.last_exit.clone(),
            uptime_secs: snap
                .handle
                .as_ref()
                .map(|h| (now - h.started_at).num_seconds()),
        })
    }

    fn try_lease(&self) -> Option<RunLease> {
        self.gate.try_acquire()
    }
}

#[async_trait]
impl Watchdog for TerminalSupervisor {
    async fn watch(
        &self,
        config: WatchConfig,
        observer: Arc<dyn WatchObserver>,
    ) -> Result<WatchHandle, SupervisorError> {
        let mut slot = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.as_ref()
            && !task.join.is_finished()
        {
            return Err(SupervisorError::WatchActive);
        }
        // 开始监控前的退出不属于本次监控
        self.snapshot().unreported_crash = None;

        let (cancel, mut cancelled) = watch::channel(false);
        let weak = self.this.clone();
        let period = config.interval.max(Duration::from_millis(1));
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut restart = RestartDue::No;
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.changed() => break,
                    _ = ticker.tick() => {
                        let Some(supervisor) = weak.upgrade() else {
                            break;
                        };
                        supervisor
                            .watch_tick(&config, observer.as_ref(), &mut restart)
                            .await;
                    }
                }
            }
            debug!("Watch loop exited");
        });
        *slot = Some(WatchTask { cancel, join });

        info!(interval = ?config.interval, auto_restart = config.auto_restart, "Watchdog started");
        Ok(WatchHandle {
            started_at: self.clock.now(),
            interval: config.interval,
            auto_restart: config.auto_restart,
        })
    }

    async fn unwatch(&self) -> bool {
        let task = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(task) = task else {
            return false;
        };
        if task.cancel.send(true).is_err() {
            debug!("Watch loop already gone");
        }
        if let Err(e) = task.join.await {
            warn!(error = %e, "Watch loop ended abnormally");
        }
        info!("Watchdog stopped");
        true
    }

    fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|task| !task.join.is_finished())
    }
}
