//! 测试替身。通过 `test-utils` feature 暴露给各 crate 的集成测试。

use crate::notify::entity::Severity;
use crate::notify::port::AlertSink;
use crate::process::entity::{ProcessExit, StartOptions, WatchdogEvent};
use crate::process::error::SupervisorError;
use crate::process::port::{TerminalLauncher, TerminalProcess, WatchObserver};
use crate::run::entity::{RunOutcome, RunResult, RunSpec};
use crate::run::error::RunError;
use crate::run::port::BacktestRunner;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type LaunchHook = Box<dyn Fn(&StartOptions) + Send + Sync>;

struct FakeState {
    next_pid: u32,
    // pid → 退出状态，None 表示仍存活
    processes: BTreeMap<u32, Option<ProcessExit>>,
    launches: Vec<StartOptions>,
    fail_launch: bool,
    ready: bool,
    responsive: bool,
    honor_close: bool,
    probe_error: bool,
    close_requests: usize,
    kills: usize,
}

/// # Summary
/// 可编程的假终端。克隆共享同一份状态，测试侧用于注入崩溃、挂起等故障。
#[derive(Clone)]
pub struct FakeTerminal {
    state: Arc<Mutex<FakeState>>,
    hook: Arc<Mutex<Option<LaunchHook>>>,
}

impl Default for FakeTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTerminal {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                next_pid: 1000,
                processes: BTreeMap::new(),
                launches: Vec::new(),
                fail_launch: false,
                ready: true,
                responsive: true,
                honor_close: true,
                probe_error: false,
                close_requests: 0,
                kills: 0,
            })),
            hook: Arc::new(Mutex::new(None)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 每次启动时回调，例如模拟 headless 测试写出报告
    pub fn on_launch(&self, hook: impl Fn(&StartOptions) + Send + Sync + 'static) {
        *self.hook.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(hook));
    }

    pub fn set_fail_launch(&self, fail: bool) {
        self.lock().fail_launch = fail;
    }

    pub fn set_ready(&self, ready: bool) {
        self.lock().ready = ready;
    }

    pub fn set_responsive(&self, responsive: bool) {
        self.lock().responsive = responsive;
    }

    /// 为假时模拟对关闭请求无反应的终端
    pub fn set_honor_close(&self, honor: bool) {
        self.lock().honor_close = honor;
    }

    pub fn set_probe_error(&self, fail: bool) {
        self.lock().probe_error = fail;
    }

    /// 使所有存活进程以失败状态退出
    pub fn crash(&self, code: i32) {
        self.exit_all(ProcessExit {
            code: Some(code),
            success: false,
        });
    }

    /// 使所有存活进程正常退出
    pub fn finish(&self) {
        self.exit_all(ProcessExit {
            code: Some(0),
            success: true,
        });
    }

    fn exit_all(&self, exit: ProcessExit) {
        let mut state = self.lock();
        for status in state.processes.values_mut() {
            if status.is_none() {
                *status = Some(exit);
            }
        }
    }

    /// 模拟在本进程之外打开的终端，例如用户手动启动或上一条命令留下的实例
    pub fn spawn_external(&self) -> u32 {
        let mut state = self.lock();
        let pid = state.next_pid;
        state.next_pid += 1;
        state.processes.insert(pid, None);
        pid
    }

    pub fn launches(&self) -> Vec<StartOptions> {
        self.lock().launches.clone()
    }

    pub fn live_pids(&self) -> Vec<u32> {
        self.lock()
            .processes
            .iter()
            .filter(|(_, exit)| exit.is_none())
            .map(|(pid, _)| *pid)
            .collect()
    }

    pub fn close_requests(&self) -> usize {
        self.lock().close_requests
    }

    pub fn kills(&self) -> usize {
        self.lock().kills
    }
}

#[async_trait]
impl TerminalLauncher for FakeTerminal {
    async fn launch(
        &self,
        options: &StartOptions,
    ) -> Result<Box<dyn TerminalProcess>, SupervisorError> {
        let pid = {
            let mut state = self.lock();
            state.launches.push(options.clone());
            if state.fail_launch {
                return Err(SupervisorError::Launch("executable not found".to_string()));
            }
            let pid = state.next_pid;
            state.next_pid += 1;
            state.processes.insert(pid, None);
            pid
        };
        if let Some(hook) = self.hook.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            hook(options);
        }
        Ok(Box::new(FakeProcess {
            pid,
            terminal: self.clone(),
        }))
    }

    async fn find_running(&self) -> Result<Option<Box<dyn TerminalProcess>>, SupervisorError> {
        let pid = {
            let state = self.lock();
            if state.probe_error {
                return Err(SupervisorError::Probe("process table unavailable".to_string()));
            }
            state
                .processes
                .iter()
                .find(|(_, exit)| exit.is_none())
                .map(|(pid, _)| *pid)
        };
        Ok(pid.map(|pid| {
            Box::new(FakeProcess {
                pid,
                terminal: self.clone(),
            }) as Box<dyn TerminalProcess>
        }))
    }
}

struct FakeProcess {
    pid: u32,
    terminal: FakeTerminal,
}

impl FakeProcess {
    fn probe(&self) -> Result<MutexGuard<'_, FakeState>, SupervisorError> {
        let state = self.terminal.lock();
        if state.probe_error {
            return Err(SupervisorError::Probe("probe failed".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl TerminalProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn try_exit(&mut self) -> Result<Option<ProcessExit>, SupervisorError> {
        let state = self.probe()?;
        Ok(state.processes.get(&self.pid).copied().flatten())
    }

    async fn is_ready(&mut self) -> Result<bool, SupervisorError> {
        Ok(self.probe()?.ready)
    }

    async fn is_responsive(&mut self) -> Result<bool, SupervisorError> {
        Ok(self.probe()?.responsive)
    }

    async fn request_close(&mut self) -> Result<(), SupervisorError> {
        let mut state = self.terminal.lock();
        state.close_requests += 1;
        if state.honor_close {
            if let Some(status @ None) = state.processes.get_mut(&self.pid) {
                *status = Some(ProcessExit {
                    code: Some(0),
                    success: true,
                });
            }
        }
        Ok(())
    }

    async fn kill(&mut self) -> Result<(), SupervisorError> {
        let mut state = self.terminal.lock();
        state.kills += 1;
        if let Some(status @ None) = state.processes.get_mut(&self.pid) {
            *status = Some(ProcessExit {
                code: None,
                success: false,
            });
        }
        Ok(())
    }
}

type Script = Box<dyn Fn(&RunSpec) -> Result<RunOutcome, RunError> + Send + Sync>;

/// # Summary
/// 按脚本返回结果的回测执行器，记录收到的每个规格。
pub struct ScriptedRunner {
    script: Script,
    calls: Mutex<Vec<RunSpec>>,
}

impl ScriptedRunner {
    pub fn new(
        script: impl Fn(&RunSpec) -> Result<RunOutcome, RunError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RunSpec> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl BacktestRunner for ScriptedRunner {
    async fn run(&self, spec: RunSpec) -> Result<RunResult, RunError> {
        let outcome = (self.script)(&spec)?;
        let run_id = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push(spec);
            format!("scripted-{}", calls.len())
        };
        Ok(RunResult {
            run_id,
            outcome,
            artifacts: None,
            elapsed: Duration::ZERO,
        })
    }
}

/// 记录所有告警的 `AlertSink`
#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<(Severity, String, String)>>,
}

impl RecordingSink {
    pub fn alerts(&self) -> Vec<(Severity, String, String)> {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl AlertSink for RecordingSink {
    fn notify(&self, severity: Severity, subject: &str, content: &str) {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((severity, subject.to_string(), content.to_string()));
    }
}

/// 记录所有看门狗事件的观察者
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<WatchdogEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<WatchdogEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl WatchObserver for RecordingObserver {
    fn on_event(&self, event: WatchdogEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
