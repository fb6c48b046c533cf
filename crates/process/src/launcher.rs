use async_trait::async_trait;
use shiken_core::config::TerminalConfig;
use shiken_core::process::entity::{ProcessExit, StartOptions};
use shiken_core::process::error::SupervisorError;
use shiken_core::process::port::{TerminalLauncher, TerminalProcess};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// # Summary
/// 通过操作系统进程启动终端可执行文件。
///
/// # Invariants
/// - 常驻启动携带 `/login:`，headless 启动携带 `/config:`。
/// - 未配置就绪标记时，存活即视为就绪；未配置心跳文件时，存活即视为可响应。
/// - 终端不继承本进程的标准输入输出，stdout 只承载命令结果。
pub struct SystemLauncher {
    executable: PathBuf,
    ready_marker: Option<PathBuf>,
    heartbeat: Option<(PathBuf, Duration)>,
}

impl SystemLauncher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ready_marker: None,
            heartbeat: None,
        }
    }

    pub fn with_ready_marker(mut self, marker: impl Into<PathBuf>) -> Self {
        self.ready_marker = Some(marker.into());
        self
    }

    pub fn with_heartbeat(mut self, path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        self.heartbeat = Some((path.into(), stale_after));
        self
    }

    /// 从终端配置构造
    pub fn from_config(config: &TerminalConfig) -> Self {
        let mut launcher = Self::new(&config.executable);
        if let Some(marker) = &config.ready_marker {
            launcher = launcher.with_ready_marker(marker);
        }
        if let Some(heartbeat) = &config.heartbeat_path {
            launcher = launcher.with_heartbeat(
                heartbeat,
                Duration::from_secs(config.heartbeat_stale_secs),
            );
        }
        launcher
    }

    fn arguments(options: &StartOptions) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(account) = &options.account {
            args.push(format!("/login:{}", account));
        }
        if let Some(config) = &options.config {
            args.push(format!("/config:{}", config.display()));
        }
        args
    }

    fn probes(&self, launched_at: SystemTime) -> FileProbes {
        FileProbes {
            launched_at,
            ready_marker: self.ready_marker.clone(),
            heartbeat: self.heartbeat.clone(),
        }
    }

    /// 可执行文件名，进程表按它匹配
    fn image_name(&self) -> Option<String> {
        self.executable
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
    }
}

/// 在进程表中找出与终端可执行文件匹配的最早进程，返回 pid 与启动时刻
fn scan_process_table(executable: &Path, image: &str) -> Option<(u32, SystemTime)> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
    );
    let own = std::process::id();
    system
        .processes()
        .iter()
        .filter(|(pid, process)| {
            pid.as_u32() != own
                && process.status() != ProcessStatus::Zombie
                && (process.exe() == Some(executable)
                    || process.name().to_string_lossy().to_lowercase() == image)
        })
        .map(|(pid, process)| {
            (
                pid.as_u32(),
                UNIX_EPOCH + Duration::from_secs(process.start_time()),
            )
        })
        .min_by_key(|(pid, started)| (*started, *pid))
}

/// 进程是否仍在进程表中
fn is_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .is_some_and(|process| process.status() != ProcessStatus::Zombie)
}

/// 向进程发送终止信号，进程已不存在时返回 false
fn kill_pid(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some_and(|process| process.kill())
}

/// 在阻塞线程池上执行进程表查询
async fn blocking<T, F>(f: F) -> Result<T, SupervisorError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SupervisorError::Probe(format!("process table query failed: {}", e)))
}

/// 请求进程正常关闭
async fn request_close(pid: u32) -> Result<(), SupervisorError> {
    let pid = pid.to_string();
    #[cfg(windows)]
    let status = Command::new("taskkill").args(["/PID", &pid]).status().await;
    #[cfg(not(windows))]
    let status = Command::new("kill").args(["-TERM", &pid]).status().await;

    match status {
        Ok(s) if s.success() => Ok(()),
        Ok(s) => Err(SupervisorError::Control(format!(
            "close request for pid {} exited with {}",
            pid, s
        ))),
        Err(e) => Err(SupervisorError::Control(e.to_string())),
    }
}

#[async_trait]
impl TerminalLauncher for SystemLauncher {
    async fn launch(
        &self,
        options: &StartOptions,
    ) -> Result<Box<dyn TerminalProcess>, SupervisorError> {
        let exists = tokio::fs::try_exists(&self.executable)
            .await
            .map_err(|e| SupervisorError::Launch(e.to_string()))?;
        if !exists {
            return Err(SupervisorError::Launch(format!(
                "executable not found: {}",
                self.executable.display()
            )));
        }

        let args = Self::arguments(options);
        debug!(exe = %self.executable.display(), ?args, minimized = options.minimized, "Spawning terminal");
        let child = Command::new(&self.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SupervisorError::Launch(format!("spawn failed: {}", e)))?;
        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::Launch("process exited before pid was known".to_string()))?;
        info!(pid, "Terminal process spawned");

        Ok(Box::new(SystemProcess {
            child,
            pid,
            probes: self.probes(SystemTime::now()),
        }))
    }

    async fn find_running(&self) -> Result<Option<Box<dyn TerminalProcess>>, SupervisorError> {
        let Some(image) = self.image_name() else {
            return Ok(None);
        };
        let executable = self.executable.clone();
        let found = blocking(move || scan_process_table(&executable, &image)).await?;
        Ok(found.map(|(pid, launched_at)| {
            debug!(pid, "Found running terminal");
            Box::new(ExternalProcess {
                pid,
                probes: self.probes(launched_at),
            }) as Box<dyn TerminalProcess>
        }))
    }
}

/// 就绪标记与心跳文件探测
struct FileProbes {
    launched_at: SystemTime,
    ready_marker: Option<PathBuf>,
    heartbeat: Option<(PathBuf, Duration)>,
}

/// 文件修改时间，不存在返回 None
async fn modified_at(path: &Path) -> Result<Option<SystemTime>, SupervisorError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta
            .modified()
            .map(Some)
            .map_err(|e| SupervisorError::Probe(e.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SupervisorError::Probe(e.to_string())),
    }
}

impl FileProbes {
    async fn is_ready(&self) -> Result<bool, SupervisorError> {
        let Some(marker) = &self.ready_marker else {
            return Ok(true);
        };
        // 上一次运行遗留的标记不算
        Ok(modified_at(marker)
            .await?
            .is_some_and(|t| t >= self.launched_at))
    }

    async fn is_responsive(&self) -> Result<bool, SupervisorError> {
        let Some((path, stale_after)) = &self.heartbeat else {
            return Ok(true);
        };
        let last_beat = modified_at(path)
            .await?
            .map_or(self.launched_at, |t| t.max(self.launched_at));
        let silent_for = SystemTime::now()
            .duration_since(last_beat)
            .unwrap_or(Duration::ZERO);
        Ok(silent_for <= *stale_after)
    }
}

/// 本进程启动的终端
struct SystemProcess {
    child: Child,
    pid: u32,
    probes: FileProbes,
}

#[async_trait]
impl TerminalProcess for SystemProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn try_exit(&mut self) -> Result<Option<ProcessExit>, SupervisorError> {
        let status = self
            .child
            .try_wait()
            .map_err(|e| SupervisorError::Probe(e.to_string()))?;
        Ok(status.map(|s| ProcessExit {
            code: s.code(),
            success: s.success(),
        }))
    }

    async fn is_ready(&mut self) -> Result<bool, SupervisorError> {
        self.probes.is_ready().await
    }

    async fn is_responsive(&mut self) -> Result<bool, SupervisorError> {
        self.probes.is_responsive().await
    }

    async fn request_close(&mut self) -> Result<(), SupervisorError> {
        request_close(self.pid).await
    }

    async fn kill(&mut self) -> Result<(), SupervisorError> {
        self.child
            .start_kill()
            .map_err(|e| SupervisorError::Control(e.to_string()))
    }
}

/// # Summary
/// 从进程表中找到的终端，不是本进程的子进程。
///
/// # Invariants
/// - 退出码不可知；进程从进程表消失即视为退出。
struct ExternalProcess {
    pid: u32,
    probes: FileProbes,
}

#[async_trait]
impl TerminalProcess for ExternalProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn try_exit(&mut self) -> Result<Option<ProcessExit>, SupervisorError> {
        let pid = self.pid;
        let alive = blocking(move || is_alive(pid)).await?;
        Ok((!alive).then_some(ProcessExit {
            code: None,
            success: false,
        }))
    }

    async fn is_ready(&mut self) -> Result<bool, SupervisorError> {
        self.probes.is_ready().await
    }

    async fn is_responsive(&mut self) -> Result<bool, SupervisorError> {
        self.probes.is_responsive().await
    }

    async fn request_close(&mut self) -> Result<(), SupervisorError> {
        request_close(self.pid).await
    }

    async fn kill(&mut self) -> Result<(), SupervisorError> {
        let pid = self.pid;
        if !blocking(move || kill_pid(pid)).await? {
            warn!(pid, "Kill signal not delivered, process may already be gone");
        }
        Ok(())
    }
}
