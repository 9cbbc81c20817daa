//! Lifecycle supervision of the external intercepting-proxy process.
//!
//! The proxy binary ships next to the application (or inside the bundle's
//! `Resources` directory on macOS) and is launched with fixed flags:
//!
//! ```text
//! <resource-dir>/proxy-inspector -proxy 0.0.0.0:8888 -api 0.0.0.0:9999
//! ```
//!
//! A [`ProxySupervisor`] owns at most one running instance. A background
//! monitor task owns the child process, forwards its output to `tracing`,
//! and clears the handle as soon as the OS reports the exit.
//!
//! The supervisor does not wait for the control API to come up; callers poll
//! [`crate::readiness::wait_until_ready`] after [`ProxySupervisor::start`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};

use crate::error::SupervisorError;

/// File name of the proxy executable inside the resource directory.
#[cfg(not(windows))]
pub const PROXY_BINARY_NAME: &str = "proxy-inspector";
/// File name of the proxy executable inside the resource directory.
#[cfg(windows)]
pub const PROXY_BINARY_NAME: &str = "proxy-inspector.exe";

/// Default port of the intercepting listener.
pub const DEFAULT_PROXY_PORT: u16 = 8888;

/// Default port of the control API.
pub const DEFAULT_API_PORT: u16 = 9999;

/// Returns the directory holding bundled resources.
///
/// This is the directory of the running executable, or the sibling
/// `Resources` directory when running from a macOS app bundle.
pub fn default_resource_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let exe_dir = exe.parent()?.to_path_buf();

    let bundle_resources = exe_dir.join("../Resources");
    if cfg!(target_os = "macos") && bundle_resources.is_dir() {
        return Some(bundle_resources);
    }

    Some(exe_dir)
}

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Directory containing the proxy executable.
    pub resource_dir: PathBuf,
    /// Executable file name.
    pub binary_name: String,
    /// Bind address of the intercepting listener.
    pub proxy_addr: SocketAddr,
    /// Bind address of the control API.
    pub api_addr: SocketAddr,
}

impl SupervisorConfig {
    /// Creates a configuration for binaries in `resource_dir`.
    pub fn new(resource_dir: impl Into<PathBuf>) -> Self {
        Self {
            resource_dir: resource_dir.into(),
            binary_name: PROXY_BINARY_NAME.to_string(),
            proxy_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PROXY_PORT)),
            api_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_API_PORT)),
        }
    }

    /// Sets the intercepting listener address.
    pub fn with_proxy_addr(mut self, addr: SocketAddr) -> Self {
        self.proxy_addr = addr;
        self
    }

    /// Sets the control API address.
    pub fn with_api_addr(mut self, addr: SocketAddr) -> Self {
        self.api_addr = addr;
        self
    }

    /// Sets the intercepting listener port, keeping its host.
    pub fn with_proxy_port(mut self, port: u16) -> Self {
        self.proxy_addr.set_port(port);
        self
    }

    /// Sets the control API port, keeping its host.
    pub fn with_api_port(mut self, port: u16) -> Self {
        self.api_addr.set_port(port);
        self
    }

    /// Full path of the proxy executable.
    pub fn binary_path(&self) -> PathBuf {
        self.resource_dir.join(&self.binary_name)
    }
}

/// Command-line arguments for the given bind addresses.
pub fn launch_arguments(proxy_addr: SocketAddr, api_addr: SocketAddr) -> Vec<String> {
    vec![
        "-proxy".to_string(),
        proxy_addr.to_string(),
        "-api".to_string(),
        api_addr.to_string(),
    ]
}

/// Snapshot of a launched proxy instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyProcess {
    /// OS process id.
    pub pid: u32,
    /// Intercepting listener address.
    pub proxy_addr: SocketAddr,
    /// Control API address.
    pub api_addr: SocketAddr,
    /// Launch time.
    pub started_at: DateTime<Utc>,
}

/// How the last supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRecord {
    /// OS process id.
    pub pid: u32,
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    /// When the exit was observed.
    pub at: DateTime<Utc>,
}

struct Running {
    process: ProxyProcess,
    generation: u64,
    terminate: Option<oneshot::Sender<()>>,
    exited: watch::Receiver<bool>,
}

impl Running {
    fn is_alive(&self) -> bool {
        !*self.exited.borrow()
    }
}

/// Owns the lifecycle of the external proxy process.
///
/// Construct one per application and keep it at the composition root.
/// Dropping the supervisor terminates a running proxy.
pub struct ProxySupervisor {
    config: SupervisorConfig,
    running: Arc<Mutex<Option<Running>>>,
    last_exit: Arc<Mutex<Option<ExitRecord>>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for ProxySupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySupervisor")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("last_exit", &*self.last_exit.lock())
            .finish()
    }
}

impl ProxySupervisor {
    /// Creates a supervisor; nothing is launched yet.
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            running: Arc::new(Mutex::new(None)),
            last_exit: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    /// Launches the proxy on the configured addresses.
    pub fn start(&self) -> Result<ProxyProcess, SupervisorError> {
        self.start_with(self.config.proxy_addr, self.config.api_addr)
    }

    /// Launches the proxy bound to the given addresses.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_with(
        &self,
        proxy_addr: SocketAddr,
        api_addr: SocketAddr,
    ) -> Result<ProxyProcess, SupervisorError> {
        let mut slot = self.running.lock();

        if slot.as_ref().is_some_and(Running::is_alive) {
            return Err(SupervisorError::AlreadyRunning);
        }

        let binary = self.config.binary_path();
        if !binary.is_file() {
            return Err(SupervisorError::BinaryNotFound(binary));
        }

        let mut child = spawn_proxy(&binary, proxy_addr, api_addr)?;
        let pid = child.id().ok_or_else(|| {
            SupervisorError::Spawn(std::io::Error::other(
                "process exited before it was registered",
            ))
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        let process = ProxyProcess {
            pid,
            proxy_addr,
            api_addr,
            started_at: Utc::now(),
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (terminate_tx, terminate_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = watch::channel(false);

        tokio::spawn(monitor(
            child,
            pid,
            generation,
            terminate_rx,
            exited_tx,
            Arc::clone(&self.running),
            Arc::clone(&self.last_exit),
        ));

        tracing::info!(
            pid,
            %proxy_addr,
            %api_addr,
            "Started proxy from {:?}",
            binary
        );

        *slot = Some(Running {
            process: process.clone(),
            generation,
            terminate: Some(terminate_tx),
            exited: exited_rx,
        });

        Ok(process)
    }

    /// Terminates the proxy and waits until it has exited.
    ///
    /// Does nothing if no proxy is running. There is no timeout: a proxy that
    /// ignores the termination signal keeps this call pending.
    pub async fn stop(&self) {
        let (generation, terminate, mut exited) = {
            let mut slot = self.running.lock();
            match slot.as_mut() {
                Some(running) => (
                    running.generation,
                    running.terminate.take(),
                    running.exited.clone(),
                ),
                None => return,
            }
        };

        if let Some(terminate) = terminate {
            tracing::info!("Stopping proxy");
            let _ = terminate.send(());
        }

        let _ = exited.wait_for(|done| *done).await;

        let mut slot = self.running.lock();
        if slot.as_ref().is_some_and(|r| r.generation == generation) {
            *slot = None;
        }
    }

    /// Whether the supervised process is alive at the OS level.
    pub fn is_running(&self) -> bool {
        self.running.lock().as_ref().is_some_and(Running::is_alive)
    }

    /// The running instance, if any.
    pub fn process(&self) -> Option<ProxyProcess> {
        self.running
            .lock()
            .as_ref()
            .filter(|r| r.is_alive())
            .map(|r| r.process.clone())
    }

    /// Process id of the running instance, if any.
    pub fn pid(&self) -> Option<u32> {
        self.process().map(|p| p.pid)
    }

    /// How the most recent instance ended.
    pub fn last_exit(&self) -> Option<ExitRecord> {
        self.last_exit.lock().clone()
    }
}

impl Drop for ProxySupervisor {
    fn drop(&mut self) {
        // The monitor task shares the slot, so the sender must be released here.
        if let Some(running) = self.running.lock().as_mut() {
            running.terminate.take();
        }
    }
}

fn spawn_proxy(
    binary: &Path,
    proxy_addr: SocketAddr,
    api_addr: SocketAddr,
) -> Result<Child, SupervisorError> {
    Command::new(binary)
        .args(launch_arguments(proxy_addr, api_addr))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SupervisorError::BinaryNotFound(binary.to_path_buf()),
            _ => SupervisorError::Spawn(e),
        })
}

async fn forward_output<R>(reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "devtool::proxy_output", stream, "{}", line);
    }
}

async fn monitor(
    mut child: Child,
    pid: u32,
    generation: u64,
    mut terminate: oneshot::Receiver<()>,
    exited: watch::Sender<bool>,
    running: Arc<Mutex<Option<Running>>>,
    last_exit: Arc<Mutex<Option<ExitRecord>>>,
) {
    // A dropped sender means the supervisor itself went away.
    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut terminate => {
            if let Err(e) = send_terminate(&mut child, pid) {
                tracing::warn!("{}", e);
            }
            child.wait().await
        }
    };

    let code = match &status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(pid, "Failed to wait for proxy: {}", e);
            None
        }
    };

    tracing::info!(pid, ?code, "Proxy terminated");

    *last_exit.lock() = Some(ExitRecord {
        pid,
        code,
        at: Utc::now(),
    });

    {
        let mut slot = running.lock();
        if slot.as_ref().is_some_and(|r| r.generation == generation) {
            *slot = None;
        }
    }

    exited.send_replace(true);
}

#[cfg(unix)]
fn send_terminate(_child: &mut Child, pid: u32) -> Result<(), SupervisorError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| SupervisorError::Signal(e.to_string()))
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, _pid: u32) -> Result<(), SupervisorError> {
    child
        .start_kill()
        .map_err(|e| SupervisorError::Signal(e.to_string()))
}
