//! Managed child processes.
//!
//! Each supervised child is described by a [`ServiceCommand`], spawned
//! without blocking, and watched by a monitor task that owns the OS handle,
//! waits for exit, and publishes an [`ExitEvent`]. The supervisor's
//! registry only keeps the PID, so signalling never contends with the
//! monitor for the handle.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::Result;

/// Role of a supervised child within the service unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// The ComfyUI node-graph engine.
    InferenceEngine,
    /// REST wrapper exposing the generation API.
    ApiWrapper,
    /// Reverse proxy in front of engine and wrapper.
    ReverseProxy,
    /// Optional tailscale daemon.
    VpnDaemon,
    /// Optional notebook server.
    Jupyter,
}

impl ProcessRole {
    /// Primary processes define unit health: if one dies unexpectedly the
    /// whole unit is torn down. Proxy, VPN, and notebook are auxiliary.
    pub fn is_primary(&self) -> bool {
        matches!(self, ProcessRole::InferenceEngine | ProcessRole::ApiWrapper)
    }
}

impl std::fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProcessRole::InferenceEngine => "inference-engine",
            ProcessRole::ApiWrapper => "api-wrapper",
            ProcessRole::ReverseProxy => "reverse-proxy",
            ProcessRole::VpnDaemon => "vpn-daemon",
            ProcessRole::Jupyter => "jupyter",
        };
        write!(f, "{name}")
    }
}

/// Declarative description of one child to launch.
#[derive(Debug, Clone)]
pub struct ServiceCommand {
    /// Role tag for the registry.
    pub role: ProcessRole,
    /// Program to execute.
    pub program: String,
    /// Arguments, forwarded verbatim.
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    pub envs: Vec<(String, String)>,
    /// Working directory (inherited when `None`).
    pub cwd: Option<PathBuf>,
}

impl ServiceCommand {
    /// New command with no arguments.
    pub fn new(role: ProcessRole, program: impl Into<String>) -> Self {
        Self {
            role,
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Whether this command launches a primary process.
    pub fn is_primary(&self) -> bool {
        self.role.is_primary()
    }
}

/// Registry entry for a spawned child. The handle itself lives in the
/// monitor task; this is what the kill-set operates on.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    /// Role tag.
    pub role: ProcessRole,
    /// OS process id.
    pub pid: i32,
    /// Primary/auxiliary classification at spawn time.
    pub primary: bool,
}

impl ManagedProcess {
    /// Whether the child is still running.
    pub fn alive(&self) -> bool {
        pid_alive(self.pid)
    }
}

/// Published by a monitor task when its child exits.
#[derive(Debug, Clone)]
pub struct ExitEvent {
    /// Role of the child that exited.
    pub role: ProcessRole,
    /// Primary/auxiliary classification.
    pub primary: bool,
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
}

/// Spawn a child and a monitor task that reaps it and reports the exit.
///
/// Does not block on the child; returns as soon as the spawn succeeds.
pub fn spawn_monitored(
    cmd: &ServiceCommand,
    exits: mpsc::Sender<ExitEvent>,
) -> Result<ManagedProcess> {
    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdin(Stdio::null())
        .envs(cmd.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    if let Some(dir) = &cmd.cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;
    let pid = child.id().map(|p| p as i32).unwrap_or(-1);
    let role = cmd.role;
    let primary = cmd.is_primary();
    info!(role = %role, pid, primary, "process launched");

    tokio::spawn(async move {
        let status = child.wait().await;
        let code = status.as_ref().ok().and_then(|s| s.code());
        debug!(role = %role, pid, code, "process exited");
        let _ = exits
            .send(ExitEvent {
                role,
                primary,
                code,
            })
            .await;
    });

    Ok(ManagedProcess { role, pid, primary })
}

/// True when `pid` names a live process (signal 0 probe).
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM still names a live process, just one owned by another user.
    // Only ESRCH means the PID is gone.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Ask `pid` to terminate gracefully.
pub fn send_sigterm(pid: i32) {
    if pid > 0 {
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
    }
}

/// Forcibly kill `pid`.
pub fn send_sigkill(pid: i32) {
    if pid > 0 {
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
    }
}
