//! Process supervisor.
//!
//! Owns the lifecycle of the service unit's children as a whole: launch in
//! dependency order, wait for the first primary exit or a termination
//! signal, then cascade a graceful-then-forced shutdown exactly once.
//!
//! Per run the supervisor moves through
//! `Idle -> LockAcquired -> FetchingAssets -> LaunchingProcesses -> Running
//! -> ShuttingDown -> Terminated`. `ShuttingDown` is guarded by a
//! single-fire latch so the signal path and the primary-exit path cannot
//! race into a double teardown.

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use launch_fetch::fetch_all;

use crate::config::OrchestratorConfig;
use crate::error::{LaunchError, Result};
use crate::lock::SingletonGuard;
use crate::preset::ServicePreset;
use crate::process::{
    send_sigkill, send_sigterm, spawn_monitored, ExitEvent, ManagedProcess, ServiceCommand,
};

/// Phases of one supervisor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    LockAcquired,
    FetchingAssets,
    LaunchingProcesses,
    Running,
    ShuttingDown,
    Terminated,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::LockAcquired => "lock-acquired",
            SupervisorState::FetchingAssets => "fetching-assets",
            SupervisorState::LaunchingProcesses => "launching-processes",
            SupervisorState::Running => "running",
            SupervisorState::ShuttingDown => "shutting-down",
            SupervisorState::Terminated => "terminated",
        };
        write!(f, "{name}")
    }
}

/// What ended the Running phase.
#[derive(Debug, Clone)]
pub enum ShutdownTrigger {
    /// A primary process exited; the unit is unhealthy.
    PrimaryExited(ExitEvent),
    /// SIGTERM or SIGINT was delivered.
    Signal(&'static str),
}

impl std::fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownTrigger::PrimaryExited(ev) => {
                write!(f, "primary {} exited (code {:?})", ev.role, ev.code)
            }
            ShutdownTrigger::Signal(name) => write!(f, "{name} received"),
        }
    }
}

/// How the teardown finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Every child left within the grace window.
    Clean,
    /// At least one child had to be SIGKILLed.
    Forced,
}

/// Supervisor for one service unit.
pub struct Supervisor {
    state: SupervisorState,
    processes: Vec<ManagedProcess>,
    exits_tx: mpsc::Sender<ExitEvent>,
    exits_rx: mpsc::Receiver<ExitEvent>,
    shutdown_latch: CancellationToken,
    shutdown_kind: Option<ShutdownKind>,
    signal_name: Arc<OnceLock<&'static str>>,
    grace: Duration,
}

impl Supervisor {
    /// New supervisor with the given graceful-shutdown window.
    pub fn new(grace: Duration) -> Self {
        let (exits_tx, exits_rx) = mpsc::channel(16);
        Self {
            state: SupervisorState::Idle,
            processes: Vec::new(),
            exits_tx,
            exits_rx,
            shutdown_latch: CancellationToken::new(),
            shutdown_kind: None,
            signal_name: Arc::new(OnceLock::new()),
            grace,
        }
    }

    /// Install SIGTERM/SIGINT listeners that fire the shutdown latch.
    ///
    /// Called once at the start of a run, before any long phase. A signal
    /// delivered while the unit is still fetching assets or probing
    /// readiness must funnel into the same cascading teardown as one
    /// delivered while Running; left to the default disposition it would
    /// kill the orchestrator with the lock file still on disk and children
    /// already launched.
    pub fn install_signal_handlers(&self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let latch = self.shutdown_latch.clone();
        let name = Arc::clone(&self.signal_name);

        tokio::spawn(async move {
            let which = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            info!(signal = which, "termination signal received");
            let _ = name.set(which);
            latch.cancel();
        });

        Ok(())
    }

    /// Current phase.
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Registry of everything spawned so far.
    pub fn processes(&self) -> &[ManagedProcess] {
        &self.processes
    }

    /// Token cancelled exactly once when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_latch.clone()
    }

    fn transition(&mut self, next: SupervisorState) {
        debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    /// Record that the singleton lock is held.
    pub fn note_lock_acquired(&mut self) {
        self.transition(SupervisorState::LockAcquired);
    }

    /// Enter the asset-fetch phase.
    pub fn begin_fetch(&mut self) {
        self.transition(SupervisorState::FetchingAssets);
    }

    /// Declare the unit running. Launch is fire-and-forget; there is no
    /// implicit readiness gate here.
    pub fn mark_running(&mut self) {
        self.transition(SupervisorState::Running);
    }

    /// Final transition after shutdown has completed.
    pub fn finish(&mut self) {
        self.transition(SupervisorState::Terminated);
    }

    /// Spawn one child and register it. Does not block on the child.
    pub fn launch(&mut self, cmd: &ServiceCommand) -> Result<ManagedProcess> {
        let proc = spawn_monitored(cmd, self.exits_tx.clone())?;
        self.processes.push(proc.clone());
        Ok(proc)
    }

    /// Launch the whole unit in dependency order.
    ///
    /// An auxiliary that fails to spawn is logged and skipped; the unit
    /// runs degraded without it. A primary that fails to spawn is fatal
    /// and the caller must tear the unit down.
    pub fn launch_all(&mut self, commands: &[ServiceCommand]) -> Result<()> {
        self.transition(SupervisorState::LaunchingProcesses);

        for cmd in commands {
            match self.launch(cmd) {
                Ok(_) => {}
                Err(e) if cmd.is_primary() => {
                    error!(role = %cmd.role, error = %e, "primary process failed to launch");
                    return Err(match e {
                        LaunchError::Io(source) => LaunchError::PrimarySpawn {
                            role: cmd.role.to_string(),
                            source,
                        },
                        other => other,
                    });
                }
                Err(e) => {
                    warn!(
                        role = %cmd.role,
                        error = %e,
                        "auxiliary failed to launch, continuing without it"
                    );
                }
            }
        }

        Ok(())
    }

    /// Block until the unit must come down: the first primary exit, or the
    /// shutdown latch firing (signal delivery via the installed listeners).
    /// Auxiliary exits are logged and do not resolve the wait. This is a
    /// select over exit events and the latch, not a poll loop.
    pub async fn await_trigger(&mut self) -> ShutdownTrigger {
        loop {
            tokio::select! {
                event = self.exits_rx.recv() => {
                    match event {
                        Some(ev) if ev.primary => {
                            warn!(role = %ev.role, code = ev.code, "primary process exited, unit is unhealthy");
                            return ShutdownTrigger::PrimaryExited(ev);
                        }
                        Some(ev) => {
                            warn!(role = %ev.role, code = ev.code, "auxiliary process exited, continuing");
                        }
                        None => {
                            return ShutdownTrigger::Signal("exit-channel-closed");
                        }
                    }
                }
                _ = self.shutdown_latch.cancelled() => {
                    let name = self.signal_name.get().copied().unwrap_or("shutdown request");
                    return ShutdownTrigger::Signal(name);
                }
            }
        }
    }

    /// Cascade shutdown over every registered child: SIGTERM all, wait out
    /// the grace window, SIGKILL the stragglers.
    ///
    /// Idempotent: the latch fires once and repeat calls return the
    /// recorded result without signalling anything again.
    pub async fn shutdown(&mut self) -> ShutdownKind {
        if let Some(kind) = self.shutdown_kind {
            debug!("shutdown already performed");
            return kind;
        }
        self.transition(SupervisorState::ShuttingDown);
        self.shutdown_latch.cancel();

        for proc in self.processes.iter().filter(|p| p.alive()) {
            info!(role = %proc.role, pid = proc.pid, "sending SIGTERM");
            send_sigterm(proc.pid);
        }

        let deadline = tokio::time::Instant::now() + self.grace;
        while self.processes.iter().any(|p| p.alive()) {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let mut forced = 0usize;
        for proc in self.processes.iter().filter(|p| p.alive()) {
            warn!(
                role = %proc.role,
                pid = proc.pid,
                "still alive after grace window, sending SIGKILL"
            );
            send_sigkill(proc.pid);
            forced += 1;
        }

        if forced > 0 {
            // Bounded wait for the monitors to reap the killed children.
            let reap_deadline = tokio::time::Instant::now() + Duration::from_secs(2);
            while self.processes.iter().any(|p| p.alive()) {
                if tokio::time::Instant::now() >= reap_deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        let kind = if forced == 0 {
            ShutdownKind::Clean
        } else {
            ShutdownKind::Forced
        };
        info!(forced, "shutdown complete");
        self.shutdown_kind = Some(kind);
        kind
    }
}

/// Knobs for a full orchestration run.
#[derive(Debug, Clone, Default)]
pub struct OrchestrateOptions {
    /// Skip the asset-fetch phase entirely.
    pub skip_fetch: bool,
    /// Gate the Running transition on an HTTP readiness probe against the
    /// engine. Off by default: launch is fire-and-forget like the
    /// deployments this replaces.
    pub readiness_probe: bool,
    /// Fetch tuning.
    pub fetch: launch_fetch::FetchConfig,
}

/// Bounded HTTP poll against the engine before declaring Running.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    /// URL to poll; any HTTP response counts as ready.
    pub url: String,
    /// Poll interval.
    pub interval: Duration,
    /// Overall budget before giving up.
    pub timeout: Duration,
}

impl ReadinessProbe {
    /// Probe with the default 500 ms / 60 s cadence.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
        }
    }

    /// Poll until the engine answers or the budget runs out. Returns
    /// whether the engine was seen accepting connections.
    pub async fn wait_ready(&self) -> bool {
        let client = reqwest::Client::new();
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            match client
                .get(&self.url)
                .timeout(Duration::from_secs(2))
                .send()
                .await
            {
                Ok(_) => {
                    info!(url = %self.url, "engine is accepting connections");
                    return true;
                }
                Err(e) => {
                    debug!(url = %self.url, error = %e, "engine not ready yet");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Drive one full orchestration run: singleton lock, asset fetch, launch,
/// supervision, cascading shutdown.
///
/// Returns the process exit code: 0 for a clean run or the benign
/// lock-already-held no-op, 1 when a primary fails to launch. Fatal setup
/// errors (missing entrypoint, lock IO) surface as `Err` and also map to
/// exit 1 at the CLI boundary.
pub async fn orchestrate(
    config: &OrchestratorConfig,
    preset: &ServicePreset,
    opts: &OrchestrateOptions,
) -> Result<i32> {
    let lock_path = config.lock_path(&preset.name);
    let _guard = match SingletonGuard::acquire(&lock_path)? {
        Some(guard) => guard,
        None => return Ok(0),
    };

    let mut supervisor = Supervisor::new(config.grace);
    supervisor.install_signal_handlers()?;
    supervisor.note_lock_acquired();

    config.ensure_entrypoint()?;

    let latch = supervisor.shutdown_token();

    if !opts.skip_fetch {
        supervisor.begin_fetch();
        let tasks = preset.tasks(&config.models_dir());
        // Partial failure is non-fatal by contract: the engine surfaces
        // missing assets itself at load time. A signal during the fetch
        // (the longest phase of a cold start) aborts the batch and takes
        // the normal teardown path so the lock is released.
        let interrupted = tokio::select! {
            _ = latch.cancelled() => true,
            _report = fetch_all(tasks, &opts.fetch) => false,
        };
        if interrupted {
            info!("shutdown requested during asset fetch");
            supervisor.shutdown().await;
            supervisor.finish();
            return Ok(0);
        }
    }

    let commands = config.service_commands();
    if let Err(e) = supervisor.launch_all(&commands) {
        error!(error = %e, "fatal launch failure, tearing down unit");
        supervisor.shutdown().await;
        supervisor.finish();
        return Ok(1);
    }

    if opts.readiness_probe {
        let probe = ReadinessProbe::new(config.engine_url());
        let ready = tokio::select! {
            _ = latch.cancelled() => None,
            ready = probe.wait_ready() => Some(ready),
        };
        match ready {
            None => {
                info!("shutdown requested during readiness probe");
                supervisor.shutdown().await;
                supervisor.finish();
                return Ok(0);
            }
            Some(false) => warn!(
                url = %config.engine_url(),
                "engine readiness probe timed out, proceeding anyway"
            ),
            Some(true) => {}
        }
    }

    supervisor.mark_running();
    let trigger = supervisor.await_trigger().await;
    info!(trigger = %trigger, "entering shutdown");

    let kind = supervisor.shutdown().await;
    supervisor.finish();
    // A forced teardown still exits 0: the unit ran and is now down, and
    // the kind is in the log line. Only setup failures map to 1.
    info!(forced = matches!(kind, ShutdownKind::Forced), "service unit terminated");
    Ok(0)
}
