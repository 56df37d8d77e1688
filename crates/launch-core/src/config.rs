//! Orchestrator configuration.
//!
//! One explicit struct built from the environment at process start, instead
//! of exported variables read ad hoc throughout the run. Values are opaque
//! pass-through strings: the orchestrator validates presence, never
//! contents — `COMFY_LAUNCH_ARGS` and `CUDA_VISIBLE_DEVICES` are forwarded
//! verbatim to the children that consume them.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{LaunchError, Result};
use crate::process::{ProcessRole, ServiceCommand};

/// Default ComfyUI UI port.
pub const DEFAULT_ENGINE_PORT: u16 = 8188;
/// Default REST wrapper port.
pub const DEFAULT_WRAPPER_PORT: u16 = 8189;
/// Default graceful-shutdown window.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Static configuration for one orchestrator run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Workspace root; the fixed directory layout lives under here.
    pub workspace_root: PathBuf,
    /// Python virtualenv location (`VENV_PATH`), when one is used.
    pub venv_path: Option<PathBuf>,
    /// Extra engine flags (`COMFY_LAUNCH_ARGS`), split on whitespace and
    /// forwarded verbatim.
    pub comfy_launch_args: Vec<String>,
    /// `ENABLE_TAILSCALE` toggle for the VPN daemon.
    pub enable_tailscale: bool,
    /// `ENABLE_JUPYTER` toggle for the notebook server.
    pub enable_jupyter: bool,
    /// `TAILSCALE_AUTHKEY`, passed through to the daemon environment.
    pub tailscale_authkey: Option<String>,
    /// `CUDA_VISIBLE_DEVICES`, passed through to the engine environment.
    pub cuda_visible_devices: Option<String>,
    /// Engine UI port.
    pub engine_port: u16,
    /// REST wrapper port.
    pub wrapper_port: u16,
    /// Graceful-shutdown window before SIGKILL.
    pub grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("/workspace"),
            venv_path: None,
            comfy_launch_args: Vec::new(),
            enable_tailscale: false,
            enable_jupyter: false,
            tailscale_authkey: None,
            cuda_visible_devices: None,
            engine_port: DEFAULT_ENGINE_PORT,
            wrapper_port: DEFAULT_WRAPPER_PORT,
            grace: DEFAULT_GRACE,
        }
    }
}

impl OrchestratorConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. `from_env` in disguise,
    /// split out so tests never have to mutate the process environment.
    pub fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            workspace_root: var("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            venv_path: var("VENV_PATH").map(PathBuf::from),
            comfy_launch_args: var("COMFY_LAUNCH_ARGS")
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            enable_tailscale: var("ENABLE_TAILSCALE").map(|v| parse_toggle(&v)).unwrap_or(false),
            enable_jupyter: var("ENABLE_JUPYTER").map(|v| parse_toggle(&v)).unwrap_or(false),
            tailscale_authkey: var("TAILSCALE_AUTHKEY"),
            cuda_visible_devices: var("CUDA_VISIBLE_DEVICES"),
            engine_port: var("COMFY_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_ENGINE_PORT),
            wrapper_port: var("API_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_WRAPPER_PORT),
            grace: var("SHUTDOWN_GRACE_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_GRACE),
        }
    }

    /// ComfyUI checkout directory.
    pub fn comfy_dir(&self) -> PathBuf {
        self.workspace_root.join("ComfyUI")
    }

    /// Model cache root. Destination subpaths under here are a hard
    /// contract with the engine's loader and must match exactly.
    pub fn models_dir(&self) -> PathBuf {
        self.comfy_dir().join("models")
    }

    /// Engine entrypoint script.
    pub fn engine_entrypoint(&self) -> PathBuf {
        self.comfy_dir().join("main.py")
    }

    /// Python interpreter: the venv's when configured, else `python3`.
    pub fn python(&self) -> PathBuf {
        match &self.venv_path {
            Some(venv) => venv.join("bin").join("python"),
            None => PathBuf::from("python3"),
        }
    }

    /// Engine base URL for the readiness probe.
    pub fn engine_url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.engine_port)
    }

    /// Lock file path for a named service.
    pub fn lock_path(&self, service: &str) -> PathBuf {
        PathBuf::from("/tmp").join(format!("comfy-launch-{service}.lock"))
    }

    /// Fail fast when the engine entrypoint is absent: a configuration
    /// error, not a transient condition.
    pub fn ensure_entrypoint(&self) -> Result<()> {
        let entrypoint = self.engine_entrypoint();
        if entrypoint.is_file() {
            Ok(())
        } else {
            Err(LaunchError::EntrypointMissing(entrypoint))
        }
    }

    /// Build the unit's launch list in dependency order: engine and
    /// wrapper first, then proxy, then the optional daemons.
    pub fn service_commands(&self) -> Vec<ServiceCommand> {
        let mut commands = Vec::new();

        let mut engine = ServiceCommand::new(
            ProcessRole::InferenceEngine,
            self.python().display().to_string(),
        )
        .arg(self.engine_entrypoint().display().to_string())
        .arg("--listen")
        .arg("0.0.0.0")
        .arg("--port")
        .arg(self.engine_port.to_string())
        .args(self.comfy_launch_args.clone())
        .cwd(self.comfy_dir());
        if let Some(devices) = &self.cuda_visible_devices {
            engine = engine.env("CUDA_VISIBLE_DEVICES", devices.clone());
        }
        commands.push(engine);

        commands.push(
            ServiceCommand::new(ProcessRole::ApiWrapper, self.python().display().to_string())
                .arg(
                    self.workspace_root
                        .join("api_wrapper.py")
                        .display()
                        .to_string(),
                )
                .env("COMFYUI_URL", self.engine_url())
                .env("API_PORT", self.wrapper_port.to_string())
                .cwd(self.workspace_root.clone()),
        );

        commands.push(
            ServiceCommand::new(ProcessRole::ReverseProxy, "nginx")
                .arg("-g")
                .arg("daemon off;"),
        );

        if self.enable_tailscale {
            let mut vpn = ServiceCommand::new(ProcessRole::VpnDaemon, "tailscaled")
                .arg("--state=/var/lib/tailscale/tailscaled.state");
            if let Some(key) = &self.tailscale_authkey {
                vpn = vpn.env("TS_AUTHKEY", key.clone());
            }
            commands.push(vpn);
        }

        if self.enable_jupyter {
            commands.push(
                ServiceCommand::new(ProcessRole::Jupyter, "jupyter")
                    .args(["lab", "--allow-root", "--no-browser", "--ip=0.0.0.0"])
                    .cwd(self.workspace_root.clone()),
            );
        }

        commands
    }
}

/// Boolean-valued feature toggles: true/1/yes/on, case-insensitive.
fn parse_toggle(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_the_environment_is_empty() {
        let config = OrchestratorConfig::from_vars(|_| None);
        assert_eq!(config.workspace_root, PathBuf::from("/workspace"));
        assert_eq!(config.engine_port, 8188);
        assert_eq!(config.wrapper_port, 8189);
        assert_eq!(config.grace, Duration::from_secs(5));
        assert!(!config.enable_tailscale);
        assert_eq!(config.python(), PathBuf::from("python3"));
    }

    #[test]
    fn launch_args_split_on_whitespace_and_pass_through() {
        let config = OrchestratorConfig::from_vars(vars(&[(
            "COMFY_LAUNCH_ARGS",
            "--highvram  --disable-smart-memory",
        )]));
        assert_eq!(
            config.comfy_launch_args,
            vec!["--highvram", "--disable-smart-memory"]
        );
    }

    #[test]
    fn toggles_accept_the_usual_spellings() {
        for value in ["true", "1", "yes", "ON", "True"] {
            assert!(parse_toggle(value), "{value} should enable");
        }
        for value in ["false", "0", "no", "off", ""] {
            assert!(!parse_toggle(value), "{value} should disable");
        }
    }

    #[test]
    fn venv_path_selects_the_interpreter() {
        let config = OrchestratorConfig::from_vars(vars(&[("VENV_PATH", "/opt/venv")]));
        assert_eq!(config.python(), PathBuf::from("/opt/venv/bin/python"));
    }

    #[test]
    fn model_layout_hangs_off_the_workspace_root() {
        let config = OrchestratorConfig::from_vars(vars(&[("WORKSPACE_ROOT", "/srv/wan")]));
        assert_eq!(config.comfy_dir(), PathBuf::from("/srv/wan/ComfyUI"));
        assert_eq!(config.models_dir(), PathBuf::from("/srv/wan/ComfyUI/models"));
        assert_eq!(
            config.engine_entrypoint(),
            PathBuf::from("/srv/wan/ComfyUI/main.py")
        );
    }

    #[test]
    fn missing_entrypoint_is_a_fatal_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig {
            workspace_root: dir.path().to_path_buf(),
            ..OrchestratorConfig::default()
        };
        assert!(matches!(
            config.ensure_entrypoint(),
            Err(LaunchError::EntrypointMissing(_))
        ));
    }

    #[test]
    fn command_order_puts_primaries_first() {
        let config = OrchestratorConfig {
            enable_tailscale: true,
            enable_jupyter: true,
            ..OrchestratorConfig::default()
        };
        let commands = config.service_commands();
        let roles: Vec<_> = commands.iter().map(|c| c.role).collect();
        assert_eq!(
            roles,
            vec![
                ProcessRole::InferenceEngine,
                ProcessRole::ApiWrapper,
                ProcessRole::ReverseProxy,
                ProcessRole::VpnDaemon,
                ProcessRole::Jupyter,
            ]
        );
    }

    #[test]
    fn optional_daemons_are_omitted_by_default() {
        let commands = OrchestratorConfig::default().service_commands();
        assert_eq!(commands.len(), 3);
        assert!(commands.iter().all(|c| c.role != ProcessRole::VpnDaemon));
    }
}
