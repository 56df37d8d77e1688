//! Launch-Core: Supervision Layer for comfy-launch
//!
//! Owns everything between "container started" and "service unit is down":
//! the singleton lock, orchestrator configuration, service presets, child
//! process launch and monitoring, and the cascading graceful-then-forced
//! shutdown. Asset fetching itself lives in `launch-fetch`; this crate
//! invokes it once at startup and treats partial failure as a logged
//! warning, not a fatal condition.

pub mod config;
pub mod error;
pub mod lock;
pub mod preset;
pub mod process;
pub mod supervisor;
pub mod telemetry;

pub use config::{OrchestratorConfig, DEFAULT_ENGINE_PORT, DEFAULT_GRACE, DEFAULT_WRAPPER_PORT};
pub use error::{LaunchError, Result};
pub use lock::SingletonGuard;
pub use preset::{AssetCategory, AssetSpec, ServicePreset};
pub use process::{
    pid_alive, spawn_monitored, ExitEvent, ManagedProcess, ProcessRole, ServiceCommand,
};
pub use supervisor::{
    orchestrate, OrchestrateOptions, ReadinessProbe, ShutdownKind, ShutdownTrigger, Supervisor,
    SupervisorState,
};
pub use telemetry::init_tracing;

/// comfy-launch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
