//! Download task and outcome value types.
//!
//! A `DownloadTask` is immutable once enqueued and is identified by its
//! destination path. The fetcher consumes each task exactly once and
//! produces exactly one `DownloadOutcome` for it; outcomes are aggregated
//! into a `FetchReport` for the run-level summary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// One model asset to place on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadTask {
    /// Remote URL to fetch from.
    pub source_url: String,

    /// Absolute destination path the inference engine expects.
    pub dest_path: PathBuf,

    /// Human-readable name used in log lines.
    pub display_name: String,
}

impl DownloadTask {
    /// Create a new task.
    pub fn new(
        source_url: impl Into<String>,
        dest_path: impl Into<PathBuf>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            dest_path: dest_path.into(),
            display_name: display_name.into(),
        }
    }
}

/// Which download client satisfied a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Strategy {
    /// aria2c, 16-way segmented transfer.
    PrimaryFast,
    /// axel, the second segmented client.
    SecondaryFast,
    /// Built-in sequential HTTP client with byte-offset resume.
    GenericHttp,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::PrimaryFast => write!(f, "aria2c"),
            Strategy::SecondaryFast => write!(f, "axel"),
            Strategy::GenericHttp => write!(f, "http"),
        }
    }
}

/// Result of fetching one task. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// The task this outcome belongs to.
    pub task: DownloadTask,

    /// Whether the asset is now present on disk.
    pub success: bool,

    /// Strategy that produced the file; `None` when the cache was already
    /// valid and no network activity happened.
    pub strategy_used: Option<Strategy>,

    /// Last error seen before exhaustion (failures only).
    pub error: Option<String>,
}

impl DownloadOutcome {
    /// Asset was already cached; no download ran.
    pub fn cached(task: DownloadTask) -> Self {
        Self {
            task,
            success: true,
            strategy_used: None,
            error: None,
        }
    }

    /// Asset downloaded by the given strategy.
    pub fn succeeded(task: DownloadTask, strategy: Strategy) -> Self {
        Self {
            task,
            success: true,
            strategy_used: Some(strategy),
            error: None,
        }
    }

    /// All strategies exhausted; `error` carries the last failure.
    pub fn failed(task: DownloadTask, error: impl Into<String>) -> Self {
        Self {
            task,
            success: false,
            strategy_used: None,
            error: Some(error.into()),
        }
    }
}

/// Aggregate over one `fetch_all` run.
#[derive(Debug)]
pub struct FetchReport {
    /// One outcome per submitted task, in submission order.
    pub outcomes: Vec<DownloadOutcome>,

    /// When the batch started.
    pub started_at: chrono::DateTime<chrono::Utc>,

    /// Wall-clock duration of the batch in milliseconds.
    pub duration_ms: u64,
}

impl FetchReport {
    /// Number of tasks that ended up with the asset on disk.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    /// Number of tasks that exhausted every strategy.
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }

    /// Whether every task succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    /// Emit the run-level summary. Partial failure is a warning, never an
    /// error: the caller decides whether to proceed.
    pub fn log_summary(&self) {
        if self.is_clean() {
            info!(
                succeeded = self.succeeded(),
                started_at = %self.started_at.to_rfc3339(),
                duration_ms = self.duration_ms,
                "all model assets ready"
            );
        } else {
            for outcome in self.outcomes.iter().filter(|o| !o.success) {
                warn!(
                    asset = %outcome.task.display_name,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "asset could not be fetched"
                );
            }
            warn!(
                succeeded = self.succeeded(),
                failed = self.failed(),
                started_at = %self.started_at.to_rfc3339(),
                duration_ms = self.duration_ms,
                "model fetch finished with failures; engine will fail loudly on missing assets"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str) -> DownloadTask {
        DownloadTask::new(
            format!("http://example.com/{name}"),
            format!("/tmp/{name}"),
            name,
        )
    }

    #[test]
    fn report_counts_split_by_success() {
        let report = FetchReport {
            outcomes: vec![
                DownloadOutcome::cached(task("a.safetensors")),
                DownloadOutcome::succeeded(task("b.safetensors"), Strategy::PrimaryFast),
                DownloadOutcome::failed(task("c.safetensors"), "connection reset"),
            ],
            started_at: chrono::Utc::now(),
            duration_ms: 10,
        };

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn cached_outcome_reports_no_strategy() {
        let outcome = DownloadOutcome::cached(task("a.bin"));
        assert!(outcome.success);
        assert_eq!(outcome.strategy_used, None);
        assert_eq!(outcome.error, None);
    }

    #[test]
    fn task_roundtrips_through_json_manifest() {
        let json = r#"{
            "source_url": "https://huggingface.co/x/resolve/main/vae.safetensors",
            "dest_path": "/workspace/ComfyUI/models/vae/vae.safetensors",
            "display_name": "VAE"
        }"#;

        let parsed: DownloadTask = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.display_name, "VAE");
        assert_eq!(
            parsed.dest_path,
            PathBuf::from("/workspace/ComfyUI/models/vae/vae.safetensors")
        );
    }
}
