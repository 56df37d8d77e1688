//! Batch fetcher: cache short-circuit, per-strategy retry with linear
//! backoff, and semaphore-bounded fan-out with join-all semantics.
//!
//! Failure is data here, not control flow: every task yields exactly one
//! [`DownloadOutcome`] and an individual failure never aborts sibling tasks
//! or the batch. The caller decides what partial failure means.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::strategy::{default_chain, DownloadStrategy};
use crate::task::{DownloadOutcome, DownloadTask, FetchReport};

/// Tuning knobs for a fetch batch.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum tasks in flight at once (>= 1). Kept small so a batch of
    /// multi-gigabyte checkpoints does not saturate shared network or disk.
    pub max_concurrency: usize,

    /// Attempts per strategy before falling through to the next one.
    pub attempts_per_strategy: u32,

    /// Base delay for linear backoff between attempts (attempt N sleeps
    /// N * base).
    pub backoff_base: Duration,

    /// Connect timeout handed to every strategy.
    pub connect_timeout: Duration,

    /// Overall wall-clock budget for a single transfer attempt.
    pub max_transfer_time: Duration,

    /// Minimum plausible size for a finished model file. Anything smaller
    /// is treated as a truncated leftover from a crashed run and
    /// re-downloaded. A cheap heuristic, not a checksum: a file that is
    /// complete-but-corrupt, or truncated-but-large, passes it.
    pub min_valid_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            attempts_per_strategy: 3,
            backoff_base: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(15),
            max_transfer_time: Duration::from_secs(3600),
            min_valid_bytes: 1024 * 1024,
        }
    }
}

/// Fetch a batch of tasks with the default strategy chain.
///
/// Returns only after every task has an outcome. Outcomes are in
/// submission order.
pub async fn fetch_all(tasks: Vec<DownloadTask>, config: &FetchConfig) -> FetchReport {
    let chain = default_chain(config);
    fetch_all_with(tasks, chain, config).await
}

/// Fetch a batch of tasks with an explicit strategy chain.
pub async fn fetch_all_with(
    tasks: Vec<DownloadTask>,
    strategies: Vec<Arc<dyn DownloadStrategy>>,
    config: &FetchConfig,
) -> FetchReport {
    let started_at = chrono::Utc::now();
    let started = std::time::Instant::now();

    let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    info!(
        tasks = tasks.len(),
        max_concurrency = config.max_concurrency.max(1),
        "starting model fetch batch"
    );

    let mut handles = Vec::with_capacity(tasks.len());
    for task in tasks {
        let semaphore = Arc::clone(&semaphore);
        let strategies = strategies.clone();
        let config = config.clone();
        let fallback = task.clone();

        let handle = tokio::spawn(async move {
            // Closing the semaphore is not part of this design, so acquire
            // can only fail if the batch itself is torn down.
            let _permit = semaphore.acquire_owned().await;
            fetch_one(task, &strategies, &config).await
        });
        handles.push((fallback, handle));
    }

    // Join barrier: the batch resolves only after every task has an outcome.
    let mut outcomes = Vec::with_capacity(handles.len());
    for (task, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => DownloadOutcome::failed(task, format!("fetch task panicked: {join_err}")),
        };
        outcomes.push(outcome);
    }

    let report = FetchReport {
        outcomes,
        started_at,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    report.log_summary();
    report
}

/// Fetch a single task through the strategy chain.
pub async fn fetch_one(
    task: DownloadTask,
    strategies: &[Arc<dyn DownloadStrategy>],
    config: &FetchConfig,
) -> DownloadOutcome {
    // Idempotence contract: a plausible cached file means zero network
    // activity on repeat runs.
    match tokio::fs::metadata(&task.dest_path).await {
        Ok(meta) if meta.len() >= config.min_valid_bytes => {
            debug!(
                asset = %task.display_name,
                bytes = meta.len(),
                "already cached, skipping download"
            );
            return DownloadOutcome::cached(task);
        }
        Ok(meta) => {
            warn!(
                asset = %task.display_name,
                bytes = meta.len(),
                "cached file below plausible size, re-downloading"
            );
        }
        Err(_) => {}
    }

    if let Some(parent) = task.dest_path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            let detail = format!("cannot create {}: {e}", parent.display());
            return DownloadOutcome::failed(task, detail);
        }
    }

    let mut last_error: Option<String> = None;

    for strategy in strategies {
        if !strategy.is_available().await {
            debug!(strategy = strategy.name(), "strategy unavailable, skipping");
            continue;
        }

        for attempt in 1..=config.attempts_per_strategy.max(1) {
            match strategy.fetch(&task, config).await {
                Ok(()) => match tokio::fs::metadata(&task.dest_path).await {
                    Ok(meta) if meta.len() >= config.min_valid_bytes => {
                        info!(
                            asset = %task.display_name,
                            strategy = strategy.name(),
                            bytes = meta.len(),
                            "asset downloaded"
                        );
                        return DownloadOutcome::succeeded(task, strategy.kind());
                    }
                    Ok(meta) => {
                        // Tool exited cleanly but left an implausibly small
                        // file; count it as a failed attempt.
                        warn!(
                            asset = %task.display_name,
                            strategy = strategy.name(),
                            bytes = meta.len(),
                            attempt,
                            "download finished but file is below plausible size"
                        );
                        last_error = Some(
                            FetchError::Truncated {
                                path: task.dest_path.clone(),
                                bytes: meta.len(),
                            }
                            .to_string(),
                        );
                    }
                    Err(e) => {
                        last_error = Some(format!("{} left no file: {e}", strategy.name()));
                    }
                },
                Err(e) => {
                    warn!(
                        asset = %task.display_name,
                        strategy = strategy.name(),
                        attempt,
                        error = %e,
                        "download attempt failed"
                    );
                    last_error = Some(e.to_string());
                }
            }

            if attempt < config.attempts_per_strategy {
                tokio::time::sleep(config.backoff_base * attempt).await;
            }
        }

        debug!(
            asset = %task.display_name,
            strategy = strategy.name(),
            "strategy exhausted, falling through"
        );
    }

    let error = last_error.unwrap_or_else(|| FetchError::NoStrategyAvailable.to_string());
    DownloadOutcome::failed(task, error)
}
