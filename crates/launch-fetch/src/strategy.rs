//! Download strategy chain.
//!
//! Strategies are tried in a fixed priority order: aria2c (16-way segmented)
//! when present on the host, then axel, then a built-in sequential HTTP
//! client with byte-offset resume as the universal fallback. The external
//! clients are availability-probed before use, the same way the shell
//! originals tested for them with `command -v`.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use crate::error::{FetchError, Result};
use crate::fetcher::FetchConfig;
use crate::task::{DownloadTask, Strategy};

/// One concrete download client in the fallback chain.
#[async_trait]
pub trait DownloadStrategy: Send + Sync {
    /// Short name for log lines.
    fn name(&self) -> &'static str;

    /// Which chain slot this strategy occupies.
    fn kind(&self) -> Strategy;

    /// Whether this strategy can run on the current host.
    async fn is_available(&self) -> bool;

    /// Transfer `task.source_url` to `task.dest_path`. One attempt; the
    /// fetcher owns retry and backoff.
    async fn fetch(&self, task: &DownloadTask, config: &FetchConfig) -> Result<()>;
}

/// Build the default chain in priority order.
pub fn default_chain(config: &FetchConfig) -> Vec<Arc<dyn DownloadStrategy>> {
    vec![
        Arc::new(Aria2cStrategy),
        Arc::new(AxelStrategy),
        Arc::new(HttpResumeStrategy::new(config)),
    ]
}

/// Probe for an external tool by running `<tool> --version`.
async fn tool_available(tool: &str) -> bool {
    let probe = Command::new(tool)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match probe {
        Ok(status) => status.success(),
        Err(_) => false,
    }
}

/// Run a spawned download tool to completion under the transfer time budget.
async fn run_tool(tool: &'static str, mut cmd: Command, config: &FetchConfig) -> Result<()> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FetchError::ToolUnavailable(tool.to_string())
            } else {
                FetchError::Io(e)
            }
        })?;

    // Drain stderr concurrently so the pipe can't fill and stall the child.
    let stderr = child.stderr.take();
    let collector = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut pipe) = stderr {
            let _ = pipe.read_to_string(&mut buf).await;
        }
        buf
    });

    let status = match tokio::time::timeout(config.max_transfer_time, child.wait()).await {
        Ok(waited) => waited?,
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(FetchError::TransferTimeout(
                config.max_transfer_time.as_secs(),
            ));
        }
    };

    if status.success() {
        Ok(())
    } else {
        let detail = collector.await.unwrap_or_default();
        Err(FetchError::ToolFailed {
            tool: tool.to_string(),
            code: status.code().unwrap_or(-1),
            detail: tail(&detail, 400),
        })
    }
}

/// Last `max` bytes of a tool's stderr, trimmed.
fn tail(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max {
        trimmed.to_string()
    } else {
        let start = trimmed.len() - max;
        // Avoid slicing through a UTF-8 boundary.
        let start = (start..trimmed.len())
            .find(|i| trimmed.is_char_boundary(*i))
            .unwrap_or(start);
        trimmed[start..].to_string()
    }
}

fn split_dest(dest: &Path) -> Result<(&Path, &str)> {
    let dir = dest.parent().ok_or_else(|| {
        FetchError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("destination {} has no parent directory", dest.display()),
        ))
    })?;
    let file = dest.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        FetchError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("destination {} has no file name", dest.display()),
        ))
    })?;
    Ok((dir, file))
}

/// aria2c: the primary high-parallelism segmented client.
pub struct Aria2cStrategy;

#[async_trait]
impl DownloadStrategy for Aria2cStrategy {
    fn name(&self) -> &'static str {
        "aria2c"
    }

    fn kind(&self) -> Strategy {
        Strategy::PrimaryFast
    }

    async fn is_available(&self) -> bool {
        tool_available("aria2c").await
    }

    async fn fetch(&self, task: &DownloadTask, config: &FetchConfig) -> Result<()> {
        let (dir, file) = split_dest(&task.dest_path)?;

        let mut cmd = Command::new("aria2c");
        cmd.arg("--max-connection-per-server=16")
            .arg("--split=16")
            .arg("--min-split-size=1M")
            .arg("--max-tries=3")
            .arg("--retry-wait=2")
            .arg(format!(
                "--connect-timeout={}",
                config.connect_timeout.as_secs()
            ))
            .arg("--allow-overwrite=true")
            .arg("--auto-file-renaming=false")
            .arg("--continue=true")
            .arg("--console-log-level=warn")
            .arg("--dir")
            .arg(dir)
            .arg("--out")
            .arg(file)
            .arg(&task.source_url);

        debug!(asset = %task.display_name, "starting aria2c transfer");
        run_tool("aria2c", cmd, config).await
    }
}

/// axel: the second segmented client, used when aria2c is missing or failed.
pub struct AxelStrategy;

#[async_trait]
impl DownloadStrategy for AxelStrategy {
    fn name(&self) -> &'static str {
        "axel"
    }

    fn kind(&self) -> Strategy {
        Strategy::SecondaryFast
    }

    async fn is_available(&self) -> bool {
        tool_available("axel").await
    }

    async fn fetch(&self, task: &DownloadTask, config: &FetchConfig) -> Result<()> {
        let mut cmd = Command::new("axel");
        cmd.arg("-n")
            .arg("8")
            .arg("-a")
            .arg(format!("-T{}", config.connect_timeout.as_secs()))
            .arg("-o")
            .arg(&task.dest_path)
            .arg(&task.source_url);

        debug!(asset = %task.display_name, "starting axel transfer");
        run_tool("axel", cmd, config).await
    }
}

/// Built-in sequential HTTP client. Always available; resumes from the
/// current partial-file length via a `Range` request, like `curl -C -`.
pub struct HttpResumeStrategy {
    client: reqwest::Client,
}

impl HttpResumeStrategy {
    /// Build the client with the chain's connect timeout.
    pub fn new(config: &FetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("comfy-launch/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn transfer(&self, task: &DownloadTask) -> Result<()> {
        let offset = match tokio::fs::metadata(&task.dest_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut request = self.client.get(&task.source_url);
        if offset > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={offset}-"));
            debug!(asset = %task.display_name, offset, "resuming HTTP transfer");
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(
                status.as_u16(),
                task.source_url.clone(),
            ));
        }

        // 206 means the server honored the range; anything else restarts
        // the file from scratch.
        let append = offset > 0 && status == reqwest::StatusCode::PARTIAL_CONTENT;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&task.dest_path)
            .await?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl DownloadStrategy for HttpResumeStrategy {
    fn name(&self) -> &'static str {
        "http"
    }

    fn kind(&self) -> Strategy {
        Strategy::GenericHttp
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn fetch(&self, task: &DownloadTask, config: &FetchConfig) -> Result<()> {
        tokio::time::timeout(config.max_transfer_time, self.transfer(task))
            .await
            .map_err(|_| FetchError::TransferTimeout(config.max_transfer_time.as_secs()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_short_text_intact() {
        assert_eq!(tail("  connection reset  ", 400), "connection reset");
    }

    #[test]
    fn tail_truncates_long_text_from_the_front() {
        let long = "x".repeat(500);
        let out = tail(&long, 400);
        assert_eq!(out.len(), 400);
    }

    #[test]
    fn split_dest_rejects_bare_root() {
        assert!(split_dest(Path::new("/")).is_err());
    }

    #[tokio::test]
    async fn probing_a_missing_tool_is_not_an_error() {
        assert!(!tool_available("definitely-not-a-real-downloader").await);
    }
}
