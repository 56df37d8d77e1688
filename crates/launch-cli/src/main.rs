//! comfy-launch - deployment orchestrator for ComfyUI media services
//!
//! ## Commands
//!
//! - `up`: acquire the singleton lock, fetch model assets, launch and
//!   supervise the service unit until shutdown
//! - `fetch`: populate the model cache only
//! - `verify`: report which expected assets are present on disk
//! - `presets`: list the built-in service presets

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn, Level};

use launch_core::{
    orchestrate, OrchestrateOptions, OrchestratorConfig, ServicePreset,
};
use launch_fetch::{fetch_all, verify_cache, FetchConfig};

#[derive(Parser)]
#[command(name = "comfy-launch")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deploy and supervise ComfyUI-based media-generation services", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch assets, then launch and supervise the service unit
    Up {
        /// Built-in preset to deploy
        #[arg(long, default_value = "wan22-14b", conflicts_with = "manifest")]
        preset: String,

        /// JSON manifest describing a custom service
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Launch without fetching model assets first
        #[arg(long)]
        skip_fetch: bool,

        /// Poll the engine for readiness before declaring the unit running
        #[arg(long)]
        readiness_probe: bool,

        /// Concurrent downloads during the fetch phase
        #[arg(long, default_value = "3")]
        concurrency: usize,
    },

    /// Populate the model cache without launching anything
    Fetch {
        /// Built-in preset whose assets to fetch
        #[arg(long, default_value = "wan22-14b", conflicts_with = "manifest")]
        preset: String,

        /// JSON manifest describing a custom service
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Concurrent downloads
        #[arg(long, default_value = "3")]
        concurrency: usize,
    },

    /// Check which expected assets are present in the model cache
    Verify {
        /// Built-in preset to verify against
        #[arg(long, default_value = "wan22-14b", conflicts_with = "manifest")]
        preset: String,

        /// JSON manifest describing a custom service
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Model cache root (default: <workspace>/ComfyUI/models)
        #[arg(long)]
        models_dir: Option<PathBuf>,
    },

    /// List built-in service presets
    Presets,
}

fn resolve_preset(name: &str, manifest: Option<&PathBuf>) -> Result<ServicePreset> {
    match manifest {
        Some(path) => ServicePreset::from_manifest(path)
            .with_context(|| format!("loading manifest {}", path.display())),
        None => ServicePreset::find(name).context("resolving preset"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    launch_core::init_tracing(cli.json, level);

    let config = OrchestratorConfig::from_env();

    let exit_code = match cli.command {
        Commands::Up {
            preset,
            manifest,
            skip_fetch,
            readiness_probe,
            concurrency,
        } => {
            let preset = resolve_preset(&preset, manifest.as_ref())?;
            let opts = OrchestrateOptions {
                skip_fetch,
                readiness_probe,
                fetch: FetchConfig {
                    max_concurrency: concurrency.max(1),
                    ..FetchConfig::default()
                },
            };
            orchestrate(&config, &preset, &opts)
                .await
                .context("orchestration failed")?
        }

        Commands::Fetch {
            preset,
            manifest,
            concurrency,
        } => {
            let preset = resolve_preset(&preset, manifest.as_ref())?;
            let fetch_config = FetchConfig {
                max_concurrency: concurrency.max(1),
                ..FetchConfig::default()
            };
            let tasks = preset.tasks(&config.models_dir());
            info!(preset = %preset.name, assets = tasks.len(), "fetching model assets");
            let report = fetch_all(tasks, &fetch_config).await;
            // Partial failure is non-fatal by contract; the summary above
            // already named the failed assets.
            if !report.is_clean() {
                warn!(
                    failed = report.failed(),
                    "cache is incomplete; the engine will report missing assets at load time"
                );
            }
            0
        }

        Commands::Verify {
            preset,
            manifest,
            models_dir,
        } => {
            let preset = resolve_preset(&preset, manifest.as_ref())?;
            let models_dir = models_dir.unwrap_or_else(|| config.models_dir());
            let expected = preset.expected_paths(&models_dir);
            let report = verify_cache(&models_dir, &expected);

            println!(
                "{}: {}/{} assets present, cache size {:.2} GiB",
                preset.name,
                report.found(),
                report.expected(),
                report.cache_gib()
            );
            for file in &report.files {
                if file.present {
                    println!("  ok      {} ({:.2} MiB)", file.path.display(), file.size_mib());
                } else {
                    println!("  missing {}", file.path.display());
                }
            }
            if report.is_ok() {
                0
            } else {
                1
            }
        }

        Commands::Presets => {
            for preset in ServicePreset::builtin() {
                println!("{} - {}", preset.name, preset.description);
                for asset in &preset.assets {
                    println!("    {}/{}", asset.category.subdir(), asset.file_name);
                }
            }
            0
        }
    };

    std::process::exit(exit_code);
}
