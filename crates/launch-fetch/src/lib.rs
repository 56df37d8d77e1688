//! Launch-Fetch: Model-Asset Fetcher for comfy-launch
//!
//! This crate resolves a declarative list of (source URL, destination path,
//! display name) download tasks into locally cached files, using a
//! prioritized chain of download strategies with independent retry and
//! fallback-on-exhaustion semantics. Batches run with bounded concurrency
//! and join-all semantics; individual failures are recorded as outcomes,
//! never raised across the batch boundary.
//!
//! ## Strategy chain
//!
//! 1. aria2c (16-way segmented), when installed
//! 2. axel, when installed
//! 3. built-in sequential HTTP client with byte-offset resume

pub mod error;
pub mod fetcher;
pub mod strategy;
pub mod task;
pub mod verify;

pub use error::{FetchError, Result};
pub use fetcher::{fetch_all, fetch_all_with, fetch_one, FetchConfig};
pub use strategy::{
    default_chain, Aria2cStrategy, AxelStrategy, DownloadStrategy, HttpResumeStrategy,
};
pub use task::{DownloadOutcome, DownloadTask, FetchReport, Strategy};
pub use verify::{verify_cache, VerifiedFile, VerifyReport};
