//! Model cache verification.
//!
//! Checks that the assets a service preset expects are present on disk and
//! reports their sizes plus the total cache footprint. Presence and size
//! only: there are no checksums anywhere in this pipeline, so a
//! complete-but-corrupt file passes verification. Known blind spot.

use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Presence and size of one expected asset.
#[derive(Debug, Clone)]
pub struct VerifiedFile {
    /// Expected path of the asset.
    pub path: PathBuf,
    /// Whether the file exists.
    pub present: bool,
    /// Size in bytes (0 when absent).
    pub size_bytes: u64,
}

impl VerifiedFile {
    /// Size in MiB for log lines.
    pub fn size_mib(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Result of verifying a cache directory against an expected asset list.
#[derive(Debug)]
pub struct VerifyReport {
    /// Per-file results, in the order the expectation list gave them.
    pub files: Vec<VerifiedFile>,
    /// Total size of everything under the cache directory, expected or not.
    pub cache_bytes: u64,
}

impl VerifyReport {
    /// Number of expected files found.
    pub fn found(&self) -> usize {
        self.files.iter().filter(|f| f.present).count()
    }

    /// Number of expected files.
    pub fn expected(&self) -> usize {
        self.files.len()
    }

    /// Every expected file is present.
    pub fn all_present(&self) -> bool {
        self.found() == self.expected()
    }

    /// The service can plausibly start: at least one expected asset exists.
    /// Missing files are warnings; the engine reports the authoritative
    /// error at load time.
    pub fn is_ok(&self) -> bool {
        self.found() > 0
    }

    /// Total cache footprint in GiB.
    pub fn cache_gib(&self) -> f64 {
        self.cache_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Verify that the expected assets exist under `cache_dir`.
///
/// `expected` entries may be absolute or relative to `cache_dir`.
pub fn verify_cache(cache_dir: &Path, expected: &[PathBuf]) -> VerifyReport {
    let mut files = Vec::with_capacity(expected.len());

    for entry in expected {
        let path = if entry.is_absolute() {
            entry.clone()
        } else {
            cache_dir.join(entry)
        };

        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {
                let file = VerifiedFile {
                    path,
                    present: true,
                    size_bytes: meta.len(),
                };
                info!(
                    asset = %file.path.display(),
                    size_mib = format!("{:.2}", file.size_mib()),
                    "asset present"
                );
                files.push(file);
            }
            _ => {
                warn!(asset = %path.display(), "asset missing");
                files.push(VerifiedFile {
                    path,
                    present: false,
                    size_bytes: 0,
                });
            }
        }
    }

    let cache_bytes = WalkDir::new(cache_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum();

    let report = VerifyReport { files, cache_bytes };
    info!(
        found = report.found(),
        expected = report.expected(),
        cache_gib = format!("{:.2}", report.cache_gib()),
        "cache verification finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reports_present_and_missing_files() {
        let dir = tempdir().unwrap();
        let models = dir.path().join("diffusion_models");
        std::fs::create_dir_all(&models).unwrap();
        std::fs::write(models.join("wan.safetensors"), vec![0u8; 2048]).unwrap();

        let expected = vec![
            PathBuf::from("diffusion_models/wan.safetensors"),
            PathBuf::from("vae/wan_vae.safetensors"),
        ];
        let report = verify_cache(dir.path(), &expected);

        assert_eq!(report.expected(), 2);
        assert_eq!(report.found(), 1);
        assert!(report.is_ok());
        assert!(!report.all_present());
        assert_eq!(report.files[0].size_bytes, 2048);
        assert!(!report.files[1].present);
    }

    #[test]
    fn counts_unexpected_files_into_the_cache_total() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("stray.bin"), vec![0u8; 512]).unwrap();

        let report = verify_cache(dir.path(), &[]);
        assert_eq!(report.expected(), 0);
        assert!(!report.is_ok());
        assert_eq!(report.cache_bytes, 512);
    }

    #[test]
    fn empty_cache_dir_is_not_ok() {
        let dir = tempdir().unwrap();
        let report = verify_cache(dir.path(), &[PathBuf::from("missing.bin")]);
        assert_eq!(report.found(), 0);
        assert!(!report.is_ok());
        assert_eq!(report.cache_bytes, 0);
    }
}
