//! Singleton lock guard.
//!
//! At most one supervisor runs per host per service. The lock is a file
//! holding the owner's PID, checked for liveness with `kill(pid, 0)`; it is
//! advisory rather than `flock`-based, so correctness leans on PID reuse
//! being rare within this domain's restart frequency. A second invocation
//! that finds a live owner exits without side effects; a stale lock (dead
//! PID or garbage contents) is taken over.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::process::pid_alive;

/// RAII guard for the singleton lock file. Removing the file is tied to
/// drop so every exit path of the owning scope releases the lock.
#[derive(Debug)]
pub struct SingletonGuard {
    path: PathBuf,
}

impl SingletonGuard {
    /// Try to acquire the lock.
    ///
    /// Returns `Ok(None)` when another live process holds it; that is the
    /// benign no-op case, not an error. Errors are real IO failures while
    /// reading or writing the lock file.
    pub fn acquire(path: &Path) -> Result<Option<SingletonGuard>> {
        if let Ok(contents) = std::fs::read_to_string(path) {
            match contents.trim().parse::<i32>() {
                Ok(pid) if pid > 0 && pid_alive(pid) => {
                    info!(
                        lock = %path.display(),
                        owner_pid = pid,
                        "another supervisor instance is running, exiting"
                    );
                    return Ok(None);
                }
                Ok(pid) => {
                    warn!(
                        lock = %path.display(),
                        stale_pid = pid,
                        "stale lock from a dead process, taking over"
                    );
                }
                Err(_) => {
                    warn!(lock = %path.display(), "unreadable lock contents, taking over");
                }
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format!("{}\n", std::process::id()))?;
        debug!(lock = %path.display(), pid = std::process::id(), "singleton lock acquired");

        Ok(Some(SingletonGuard {
            path: path.to_path_buf(),
        }))
    }

    /// Path of the lock file this guard owns.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SingletonGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to remove lock file");
        } else {
            debug!(lock = %self.path.display(), "singleton lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_writes_our_pid_and_drop_removes_the_file() {
        let dir = tempdir().unwrap();
        let lock = dir.path().join("comfy-launch.lock");

        let guard = SingletonGuard::acquire(&lock).unwrap().unwrap();
        let contents = std::fs::read_to_string(&lock).unwrap();
        assert_eq!(
            contents.trim().parse::<u32>().unwrap(),
            std::process::id()
        );

        drop(guard);
        assert!(!lock.exists());
    }

    #[test]
    fn lock_held_by_a_live_pid_is_a_benign_no_op() {
        let dir = tempdir().unwrap();
        let lock = dir.path().join("held.lock");
        // Our own PID is definitely alive.
        std::fs::write(&lock, format!("{}\n", std::process::id())).unwrap();

        let guard = SingletonGuard::acquire(&lock).unwrap();
        assert!(guard.is_none());
        // Contents untouched: no side effects on the benign path.
        let contents = std::fs::read_to_string(&lock).unwrap();
        assert_eq!(
            contents.trim().parse::<u32>().unwrap(),
            std::process::id()
        );
    }

    #[test]
    fn stale_lock_from_dead_pid_is_taken_over() {
        let dir = tempdir().unwrap();
        let lock = dir.path().join("stale.lock");
        // Far above any default pid_max, so no live process matches.
        std::fs::write(&lock, "999999999\n").unwrap();

        let guard = SingletonGuard::acquire(&lock).unwrap();
        assert!(guard.is_some());
        let contents = std::fs::read_to_string(&lock).unwrap();
        assert_eq!(
            contents.trim().parse::<u32>().unwrap(),
            std::process::id()
        );
    }

    #[test]
    fn garbage_lock_contents_are_taken_over() {
        let dir = tempdir().unwrap();
        let lock = dir.path().join("garbage.lock");
        std::fs::write(&lock, "not-a-pid\n").unwrap();

        let guard = SingletonGuard::acquire(&lock).unwrap();
        assert!(guard.is_some());
    }
}
