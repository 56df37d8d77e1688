//! Signal delivery before the Running phase.
//!
//! Lives in its own test binary: it raises a real SIGTERM against the
//! whole process, which any concurrently running test would also observe.

use std::time::Duration;

use launch_core::{ShutdownKind, ShutdownTrigger, SingletonGuard, Supervisor};

#[tokio::test]
async fn sigterm_before_running_fires_the_latch_and_releases_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("unit.lock");
    let guard = SingletonGuard::acquire(&lock_path).unwrap().unwrap();

    let mut sup = Supervisor::new(Duration::from_millis(200));
    sup.install_signal_handlers().unwrap();
    sup.note_lock_acquired();
    sup.begin_fetch();

    // The signal lands mid-fetch, long before any await_trigger call.
    unsafe {
        libc::kill(std::process::id() as i32, libc::SIGTERM);
    }

    let latch = sup.shutdown_token();
    tokio::time::timeout(Duration::from_secs(2), latch.cancelled())
        .await
        .expect("signal must fire the shutdown latch");

    let trigger = sup.await_trigger().await;
    assert!(matches!(trigger, ShutdownTrigger::Signal("SIGTERM")));

    assert_eq!(sup.shutdown().await, ShutdownKind::Clean);
    drop(guard);
    assert!(
        !lock_path.exists(),
        "lock must be released on the signal path"
    );
}
