//! End-to-end supervisor tests against real child processes.

use std::time::Duration;

use launch_core::{
    pid_alive, ProcessRole, ServiceCommand, ShutdownKind, ShutdownTrigger, Supervisor,
    SupervisorState,
};

fn sh(role: ProcessRole, script: &str) -> ServiceCommand {
    ServiceCommand::new(role, "sh").arg("-c").arg(script)
}

#[tokio::test]
async fn primary_death_cascades_to_the_whole_unit() {
    let mut sup = Supervisor::new(Duration::from_secs(2));

    // Long-lived primary, short-lived primary, long-lived auxiliary.
    let commands = vec![
        sh(ProcessRole::InferenceEngine, "sleep 30"),
        sh(ProcessRole::ApiWrapper, "sleep 0.2"),
        sh(ProcessRole::ReverseProxy, "sleep 30"),
    ];
    sup.launch_all(&commands).unwrap();
    sup.mark_running();

    let trigger = sup.await_trigger().await;
    match trigger {
        ShutdownTrigger::PrimaryExited(ev) => {
            assert_eq!(ev.role, ProcessRole::ApiWrapper);
            assert!(ev.primary);
        }
        other => panic!("expected primary exit, got {other}"),
    }

    let kind = sup.shutdown().await;
    assert_eq!(kind, ShutdownKind::Clean);

    // Both survivors were torn down with the unit.
    for proc in sup.processes() {
        assert!(!proc.alive(), "{} still alive after shutdown", proc.role);
    }
}

#[tokio::test]
async fn auxiliary_death_does_not_resolve_the_wait() {
    let mut sup = Supervisor::new(Duration::from_secs(2));

    let commands = vec![
        sh(ProcessRole::InferenceEngine, "sleep 30"),
        sh(ProcessRole::ReverseProxy, "sleep 0.1"),
    ];
    sup.launch_all(&commands).unwrap();
    sup.mark_running();

    // The auxiliary exits almost immediately; the wait must keep blocking
    // on the healthy primary.
    let wait = tokio::time::timeout(Duration::from_millis(800), sup.await_trigger()).await;
    assert!(wait.is_err(), "auxiliary exit must not trigger shutdown");

    sup.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_idempotent_across_repeat_calls() {
    let mut sup = Supervisor::new(Duration::from_secs(2));
    sup.launch_all(&[sh(ProcessRole::InferenceEngine, "sleep 30")])
        .unwrap();

    let first = sup.shutdown().await;
    let second = sup.shutdown().await;
    assert_eq!(first, second);
    assert_eq!(sup.state(), SupervisorState::ShuttingDown);
    assert!(sup.processes().iter().all(|p| !p.alive()));
}

#[tokio::test]
async fn sigterm_ignoring_child_is_forced_out_after_the_grace_window() {
    let mut sup = Supervisor::new(Duration::from_millis(300));

    // Child that shrugs off SIGTERM; only SIGKILL can take it down.
    sup.launch_all(&[sh(
        ProcessRole::InferenceEngine,
        "trap '' TERM; sleep 30",
    )])
    .unwrap();

    // Give the shell a moment to install its trap.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let kind = sup.shutdown().await;
    assert_eq!(kind, ShutdownKind::Forced);
    assert!(sup.processes().iter().all(|p| !p.alive()));
}

#[tokio::test]
async fn well_behaved_children_shut_down_cleanly() {
    let mut sup = Supervisor::new(Duration::from_secs(2));
    sup.launch_all(&[
        sh(ProcessRole::InferenceEngine, "sleep 30"),
        sh(ProcessRole::ApiWrapper, "sleep 30"),
        sh(ProcessRole::ReverseProxy, "sleep 30"),
    ])
    .unwrap();

    let pids: Vec<_> = sup.processes().iter().map(|p| p.pid).collect();
    assert!(pids.iter().all(|&pid| pid_alive(pid)));

    let kind = sup.shutdown().await;
    assert_eq!(kind, ShutdownKind::Clean);
    assert!(pids.iter().all(|&pid| !pid_alive(pid)));
}
