#![cfg(unix)]

mod common;

use std::time::Duration;

use cipherdesk::error::CipherdeskError;
use cipherdesk::supervisor::launch::WorkerLaunch;
use cipherdesk::supervisor::{WorkerState, WorkerSupervisor};
use common::{wait_for_file, write_script};
use tempfile::TempDir;

fn recording_worker(tmp: &TempDir) -> WorkerSupervisor {
    let args_file = tmp.path().join("args");
    let script = write_script(
        tmp.path(),
        "worker",
        &format!("echo \"$@\" > '{}'\nexec sleep 30", args_file.display()),
    );
    WorkerSupervisor::new(WorkerLaunch::executable(script))
}

#[tokio::test]
async fn worker_receives_port_as_only_argument() {
    let tmp = TempDir::new().unwrap();
    let supervisor = recording_worker(&tmp);

    let info = supervisor.start(4242).await.unwrap();
    assert_eq!(info.args, vec!["4242".to_string()]);
    assert!(info.is_running());
    assert_eq!(wait_for_file(&tmp.path().join("args")).await, "4242");

    let (pid, _) = supervisor.current().await.unwrap();
    assert_eq!(pid, info.pid);
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn development_mode_passes_script_then_port() {
    let tmp = TempDir::new().unwrap();
    let args_file = tmp.path().join("args");
    let script = tmp.path().join("worker.sh");
    std::fs::write(
        &script,
        format!("echo \"$@\" > '{}'\nexec sleep 30\n", args_file.display()),
    )
    .unwrap();

    let supervisor = WorkerSupervisor::new(WorkerLaunch::Development {
        interpreter: "/bin/sh".into(),
        script: script.clone(),
    });
    let info = supervisor.start(5151).await.unwrap();
    assert_eq!(info.executable, std::path::PathBuf::from("/bin/sh"));
    assert_eq!(
        info.args,
        vec![script.display().to_string(), "5151".to_string()]
    );
    assert_eq!(wait_for_file(&args_file).await, "5151");
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn stop_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let supervisor = recording_worker(&tmp);

    // Nothing started yet.
    supervisor.stop().await.unwrap();

    supervisor.start(4242).await.unwrap();
    supervisor.stop().await.unwrap();
    supervisor.stop().await.unwrap();

    let status = supervisor.status().await.unwrap();
    assert_eq!(status.state, WorkerState::Exited);
    assert!(!supervisor.is_running().await);
}

#[tokio::test]
async fn second_start_is_refused_while_running() {
    let tmp = TempDir::new().unwrap();
    let supervisor = recording_worker(&tmp);

    let first = supervisor.start(4242).await.unwrap();
    let err = supervisor.start(4243).await.unwrap_err();
    assert!(matches!(err, CipherdeskError::Spawn { .. }));
    assert_eq!(supervisor.status().await.unwrap().pid, first.pid);

    // Once stopped, a new worker may be started.
    supervisor.stop().await.unwrap();
    let second = supervisor.start(4243).await.unwrap();
    assert_ne!(second.pid, first.pid);
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn missing_executable_is_reported_without_spawning() {
    let tmp = TempDir::new().unwrap();
    let supervisor =
        WorkerSupervisor::new(WorkerLaunch::executable(tmp.path().join("crypto_gui")));

    let err = supervisor.start(4242).await.unwrap_err();
    assert!(matches!(err, CipherdeskError::WorkerNotFound { .. }));
    assert!(supervisor.status().await.is_none());
}

#[tokio::test]
async fn exited_worker_is_observed_with_its_code() {
    let tmp = TempDir::new().unwrap();
    let script = write_script(tmp.path(), "worker", "exit 3");
    let supervisor = WorkerSupervisor::new(WorkerLaunch::executable(script));

    supervisor.start(4242).await.unwrap();
    let mut status = supervisor.status().await.unwrap();
    for _ in 0..200 {
        if status.state == WorkerState::Exited {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = supervisor.status().await.unwrap();
    }
    assert_eq!(status.state, WorkerState::Exited);
    assert_eq!(status.exit_code, Some(3));
    assert!(supervisor.current().await.is_none());

    // Stopping an exited worker is a no-op.
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn exit_is_published_to_watchers() {
    let tmp = TempDir::new().unwrap();
    let script = write_script(tmp.path(), "worker", "sleep 0.2\nexit 4");
    let supervisor = WorkerSupervisor::new(WorkerLaunch::executable(script));
    let mut watch = supervisor.watch();
    assert!(watch.borrow().is_none());

    let info = supervisor.start(4242).await.unwrap();
    let exited = tokio::time::timeout(
        Duration::from_secs(5),
        watch.wait_for(|w| w.as_ref().is_some_and(|w| !w.is_running())),
    )
    .await
    .expect("exit should be published")
    .unwrap()
    .clone()
    .unwrap();
    assert_eq!(exited.pid, info.pid);
    assert_eq!(exited.exit_code, Some(4));
}

#[tokio::test]
async fn worker_runs_in_its_own_process_group() {
    let tmp = TempDir::new().unwrap();
    let supervisor = recording_worker(&tmp);

    let info = supervisor.start(4242).await.unwrap();
    let pid = info.pid as libc::pid_t;
    let worker_group = unsafe { libc::getpgid(pid) };
    let our_group = unsafe { libc::getpgid(0) };
    assert_eq!(worker_group, pid);
    assert_ne!(worker_group, our_group);
    supervisor.stop().await.unwrap();
}
