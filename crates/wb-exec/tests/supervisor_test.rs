#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use uuid::Uuid;
use wb_exec::supervisor::SupervisorOptions;
use wb_exec::{
    CommandLauncher, ExecutionSnapshot, ExecutionStatus, ExecutionSupervisor, LaunchError,
    OutputStream, StopOutcome,
};

fn supervisor_with(options: SupervisorOptions) -> ExecutionSupervisor {
    ExecutionSupervisor::new(CommandLauncher::new("/bin/sh", "-c", 64 * 1024), options)
}

fn supervisor() -> ExecutionSupervisor {
    supervisor_with(SupervisorOptions {
        timeout: Duration::from_secs(30),
        max_concurrent: 0,
        kill_wait: Duration::from_secs(5),
        result_ttl: Duration::from_secs(60),
        max_retained_results: 64,
    })
}

/// Zombies awaiting their (possibly new) parent count as gone.
fn process_exists(pid: u32) -> bool {
    if unsafe { libc::kill(pid as i32, 0) } != 0 {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => !stat
            .rsplit(')')
            .next()
            .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        Err(_) => true,
    }
}

fn pid_of(sup: &ExecutionSupervisor, id: &Uuid) -> u32 {
    sup.registry()
        .lookup(id)
        .and_then(|e| e.handle().pid())
        .expect("live execution has a pid")
}

/// Poll until the execution has been torn down and its record stored.
async fn wait_finished(sup: &ExecutionSupervisor, id: &Uuid, limit: Duration) -> ExecutionSnapshot {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if let Some(record) = sup.results().get(id) {
            assert!(!sup.registry().contains(id));
            return record.snapshot();
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "execution {id} still running after {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn start(sup: &ExecutionSupervisor, dir: &Path, cmd: &str) -> Uuid {
    sup.start(dir.to_path_buf(), cmd).await.expect("start")
}

#[tokio::test]
async fn sleep_then_echo_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor();
    let reporter = sup.reporter();

    let id = start(&sup, dir.path(), "sleep 1 && echo done").await;

    let listed = reporter.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert_eq!(listed[0].status, ExecutionStatus::Running);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(reporter.list().iter().all(|s| s.id != id));

    let snap = reporter.snapshot(&id).expect("result retained");
    assert_eq!(snap.status, ExecutionStatus::Completed);
    assert_eq!(snap.exit_code, Some(0));
    assert_eq!(snap.stdout, "done\n");
}

#[tokio::test]
async fn non_zero_exit_is_failed() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor();
    let id = start(&sup, dir.path(), "echo bad >&2; exit 7").await;

    let snap = wait_finished(&sup, &id, Duration::from_secs(5)).await;
    assert_eq!(snap.status, ExecutionStatus::Failed);
    assert_eq!(snap.exit_code, Some(7));
    assert_eq!(snap.stderr, "bad\n");
}

#[tokio::test]
async fn stop_twice_succeeds_both_times() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor();
    let id = start(&sup, dir.path(), "sleep 30").await;
    let pid = pid_of(&sup, &id);

    let first = sup.stop(&id).await;
    assert_eq!(first, StopOutcome::Stopped { status: ExecutionStatus::Stopped });
    assert_eq!(sup.stop(&id).await, StopOutcome::NotFound);

    assert!(sup.reporter().list().is_empty());
    assert!(!process_exists(pid));
    assert_eq!(
        sup.reporter().snapshot(&id).unwrap().status,
        ExecutionStatus::Stopped
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopped_process_is_reaped_before_its_entry_leaves() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor();
    let id = start(&sup, dir.path(), "sleep 30").await;
    let pid = pid_of(&sup, &id);

    let stopper = sup.clone();
    let stop = tokio::spawn(async move { stopper.stop(&id).await });
    while sup.registry().contains(&id) {
        tokio::task::yield_now().await;
    }
    assert!(!process_exists(pid));
    assert!(stop.await.unwrap().stopped());
}

#[tokio::test]
async fn stop_unknown_id_has_no_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor();
    let running = start(&sup, dir.path(), "sleep 30").await;

    assert_eq!(sup.stop(&Uuid::new_v4()).await, StopOutcome::NotFound);
    assert_eq!(sup.registry().len(), 1);
    assert!(sup.registry().contains(&running));

    sup.stop(&running).await;
}

#[tokio::test]
async fn timeout_kills_the_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor_with(SupervisorOptions {
        timeout: Duration::from_millis(300),
        ..SupervisorOptions::default()
    });
    // The backgrounded sleep is a grandchild in the same process group.
    let id = start(&sup, dir.path(), "sleep 30 & echo $!; wait").await;
    let pid = pid_of(&sup, &id);

    let snap = wait_finished(&sup, &id, Duration::from_secs(5)).await;
    assert_eq!(snap.status, ExecutionStatus::TimedOut);
    assert!(!process_exists(pid));

    let grandchild: u32 = snap.stdout.trim().parse().expect("grandchild pid");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!process_exists(grandchild));
}

#[tokio::test]
async fn natural_exit_cancels_the_timer() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor_with(SupervisorOptions {
        timeout: Duration::from_millis(400),
        ..SupervisorOptions::default()
    });
    let id = start(&sup, dir.path(), "true").await;

    wait_finished(&sup, &id, Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(
        sup.reporter().snapshot(&id).unwrap().status,
        ExecutionStatus::Completed
    );
}

#[tokio::test]
async fn shutdown_leaves_no_children() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor();

    let mut pids = Vec::new();
    for _ in 0..5 {
        let id = start(&sup, dir.path(), "sleep 30").await;
        pids.push(pid_of(&sup, &id));
    }

    assert_eq!(sup.shutdown().await, 5);
    assert!(sup.registry().is_empty());
    for pid in pids {
        assert!(!process_exists(pid), "pid {pid} survived shutdown");
    }

    let err = sup.start(dir.path().to_path_buf(), "true").await.unwrap_err();
    assert!(matches!(err, LaunchError::ShuttingDown));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_racing_natural_exit_leaves_nothing_registered() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor();

    for i in 0..20u64 {
        let id = start(&sup, dir.path(), "true").await;
        // Stagger the stop so some iterations land before, some during and
        // some after the exit watcher's teardown.
        let stop = async {
            tokio::time::sleep(Duration::from_micros(i * 250)).await;
            sup.stop(&id).await
        };
        let (outcome, snap) = tokio::join!(stop, wait_finished(&sup, &id, Duration::from_secs(2)));

        match outcome {
            StopOutcome::Stopped { status } => assert_eq!(status, snap.status),
            StopOutcome::NotFound => assert_eq!(snap.status, ExecutionStatus::Completed),
        }
        assert!(matches!(snap.status, ExecutionStatus::Completed | ExecutionStatus::Stopped));
        assert!(!sup.registry().contains(&id));
    }
    assert!(sup.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_respect_the_limit() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor_with(SupervisorOptions {
        max_concurrent: 1,
        ..SupervisorOptions::default()
    });

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let sup = sup.clone();
            let dir = dir.path().to_path_buf();
            tokio::spawn(async move { sup.start(dir, "sleep 5").await })
        })
        .collect();

    let mut started = 0;
    let mut rejected = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => started += 1,
            Err(LaunchError::AtCapacity { max: 1 }) => rejected += 1,
            Err(e) => panic!("unexpected start error: {e}"),
        }
    }
    assert_eq!((started, rejected), (1, 7));
    assert_eq!(sup.registry().len(), 1);

    assert_eq!(sup.shutdown().await, 1);
}

#[tokio::test]
async fn failed_launch_releases_its_slot() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor_with(SupervisorOptions {
        max_concurrent: 1,
        ..SupervisorOptions::default()
    });

    let err = sup.start(dir.path().join("missing"), "true").await.unwrap_err();
    assert!(matches!(err, LaunchError::InvalidWorkingDir { .. }));

    let id = start(&sup, dir.path(), "true").await;
    wait_finished(&sup, &id, Duration::from_secs(2)).await;
}

#[tokio::test]
async fn natural_exit_takes_background_jobs_along() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor();
    let id = start(&sup, dir.path(), "sleep 30 & echo $!").await;

    let snap = wait_finished(&sup, &id, Duration::from_secs(5)).await;
    assert_eq!(snap.status, ExecutionStatus::Completed);

    let background: u32 = snap.stdout.trim().parse().expect("background pid");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!process_exists(background));
}

#[tokio::test]
async fn invalid_working_dir_registers_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor();

    let err = sup
        .start(dir.path().join("missing"), "echo hi")
        .await
        .unwrap_err();
    assert!(matches!(err, LaunchError::InvalidWorkingDir { .. }));
    assert!(sup.registry().is_empty());
    assert!(sup.reporter().list().is_empty());
}

#[tokio::test]
async fn capacity_limit_rejects_extra_starts() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor_with(SupervisorOptions {
        max_concurrent: 1,
        ..SupervisorOptions::default()
    });
    let id = start(&sup, dir.path(), "sleep 30").await;

    let err = sup.start(dir.path().to_path_buf(), "true").await.unwrap_err();
    assert!(matches!(err, LaunchError::AtCapacity { max: 1 }));

    sup.stop(&id).await;
    start(&sup, dir.path(), "true").await;
}

#[tokio::test]
async fn output_can_be_polled_incrementally() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor();
    let reporter = sup.reporter();
    let id = start(&sup, dir.path(), "echo one; sleep 0.5; echo two").await;

    tokio::time::sleep(Duration::from_millis(250)).await;
    let first = reporter.output_since(&id, OutputStream::Stdout, 0).unwrap();
    assert_eq!(first.data, "one\n");
    assert!(!first.finished);

    wait_finished(&sup, &id, Duration::from_secs(5)).await;
    let rest = reporter
        .output_since(&id, OutputStream::Stdout, first.next_offset)
        .unwrap();
    assert_eq!(rest.data, "two\n");
    assert!(rest.finished);
}

#[tokio::test]
async fn large_output_is_truncated_to_recent_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let sup = ExecutionSupervisor::new(
        CommandLauncher::new("/bin/sh", "-c", 1024),
        SupervisorOptions::default(),
    );
    let id = start(&sup, dir.path(), "i=0; while [ $i -lt 500 ]; do echo line-$i; i=$((i+1)); done").await;

    let snap = wait_finished(&sup, &id, Duration::from_secs(5)).await;
    assert!(snap.truncated);
    assert!(snap.stdout.len() <= 2048);
    assert!(snap.stdout.ends_with("line-499\n"));
}

#[tokio::test]
async fn retained_output_keeps_live_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor();
    let reporter = sup.reporter();
    let id = start(&sup, dir.path(), r"printf '\377abc'; sleep 0.5").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let live = loop {
        let chunk = reporter.output_since(&id, OutputStream::Stdout, 0).unwrap();
        if chunk.next_offset == 4 {
            break chunk;
        }
        assert!(tokio::time::Instant::now() < deadline, "output never arrived");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(live.data, "\u{fffd}abc");
    assert!(!live.finished);

    wait_finished(&sup, &id, Duration::from_secs(5)).await;
    let rest = reporter
        .output_since(&id, OutputStream::Stdout, live.next_offset)
        .unwrap();
    assert_eq!(rest.data, "");
    assert_eq!((rest.offset, rest.next_offset), (4, 4));
    assert!(rest.finished);

    let all = reporter.output_since(&id, OutputStream::Stdout, 0).unwrap();
    assert_eq!(all.data, "\u{fffd}abc");
    assert_eq!(all.next_offset, 4);
}
