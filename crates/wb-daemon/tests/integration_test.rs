//! End-to-end tests against a daemon bound to an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wb_core::config::Config;
use wb_daemon::daemon::Daemon;

struct TestServer {
    base: String,
    daemon: Arc<Daemon>,
    run: tokio::task::JoinHandle<anyhow::Result<()>>,
    _dir: tempfile::TempDir,
}

async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.workspace.root = dir.path().join("projects").display().to_string();
    config.exec.kill_wait_secs = 2;

    let daemon = Arc::new(Daemon::new(config).await.unwrap());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let runner = daemon.clone();
    let run = tokio::spawn(async move { runner.run_with_listener(listener).await });

    TestServer {
        base,
        daemon,
        run,
        _dir: dir,
    }
}

async fn create_project(client: &reqwest::Client, base: &str, name: &str) {
    let resp = client
        .post(format!("{base}/api/projects"))
        .json(&json!({ "name": name }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
}

async fn run(client: &reqwest::Client, base: &str, project: &str, command: &str) -> String {
    let resp = client
        .post(format!("{base}/api/projects/{project}/run"))
        .json(&json!({ "command": command }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

async fn list(client: &reqwest::Client, base: &str) -> Vec<Value> {
    client
        .get(format!("{base}/api/executions"))
        .send()
        .await
        .unwrap()
        .json::<Vec<Value>>()
        .await
        .unwrap()
}

#[tokio::test]
async fn status_endpoint_responds() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/api/status", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["running_executions"], 0);

    server.daemon.shutdown();
    server.run.await.unwrap().unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn command_runs_to_completion_and_leaves_list() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    create_project(&client, &server.base, "demo").await;

    let id = run(&client, &server.base, "demo", "sleep 1 && echo done").await;

    let live = list(&client, &server.base).await;
    assert!(live
        .iter()
        .any(|e| e["id"] == id.as_str() && e["status"] == "running"));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let live = list(&client, &server.base).await;
    assert!(live.iter().all(|e| e["id"] != id.as_str()));

    let snap: Value = client
        .get(format!("{}/api/executions/{id}", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snap["status"], "completed");
    assert_eq!(snap["stdout"], "done\n");

    server.daemon.shutdown();
    server.run.await.unwrap().unwrap();
}

#[tokio::test]
async fn stopping_unknown_execution_is_ok() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let id = uuid_like();
    let resp = client
        .post(format!("{}/api/executions/{id}/stop", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "ok": true, "stopped": false }));

    server.daemon.shutdown();
    server.run.await.unwrap().unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn shutdown_kills_running_commands() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    create_project(&client, &server.base, "demo").await;

    for _ in 0..3 {
        run(&client, &server.base, "demo", "sleep 30").await;
    }
    let pids: Vec<i32> = list(&client, &server.base)
        .await
        .iter()
        .map(|e| e["pid"].as_i64().unwrap() as i32)
        .collect();
    assert_eq!(pids.len(), 3);

    server.daemon.shutdown();
    tokio::time::timeout(Duration::from_secs(15), server.run)
        .await
        .expect("daemon stops")
        .unwrap()
        .unwrap();

    assert!(server.daemon.supervisor().registry().is_empty());
    for pid in pids {
        assert_ne!(unsafe { libc::kill(pid, 0) }, 0, "pid {pid} survived shutdown");
    }
}

/// A syntactically valid id that was never issued.
fn uuid_like() -> String {
    "6f1c2d3e-4b5a-4c7d-8e9f-0a1b2c3d4e5f".to_string()
}
