use std::net::SocketAddr;
use std::process::Command;
use std::sync::{Arc, Mutex};

use assert_cmd::prelude::*;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use predicates::prelude::*;
use serde_json::json;

/// Runs keyed by id with their current status; `live-*` runs stream events.
#[derive(Default)]
struct Mock {
    runs: Mutex<Vec<(String, String)>>,
    subscriptions: Mutex<u32>,
}

impl Mock {
    fn status(&self, run_id: &str) -> Option<String> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == run_id)
            .map(|(_, status)| status.clone())
    }

    fn set_status(&self, run_id: &str, status: &str) {
        let mut runs = self.runs.lock().unwrap();
        if let Some(entry) = runs.iter_mut().find(|(id, _)| id == run_id) {
            entry.1 = status.to_string();
        }
    }
}

async fn get_run(State(mock): State<Arc<Mock>>, Path(run_id): Path<String>) -> Response {
    if run_id == "flaky" {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": "control plane restarting" })),
        )
            .into_response();
    }
    match mock.status(&run_id) {
        Some(status) => {
            let mut body = json!({ "id": run_id, "status": status, "compute_time_seconds": 7.5 });
            if status == "failed" {
                body["error_message"] = json!("baseline tests failed");
            }
            Json(body).into_response()
        }
        None => (StatusCode::NOT_FOUND, Json(json!({ "detail": "run not found" }))).into_response(),
    }
}

async fn cancel_run(State(mock): State<Arc<Mock>>, Path(run_id): Path<String>) -> StatusCode {
    if mock.status(&run_id).is_none() {
        return StatusCode::NOT_FOUND;
    }
    mock.set_status(&run_id, "cancelled");
    StatusCode::ACCEPTED
}

async fn run_events(State(mock): State<Arc<Mock>>, Path(run_id): Path<String>) -> Response {
    *mock.subscriptions.lock().unwrap() += 1;
    mock.set_status(&run_id, "completed");
    let frame = |id: &str, kind: &str, phase: &str, data: serde_json::Value| {
        let envelope = json!({ "id": id, "type": kind, "phase": phase, "data": data });
        format!("event: run_event\nid: {id}\ndata: {envelope}\n\n")
    };
    let body = [
        frame("1", "clone.started", "clone", json!({})),
        frame("2", "discovery.files.selected", "discovery", json!({ "file_count": 4 })),
        frame("3", "discovery.file.analysed", "discovery", json!({ "file": "src/app.py", "opportunities_found": 2 })),
        "event: done\ndata: {}\n\n".to_string(),
    ]
    .concat();
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

fn spawn_control_plane(runs: &[(&str, &str)]) -> (SocketAddr, Arc<Mock>) {
    let mock = Arc::new(Mock {
        runs: Mutex::new(
            runs.iter()
                .map(|(id, status)| (id.to_string(), status.to_string()))
                .collect(),
        ),
        ..Mock::default()
    });
    let app = axum::Router::new()
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/cancel", post(cancel_run))
        .route("/runs/{run_id}/events", get(run_events))
        .with_state(mock.clone());

    let (addr_tx, addr_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
                .await
                .expect("bind listener");
            addr_tx
                .send(listener.local_addr().expect("local addr"))
                .expect("send addr");
            axum::serve(listener, app).await.expect("serve");
        });
    });
    (addr_rx.recv().expect("server addr"), mock)
}

fn runwatch(addr: SocketAddr) -> assert_cmd::Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("runwatch"));
    cmd.env_remove("RUNWATCH_TOKEN")
        .env_remove("RUNWATCH_TOKEN_FILE")
        .env_remove("RUST_LOG")
        .env("RUNWATCH_BASE_URL", format!("http://{addr}"))
        .env("RUNWATCH_RECONNECT_DELAY_MS", "50")
        .env("RUNWATCH_POLL_INTERVAL_MS", "100");
    assert_cmd::Command::from_std(cmd)
}

#[test]
fn help_lists_commands_and_flags() {
    Command::new(assert_cmd::cargo::cargo_bin!("runwatch"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("cancel"))
        .stdout(predicate::str::contains("--token-file"));
}

#[test]
fn status_prints_run_record_envelope() {
    let (addr, _mock) = spawn_control_plane(&[("run-7", "running")]);
    let assert = runwatch(addr)
        .args(["status", "run-7", "--json"])
        .assert()
        .success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let json: serde_json::Value = serde_json::from_str(output.trim()).expect("json");
    assert_eq!(json["data"]["id"], "run-7");
    assert_eq!(json["data"]["status"], "running");
}

#[test]
fn status_of_unknown_run_fails_with_detail() {
    let (addr, _mock) = spawn_control_plane(&[]);
    runwatch(addr)
        .args(["status", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("run not found"));
}

#[test]
fn status_flags_transient_failures() {
    let (addr, _mock) = spawn_control_plane(&[]);
    runwatch(addr)
        .args(["status", "flaky"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("retrying may succeed"))
        .stderr(predicate::str::contains("control plane restarting"));
}

#[test]
fn cancel_requests_cancellation() {
    let (addr, mock) = spawn_control_plane(&[("run-3", "running")]);
    runwatch(addr)
        .args(["cancel", "run-3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cancellation requested for run run-3"));
    assert_eq!(mock.status("run-3").as_deref(), Some("cancelled"));
}

#[test]
fn watch_follows_live_run_until_done() {
    let (addr, mock) = spawn_control_plane(&[("live-1", "running")]);
    runwatch(addr)
        .args(["watch", "live-1"])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .success()
        .stdout(predicate::str::contains("Analysed src/app.py (2 opportunities)"))
        .stdout(predicate::str::contains("run live-1: completed"));
    assert_eq!(*mock.subscriptions.lock().unwrap(), 1);
}

#[test]
fn watch_emits_ndjson_in_json_mode() {
    let (addr, _mock) = spawn_control_plane(&[("live-2", "queued")]);
    let assert = runwatch(addr)
        .args(["watch", "live-2", "--json"])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let lines: Vec<serde_json::Value> = output
        .lines()
        .map(|line| serde_json::from_str(line).expect("ndjson line"))
        .collect();
    assert!(lines.len() >= 2);
    assert!(lines.iter().all(|line| line.get("data").is_some()));
    let last = lines.last().unwrap();
    assert_eq!(last["data"]["run"]["status"], "completed");
    assert_eq!(last["data"]["events"], 3);
}

#[test]
fn watch_on_finished_run_opens_no_stream() {
    let (addr, mock) = spawn_control_plane(&[("old-1", "completed")]);
    runwatch(addr)
        .args(["watch", "old-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("run old-1: completed"))
        .stderr(predicate::str::contains("no live events"));
    assert_eq!(*mock.subscriptions.lock().unwrap(), 0);
}

#[test]
fn watch_exits_non_zero_for_failed_run() {
    let (addr, _mock) = spawn_control_plane(&[("bad-1", "failed")]);
    runwatch(addr)
        .args(["watch", "bad-1", "--quiet"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("baseline tests failed"));
}
