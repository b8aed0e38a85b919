// script-api-server/tests/http_surface.rs
// ============================================================================
// Test: End-to-end HTTP surface scenarios.
// Spins up a real server on an ephemeral port and drives it with a real HTTP
// client, mirroring the worked scenarios for the script execution control
// plane.
// ============================================================================

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use script_api_config::Config;
use script_api_server::AppState;
use serde_json::Value;
use serde_json::json;

#[allow(unsafe_code, reason = "env::set_var/remove_var are unsafe to call from a multi-threaded test binary; each test uses its own fixture dirs so the shared env vars only affect which auth mode this server instance boots in")]
async fn spawn_server(scripts_root: &std::path::Path, state_dir: &std::path::Path, jwt_auth: bool, admin_secret: Option<&str>) -> String {
    // SAFETY: see the attribute above; no other test touches these names
    // between the env write and the `Config::load` call immediately after.
    unsafe {
        if jwt_auth {
            std::env::set_var("SCRIPT_JWT_AUTH", "true");
            std::env::set_var("SCRIPT_JWT_SECRET", "test-signing-secret");
        } else {
            std::env::remove_var("SCRIPT_JWT_AUTH");
            std::env::remove_var("SCRIPT_JWT_SECRET");
        }
        match admin_secret {
            Some(secret) => std::env::set_var("SCRIPT_JWT_ADMIN_SECRET", secret),
            None => std::env::remove_var("SCRIPT_JWT_ADMIN_SECRET"),
        }
    }

    let config = Config::load(Some(scripts_root.to_str().unwrap()), Some(state_dir.to_str().unwrap()), Some("127.0.0.1"), Some(0)).unwrap();
    let state = AppState::bootstrap(config).await.unwrap();
    let router = script_api_server::build_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{addr}/v1")
}

fn write_fixture_scripts(root: &std::path::Path) {
    fs::write(root.join("hello.py"), "print('hello')\n").unwrap();
    fs::write(root.join("fail.py"), "import sys\nsys.exit(2)\n").unwrap();
    fs::write(root.join("long_task.py"), "import time\nwhile True:\n    print('tick')\n    time.sleep(0.2)\n").unwrap();
    fs::write(root.join("args_env.py"), "import sys, os\nprint(sys.argv[1:])\nprint(os.environ.get('GREETING'))\n").unwrap();
    fs::write(root.join("_private.py"), "print('should not be listed')\n").unwrap();
}

#[tokio::test]
async fn scripts_listing_is_sorted_and_excludes_private() {
    let scripts_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    write_fixture_scripts(scripts_dir.path());

    let base = spawn_server(scripts_dir.path(), state_dir.path(), false, None).await;
    let response = reqwest::get(format!("{base}/scripts")).await.unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["count"], 4);
    let paths: Vec<String> = body["scripts"].as_array().unwrap().iter().map(|s| s["path"].as_str().unwrap().to_string()).collect();
    assert_eq!(paths, vec!["args_env.py", "fail.py", "hello.py", "long_task.py"]);
}

#[tokio::test]
async fn hello_script_succeeds_and_logs_its_output() {
    let scripts_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    write_fixture_scripts(scripts_dir.path());

    let base = spawn_server(scripts_dir.path(), state_dir.path(), false, None).await;
    let client = reqwest::Client::new();

    let started: Value = client.post(format!("{base}/runs")).json(&json!({"script": "hello.py"})).send().await.unwrap().json().await.unwrap();
    let run_id = started["run_id"].as_str().unwrap().to_string();

    let mut record = started;
    for _ in 0..50 {
        if record["status"] == "succeeded" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        record = client.get(format!("{base}/runs/{run_id}")).send().await.unwrap().json().await.unwrap();
    }
    assert_eq!(record["status"], "succeeded");
    assert_eq!(record["return_code"], 0);

    let logs: HashMap<String, String> = client.get(format!("{base}/runs/{run_id}/logs?stream=stdout")).send().await.unwrap().json().await.unwrap();
    assert!(logs["stdout"].contains("hello"));
}

#[tokio::test]
async fn fail_script_reports_its_exit_code() {
    let scripts_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    write_fixture_scripts(scripts_dir.path());

    let base = spawn_server(scripts_dir.path(), state_dir.path(), false, None).await;
    let client = reqwest::Client::new();

    let started: Value = client.post(format!("{base}/runs")).json(&json!({"script": "fail.py"})).send().await.unwrap().json().await.unwrap();
    let run_id = started["run_id"].as_str().unwrap().to_string();

    let mut record = started;
    for _ in 0..50 {
        if record["status"] == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        record = client.get(format!("{base}/runs/{run_id}")).send().await.unwrap().json().await.unwrap();
    }
    assert_eq!(record["status"], "failed");
    assert_eq!(record["return_code"], 2);
}

#[tokio::test]
async fn long_task_can_be_stopped_within_the_grace_window() {
    let scripts_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    write_fixture_scripts(scripts_dir.path());

    let base = spawn_server(scripts_dir.path(), state_dir.path(), false, None).await;
    let client = reqwest::Client::new();

    let started: Value = client.post(format!("{base}/runs")).json(&json!({"script": "long_task.py"})).send().await.unwrap().json().await.unwrap();
    let run_id = started["run_id"].as_str().unwrap().to_string();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stopped: Value = client.post(format!("{base}/runs/{run_id}/stop")).send().await.unwrap().json().await.unwrap();
    assert_eq!(stopped["status"], "stopped");
}

#[tokio::test]
async fn duplicate_active_run_is_rejected_with_409() {
    let scripts_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    write_fixture_scripts(scripts_dir.path());

    let base = spawn_server(scripts_dir.path(), state_dir.path(), false, None).await;
    let client = reqwest::Client::new();

    let first = client.post(format!("{base}/runs")).json(&json!({"script": "long_task.py"})).send().await.unwrap();
    assert_eq!(first.status(), 200);

    let second = client.post(format!("{base}/runs")).json(&json!({"script": "long_task.py"})).send().await.unwrap();
    assert_eq!(second.status(), 409);
}

#[tokio::test]
async fn auth_enabled_requires_a_token_then_admits_the_admin_exchange() {
    let scripts_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    write_fixture_scripts(scripts_dir.path());

    let base = spawn_server(scripts_dir.path(), state_dir.path(), true, Some("admin-secret")).await;
    let client = reqwest::Client::new();

    let unauthenticated = client.get(format!("{base}/scripts")).send().await.unwrap();
    assert_eq!(unauthenticated.status(), 401);

    let token_response: Value =
        client.post(format!("{base}/auth/admin/token")).json(&json!({"secret": "admin-secret"})).send().await.unwrap().json().await.unwrap();
    let access_token = token_response["access_token"].as_str().unwrap();

    let authenticated = client.get(format!("{base}/scripts")).bearer_auth(access_token).send().await.unwrap();
    assert_eq!(authenticated.status(), 200);
}
