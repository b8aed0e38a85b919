// script-api-core/tests/process_group.rs
// ============================================================================
// Test: Stop kills the whole process group, not just the immediate child.
// A run that spawns an unmanaged grandchild must have that grandchild
// reaped too once `stop` completes, since both live in the same session.
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use script_api_core::NoopRunAuditSink;
use script_api_core::RunManager;
use script_api_core::RunManagerConfig;
use script_api_core::SharedRunStore;
use script_api_core::process;
use script_api_core::store::InMemoryRunStore;
use tokio::time::sleep;

fn fixture_script() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos/spawn_child.py")
}

fn grandchild_pid_from_log(stdout_path: &str) -> Option<u32> {
    let contents = std::fs::read_to_string(stdout_path).ok()?;
    contents.lines().find_map(|line| line.strip_prefix("child pid: ")?.trim().parse().ok())
}

#[tokio::test]
async fn stop_kills_the_grandchild_along_with_the_parent() {
    let scripts_root = tempfile::tempdir().unwrap();
    let logs_dir = tempfile::tempdir().unwrap();

    let config = RunManagerConfig {
        scripts_root: scripts_root.path().to_path_buf(),
        logs_dir: logs_dir.path().to_path_buf(),
        interpreter: "python3".to_string(),
        terminate_timeout: Duration::from_millis(500),
    };
    let store = SharedRunStore::from_store(InMemoryRunStore::new());
    let manager = RunManager::new(config, store, Arc::new(NoopRunAuditSink)).await.unwrap();

    let record = RunManager::start(&manager, "spawn_child.py", &fixture_script(), vec![], None, None).await.unwrap();
    let parent_pid = record.pid.expect("spawn_child.py should have started");

    // Give the script time to print both pids before we act on them.
    let mut grandchild_pid = None;
    for _ in 0..50 {
        sleep(Duration::from_millis(100)).await;
        grandchild_pid = grandchild_pid_from_log(&record.stdout_path);
        if grandchild_pid.is_some() {
            break;
        }
    }
    let grandchild_pid = grandchild_pid.expect("spawn_child.py should have logged its grandchild's pid");

    assert!(process::is_alive(parent_pid), "parent should be running before stop");
    assert!(process::is_alive(grandchild_pid), "grandchild should be running before stop");

    let stopped = manager.stop(record.run_id).await.unwrap().expect("run should still be tracked");
    assert_eq!(stopped.status, script_api_core::RunStatus::Stopped);

    assert!(!process::is_alive(parent_pid), "parent should be gone after stop");
    assert!(!process::is_alive(grandchild_pid), "grandchild should be gone after stop, not just the parent");
}
