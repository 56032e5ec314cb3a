// Store tests: atomic persistence, byte-stable round trips, append-only
// execution history.

use super::*;
use qualscan_core::config::{DetectionOptions, SampleOptions};
use qualscan_core::task::{ExecutionStatus, TaskConfig, TaskOutput, TaskType};
use tempfile::TempDir;

// ============================================================================
// Fixtures
// ============================================================================

fn sample_task(id: &str) -> Task {
    let now = chrono::DateTime::parse_from_rfc3339("2024-05-01T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    Task {
        task_id: id.to_string(),
        name: format!("task-{}", id),
        description: "nightly sweep".to_string(),
        task_type: TaskType::BatchImage,
        cron: "0 2 * * *".to_string(),
        enabled: true,
        config: TaskConfig {
            input_path: "/data/cams".to_string(),
            pattern: "*.jpg".to_string(),
            recursive: true,
            detection: DetectionOptions::default(),
            sampling: SampleOptions::default(),
            sample_rate: 1.0,
        },
        output: TaskOutput::default(),
        created_at: now,
        updated_at: now,
        next_run_at: None,
    }
}

fn sample_execution(task_id: &str, execution_id: &str) -> Execution {
    Execution::begin(
        execution_id.to_string(),
        task_id.to_string(),
        "task".to_string(),
        Utc::now(),
    )
}

// ============================================================================
// TaskStore
// ============================================================================

#[test]
fn test_task_save_reload_round_trip() {
    let tmp = TempDir::new().unwrap();
    let store = TaskStore::open(tmp.path()).unwrap();
    let task = sample_task("t1");
    store.save(&task).unwrap();

    // a fresh store sees byte-identical canonical JSON
    let reopened = TaskStore::open(tmp.path()).unwrap();
    let loaded = reopened.get("t1").unwrap();
    assert_eq!(
        serde_json::to_string(&task).unwrap(),
        serde_json::to_string(&loaded).unwrap()
    );
}

#[test]
fn test_task_layout_on_disk() {
    let tmp = TempDir::new().unwrap();
    let store = TaskStore::open(tmp.path()).unwrap();
    store.save(&sample_task("t9")).unwrap();
    assert!(tmp.path().join("tasks/t9.json").exists());
    // no stray temp files after an atomic write
    let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("tasks"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_task_delete_preserves_history() {
    let tmp = TempDir::new().unwrap();
    let tasks = TaskStore::open(tmp.path()).unwrap();
    let executions = ExecutionStore::open(tmp.path()).unwrap();

    tasks.save(&sample_task("t2")).unwrap();
    let mut execution = sample_execution("t2", "e1");
    executions.create(&execution).unwrap();
    execution.items_processed = 3;
    execution.conclude(Utc::now());
    executions.finalize(&execution).unwrap();

    tasks.delete("t2").unwrap();
    assert!(matches!(tasks.get("t2"), Err(QualscanError::NotFound(_))));
    // history survives the definition
    assert_eq!(executions.list(Some("t2"), 10).unwrap().len(), 1);

    assert!(matches!(tasks.delete("t2"), Err(QualscanError::NotFound(_))));
}

// ============================================================================
// ExecutionStore
// ============================================================================

#[test]
fn test_execution_lifecycle_and_append_only() {
    let tmp = TempDir::new().unwrap();
    let store = ExecutionStore::open(tmp.path()).unwrap();
    let mut execution = sample_execution("t3", "e1");

    store.create(&execution).unwrap();
    // duplicate create is a conflict
    assert!(matches!(
        store.create(&execution),
        Err(QualscanError::Conflict(_))
    ));

    execution.items_processed = 10;
    execution.abnormal_count = 2;
    execution.normal_count = 8;
    execution.conclude(Utc::now());
    assert_eq!(execution.status, ExecutionStatus::Success);
    store.finalize(&execution).unwrap();

    // updates after the terminal state are forbidden
    assert!(matches!(
        store.finalize(&execution),
        Err(QualscanError::Conflict(_))
    ));

    let loaded = store.get("t3", "e1").unwrap();
    assert_eq!(loaded.status, ExecutionStatus::Success);
    assert_eq!(loaded.items_processed, 10);
}

#[test]
fn test_create_requires_running_status() {
    let tmp = TempDir::new().unwrap();
    let store = ExecutionStore::open(tmp.path()).unwrap();
    let mut execution = sample_execution("t4", "e1");
    execution.items_processed = 1;
    execution.conclude(Utc::now());
    assert!(matches!(
        store.create(&execution),
        Err(QualscanError::Conflict(_))
    ));
}

#[test]
fn test_execution_listing_order_and_limit() {
    let tmp = TempDir::new().unwrap();
    let store = ExecutionStore::open(tmp.path()).unwrap();
    for i in 0..5 {
        let mut execution = sample_execution("t5", &format!("e{}", i));
        execution.started_at = Utc::now() - chrono::Duration::minutes(10 - i);
        store.create(&execution).unwrap();
    }
    let listed = store.list(Some("t5"), 3).unwrap();
    assert_eq!(listed.len(), 3);
    // newest first
    assert!(listed[0].started_at >= listed[1].started_at);
    assert!(listed[1].started_at >= listed[2].started_at);

    // cross-task listing sees other tasks too
    store.create(&sample_execution("t6", "x1")).unwrap();
    let all = store.list(None, 100).unwrap();
    assert_eq!(all.len(), 6);
}

#[test]
fn test_prune_keeps_retention_floor() {
    let tmp = TempDir::new().unwrap();
    let store = ExecutionStore::open(tmp.path()).unwrap();
    for i in 0..5 {
        store
            .create(&sample_execution("t7", &format!("e{}", i)))
            .unwrap();
    }
    // far below the 1000-entry floor: nothing is deleted even without
    // keep_days
    assert_eq!(store.prune("t7", None).unwrap(), 0);
    assert_eq!(store.list(Some("t7"), 100).unwrap().len(), 5);
}

#[test]
fn test_missing_records() {
    let tmp = TempDir::new().unwrap();
    let store = ExecutionStore::open(tmp.path()).unwrap();
    assert!(matches!(
        store.get("t8", "missing"),
        Err(QualscanError::NotFound(_))
    ));
    let mut execution = sample_execution("t8", "ghost");
    execution.items_processed = 1;
    execution.conclude(Utc::now());
    assert!(matches!(
        store.finalize(&execution),
        Err(QualscanError::NotFound(_))
    ));
}
