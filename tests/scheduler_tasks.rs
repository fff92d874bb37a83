//! Integration tests for the cron scheduler: persistence shape, polling
//! bookkeeping, run budgets, and the two dispatch kinds.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use moltbot::config::SchedulerConfig;
use moltbot::scheduler::{Scheduler, TaskKind};
use moltbot::utils::now_secs;
use serde_json::{json, Value};
use tempfile::TempDir;

fn open_scheduler(tmp: &TempDir) -> Scheduler {
    Scheduler::open(
        tmp.path().join("scheduled_tasks.json"),
        tmp.path().join("logs"),
        &SchedulerConfig::default(),
    )
    .unwrap()
}

/// Write a task file with one already-due task so `poll_once` fires it.
fn seed_due_task(tmp: &TempDir, kind: &str, payload_key: &str, payload: &str, max_runs: u32) {
    let file = json!({
        "tasks": [{
            "id": "abc12345",
            "type": kind,
            "cron": "* * * * *",
            payload_key: payload,
            "max_runs": max_runs,
            "run_count": 0,
            "user_id": "tester",
            "created_at": now_secs(),
            "next_run": 0,
            "enabled": true
        }]
    });
    std::fs::write(
        tmp.path().join("scheduled_tasks.json"),
        serde_json::to_string_pretty(&file).unwrap(),
    )
    .unwrap();
}

fn read_task_file(tmp: &TempDir) -> Value {
    let raw = std::fs::read_to_string(tmp.path().join("scheduled_tasks.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[tokio::test]
async fn create_task_persists_expected_shape() {
    let tmp = TempDir::new().unwrap();
    let scheduler = open_scheduler(&tmp);

    let task = scheduler
        .create_task(TaskKind::Agent, "*/5 * * * *", "check the news", 3, "tester")
        .await
        .unwrap();
    assert_eq!(task.id.len(), 8);
    assert!(task.next_run > now_secs());

    let file = read_task_file(&tmp);
    let t = &file["tasks"][0];
    assert_eq!(t["type"], "agent");
    assert_eq!(t["cron"], "*/5 * * * *");
    assert_eq!(t["prompt"], "check the news");
    assert!(t.get("command").is_none());
    assert_eq!(t["max_runs"], 3);
    assert_eq!(t["run_count"], 0);
    assert_eq!(t["enabled"], true);

    // Survives a reopen.
    let reopened = open_scheduler(&tmp);
    assert!(reopened.get_task(&task.id).await.is_some());
}

#[tokio::test]
async fn create_task_validates_cron_and_payload() {
    let tmp = TempDir::new().unwrap();
    let scheduler = open_scheduler(&tmp);

    assert!(scheduler
        .create_task(TaskKind::Agent, "not cron", "p", 0, "u")
        .await
        .is_err());
    assert!(scheduler
        .create_task(TaskKind::Script, "* * * * *", "   ", 0, "u")
        .await
        .is_err());
    assert!(read_task_file(&tmp)["tasks"]
        .as_array()
        .map_or(true, |t| t.is_empty()));
}

#[tokio::test]
async fn agent_task_fires_callback_and_burns_its_budget() {
    let tmp = TempDir::new().unwrap();
    seed_due_task(&tmp, "agent", "prompt", "wake up", 3);
    let scheduler = open_scheduler(&tmp);

    let fired = Arc::new(AtomicUsize::new(0));
    let hook = |fired: &Arc<AtomicUsize>| {
        let seen = fired.clone();
        Arc::new(move |task: moltbot::scheduler::ScheduledTask| {
            let seen = seen.clone();
            Box::pin(async move {
                assert_eq!(task.prompt.as_deref(), Some("wake up"));
                assert_eq!(task.user_id, "tester");
                seen.fetch_add(1, Ordering::SeqCst);
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        })
    };
    scheduler.set_agent_callback(hook(&fired));

    // next_run is recomputed into the future after each pass; rewind it on
    // disk and reopen a fresh handle to simulate the clock advancing.
    let mut scheduler = scheduler;
    for i in 1..=3 {
        scheduler.poll_once().await;
        assert_eq!(fired.load(Ordering::SeqCst), i);
        let mut file = read_task_file(&tmp);
        assert_eq!(file["tasks"][0]["run_count"], i);
        if i < 3 {
            assert_eq!(file["tasks"][0]["enabled"], true);
            file["tasks"][0]["next_run"] = json!(0);
            std::fs::write(
                tmp.path().join("scheduled_tasks.json"),
                serde_json::to_string_pretty(&file).unwrap(),
            )
            .unwrap();
            scheduler = open_scheduler(&tmp);
            scheduler.set_agent_callback(hook(&fired));
        }
    }

    // Third run hit max_runs → permanently disabled, not deleted.
    let file = read_task_file(&tmp);
    assert_eq!(file["tasks"][0]["enabled"], false);
    assert_eq!(file["tasks"][0]["run_count"], 3);
    assert!(file["tasks"][0]["last_run"].as_i64().unwrap() > 0);

    // A disabled task never fires again.
    scheduler.poll_once().await;
    assert_eq!(fired.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn due_agent_task_without_callback_still_advances() {
    let tmp = TempDir::new().unwrap();
    seed_due_task(&tmp, "agent", "prompt", "wake up", 0);
    let scheduler = open_scheduler(&tmp);

    scheduler.poll_once().await;

    let file = read_task_file(&tmp);
    assert_eq!(file["tasks"][0]["run_count"], 1);
    assert_eq!(file["tasks"][0]["enabled"], true);
    assert!(file["tasks"][0]["next_run"].as_i64().unwrap() > now_secs() - 1);
}

#[tokio::test]
async fn script_task_writes_header_and_output_to_log() {
    let tmp = TempDir::new().unwrap();
    seed_due_task(&tmp, "script", "command", "echo scripted-output", 1);
    let scheduler = open_scheduler(&tmp);

    scheduler.poll_once().await;

    // The command runs detached; give it a moment.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    let logs: Vec<_> = std::fs::read_dir(tmp.path().join("logs"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(logs.len(), 1);
    let name = logs[0].file_name().to_string_lossy().to_string();
    assert!(name.starts_with("task_abc12345_"));
    let contents = std::fs::read_to_string(logs[0].path()).unwrap();
    assert!(contents.contains("# task: abc12345"));
    assert!(contents.contains("# command: echo scripted-output"));
    assert!(contents.contains("# started:"));
    assert!(contents.contains("scripted-output"));

    // Bookkeeping advanced and max_runs=1 disabled the task.
    let file = read_task_file(&tmp);
    assert_eq!(file["tasks"][0]["run_count"], 1);
    assert_eq!(file["tasks"][0]["enabled"], false);
}

#[tokio::test]
async fn task_deleted_mid_dispatch_gets_no_bookkeeping() {
    let tmp = TempDir::new().unwrap();
    seed_due_task(&tmp, "agent", "prompt", "wake up", 0);
    let scheduler = open_scheduler(&tmp);

    // The callback deletes the task while its dispatch is in flight.
    let sched = scheduler.clone();
    scheduler.set_agent_callback(Arc::new(move |task| {
        let sched = sched.clone();
        Box::pin(async move {
            sched.delete_task(&task.id).await.unwrap();
        })
    }));

    scheduler.poll_once().await;

    let file = read_task_file(&tmp);
    assert!(file["tasks"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn list_tasks_filters_by_owner_and_delete_removes() {
    let tmp = TempDir::new().unwrap();
    let scheduler = open_scheduler(&tmp);

    let a = scheduler
        .create_task(TaskKind::Agent, "0 9 * * *", "morning brief", 0, "alice")
        .await
        .unwrap();
    scheduler
        .create_task(TaskKind::Script, "0 0 * * *", "true", 0, "bob")
        .await
        .unwrap();

    assert_eq!(scheduler.list_tasks(None).await.len(), 2);
    let alices = scheduler.list_tasks(Some("alice")).await;
    assert_eq!(alices.len(), 1);
    assert_eq!(alices[0].id, a.id);

    scheduler.delete_task(&a.id).await.unwrap();
    assert!(scheduler.get_task(&a.id).await.is_none());
    assert!(scheduler.delete_task(&a.id).await.is_err());
}

#[tokio::test]
async fn start_is_idempotent_and_stop_terminates() {
    let tmp = TempDir::new().unwrap();
    let scheduler = open_scheduler(&tmp);

    scheduler.start().await;
    scheduler.start().await; // no-op
    scheduler.stop().await;
}

#[tokio::test]
async fn scheduler_restarted_after_stop_still_fires() {
    let tmp = TempDir::new().unwrap();
    let scheduler = Scheduler::open(
        tmp.path().join("scheduled_tasks.json"),
        tmp.path().join("logs"),
        &SchedulerConfig {
            poll_interval_secs: 1,
            ..SchedulerConfig::default()
        },
    )
    .unwrap();

    scheduler.start().await;
    scheduler.stop().await;

    // A task created after the stop/start cycle must still be dispatched by
    // the second loop. Six fields: fires every second.
    scheduler
        .create_task(TaskKind::Script, "* * * * * *", "echo restarted", 0, "tester")
        .await
        .unwrap();
    scheduler.start().await;
    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    scheduler.stop().await;

    let file = read_task_file(&tmp);
    assert!(
        file["tasks"][0]["run_count"].as_u64().unwrap() >= 1,
        "restarted loop never polled: {file}"
    );
}
