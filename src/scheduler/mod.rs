//! Durable cron scheduler.
//!
//! Tasks live in `scheduled_tasks.json` (`{"tasks": [...]}`) and survive
//! restarts. A polling loop wakes every `poll_interval`, snapshots the due
//! tasks under the lock, dispatches them outside it, then re-acquires the
//! lock for bookkeeping: `run_count` and `last_run` advance whether or not
//! the dispatch succeeded, so a chronically failing task still burns its
//! run budget instead of retrying forever.
//!
//! Two task kinds: `agent` wakes the conversation loop with a stored
//! prompt; `script` spawns a detached shell command whose output goes to a
//! per-run log file.

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::store;
use crate::utils::{now_secs, short_id};

/// What a task does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Wake the agent with the stored prompt.
    Agent,
    /// Run the stored shell command, detached, output to a log file.
    Script,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Agent => write!(f, "agent"),
            TaskKind::Script => write!(f, "script"),
        }
    }
}

/// One persisted task. Exactly one of `prompt` / `command` is set,
/// according to `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Classic 5-field cron expression (6-field with seconds also accepted).
    pub cron: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// 0 means unbounded.
    #[serde(default)]
    pub max_runs: u32,
    #[serde(default)]
    pub run_count: u32,
    /// Recipient for agent-wake replies.
    pub user_id: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<i64>,
    /// Unix seconds of the next due fire.
    pub next_run: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskFile {
    tasks: Vec<ScheduledTask>,
}

/// Accept classic 5-field cron by prefixing a seconds field.
pub fn normalize_cron(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Next fire time (unix seconds) for `expr` after `after`, evaluated in
/// `tz`.
pub fn next_fire(expr: &str, tz: Tz, after: DateTime<Utc>) -> anyhow::Result<i64> {
    let schedule: cron::Schedule = normalize_cron(expr)
        .parse()
        .with_context(|| format!("invalid cron expression: '{expr}'"))?;
    let local = after.with_timezone(&tz);
    let next = schedule
        .after(&local)
        .next()
        .with_context(|| format!("cron expression never fires: '{expr}'"))?;
    Ok(next.timestamp())
}

/// Callback that wakes the agent for a due `agent` task.
pub type AgentCallback =
    Arc<dyn Fn(ScheduledTask) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Inner {
    path: PathBuf,
    logs_dir: PathBuf,
    tz: Tz,
    poll_interval: Duration,
    tasks: tokio::sync::Mutex<Vec<ScheduledTask>>,
    agent_callback: std::sync::Mutex<Option<AgentCallback>>,
    /// Replaced with a fresh token on `stop()` so the scheduler can be
    /// started again afterwards.
    cancel: std::sync::Mutex<CancellationToken>,
    loop_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Handle to the scheduler. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Load (or initialize) the task list at `path`. Run logs for `script`
    /// tasks go under `logs_dir`.
    pub fn open(path: PathBuf, logs_dir: PathBuf, cfg: &SchedulerConfig) -> anyhow::Result<Scheduler> {
        let tz: Tz = cfg
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("unknown timezone '{}': {e}", cfg.timezone))?;
        let file: TaskFile = store::load_json(&path)?;
        tracing::debug!(tasks = file.tasks.len(), tz = %tz, "scheduler state loaded");
        Ok(Scheduler {
            inner: Arc::new(Inner {
                path,
                logs_dir,
                tz,
                poll_interval: Duration::from_secs(cfg.poll_interval_secs),
                tasks: tokio::sync::Mutex::new(file.tasks),
                agent_callback: std::sync::Mutex::new(None),
                cancel: std::sync::Mutex::new(CancellationToken::new()),
                loop_handle: tokio::sync::Mutex::new(None),
            }),
        })
    }

    /// Install the agent-wake callback. Without one, due `agent` tasks are
    /// logged and skipped (their bookkeeping still advances).
    pub fn set_agent_callback(&self, cb: AgentCallback) {
        let mut slot = self
            .inner
            .agent_callback
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some(cb);
    }

    fn persist(&self, tasks: &[ScheduledTask]) -> anyhow::Result<()> {
        store::save_json(
            &self.inner.path,
            &TaskFile {
                tasks: tasks.to_vec(),
            },
        )
    }

    /// Create and persist a task; validates the cron expression and the
    /// kind/payload pairing, and computes the first `next_run`.
    pub async fn create_task(
        &self,
        kind: TaskKind,
        cron_expr: &str,
        payload: &str,
        max_runs: u32,
        user_id: &str,
    ) -> anyhow::Result<ScheduledTask> {
        if payload.trim().is_empty() {
            match kind {
                TaskKind::Agent => anyhow::bail!("an agent task needs a non-empty prompt"),
                TaskKind::Script => anyhow::bail!("a script task needs a non-empty command"),
            }
        }
        let next_run = next_fire(cron_expr, self.inner.tz, Utc::now())?;

        let task = ScheduledTask {
            id: short_id(),
            kind,
            cron: cron_expr.trim().to_string(),
            prompt: matches!(kind, TaskKind::Agent).then(|| payload.to_string()),
            command: matches!(kind, TaskKind::Script).then(|| payload.to_string()),
            max_runs,
            run_count: 0,
            user_id: user_id.to_string(),
            created_at: now_secs(),
            last_run: None,
            next_run,
            enabled: true,
        };

        let mut tasks = self.inner.tasks.lock().await;
        tasks.push(task.clone());
        self.persist(&tasks)?;
        tracing::info!(id = %task.id, kind = %task.kind, cron = %task.cron, "task created");
        Ok(task)
    }

    /// Snapshot of all tasks, optionally filtered by owner.
    pub async fn list_tasks(&self, user_id: Option<&str>) -> Vec<ScheduledTask> {
        let tasks = self.inner.tasks.lock().await;
        tasks
            .iter()
            .filter(|t| user_id.map_or(true, |u| t.user_id == u))
            .cloned()
            .collect()
    }

    pub async fn get_task(&self, id: &str) -> Option<ScheduledTask> {
        let tasks = self.inner.tasks.lock().await;
        tasks.iter().find(|t| t.id == id).cloned()
    }

    pub async fn delete_task(&self, id: &str) -> anyhow::Result<String> {
        let mut tasks = self.inner.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            anyhow::bail!("no task with id '{id}'");
        }
        self.persist(&tasks)?;
        tracing::info!(id, "task deleted");
        Ok(format!("Task {id} deleted."))
    }

    /// Start the polling loop. Idempotent; a second call is a no-op.
    pub async fn start(&self) {
        let mut handle = self.inner.loop_handle.lock().await;
        if handle.is_some() {
            return;
        }
        let cancel = {
            let token = self.inner.cancel.lock().unwrap_or_else(|e| e.into_inner());
            token.clone()
        };
        let this = self.clone();
        *handle = Some(tokio::spawn(async move {
            tracing::info!(
                poll_interval_secs = this.inner.poll_interval.as_secs(),
                "scheduler loop started"
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(this.inner.poll_interval) => {}
                }
                this.poll_once().await;
            }
            tracing::info!("scheduler loop stopped");
        }));
    }

    /// Cancel the loop and wait (bounded) for it to wind down. A fresh
    /// token is installed so a later `start()` runs a live loop again.
    pub async fn stop(&self) {
        {
            let mut token = self.inner.cancel.lock().unwrap_or_else(|e| e.into_inner());
            token.cancel();
            *token = CancellationToken::new();
        }
        let handle = self.inner.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }

    /// One scheduling pass: snapshot due tasks, dispatch outside the lock,
    /// then update bookkeeping by id. Public so tests can drive the clock.
    pub async fn poll_once(&self) {
        let now = now_secs();
        let due: Vec<ScheduledTask> = {
            let tasks = self.inner.tasks.lock().await;
            tasks
                .iter()
                .filter(|t| t.enabled && t.next_run <= now)
                .cloned()
                .collect()
        };
        if due.is_empty() {
            return;
        }
        tracing::debug!(due = due.len(), "dispatching due tasks");

        for task in &due {
            match task.kind {
                TaskKind::Agent => self.dispatch_agent(task).await,
                TaskKind::Script => self.dispatch_script(task),
            }
        }

        // Bookkeeping by id. A task deleted while its dispatch was in
        // flight is simply gone and gets no bookkeeping.
        let mut tasks = self.inner.tasks.lock().await;
        for fired in &due {
            let Some(task) = tasks.iter_mut().find(|t| t.id == fired.id) else {
                continue;
            };
            task.run_count += 1;
            task.last_run = Some(now);
            if task.max_runs > 0 && task.run_count >= task.max_runs {
                task.enabled = false;
                tracing::info!(id = %task.id, runs = task.run_count, "task reached max_runs, disabled");
            } else {
                match next_fire(&task.cron, self.inner.tz, Utc::now()) {
                    Ok(next) => task.next_run = next,
                    Err(e) => {
                        // Validated at create; only reachable via a
                        // hand-edited task file.
                        tracing::warn!(id = %task.id, error = %e, "cannot compute next run, disabling task");
                        task.enabled = false;
                    }
                }
            }
        }
        if let Err(e) = self.persist(&tasks) {
            tracing::warn!(error = %e, "failed to persist scheduler state");
        }
    }

    async fn dispatch_agent(&self, task: &ScheduledTask) {
        let cb = {
            let slot = self
                .inner
                .agent_callback
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };
        match cb {
            Some(cb) => {
                tracing::info!(id = %task.id, user = %task.user_id, "waking agent for task");
                cb(task.clone()).await;
            }
            None => {
                tracing::warn!(id = %task.id, "agent task due but no callback installed, skipping");
            }
        }
    }

    /// Spawn `sh -c <command>` detached, stdout+stderr appended to a
    /// per-run log file. The scheduler does not wait for or record the
    /// exit status.
    fn dispatch_script(&self, task: &ScheduledTask) {
        let Some(command) = task.command.clone() else {
            tracing::warn!(id = %task.id, "script task has no command, skipping");
            return;
        };
        if let Err(e) = self.spawn_script(task, &command) {
            tracing::warn!(id = %task.id, error = %e, "failed to launch script task");
        }
    }

    fn spawn_script(&self, task: &ScheduledTask, command: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.inner.logs_dir)?;
        let started = Utc::now();
        let log_path = self
            .inner
            .logs_dir
            .join(format!("task_{}_{}.log", task.id, started.timestamp()));
        let mut log = std::fs::File::create(&log_path)
            .with_context(|| format!("failed to create {}", log_path.display()))?;
        writeln!(log, "# task: {}", task.id)?;
        writeln!(log, "# command: {command}")?;
        writeln!(log, "# started: {}", started.to_rfc3339())?;
        writeln!(log)?;
        let stderr_log = log.try_clone()?;

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::from(log))
            .stderr(std::process::Stdio::from(stderr_log))
            .spawn()
            .context("failed to spawn sh")?;

        tracing::info!(id = %task.id, log = %log_path.display(), "script task launched");
        // Reap in the background; the run outlives this pass.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(())
    }

    /// Timezone used for cron evaluation.
    pub fn timezone(&self) -> Tz {
        self.inner.tz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expressions_gain_seconds() {
        assert_eq!(normalize_cron("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron("0 0 * * * *"), "0 0 * * * *");
    }

    #[test]
    fn next_fire_advances_past_now() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 30).unwrap();
        // Every minute → next fire is 12:01:00.
        let next = next_fire("* * * * *", chrono_tz::UTC, now).unwrap();
        assert_eq!(next, now.timestamp() + 30);
    }

    #[test]
    fn next_fire_rejects_garbage() {
        assert!(next_fire("not a cron line", chrono_tz::UTC, Utc::now()).is_err());
    }

    #[test]
    fn next_fire_respects_timezone() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        // "daily at 09:00" in New York (UTC-5 in January) is 14:00 UTC.
        let next = next_fire("0 9 * * *", chrono_tz::America::New_York, now).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 1, 1, 14, 0, 0).unwrap();
        assert_eq!(next, expected.timestamp());
    }
}
