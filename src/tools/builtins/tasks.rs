//! Scheduling tools — let the agent manage its own cron tasks.
//!
//! Tools exposed:
//! - `create_task { type, cron, prompt?, command?, max_runs?, user_id? }`
//! - `list_tasks { user_id? }`
//! - `delete_task { id }`

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use crate::scheduler::{ScheduledTask, TaskKind};
use crate::tools::{ToolContext, ToolMeta, ToolRegistry};
use crate::utils::truncate_str;

/// Owner recorded on tasks created from the local chat session.
const DEFAULT_USER: &str = "local";

/// `create_task` — register a recurring agent wake-up or shell command.
pub async fn create_task(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let kind = match args["type"].as_str() {
        Some("agent") => TaskKind::Agent,
        Some("script") => TaskKind::Script,
        Some(other) => anyhow::bail!("unknown task type '{other}' (expected 'agent' or 'script')"),
        None => anyhow::bail!("create_task requires a 'type' of 'agent' or 'script'"),
    };
    let cron = args["cron"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("create_task requires a 'cron' expression"))?;
    let payload = match kind {
        TaskKind::Agent => args["prompt"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("an agent task requires a 'prompt' string"))?,
        TaskKind::Script => args["command"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("a script task requires a 'command' string"))?,
    };
    let max_runs = args.get("max_runs").and_then(Value::as_u64).unwrap_or(0) as u32;
    let user_id = args
        .get("user_id")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_USER);

    let task = ctx
        .scheduler
        .create_task(kind, cron, payload, max_runs, user_id)
        .await?;
    Ok(format!(
        "Task {} created: {} '{}' on '{}'{}.",
        task.id,
        task.kind,
        truncate_str(payload, 80),
        task.cron,
        if max_runs > 0 {
            format!(", up to {max_runs} run(s)")
        } else {
            String::new()
        }
    ))
}

fn describe(task: &ScheduledTask, tz: chrono_tz::Tz) -> String {
    let payload = task
        .prompt
        .as_deref()
        .or(task.command.as_deref())
        .unwrap_or("");
    let next = Utc
        .timestamp_opt(task.next_run, 0)
        .single()
        .map(|t| t.with_timezone(&tz).to_rfc3339())
        .unwrap_or_else(|| task.next_run.to_string());
    let state = if task.enabled { "enabled" } else { "disabled" };
    let runs = if task.max_runs > 0 {
        format!("{}/{}", task.run_count, task.max_runs)
    } else {
        format!("{}", task.run_count)
    };
    format!(
        "- {} [{}] ({state}, runs {runs}) cron '{}' next {next}: {}",
        task.id,
        task.kind,
        task.cron,
        truncate_str(payload, 80)
    )
}

/// `list_tasks` — show scheduled tasks, optionally for one owner.
pub async fn list_tasks(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let user_id = args.get("user_id").and_then(Value::as_str);
    let tasks = ctx.scheduler.list_tasks(user_id).await;
    if tasks.is_empty() {
        return Ok("No scheduled tasks.".to_string());
    }
    let tz = ctx.scheduler.timezone();
    let lines: Vec<String> = tasks.iter().map(|t| describe(t, tz)).collect();
    Ok(format!("Scheduled tasks ({}):\n{}", tasks.len(), lines.join("\n")))
}

/// `delete_task` — remove a task by id.
pub async fn delete_task(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let id = args["id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("delete_task requires an 'id' string"))?;
    ctx.scheduler.delete_task(id).await
}

/// Register scheduling tools.
pub fn register(registry: &ToolRegistry) {
    registry.register_builtin(
        ToolMeta {
            name: "create_task".into(),
            description: "Schedule a recurring task with a 5-field cron expression. Type \
                          'agent' wakes the assistant with the given prompt; type 'script' \
                          runs a shell command with output captured to a log file."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": ["agent", "script"],
                        "description": "What the task does when it fires"
                    },
                    "cron": {
                        "type": "string",
                        "description": "5-field cron expression, e.g. '*/30 * * * *'"
                    },
                    "prompt": {
                        "type": "string",
                        "description": "Prompt delivered to the assistant (agent tasks)"
                    },
                    "command": {
                        "type": "string",
                        "description": "Shell command to run (script tasks)"
                    },
                    "max_runs": {
                        "type": "integer",
                        "description": "Disable the task after this many runs (0 = unlimited)"
                    },
                    "user_id": {
                        "type": "string",
                        "description": "Owner to notify for agent tasks (default: local)"
                    }
                },
                "required": ["type", "cron"]
            }),
        },
        create_task,
    );

    registry.register_builtin(
        ToolMeta {
            name: "list_tasks".into(),
            description: "List scheduled tasks with their cron, state, run counts, and next \
                          fire time. Optionally filter by owner."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_id": { "type": "string", "description": "Only show this owner's tasks" }
                }
            }),
        },
        list_tasks,
    );

    registry.register_builtin(
        ToolMeta {
            name: "delete_task".into(),
            description: "Delete a scheduled task by its id.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Task id, as shown by list_tasks" }
                },
                "required": ["id"]
            }),
        },
        delete_task,
    );
}
