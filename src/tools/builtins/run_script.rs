//! `run_script` — execute an inline Python script in a subprocess.
//!
//! Unlike a custom tool the script needs no `run(...)` entry point; it is
//! written to a temporary file and executed top-to-bottom. The same
//! denylist tripwire as tool sources applies, and the run is bounded by the
//! configured script timeout.

use std::process::Stdio;

use anyhow::Context;
use serde_json::{json, Value};

use crate::tools::custom::DENYLIST;
use crate::tools::{ToolContext, ToolMeta, ToolRegistry};
use crate::utils::{short_id, truncate_str};

/// `run_script` — run inline code, returning stdout (and stderr, marked).
pub async fn run_script(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let code = args["code"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("run_script requires a 'code' string"))?;
    for pattern in DENYLIST {
        if code.contains(pattern) {
            anyhow::bail!("script contains a forbidden pattern: {pattern:?}");
        }
    }

    let path = std::env::temp_dir().join(format!("moltbot_script_{}.py", short_id()));
    tokio::fs::write(&path, code)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;

    let result = async {
        let child = tokio::process::Command::new("python3")
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn python3")?;

        let output = tokio::time::timeout(ctx.script_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow::anyhow!("script timed out after {}s", ctx.script_timeout.as_secs())
            })?
            .context("failed to collect script output")?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            anyhow::bail!(
                "script exited with {}: {}",
                output.status,
                truncate_str(stderr.trim(), 2000)
            );
        }
        let mut out = stdout;
        if !stderr.trim().is_empty() {
            out.push_str("\n[stderr]\n");
            out.push_str(&stderr);
        }
        Ok(out)
    }
    .await;

    let _ = tokio::fs::remove_file(&path).await;
    result
}

/// Register the script runner.
pub fn register(registry: &ToolRegistry) {
    registry.register_builtin(
        ToolMeta {
            name: "run_script".into(),
            description: "Run an inline Python script in a subprocess and return its output. \
                          Use for one-off computation; create a tool instead for anything \
                          reusable."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "Python source to execute" }
                },
                "required": ["code"]
            }),
        },
        run_script,
    );
}
