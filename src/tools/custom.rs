//! Custom tool persistence and out-of-process execution.
//!
//! A custom tool is a Python source file exposing a `run(**params)` entry
//! point, plus a manifest entry carrying its description, parameter schema,
//! and timestamps. Execution spawns `python3` with a small harness that
//! imports the file, reads the JSON parameter object on stdin, calls `run`,
//! and prints the result. The subprocess boundary means a buggy tool can
//! crash or hang without affecting the daemon; it is NOT a sandbox, and the
//! denylist below is a tripwire for obviously catastrophic strings, not a
//! security control.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::store;
use crate::tools::ToolHandler;
use crate::utils::truncate_str;

/// Required entry-point marker in every tool source.
pub const ENTRY_POINT: &str = "def run(";

/// Literal substrings that are never allowed in tool or script sources.
pub const DENYLIST: [&str; 7] = [
    "rm -rf /",
    "rm -rf /*",
    "mkfs",
    ":(){",
    "dd if=/dev/zero of=/dev/",
    "open('/etc/shadow",
    "open(\"/etc/shadow",
];

/// Harness run as `python3 -c HARNESS <tool-file>`: loads the tool module,
/// reads a JSON object from stdin, and prints `run(**params)`.
const HARNESS: &str = r#"
import importlib.util, json, sys
spec = importlib.util.spec_from_file_location("tool", sys.argv[1])
mod = importlib.util.module_from_spec(spec)
spec.loader.exec_module(mod)
params = json.load(sys.stdin)
result = mod.run(**params)
sys.stdout.write("" if result is None else str(result))
"#;

/// One manifest record, keyed by tool name in `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub description: String,
    /// JSON Schema for the tool's parameter object.
    pub parameters: Value,
    pub created_at: String,
    pub updated_at: String,
}

pub type Manifest = BTreeMap<String, ManifestEntry>;

pub fn load_manifest(path: &Path) -> anyhow::Result<Manifest> {
    store::load_json(path)
}

/// Atomically replace a tool source: write a `.tmp` sibling, then rename,
/// so a crash mid-write never leaves a truncated source behind.
pub fn write_source(path: &Path, source: &str) -> anyhow::Result<()> {
    let tmp = path.with_extension("py.tmp");
    std::fs::write(&tmp, source).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

pub fn save_manifest(path: &Path, manifest: &Manifest) -> anyhow::Result<()> {
    store::save_json(path, manifest)
}

/// Static checks applied before a source is accepted: entry point present,
/// no denylisted substrings.
pub fn validate_source(source: &str) -> anyhow::Result<()> {
    if !source.contains(ENTRY_POINT) {
        anyhow::bail!("tool source must define a `run(...)` entry point");
    }
    for pattern in DENYLIST {
        if source.contains(pattern) {
            anyhow::bail!("tool source contains a forbidden pattern: {pattern:?}");
        }
    }
    Ok(())
}

/// Byte-compile the source to catch syntax errors before the tool is
/// accepted. This is the load step proper: a file that fails here must not
/// end up registered.
pub async fn check_loadable(path: &Path) -> anyhow::Result<()> {
    let output = tokio::time::timeout(
        Duration::from_secs(15),
        tokio::process::Command::new("python3")
            .arg("-m")
            .arg("py_compile")
            .arg(path)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| anyhow::anyhow!("compile check timed out"))?
    .context("failed to run python3 for the compile check")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "tool source failed to compile: {}",
            truncate_str(stderr.trim(), 2000)
        );
    }
    Ok(())
}

/// Re-check a source file on disk and wrap it in a subprocess-backed
/// handler. The file is validated again here so manifest entries whose
/// sources were tampered with or lost fail at load, not at call time.
pub fn build_handler(path: &Path) -> anyhow::Result<ToolHandler> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read tool source {}", path.display()))?;
    validate_source(&source)?;

    let path: PathBuf = path.to_path_buf();
    Ok(std::sync::Arc::new(move |params, ctx| {
        let path = path.clone();
        Box::pin(async move {
            let (stdout, stderr) = run_python_file(&path, &params, ctx.script_timeout).await?;
            if !stderr.trim().is_empty() {
                tracing::debug!(tool = %path.display(), stderr = %truncate_str(&stderr, 500), "tool stderr");
            }
            Ok(stdout)
        })
    }))
}

/// Spawn the Python harness for `path`, feed it `params` on stdin, and
/// collect stdout/stderr. Non-zero exit and timeout are errors carrying
/// enough of stderr to diagnose the failure.
pub async fn run_python_file(
    path: &Path,
    params: &Value,
    timeout: Duration,
) -> anyhow::Result<(String, String)> {
    let mut child = tokio::process::Command::new("python3")
        .arg("-c")
        .arg(HARNESS)
        .arg(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn python3")?;

    let mut stdin = child.stdin.take().context("child stdin unavailable")?;
    let raw = serde_json::to_vec(params).context("serialize tool parameters")?;
    stdin.write_all(&raw).await.context("write tool parameters")?;
    drop(stdin);

    // Dropping the in-flight future on timeout kills the child
    // (kill_on_drop above).
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| anyhow::anyhow!("tool timed out after {}s", timeout.as_secs()))?
        .context("failed to collect tool output")?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !output.status.success() {
        anyhow::bail!(
            "tool exited with {}: {}",
            output.status,
            truncate_str(stderr.trim(), 2000)
        );
    }
    Ok((stdout, stderr))
}
