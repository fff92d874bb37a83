//! Tool registry and self-extension engine.
//!
//! Built-in tools are compiled-in handlers registered at startup. Custom
//! tools are Python sources the agent writes for itself at runtime; they are
//! persisted next to a manifest and executed out-of-process (see
//! [`custom`]), so a crashing or hanging tool cannot take the daemon down.
//!
//! All registry mutations (`create_tool`, `update_tool`, `delete_tool`,
//! `reload_tools`) keep the source directory, the manifest, and the
//! in-memory table consistent: a create that fails to load rolls back both
//! files, an update that fails to reload restores the previous source.

pub mod builtins;
pub mod custom;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use crate::memory::MemoryStore;
use crate::scheduler::Scheduler;

/// Metadata advertised to the model for one tool.
#[derive(Debug, Clone)]
pub struct ToolMeta {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameter object.
    pub input_schema: Value,
}

/// Where a registered tool came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOrigin {
    Builtin,
    Custom,
}

/// Async tool handler: parameter object in, human-readable string out.
pub type ToolHandler = Arc<
    dyn Fn(Value, ToolContext) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>
        + Send
        + Sync,
>;

struct ToolEntry {
    meta: ToolMeta,
    handler: ToolHandler,
    origin: ToolOrigin,
}

/// Everything a tool handler may need at execution time. Handed to handlers
/// by value; cloning is cheap (all `Arc`-backed).
#[derive(Clone)]
pub struct ToolContext {
    pub registry: ToolRegistry,
    pub memory: Arc<MemoryStore>,
    pub scheduler: Scheduler,
    /// Wall-clock budget for custom-tool and script subprocesses.
    pub script_timeout: Duration,
}

/// The tool table plus the on-disk locations backing custom tools.
///
/// Cheap to clone; all clones share one table.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<BTreeMap<String, ToolEntry>>>,
    /// Serializes create/update/delete/reload. The `RwLock` above only
    /// guards the in-memory table; the manifest read-modify-write on disk
    /// needs one writer at a time or concurrent mutations drop each
    /// other's entries.
    mutation: Arc<tokio::sync::Mutex<()>>,
    tools_dir: PathBuf,
    manifest_path: PathBuf,
}

impl ToolRegistry {
    /// Create an empty registry rooted at `tools_dir`. Call
    /// [`builtins::register_all`] and [`ToolRegistry::reload_tools`]
    /// afterwards to populate it.
    pub fn new(tools_dir: PathBuf) -> ToolRegistry {
        let manifest_path = tools_dir.join("manifest.json");
        ToolRegistry {
            tools: Arc::new(RwLock::new(BTreeMap::new())),
            mutation: Arc::new(tokio::sync::Mutex::new(())),
            tools_dir,
            manifest_path,
        }
    }

    /// Register a compiled-in tool. Panics on duplicate names; built-in
    /// registration happens once at startup with a fixed set.
    pub fn register_builtin<F, Fut>(&self, meta: ToolMeta, f: F)
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |args, ctx| Box::pin(f(args, ctx)));
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        let name = meta.name.clone();
        let prior = tools.insert(
            name.clone(),
            ToolEntry {
                meta,
                handler,
                origin: ToolOrigin::Builtin,
            },
        );
        assert!(prior.is_none(), "duplicate builtin tool: {name}");
    }

    /// Schemas for every registered tool, in deterministic (name) order.
    pub fn get_schemas(&self) -> Vec<Value> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools
            .values()
            .map(|e| {
                json!({
                    "name": e.meta.name,
                    "description": e.meta.description,
                    "input_schema": e.meta.input_schema,
                })
            })
            .collect()
    }

    /// Run a tool by name. Never fails: unknown names and handler errors are
    /// rendered as strings the model can read and react to.
    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolContext) -> String {
        let handler = {
            let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
            match tools.get(name) {
                Some(entry) => entry.handler.clone(),
                None => return format!("Error: unknown tool '{name}'"),
            }
        };
        tracing::debug!(tool = name, "executing tool");
        match handler(params, ctx.clone()).await {
            Ok(out) if out.trim().is_empty() => "Tool completed with no output.".to_string(),
            Ok(out) => out,
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool execution failed");
                // {:#} prints the whole context chain.
                format!("Error executing tool '{name}': {e:#}")
            }
        }
    }

    fn origin_of(&self, name: &str) -> Option<ToolOrigin> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools.get(name).map(|e| e.origin)
    }

    /// Validate a candidate tool name: `[A-Za-z0-9_]+`, no leading
    /// underscore.
    fn validate_name(name: &str) -> anyhow::Result<()> {
        if name.is_empty() {
            anyhow::bail!("tool name must not be empty");
        }
        if name.starts_with('_') {
            anyhow::bail!("tool name must not start with an underscore: '{name}'");
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            anyhow::bail!(
                "tool name may only contain letters, digits, and underscores: '{name}'"
            );
        }
        Ok(())
    }

    fn source_path(&self, name: &str) -> PathBuf {
        self.tools_dir.join(format!("{name}.py"))
    }

    /// Load a custom tool source: compile check, then wrap in a handler.
    async fn load_custom(path: &std::path::Path) -> anyhow::Result<ToolHandler> {
        custom::check_loadable(path).await?;
        custom::build_handler(path)
    }

    /// Create a new custom tool. All-or-nothing: if the source fails to
    /// load after being written, both the source file and the manifest
    /// entry are rolled back.
    pub async fn create_tool(
        &self,
        name: &str,
        description: &str,
        input_schema: Value,
        source_code: &str,
    ) -> anyhow::Result<String> {
        let _guard = self.mutation.lock().await;

        Self::validate_name(name)?;
        if self.origin_of(name).is_some() {
            anyhow::bail!("a tool named '{name}' already exists");
        }
        custom::validate_source(source_code)?;

        std::fs::create_dir_all(&self.tools_dir)?;
        let path = self.source_path(name);
        custom::write_source(&path, source_code)?;

        let now = Utc::now().to_rfc3339();
        let manifest_result = custom::load_manifest(&self.manifest_path).and_then(|mut m| {
            m.insert(
                name.to_string(),
                custom::ManifestEntry {
                    description: description.to_string(),
                    parameters: input_schema.clone(),
                    created_at: now.clone(),
                    updated_at: now,
                },
            );
            custom::save_manifest(&self.manifest_path, &m)?;
            Ok(m)
        });
        let mut manifest = match manifest_result {
            Ok(m) => m,
            Err(e) => {
                // The source was already written; don't leave it orphaned.
                let _ = std::fs::remove_file(&path);
                return Err(e.context(format!(
                    "failed to record tool '{name}' in the manifest; creation rolled back"
                )));
            }
        };

        match Self::load_custom(&path).await {
            Ok(handler) => {
                let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
                tools.insert(
                    name.to_string(),
                    ToolEntry {
                        meta: ToolMeta {
                            name: name.to_string(),
                            description: description.to_string(),
                            input_schema,
                        },
                        handler,
                        origin: ToolOrigin::Custom,
                    },
                );
                tracing::info!(tool = name, "custom tool created");
                Ok(format!("Tool '{name}' created and loaded."))
            }
            Err(e) => {
                // Roll back both artifacts so a broken create leaves no trace.
                let _ = std::fs::remove_file(&path);
                manifest.remove(name);
                let _ = custom::save_manifest(&self.manifest_path, &manifest);
                tracing::warn!(tool = name, error = %e, "tool creation rolled back");
                Err(e.context(format!("tool '{name}' failed to load; creation rolled back")))
            }
        }
    }

    /// Update a custom tool's description, schema, and/or source. If a new
    /// source fails to reload, the previous source is restored.
    pub async fn update_tool(
        &self,
        name: &str,
        description: Option<&str>,
        input_schema: Option<Value>,
        source_code: Option<&str>,
    ) -> anyhow::Result<String> {
        let _guard = self.mutation.lock().await;

        match self.origin_of(name) {
            None => anyhow::bail!("no tool named '{name}'"),
            Some(ToolOrigin::Builtin) => {
                anyhow::bail!("'{name}' is a built-in tool and cannot be modified")
            }
            Some(ToolOrigin::Custom) => {}
        }
        if description.is_none() && input_schema.is_none() && source_code.is_none() {
            anyhow::bail!("update_tool requires at least one of description, input_schema, source_code");
        }
        if let Some(src) = source_code {
            custom::validate_source(src)?;
        }

        let path = self.source_path(name);
        let previous_source = std::fs::read_to_string(&path)?;

        let mut manifest = custom::load_manifest(&self.manifest_path)?;
        let Some(entry) = manifest.get_mut(name) else {
            anyhow::bail!("manifest entry for '{name}' is missing");
        };
        let previous_entry = entry.clone();
        if let Some(desc) = description {
            entry.description = desc.to_string();
        }
        if let Some(schema) = &input_schema {
            entry.parameters = schema.clone();
        }
        entry.updated_at = Utc::now().to_rfc3339();
        let new_entry = entry.clone();

        if let Some(src) = source_code {
            custom::write_source(&path, src)?;
        }
        custom::save_manifest(&self.manifest_path, &manifest)?;

        match Self::load_custom(&path).await {
            Ok(handler) => {
                let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
                tools.insert(
                    name.to_string(),
                    ToolEntry {
                        meta: ToolMeta {
                            name: name.to_string(),
                            description: new_entry.description,
                            input_schema: new_entry.parameters,
                        },
                        handler,
                        origin: ToolOrigin::Custom,
                    },
                );
                tracing::info!(tool = name, "custom tool updated");
                Ok(format!("Tool '{name}' updated and reloaded."))
            }
            Err(e) => {
                // Restore the previous working version.
                let _ = custom::write_source(&path, &previous_source);
                manifest.insert(name.to_string(), previous_entry);
                let _ = custom::save_manifest(&self.manifest_path, &manifest);
                tracing::warn!(tool = name, error = %e, "tool update reverted");
                Err(e.context(format!(
                    "updated source for '{name}' failed to load; previous version restored"
                )))
            }
        }
    }

    /// Delete a custom tool: manifest entry, source, and registration.
    /// The manifest goes first; if that save fails, nothing has changed
    /// and the tool stays fully intact.
    pub async fn delete_tool(&self, name: &str) -> anyhow::Result<String> {
        let _guard = self.mutation.lock().await;

        match self.origin_of(name) {
            None => anyhow::bail!("no tool named '{name}'"),
            Some(ToolOrigin::Builtin) => {
                anyhow::bail!("'{name}' is a built-in tool and cannot be deleted")
            }
            Some(ToolOrigin::Custom) => {}
        }

        let mut manifest = custom::load_manifest(&self.manifest_path)?;
        manifest.remove(name);
        custom::save_manifest(&self.manifest_path, &manifest)?;

        // Past this point the entry is gone; a leftover source file is
        // inert (reload only follows the manifest) but tidy up anyway.
        let path = self.source_path(name);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(tool = name, error = %e, "could not remove tool source");
            }
        }

        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        tools.remove(name);
        tracing::info!(tool = name, "custom tool deleted");
        Ok(format!("Tool '{name}' deleted."))
    }

    /// Show a custom tool's source plus its manifest timestamps.
    pub fn view_tool_code(&self, name: &str) -> anyhow::Result<String> {
        match self.origin_of(name) {
            None => anyhow::bail!("no tool named '{name}'"),
            Some(ToolOrigin::Builtin) => {
                anyhow::bail!("'{name}' is a built-in tool; its code is not viewable")
            }
            Some(ToolOrigin::Custom) => {}
        }
        let source = std::fs::read_to_string(self.source_path(name))?;
        let manifest = custom::load_manifest(&self.manifest_path)?;
        let stamps = manifest
            .get(name)
            .map(|e| format!("created {} / updated {}", e.created_at, e.updated_at))
            .unwrap_or_else(|| "timestamps unavailable".to_string());
        Ok(format!("# {name} ({stamps})\n\n{source}"))
    }

    /// Human-readable tool inventory, built-ins and customs grouped.
    pub fn list_tools(&self) -> String {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut builtin = Vec::new();
        let mut customs = Vec::new();
        for entry in tools.values() {
            let line = format!("- {}: {}", entry.meta.name, entry.meta.description);
            match entry.origin {
                ToolOrigin::Builtin => builtin.push(line),
                ToolOrigin::Custom => customs.push(line),
            }
        }
        let mut out = format!("## Built-in tools ({})\n{}", builtin.len(), builtin.join("\n"));
        if customs.is_empty() {
            out.push_str("\n\n## Custom tools (0)\nNone yet.");
        } else {
            out.push_str(&format!(
                "\n\n## Custom tools ({})\n{}",
                customs.len(),
                customs.join("\n")
            ));
        }
        out
    }

    /// Drop all custom registrations and re-derive them from the manifest
    /// and source directory. Tools that fail to load are skipped, not fatal.
    pub async fn reload_tools(&self) -> anyhow::Result<String> {
        let _guard = self.mutation.lock().await;

        let manifest = custom::load_manifest(&self.manifest_path)?;

        let mut loaded: BTreeMap<String, ToolEntry> = BTreeMap::new();
        let mut skipped = 0usize;
        for (name, entry) in &manifest {
            if Self::validate_name(name).is_err() {
                tracing::warn!(tool = %name, "manifest entry has an invalid name, skipping");
                skipped += 1;
                continue;
            }
            match Self::load_custom(&self.source_path(name)).await {
                Ok(handler) => {
                    loaded.insert(
                        name.clone(),
                        ToolEntry {
                            meta: ToolMeta {
                                name: name.clone(),
                                description: entry.description.clone(),
                                input_schema: entry.parameters.clone(),
                            },
                            handler,
                            origin: ToolOrigin::Custom,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(tool = %name, error = %e, "custom tool failed to load, skipping");
                    skipped += 1;
                }
            }
        }

        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        tools.retain(|_, e| e.origin == ToolOrigin::Builtin);
        let count = loaded.len();
        for (name, entry) in loaded {
            // A custom tool may not shadow a built-in.
            if !tools.contains_key(&name) {
                tools.insert(name, entry);
            }
        }
        tracing::info!(loaded = count, skipped, "custom tools reloaded");
        Ok(format!("Reloaded {count} custom tool(s), skipped {skipped}."))
    }
}
