//! Self-extension tools — let the agent create, inspect, update, delete,
//! and reload its own custom tools.
//!
//! Tools exposed:
//! - `create_tool { name, description, input_schema?, source_code }`
//! - `update_tool { name, description?, input_schema?, source_code? }`
//! - `delete_tool { name }`
//! - `view_tool_code { name }`
//! - `list_tools {}`
//! - `reload_tools {}`

use serde_json::{json, Value};

use crate::tools::{ToolContext, ToolMeta, ToolRegistry};

/// `create_tool` — write, persist, and load a new custom tool.
pub async fn create_tool(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let name = args["name"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("create_tool requires a 'name' string"))?;
    let description = args["description"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("create_tool requires a 'description' string"))?;
    let source = args["source_code"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("create_tool requires a 'source_code' string"))?;
    let schema = args
        .get("input_schema")
        .filter(|s| s.is_object())
        .cloned()
        .unwrap_or_else(|| json!({ "type": "object", "properties": {} }));

    ctx.registry
        .create_tool(name, description, schema, source)
        .await
}

/// `update_tool` — modify an existing custom tool.
pub async fn update_tool(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let name = args["name"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("update_tool requires a 'name' string"))?;
    let description = args.get("description").and_then(Value::as_str);
    let schema = args
        .get("input_schema")
        .filter(|s| s.is_object())
        .cloned();
    let source = args.get("source_code").and_then(Value::as_str);

    ctx.registry
        .update_tool(name, description, schema, source)
        .await
}

/// `delete_tool` — remove a custom tool entirely.
pub async fn delete_tool(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let name = args["name"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("delete_tool requires a 'name' string"))?;
    ctx.registry.delete_tool(name).await
}

/// `view_tool_code` — show a custom tool's source and timestamps.
pub async fn view_tool_code(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let name = args["name"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("view_tool_code requires a 'name' string"))?;
    ctx.registry.view_tool_code(name)
}

/// `list_tools` — inventory of built-in and custom tools.
pub async fn list_tools(_args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    Ok(ctx.registry.list_tools())
}

/// `reload_tools` — re-derive all custom tools from disk.
pub async fn reload_tools(_args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    ctx.registry.reload_tools().await
}

/// Register self-extension tools.
pub fn register(registry: &ToolRegistry) {
    registry.register_builtin(
        ToolMeta {
            name: "create_tool".into(),
            description: "Create a new custom tool. The source must be Python defining a \
                          run(...) function whose keyword arguments match the input schema; \
                          its return value (stringified) becomes the tool result."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Tool name: letters, digits, underscores; no leading underscore"
                    },
                    "description": {
                        "type": "string",
                        "description": "What the tool does, shown to the model"
                    },
                    "input_schema": {
                        "type": "object",
                        "description": "JSON Schema for the tool's parameters (default: no parameters)"
                    },
                    "source_code": {
                        "type": "string",
                        "description": "Python source defining run(...)"
                    }
                },
                "required": ["name", "description", "source_code"]
            }),
        },
        create_tool,
    );

    registry.register_builtin(
        ToolMeta {
            name: "update_tool".into(),
            description: "Update a custom tool's description, input schema, and/or source code. \
                          Built-in tools cannot be updated. If the new source fails to load, \
                          the previous version is restored."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "The custom tool to update" },
                    "description": { "type": "string", "description": "New description" },
                    "input_schema": { "type": "object", "description": "New parameter schema" },
                    "source_code": { "type": "string", "description": "New Python source defining run(...)" }
                },
                "required": ["name"]
            }),
        },
        update_tool,
    );

    registry.register_builtin(
        ToolMeta {
            name: "delete_tool".into(),
            description: "Delete a custom tool (source, manifest entry, and registration). \
                          Built-in tools cannot be deleted."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "The custom tool to delete" }
                },
                "required": ["name"]
            }),
        },
        delete_tool,
    );

    registry.register_builtin(
        ToolMeta {
            name: "view_tool_code".into(),
            description: "Show a custom tool's source code and created/updated timestamps.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "The custom tool to inspect" }
                },
                "required": ["name"]
            }),
        },
        view_tool_code,
    );

    registry.register_builtin(
        ToolMeta {
            name: "list_tools".into(),
            description: "List all available tools, grouped into built-in and custom.".into(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        list_tools,
    );

    registry.register_builtin(
        ToolMeta {
            name: "reload_tools".into(),
            description: "Reload all custom tools from disk. Tools whose sources fail to load \
                          are skipped."
                .into(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        reload_tools,
    );
}
