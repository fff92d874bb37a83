//! Memory tools — persistent categorized key/value recall for the agent.
//!
//! Tools exposed:
//! - `remember { category, key, content }`
//! - `recall { query?, category? }`
//! - `list_memories {}`
//! - `forget { category, key }`

use serde_json::{json, Value};

use crate::tools::{ToolContext, ToolMeta, ToolRegistry};

/// `remember` — store or overwrite one fact.
pub async fn remember(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let category = args["category"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("remember requires a 'category' string"))?;
    let key = args["key"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("remember requires a 'key' string"))?;
    let content = args["content"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("remember requires a 'content' string"))?;
    ctx.memory.remember(category, key, content)
}

/// `recall` — substring search across stored memories.
pub async fn recall(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let query = args.get("query").and_then(Value::as_str);
    let category = args.get("category").and_then(Value::as_str);
    Ok(ctx.memory.recall(query, category))
}

/// `list_memories` — index of everything stored.
pub async fn list_memories(_args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    Ok(ctx.memory.list_memories())
}

/// `forget` — remove one stored fact.
pub async fn forget(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let category = args["category"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("forget requires a 'category' string"))?;
    let key = args["key"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("forget requires a 'key' string"))?;
    ctx.memory.forget(category, key)
}

/// Register memory tools.
pub fn register(registry: &ToolRegistry) {
    registry.register_builtin(
        ToolMeta {
            name: "remember".into(),
            description: "Store a fact under a category and key. Categories wallet, api, \
                          secret, and preference are always shown in the system prompt."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "category": { "type": "string", "description": "Grouping, e.g. 'preference' or 'api'" },
                    "key": { "type": "string", "description": "Name of the fact within its category" },
                    "content": { "type": "string", "description": "The fact itself" }
                },
                "required": ["category", "key", "content"]
            }),
        },
        remember,
    );

    registry.register_builtin(
        ToolMeta {
            name: "recall".into(),
            description: "Search stored memories by substring, optionally within one category. \
                          With no query, returns everything."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Case-insensitive substring to match" },
                    "category": { "type": "string", "description": "Restrict the search to this category" }
                }
            }),
        },
        recall,
    );

    registry.register_builtin(
        ToolMeta {
            name: "list_memories".into(),
            description: "List all stored memories grouped by category, with content previews.".into(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        list_memories,
    );

    registry.register_builtin(
        ToolMeta {
            name: "forget".into(),
            description: "Delete one stored memory by category and key.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "category": { "type": "string", "description": "Category of the fact" },
                    "key": { "type": "string", "description": "Key of the fact" }
                },
                "required": ["category", "key"]
            }),
        },
        forget,
    );
}
