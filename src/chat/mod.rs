//! Conversation loop: model → tools → model until a final answer.
//!
//! The loop never panics and never propagates errors to the caller: backend
//! failures come back as a formatted string with the caller's history left
//! untouched, tool failures are already strings by the time they reach the
//! transcript, and hitting the iteration cap degrades to a summarization
//! pass.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::models::{ChatMessage, ChatRequest, MessageContent, ModelBackend, ModelTurn};
use crate::tools::ToolContext;

/// Tool results longer than this are cut before entering the transcript.
pub const RESULT_CHAR_LIMIT: usize = 10_000;
/// Appended to a cut result so the model knows output is missing.
pub const TRUNCATION_MARKER: &str = "\n… [output truncated at 10000 characters]";

/// How many trailing transcript messages feed the summarization fallback.
const SUMMARY_TAIL: usize = 6;
const SUMMARY_MAX_TOKENS: u32 = 512;

/// Observer invoked just before each tool call, e.g. for a typing
/// indicator. Failures are the observer's problem; the loop never checks.
pub type ToolStartHook = Arc<dyn Fn(&str, &Value) + Send + Sync>;

pub struct ChatOptions {
    /// Maximum model→tool→model iterations per turn.
    pub max_iterations: usize,
    pub max_tokens: u32,
    pub on_tool_start: Option<ToolStartHook>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        ChatOptions {
            max_iterations: 20,
            max_tokens: 4096,
            on_tool_start: None,
        }
    }
}

/// Run one user turn to completion.
///
/// On success, `history` is extended with the (compacted) user message and
/// the assistant's final text. On a backend error, `history` is untouched
/// and the returned string describes the failure.
pub async fn run_conversation(
    ctx: &ToolContext,
    backend: &dyn ModelBackend,
    base_system_prompt: &str,
    user_message: MessageContent,
    history: &mut Vec<ChatMessage>,
    opts: &ChatOptions,
) -> String {
    let mut transcript = history.clone();
    transcript.push(ChatMessage {
        role: "user".to_string(),
        content: user_message.clone(),
    });

    for iteration in 0..opts.max_iterations {
        let request = ChatRequest {
            system: build_system_prompt(ctx, base_system_prompt),
            tools: ctx.registry.get_schemas(),
            messages: transcript.clone(),
            max_tokens: opts.max_tokens,
        };

        let turn = match backend.complete(request).await {
            Ok(turn) => turn,
            Err(e) => {
                tracing::warn!(error = %e, iteration, "model request failed");
                return format!("Model request failed: {e:#}");
            }
        };

        match turn {
            ModelTurn::Final(text) => {
                commit_turn(history, &user_message, &text);
                return text;
            }
            ModelTurn::ToolUse { content, calls } => {
                transcript.push(ChatMessage::blocks("assistant", content));
                let mut results = Vec::with_capacity(calls.len());
                for call in calls {
                    if let Some(hook) = &opts.on_tool_start {
                        hook(&call.name, &call.input);
                    }
                    let output = ctx.registry.execute(&call.name, call.input, ctx).await;
                    results.push(json!({
                        "type": "tool_result",
                        "tool_use_id": call.id,
                        "content": truncate_result(&output),
                    }));
                }
                // All results of this round travel as one synthetic user turn.
                transcript.push(ChatMessage::blocks("user", results));
            }
        }
    }

    tracing::warn!(
        max_iterations = opts.max_iterations,
        "iteration cap reached, summarizing"
    );
    let text = summarize(backend, &transcript, opts).await;
    commit_turn(history, &user_message, &text);
    text
}

fn build_system_prompt(ctx: &ToolContext, base: &str) -> String {
    let core = ctx.memory.get_core_memories();
    if core.is_empty() {
        base.to_string()
    } else {
        format!("{base}\n\n## Stored memories\n{core}")
    }
}

/// Record the completed turn. Rich user content is not replayed into
/// stored history; a textual placeholder stands in for it.
fn commit_turn(history: &mut Vec<ChatMessage>, user_message: &MessageContent, answer: &str) {
    let stored = match user_message.as_text() {
        Some(t) => MessageContent::Text(t.to_string()),
        None => MessageContent::Text("[message with non-text content]".to_string()),
    };
    history.push(ChatMessage {
        role: "user".to_string(),
        content: stored,
    });
    history.push(ChatMessage::assistant(answer));
}

/// Cut a tool result to [`RESULT_CHAR_LIMIT`] chars, marking the cut.
pub fn truncate_result(output: &str) -> String {
    if output.chars().count() <= RESULT_CHAR_LIMIT {
        return output.to_string();
    }
    let mut cut: String = output.chars().take(RESULT_CHAR_LIMIT).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}

/// One smaller-budget call over the transcript tail: what was the goal,
/// what was tried, where it got stuck. Any failure degrades to a fixed
/// message.
async fn summarize(
    backend: &dyn ModelBackend,
    transcript: &[ChatMessage],
    opts: &ChatOptions,
) -> String {
    let tail = render_tail(transcript, SUMMARY_TAIL);
    let request = ChatRequest {
        system: "The assistant hit its tool-iteration limit before finishing. Summarize for \
                 the user: the goal, what was attempted, what blocked completion, and \
                 suggested next steps. Be brief."
            .to_string(),
        tools: Vec::new(),
        messages: vec![ChatMessage::user(tail)],
        max_tokens: SUMMARY_MAX_TOKENS.min(opts.max_tokens),
    };
    match backend.complete(request).await {
        Ok(ModelTurn::Final(text)) if !text.trim().is_empty() => text,
        _ => "I wasn't able to finish this task within the allowed number of steps. It may be \
              too complex for a single request; try breaking it into smaller pieces."
            .to_string(),
    }
}

fn render_tail(transcript: &[ChatMessage], n: usize) -> String {
    let start = transcript.len().saturating_sub(n);
    transcript[start..]
        .iter()
        .map(|m| match &m.content {
            MessageContent::Text(t) => format!("{}: {}", m.role, t),
            MessageContent::Blocks(blocks) => {
                format!("{}: [tool activity: {} block(s)]", m.role, blocks.len())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
