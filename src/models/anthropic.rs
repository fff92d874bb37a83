//! Anthropic-style messages backend over HTTP.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::ModelConfig;
use crate::models::{ChatRequest, MessageContent, ModelBackend, ModelTurn, ToolCallRequest};
use crate::utils::truncate_str;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    request_timeout: Duration,
}

impl AnthropicBackend {
    /// Build a backend from config; the API key comes from the environment
    /// variable the config names.
    pub fn new(cfg: &ModelConfig) -> anyhow::Result<AnthropicBackend> {
        let api_key = std::env::var(&cfg.api_key_env)
            .with_context(|| format!("environment variable {} is not set", cfg.api_key_env))?;
        Ok(AnthropicBackend {
            client: reqwest::Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
        })
    }
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    async fn complete(&self, req: ChatRequest) -> anyhow::Result<ModelTurn> {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| match &m.content {
                MessageContent::Text(t) => json!({ "role": m.role, "content": t }),
                MessageContent::Blocks(b) => json!({ "role": m.role, "content": b }),
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": req.max_tokens,
            "system": req.system,
            "messages": messages,
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools);
        }

        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .context("model request failed")?;

        let status = resp.status();
        let raw: Value = resp.json().await.context("model response was not JSON")?;
        if !status.is_success() {
            let detail = raw["error"]["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| truncate_str(&raw.to_string(), 300));
            anyhow::bail!("model API returned {status}: {detail}");
        }

        parse_response(&raw)
    }
}

/// Interpret a messages-API response body.
fn parse_response(raw: &Value) -> anyhow::Result<ModelTurn> {
    let content = raw["content"]
        .as_array()
        .context("model response missing 'content' array")?;

    if raw["stop_reason"].as_str() == Some("tool_use") {
        let calls: Vec<ToolCallRequest> = content
            .iter()
            .filter(|b| b["type"] == "tool_use")
            .map(|b| ToolCallRequest {
                id: b["id"].as_str().unwrap_or_default().to_string(),
                name: b["name"].as_str().unwrap_or_default().to_string(),
                input: b["input"].clone(),
            })
            .collect();
        if calls.is_empty() {
            anyhow::bail!("stop_reason was tool_use but no tool_use blocks were present");
        }
        return Ok(ModelTurn::ToolUse {
            content: content.clone(),
            calls,
        });
    }

    let text: Vec<&str> = content
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();
    Ok(ModelTurn::Final(text.join("")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_final_text() {
        let raw = json!({
            "stop_reason": "end_turn",
            "content": [
                { "type": "text", "text": "Hello " },
                { "type": "text", "text": "world" }
            ]
        });
        match parse_response(&raw).unwrap() {
            ModelTurn::Final(t) => assert_eq!(t, "Hello world"),
            other => panic!("expected Final, got {other:?}"),
        }
    }

    #[test]
    fn parses_tool_use_blocks() {
        let raw = json!({
            "stop_reason": "tool_use",
            "content": [
                { "type": "text", "text": "Let me check." },
                { "type": "tool_use", "id": "tc_1", "name": "recall",
                  "input": { "query": "weather" } }
            ]
        });
        match parse_response(&raw).unwrap() {
            ModelTurn::ToolUse { content, calls } => {
                assert_eq!(content.len(), 2);
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "recall");
                assert_eq!(calls[0].input["query"], "weather");
            }
            other => panic!("expected ToolUse, got {other:?}"),
        }
    }

    #[test]
    fn tool_use_without_blocks_is_an_error() {
        let raw = json!({
            "stop_reason": "tool_use",
            "content": [{ "type": "text", "text": "hm" }]
        });
        assert!(parse_response(&raw).is_err());
    }
}
