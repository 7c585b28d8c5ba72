use anyhow::Result;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

use super::base::{sse_field, LineDecode, ProviderRequest, ToolCallFragment};
use super::configs::{AnthropicProviderConfig, DEFAULT_ANTHROPIC_MAX_TOKENS};
use super::utils::{
    describe_stream_error, normalize_endpoint, sanitize_function_name, tools_to_anthropic_spec,
};
use crate::models::message::{Message, Role, ToolCallRequest};
use crate::models::tool::Tool;
use crate::token_counter::{char_budget, truncate_messages};

pub const MESSAGES_ROUTE: &str = "/v1/messages";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const STOP_EVENT: &str = "message_stop";

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    config: AnthropicProviderConfig,
}

impl AnthropicAdapter {
    pub fn new(config: AnthropicProviderConfig) -> Self {
        Self { config }
    }

    pub fn endpoint(&self) -> String {
        normalize_endpoint(&self.config.host, MESSAGES_ROUTE)
    }

    pub fn build_request(&self, messages: &[Message], tools: &[Tool]) -> Result<ProviderRequest> {
        let budgeted = truncate_messages(messages, char_budget(self.config.max_context_tokens));
        let (system, conversation) = match budgeted.split_first() {
            Some((first, rest)) if first.role == Role::System => (Some(first.text()), rest),
            _ => (None, &budgeted[..]),
        };
        let tools_spec = tools_to_anthropic_spec(tools)?;

        let mut body = Map::new();
        body.insert("model".to_string(), json!(self.config.model));
        body.insert(
            "max_tokens".to_string(),
            json!(self.config.max_tokens.unwrap_or(DEFAULT_ANTHROPIC_MAX_TOKENS)),
        );
        body.insert("stream".to_string(), json!(true));
        if let Some(system) = system.filter(|s| !s.is_empty()) {
            body.insert("system".to_string(), json!(system));
        }
        body.insert(
            "messages".to_string(),
            json!(messages_to_anthropic_spec(conversation)),
        );
        if !tools_spec.is_empty() {
            body.insert("tools".to_string(), json!(tools_spec));
        }
        if let Some(temp) = self.config.temperature {
            body.insert("temperature".to_string(), json!(temp));
        }

        Ok(ProviderRequest {
            url: self.endpoint(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("x-api-key".to_string(), self.config.api_key.clone()),
                ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
                (
                    "anthropic-dangerous-direct-browser-access".to_string(),
                    "true".to_string(),
                ),
            ],
            body: Value::Object(body),
        })
    }

    /// Decode one `event:` or `data:` line of a messages stream
    pub fn decode_line(line: &str) -> LineDecode {
        if let Some(event) = sse_field(line, "event") {
            return if event == STOP_EVENT {
                LineDecode::end()
            } else {
                LineDecode::default()
            };
        }
        let Some(payload) = sse_field(line, "data") else {
            return LineDecode::default();
        };

        let data: Value = match serde_json::from_str(payload) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, line = payload, "skipping malformed Anthropic stream line");
                return LineDecode::default();
            }
        };

        let index = data
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or_default();

        match data.get("type").and_then(|t| t.as_str()) {
            Some("content_block_start") => {
                let block = &data["content_block"];
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("tool_use") => LineDecode::fragments(vec![ToolCallFragment::Start {
                        index,
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                    }]),
                    Some("text") => LineDecode::text(block["text"].as_str().unwrap_or_default()),
                    _ => LineDecode::default(),
                }
            }
            Some("content_block_delta") => {
                let delta = &data["delta"];
                match delta.get("type").and_then(|t| t.as_str()) {
                    Some("text_delta") => LineDecode::text(delta["text"].as_str().unwrap_or_default()),
                    Some("input_json_delta") => LineDecode::fragments(vec![ToolCallFragment::Delta {
                        index,
                        partial_json: delta["partial_json"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                    }]),
                    _ => LineDecode::default(),
                }
            }
            Some(STOP_EVENT) => LineDecode::end(),
            Some("error") => LineDecode::error(describe_stream_error(&data["error"])),
            _ => LineDecode::default(),
        }
    }

    /// Whether an unterminated trailing line is safe to decode now
    pub fn is_complete_frame(segment: &str) -> bool {
        let trimmed = segment.trim();
        if let Some(event) = sse_field(trimmed, "event") {
            return event == STOP_EVENT;
        }
        match sse_field(trimmed, "data") {
            Some(payload) => {
                payload.ends_with('}') && serde_json::from_str::<Value>(payload).is_ok()
            }
            None => false,
        }
    }
}

/// Anthropic wants tool input as an object, while history keeps the raw text
fn tool_input(call: &ToolCallRequest) -> Value {
    if call.arguments.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(&call.arguments) {
        Ok(value) if value.is_object() => value,
        _ => json!({ "arguments": call.arguments }),
    }
}

fn push_user_blocks(spec: &mut Vec<Value>, blocks: Vec<Value>) {
    if let Some(last) = spec.last_mut() {
        if last["role"] == "user" {
            if let Some(content) = last["content"].as_array_mut() {
                content.extend(blocks);
                return;
            }
        }
    }
    spec.push(json!({"role": "user", "content": blocks}));
}

/// Convert internal Message format to Anthropic's API message specification.
///
/// Tool results travel as `tool_result` blocks inside user messages. A result
/// whose `tool_use` was truncated away, and any system message past the first,
/// is folded into plain user text.
pub fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
    let mut spec = Vec::new();
    let mut open_tool_ids = HashSet::new();

    for message in messages {
        match message.role {
            Role::User => spec.push(json!({"role": "user", "content": message.text()})),
            Role::System => spec.push(json!({
                "role": "user",
                "content": format!("[system] {}", message.text()),
            })),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !message.text().is_empty() {
                    blocks.push(json!({"type": "text", "text": message.text()}));
                }
                for call in &message.tool_calls {
                    open_tool_ids.insert(call.id.as_str());
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": sanitize_function_name(&call.name),
                        "input": tool_input(call),
                    }));
                }
                if !blocks.is_empty() {
                    spec.push(json!({"role": "assistant", "content": blocks}));
                }
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                if open_tool_ids.contains(id) {
                    push_user_blocks(
                        &mut spec,
                        vec![json!({
                            "type": "tool_result",
                            "tool_use_id": id,
                            "content": message.text(),
                        })],
                    );
                } else {
                    spec.push(json!({
                        "role": "user",
                        "content": format!(
                            "[tool result {}] {}",
                            message.name.as_deref().unwrap_or(id),
                            message.text()
                        ),
                    }));
                }
            }
        }
    }

    spec
}
