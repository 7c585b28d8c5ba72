use anyhow::{anyhow, Result};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::models::message::{Message, Role};
use crate::models::tool::Tool;

/// Join the configured host with the protocol route, unless the host already
/// points at it. Trailing slashes are ignored.
pub fn normalize_endpoint(host: &str, route: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.contains(route) {
        host.to_string()
    } else {
        format!("{}{}", host, route)
    }
}

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();
    let mut open_tool_ids = HashSet::new();

    for message in messages {
        let converted = match message.role {
            Role::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                if open_tool_ids.contains(id) {
                    json!({
                        "role": "tool",
                        "tool_call_id": id,
                        "content": message.text(),
                    })
                } else {
                    // its call was truncated away; a bare tool message would be rejected
                    json!({
                        "role": "user",
                        "content": format!(
                            "[tool result {}] {}",
                            message.name.as_deref().unwrap_or(id),
                            message.text()
                        ),
                    })
                }
            }
            Role::Assistant if message.has_tool_calls() => {
                open_tool_ids.extend(message.tool_calls.iter().map(|call| call.id.as_str()));
                let tool_calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": sanitize_function_name(&call.name),
                                "arguments": call.arguments,
                            }
                        })
                    })
                    .collect();
                // content is null rather than "" when the model only called tools
                json!({
                    "role": "assistant",
                    "content": message.content.as_deref().filter(|text| !text.is_empty()),
                    "tool_calls": tool_calls,
                })
            }
            role => json!({
                "role": role,
                "content": message.text(),
            }),
        };
        messages_spec.push(converted);
    }

    messages_spec
}

fn check_duplicate_names(tools: &[Tool]) -> Result<()> {
    let mut tool_names = HashSet::new();
    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }
    }
    Ok(())
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    check_duplicate_names(tools)?;
    Ok(tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": sanitize_function_name(&tool.name),
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect())
}

/// Convert internal Tool format to Anthropic's `input_schema` declaration
pub fn tools_to_anthropic_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    check_duplicate_names(tools)?;
    Ok(tools
        .iter()
        .map(|tool| {
            json!({
                "name": sanitize_function_name(&tool.name),
                "description": tool.description,
                "input_schema": tool.parameters,
            })
        })
        .collect())
}

pub fn sanitize_function_name(name: &str) -> String {
    let re = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    re.replace_all(name, "_").to_string()
}

/// Render an error object reported inside a stream as a readable message
pub fn describe_stream_error(error: &Value) -> String {
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());

    let code = error
        .get("code")
        .or_else(|| error.get("type"))
        .and_then(|c| c.as_str());
    match code {
        Some("context_length_exceeded") | Some("string_above_max_length") => {
            format!("Context length exceeded. Message: {}", message)
        }
        _ => message,
    }
}
