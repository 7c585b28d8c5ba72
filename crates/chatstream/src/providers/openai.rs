use anyhow::Result;
use serde_json::{json, Map, Value};

use super::base::{sse_field, LineDecode, ProviderRequest, ToolCallFragment};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    describe_stream_error, messages_to_openai_spec, normalize_endpoint, tools_to_openai_spec,
};
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::token_counter::{char_budget, truncate_messages};

pub const CHAT_COMPLETIONS_ROUTE: &str = "/chat/completions";
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    config: OpenAiProviderConfig,
}

impl OpenAiAdapter {
    pub fn new(config: OpenAiProviderConfig) -> Self {
        Self { config }
    }

    pub fn endpoint(&self) -> String {
        normalize_endpoint(&self.config.host, CHAT_COMPLETIONS_ROUTE)
    }

    pub fn build_request(&self, messages: &[Message], tools: &[Tool]) -> Result<ProviderRequest> {
        let budgeted = truncate_messages(messages, char_budget(self.config.max_context_tokens));
        let tools_spec = tools_to_openai_spec(tools)?;

        let mut body = Map::new();
        body.insert("model".to_string(), json!(self.config.model));
        body.insert("stream".to_string(), json!(true));
        body.insert("messages".to_string(), json!(messages_to_openai_spec(&budgeted)));

        if !tools_spec.is_empty() {
            body.insert("tools".to_string(), json!(tools_spec));
        }
        if let Some(temp) = self.config.temperature {
            body.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = self.config.max_tokens {
            body.insert("max_tokens".to_string(), json!(tokens));
        }

        Ok(ProviderRequest {
            url: self.endpoint(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                (
                    "Authorization".to_string(),
                    format!("Bearer {}", self.config.api_key),
                ),
            ],
            body: Value::Object(body),
        })
    }

    /// Decode one `data:` line of a chat-completions stream
    pub fn decode_line(line: &str) -> LineDecode {
        let Some(payload) = sse_field(line, "data") else {
            // comments (": keep-alive") and other fields carry nothing for us
            return LineDecode::default();
        };
        if payload == DONE_MARKER {
            return LineDecode::end();
        }

        let data: Value = match serde_json::from_str(payload) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, line = payload, "skipping malformed OpenAI stream line");
                return LineDecode::default();
            }
        };

        if let Some(error) = data.get("error") {
            return LineDecode::error(describe_stream_error(error));
        }

        let Some(delta) = data.pointer("/choices/0/delta") else {
            return LineDecode::default();
        };

        let mut decoded = LineDecode::default();
        if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
            decoded.text_delta.push_str(text);
        }
        if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            for (position, tool_call) in tool_calls.iter().enumerate() {
                decoded.tool_call_fragments.push(Self::fragment(position, tool_call));
            }
        }
        decoded
    }

    fn fragment(position: usize, tool_call: &Value) -> ToolCallFragment {
        let as_string = |value: Option<&Value>| value.and_then(|v| v.as_str()).map(str::to_string);
        // some compatible backends omit the index when only one call is streamed
        let index = tool_call
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        ToolCallFragment::OpenAi {
            index,
            id: as_string(tool_call.get("id")).filter(|id| !id.is_empty()),
            function_name: as_string(tool_call.pointer("/function/name"))
                .filter(|name| !name.is_empty()),
            arguments_chunk: as_string(tool_call.pointer("/function/arguments")),
        }
    }

    /// Whether an unterminated trailing line is safe to decode now
    pub fn is_complete_frame(segment: &str) -> bool {
        let trimmed = segment.trim();
        match sse_field(trimmed, "data") {
            Some(DONE_MARKER) => true,
            Some(payload) => {
                payload.ends_with('}') && serde_json::from_str::<Value>(payload).is_ok()
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::ToolCallRequest;
    use crate::providers::configs::DEFAULT_MAX_CONTEXT_TOKENS;

    fn adapter(host: &str) -> OpenAiAdapter {
        OpenAiAdapter::new(OpenAiProviderConfig {
            host: host.to_string(),
            api_key: "test_api_key".to_string(),
            model: "gpt-4o".to_string(),
            temperature: Some(0.7),
            max_tokens: None,
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
        })
    }

    #[test]
    fn test_build_request() -> Result<()> {
        let tool = Tool::new("add_node", "Add a node", json!({"type": "object"}));
        let messages = vec![Message::system("You help with mind maps."), Message::user("Hi")];

        let request = adapter("https://api.openai.com/v1/").build_request(&messages, &[tool])?;

        assert_eq!(request.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(request.header("authorization"), Some("Bearer test_api_key"));
        assert_eq!(request.body["model"], "gpt-4o");
        assert_eq!(request.body["stream"], true);
        assert_eq!(request.body["messages"].as_array().map(Vec::len), Some(2));
        assert_eq!(request.body["tools"][0]["function"]["name"], "add_node");
        assert!(request.body["temperature"].is_number());
        assert!(request.body.get("max_tokens").is_none());
        Ok(())
    }

    #[test]
    fn test_build_request_without_tools_omits_key() -> Result<()> {
        let request = adapter("http://localhost").build_request(&[Message::user("Hi")], &[])?;
        assert!(request.body.get("tools").is_none());
        Ok(())
    }

    #[test]
    fn test_build_request_applies_context_budget() -> Result<()> {
        let mut small = adapter("http://localhost");
        small.config.max_context_tokens = 10;
        let messages = vec![
            Message::system("sys"),
            Message::user("x".repeat(100)),
            Message::user("recent"),
        ];

        let request = small.build_request(&messages, &[])?;
        let sent = request.body["messages"].as_array().cloned().unwrap_or_default();

        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["content"], "sys");
        assert_eq!(sent[1]["content"], "recent");
        // the caller's history is untouched
        assert_eq!(messages.len(), 3);
        Ok(())
    }

    #[test]
    fn test_decode_text_line() {
        let decoded = OpenAiAdapter::decode_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#);
        assert_eq!(decoded.text_delta, "Hel");
        assert!(!decoded.is_end);
        assert!(decoded.tool_call_fragments.is_empty());
    }

    #[test]
    fn test_decode_done_line() {
        assert!(OpenAiAdapter::decode_line("data: [DONE]").is_end);
        assert!(OpenAiAdapter::decode_line("data:[DONE]").is_end);
    }

    #[test]
    fn test_decode_tool_call_fragments() {
        let first = OpenAiAdapter::decode_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","type":"function","function":{"name":"f","arguments":"{\"x\":"}}]}}]}"#,
        );
        assert_eq!(
            first.tool_call_fragments,
            vec![ToolCallFragment::OpenAi {
                index: 0,
                id: Some("a".to_string()),
                function_name: Some("f".to_string()),
                arguments_chunk: Some(r#"{"x":"#.to_string()),
            }]
        );

        let second = OpenAiAdapter::decode_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"1}"}}]}}]}"#,
        );
        assert_eq!(
            second.tool_call_fragments,
            vec![ToolCallFragment::OpenAi {
                index: 0,
                id: None,
                function_name: None,
                arguments_chunk: Some("1}".to_string()),
            }]
        );
    }

    #[test]
    fn test_decode_malformed_and_foreign_lines() {
        assert_eq!(OpenAiAdapter::decode_line("data: {not json"), LineDecode::default());
        assert_eq!(OpenAiAdapter::decode_line(": keep-alive"), LineDecode::default());
        assert_eq!(
            OpenAiAdapter::decode_line(r#"data: {"choices":[]}"#),
            LineDecode::default()
        );
    }

    #[test]
    fn test_decode_stream_error() {
        let decoded = OpenAiAdapter::decode_line(
            r#"data: {"error":{"code":"rate_limit_exceeded","message":"Slow down"}}"#,
        );
        assert_eq!(decoded.error.as_deref(), Some("Slow down"));
    }

    #[test]
    fn test_is_complete_frame() {
        assert!(OpenAiAdapter::is_complete_frame("data: [DONE]"));
        assert!(OpenAiAdapter::is_complete_frame(r#"data: {"choices":[]}"#));
        assert!(!OpenAiAdapter::is_complete_frame(r#"data: {"choices":[{"delta":{"content":"}"#));
        assert!(!OpenAiAdapter::is_complete_frame("data: [DO"));
    }

    #[test]
    fn test_assistant_tool_call_roundtrip_into_request() -> Result<()> {
        let messages = vec![
            Message::user("Add a node"),
            Message::assistant()
                .with_tool_calls(vec![ToolCallRequest::new("a", "f", r#"{"x":1}"#)]),
            Message::tool_result("a", "f", r#"{"ok":true}"#),
        ];
        let request = adapter("http://localhost").build_request(&messages, &[])?;

        assert_eq!(request.body["messages"][1]["tool_calls"][0]["id"], "a");
        assert_eq!(request.body["messages"][2]["role"], "tool");
        assert_eq!(request.body["messages"][2]["tool_call_id"], "a");
        Ok(())
    }
}
