use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The wire dialects a conversation can speak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    OpenAi,
    Anthropic,
}

/// Everything the transport needs to open one streaming request
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl ProviderRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A partial tool-call descriptor as it arrives on the stream.
///
/// OpenAI-style fragments identify their entry implicitly: the first fragment
/// seen for an `index` opens it. Anthropic-style streams open an entry with an
/// explicit `Start` and then feed `Delta`s into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCallFragment {
    OpenAi {
        index: usize,
        id: Option<String>,
        function_name: Option<String>,
        arguments_chunk: Option<String>,
    },
    Start {
        index: usize,
        id: String,
        name: String,
    },
    Delta {
        index: usize,
        partial_json: String,
    },
}

impl ToolCallFragment {
    pub fn index(&self) -> usize {
        match self {
            ToolCallFragment::OpenAi { index, .. }
            | ToolCallFragment::Start { index, .. }
            | ToolCallFragment::Delta { index, .. } => *index,
        }
    }
}

/// What a single protocol line contributed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineDecode {
    pub text_delta: String,
    pub tool_call_fragments: Vec<ToolCallFragment>,
    pub is_end: bool,
    /// An error the backend reported inside the stream itself
    pub error: Option<String>,
}

impl LineDecode {
    pub fn end() -> Self {
        LineDecode {
            is_end: true,
            ..Default::default()
        }
    }

    pub fn text<S: Into<String>>(text: S) -> Self {
        LineDecode {
            text_delta: text.into(),
            ..Default::default()
        }
    }

    pub fn fragments(fragments: Vec<ToolCallFragment>) -> Self {
        LineDecode {
            tool_call_fragments: fragments,
            ..Default::default()
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        LineDecode {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// What one raw chunk (plus the previous carry) contributed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeResult {
    pub text_delta: String,
    pub tool_call_fragments: Vec<ToolCallFragment>,
    pub is_end: bool,
    pub error: Option<String>,
    /// The unconsumed tail, to be passed back as the next carry
    pub remainder: String,
}

impl DecodeResult {
    pub(crate) fn absorb(&mut self, line: LineDecode) {
        self.text_delta.push_str(&line.text_delta);
        self.tool_call_fragments.extend(line.tool_call_fragments);
        self.is_end |= line.is_end;
        if self.error.is_none() {
            self.error = line.error;
        }
    }
}

/// Strip an SSE field prefix such as `data:` and the optional single space after it
pub(crate) fn sse_field<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest).trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_field() {
        assert_eq!(sse_field("data: {\"a\":1}", "data"), Some("{\"a\":1}"));
        assert_eq!(sse_field("data:[DONE]", "data"), Some("[DONE]"));
        assert_eq!(sse_field("event: message_stop\r", "event"), Some("message_stop"));
        assert_eq!(sse_field("datum: x", "data"), None);
    }

    #[test]
    fn test_request_header_lookup_is_case_insensitive() {
        let request = ProviderRequest {
            url: "http://localhost/v1/messages".to_string(),
            headers: vec![("x-api-key".to_string(), "secret".to_string())],
            body: Value::Null,
        };
        assert_eq!(request.header("X-Api-Key"), Some("secret"));
        assert_eq!(request.header("authorization"), None);
    }
}
