use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Failures local to a single tool call. These never abort a turn; they are
/// handed back to the model inside the tool-result message.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
}

impl ToolError {
    fn kind(&self) -> &'static str {
        match self {
            ToolError::ToolNotFound(_) => "tool_not_found",
            ToolError::InvalidParameters(_) => "invalid_parameters",
            ToolError::ExecutionError(_) => "execution_error",
        }
    }

    /// Structured payload carried by the tool-result message
    pub fn to_payload(&self) -> Value {
        json!({
            "success": false,
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        })
    }
}

pub type ToolResult<T> = Result<T, ToolError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request failed: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("Connection failed: {0}")]
    Connection(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Connection(err.to_string())
    }
}

/// Errors that terminate a `send`. Cancellation is deliberately absent: an
/// aborted turn is an outcome, not an error.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Backend reported an error: {0}")]
    Backend(String),

    #[error("Could not build request: {0}")]
    Request(#[from] anyhow::Error),

    #[error("Exceeded the limit of {0} tool rounds")]
    ToolRoundLimit(usize),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Name of the environment variable that sets a dotted config key,
/// e.g. `provider.api_key` becomes `CHATSTREAM_PROVIDER__API_KEY`
pub fn to_env_var(field_path: &str) -> String {
    format!(
        "CHATSTREAM_{}",
        field_path.replace('.', "__").to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_payload() {
        let payload = ToolError::ToolNotFound("add_node".to_string()).to_payload();
        assert_eq!(payload["success"], json!(false));
        assert_eq!(payload["error"]["kind"], "tool_not_found");
        assert_eq!(payload["error"]["message"], "Tool not found: add_node");
    }

    #[test]
    fn test_transport_error_display() {
        let err = TurnError::from(TransportError::Status {
            status: 401,
            body: "unauthorized".to_string(),
        });
        assert_eq!(err.to_string(), "Request failed: 401 - unauthorized");
    }

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("provider.api_key"), "CHATSTREAM_PROVIDER__API_KEY");
        assert_eq!(to_env_var("type"), "CHATSTREAM_TYPE");
    }
}
