use anyhow::Result;

use super::{
    anthropic::AnthropicAdapter,
    base::{LineDecode, Protocol, ProviderRequest},
    configs::ProviderConfig,
    openai::OpenAiAdapter,
};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// The protocol strategy for one conversation, chosen once from its config
#[derive(Debug, Clone)]
pub enum Adapter {
    OpenAi(OpenAiAdapter),
    Anthropic(AnthropicAdapter),
}

impl Adapter {
    pub fn protocol(&self) -> Protocol {
        match self {
            Adapter::OpenAi(_) => Protocol::OpenAi,
            Adapter::Anthropic(_) => Protocol::Anthropic,
        }
    }

    /// Serialize the (budgeted) history and tool declarations into a request
    pub fn build_request(&self, messages: &[Message], tools: &[Tool]) -> Result<ProviderRequest> {
        match self {
            Adapter::OpenAi(adapter) => adapter.build_request(messages, tools),
            Adapter::Anthropic(adapter) => adapter.build_request(messages, tools),
        }
    }

    pub fn decode_line(&self, line: &str) -> LineDecode {
        match self {
            Adapter::OpenAi(_) => OpenAiAdapter::decode_line(line),
            Adapter::Anthropic(_) => AnthropicAdapter::decode_line(line),
        }
    }

    pub fn is_complete_frame(&self, segment: &str) -> bool {
        match self {
            Adapter::OpenAi(_) => OpenAiAdapter::is_complete_frame(segment),
            Adapter::Anthropic(_) => AnthropicAdapter::is_complete_frame(segment),
        }
    }
}

pub fn get_adapter(config: ProviderConfig) -> Adapter {
    match config {
        ProviderConfig::OpenAi(openai_config) => Adapter::OpenAi(OpenAiAdapter::new(openai_config)),
        ProviderConfig::Anthropic(anthropic_config) => {
            Adapter::Anthropic(AnthropicAdapter::new(anthropic_config))
        }
    }
}
