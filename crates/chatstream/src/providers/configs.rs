// Unified enum to wrap the configuration of either wire protocol
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
    Anthropic(AnthropicProviderConfig),
}

pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 128_000;
pub const DEFAULT_ANTHROPIC_MAX_TOKENS: i32 = 4096;

#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    /// Budget applied to the outgoing history, in tokens
    pub max_context_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub max_context_tokens: usize,
}
