use config::{Config, Environment};
use serde::Deserialize;

use crate::agent::DEFAULT_MAX_TOOL_ROUNDS;
use crate::errors::{to_env_var, ConfigError};
use crate::providers::configs::{
    AnthropicProviderConfig, OpenAiProviderConfig, ProviderConfig, DEFAULT_MAX_CONTEXT_TOKENS,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    Anthropic {
        #[serde(default = "default_anthropic_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_anthropic_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
}

impl ProviderSettings {
    // Convert to the adapter's ProviderConfig
    pub fn into_config(self, max_context_tokens: usize) -> ProviderConfig {
        match self {
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                max_context_tokens,
            }),
            ProviderSettings::Anthropic {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Anthropic(AnthropicProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                max_context_tokens,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ContextSettings {
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub provider: ProviderSettings,
    #[serde(default)]
    pub context: ContextSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    /// The adapter config with the context budget folded in
    pub fn provider_config(self) -> ProviderConfig {
        self.provider.into_config(self.context.max_context_tokens)
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("context.max_context_tokens", default_max_context_tokens() as u64)?
            .set_default("context.max_tool_rounds", default_max_tool_rounds() as u64)?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("CHATSTREAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // every required field lives under `provider`
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    let path = match field {
                        "provider" => "provider.type".to_string(),
                        field => format!("provider.{}", field),
                    };
                    let env_var = to_env_var(&path);
                    Err(ConfigError::MissingEnvVar { env_var })
                } else if let config::ConfigError::NotFound(field) = &err {
                    let env_var = to_env_var(field);
                    Err(ConfigError::MissingEnvVar { env_var })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_openai_host() -> String {
    "https://api.openai.com".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_anthropic_host() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_max_context_tokens() -> usize {
    DEFAULT_MAX_CONTEXT_TOKENS
}

fn default_max_tool_rounds() -> usize {
    DEFAULT_MAX_TOOL_ROUNDS
}
