//! Environment-backed configuration
//!
//! Credentials and endpoints come from the environment (a local .env file
//! is honored). A missing data-provider token is fatal at startup; a
//! missing chat-model key only disables model-assisted routing and
//! natural-language synthesis.

use crate::error::AgentError;
use crate::Result;
use std::env;
use std::time::Duration;

const DEFAULT_TUSHARE_BASE_URL: &str = "https://api.tushare.pro";
const DEFAULT_LLM_BASE_URL: &str = "https://api.deepseek.com/v1";
const DEFAULT_LLM_MODEL: &str = "deepseek-chat";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ROUND_TRIPS: u32 = 10;

/// Chat-completion endpoint settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub tushare_token: String,
    pub tushare_base_url: String,
    /// None disables the generation capability entirely
    pub llm: Option<LlmConfig>,
    pub tool_timeout: Duration,
    pub llm_timeout: Duration,
    pub max_round_trips: u32,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let tushare_token = env::var("TUSHARE_TOKEN").map_err(|_| {
            AgentError::ConfigError(
                "TUSHARE_TOKEN is not set; see .env.example for setup".to_string(),
            )
        })?;

        let tushare_base_url = env::var("TUSHARE_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_TUSHARE_BASE_URL.to_string());

        let llm = env::var("LLM_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(|api_key| LlmConfig {
                api_key,
                base_url: env::var("LLM_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_LLM_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                model: env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            });

        let tool_timeout = Duration::from_secs(parse_secs("TOOL_TIMEOUT_SECS"));
        let llm_timeout = Duration::from_secs(parse_secs("LLM_TIMEOUT_SECS"));

        let max_round_trips = env::var("MAX_ROUND_TRIPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_ROUND_TRIPS);

        Ok(Self {
            tushare_token,
            tushare_base_url,
            llm,
            tool_timeout,
            llm_timeout,
            max_round_trips,
        })
    }
}

fn parse_secs(var: &str) -> u64 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_token_is_config_error() {
        env::remove_var("TUSHARE_TOKEN");

        let result = AgentConfig::from_env();
        assert!(result.is_err());
        let message = result.unwrap_err().to_string();
        assert!(message.contains("TUSHARE_TOKEN"));

        env::set_var("TUSHARE_TOKEN", "test-token");
        env::remove_var("LLM_API_KEY");
        env::remove_var("OPENAI_API_KEY");

        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.tushare_token, "test-token");
        assert!(config.llm.is_none());
        assert_eq!(config.max_round_trips, 10);
    }
}
