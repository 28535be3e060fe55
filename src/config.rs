//! Model provider configuration
//!
//! The chat assistant only runs when the model integration is fully
//! configured; otherwise the orchestrator answers with a placeholder.

use std::env;
use tracing::warn;

/// Configuration for reaching the chat model deployment.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_key: Option<String>,
}

impl ChatConfig {
    /// Read configuration from the environment.
    ///
    /// `GENAI_ENABLED` is the feature flag; `OPENAI_ENDPOINT` and
    /// `OPENAI_DEPLOYMENT` locate the deployment. All three must be
    /// present for the assistant to be enabled.
    pub fn from_env() -> Self {
        let enabled = env::var("GENAI_ENABLED")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        let config = Self {
            enabled,
            endpoint: non_empty(env::var("OPENAI_ENDPOINT").ok()),
            deployment: non_empty(env::var("OPENAI_DEPLOYMENT").ok()),
            api_key: non_empty(env::var("OPENAI_API_KEY").ok()),
        };

        if !config.is_enabled() {
            warn!("GenAI services are not enabled; chat will return a placeholder response");
        }

        config
    }

    /// True when the flag is set and the deployment is reachable in
    /// principle (endpoint + deployment name present).
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.endpoint.is_some() && self.deployment.is_some()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_endpoint() {
        let config = ChatConfig {
            enabled: true,
            endpoint: None,
            deployment: Some("gpt-4o".to_string()),
            api_key: None,
        };
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_disabled_without_flag() {
        let config = ChatConfig {
            enabled: false,
            endpoint: Some("https://example.openai.azure.com".to_string()),
            deployment: Some("gpt-4o".to_string()),
            api_key: Some("key".to_string()),
        };
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_enabled_with_full_config() {
        let config = ChatConfig {
            enabled: true,
            endpoint: Some("https://example.openai.azure.com".to_string()),
            deployment: Some("gpt-4o".to_string()),
            api_key: Some("key".to_string()),
        };
        assert!(config.is_enabled());
    }
}
