use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Azure OpenAI deployment settings plus call tunables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_key: String,
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
    pub timeout: Duration,
    pub temperature: f32,
}

impl ServiceConfig {
    pub fn from_env(timeout_secs: u64, temperature: f32) -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok(), timeout_secs, temperature)
    }

    fn from_lookup<F>(lookup: F, timeout_secs: u64, temperature: f32) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("{name} must be set to reach the Azure OpenAI deployment"))
        };

        Ok(Self {
            api_key: required("AZURE_OPENAI_API_KEY")?,
            endpoint: required("AZURE_ENDPOINT")?,
            deployment: required("AZURE_DEPLOYMENT_NAME")?,
            api_version: lookup("OPENAI_API_VERSION")
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            timeout: Duration::from_secs(timeout_secs.max(1)),
            temperature,
        })
    }

    pub fn chat_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        )
    }
}
