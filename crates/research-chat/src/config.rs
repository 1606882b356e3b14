// research-chat/src/config.rs

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::utils::TextUtils;

/// Slack kept between the model budget and the request timeout for storage writes.
const MAX_STORAGE_HEADROOM: Duration = Duration::from_secs(5);

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer the user's questions clearly and concisely.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
    /// Document store used by the hosted deployment; selectable but not built in.
    Cosmos,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(StorageBackend::Sqlite),
            "memory" => Ok(StorageBackend::Memory),
            "cosmos" | "cosmosdb" => Ok(StorageBackend::Cosmos),
            other => Err(anyhow::anyhow!(
                "Unknown STORAGE_BACKEND '{}'; expected sqlite, memory or cosmos",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub llm_endpoint: String,
    pub llm_api_key: Option<String>,
    pub llm_deployment: String,
    pub llm_api_version: Option<String>,
    pub llm_timeout_seconds: u64,
    pub llm_max_retries: u32,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,
    pub system_prompt: String,
    pub max_requests_per_user: u32,
    /// Canonical (trimmed, upper-cased) identifiers.
    pub allowed_user_ids: HashSet<String>,
    pub storage_backend: StorageBackend,
    pub database_path: String,
    pub cors_origin: String,
    pub context_idle_ttl_seconds: Option<u64>,
    pub request_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let llm_endpoint = env::var("LLM_ENDPOINT")
            .context("LLM_ENDPOINT environment variable not set. Please set it in your .env file")?;

        let allowed_user_ids = Self::parse_allow_list(&env::var("ALLOWED_USER_IDS").unwrap_or_default());
        if allowed_user_ids.is_empty() {
            warn!("ALLOWED_USER_IDS is empty; every user will be rejected");
        }

        let max_requests_per_user: u32 = env::var("MAX_REQUESTS_PER_USER")
            .unwrap_or_else(|_| "20".into())
            .parse()
            .context("MAX_REQUESTS_PER_USER must be a positive integer")?;
        if max_requests_per_user == 0 {
            return Err(anyhow::anyhow!("MAX_REQUESTS_PER_USER must be at least 1"));
        }

        let context_idle_ttl_seconds = match env::var("CONTEXT_IDLE_TTL_SECONDS") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse()
                    .context("CONTEXT_IDLE_TTL_SECONDS must be a number of seconds")?,
            ),
            _ => None,
        };

        let request_timeout_seconds: u64 = env::var("REQUEST_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "120".into())
            .parse()
            .context("REQUEST_TIMEOUT_SECONDS must be a number of seconds")?;
        if request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("REQUEST_TIMEOUT_SECONDS must be at least 1"));
        }

        Ok(Self {
            api_host: env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            api_port: env::var("API_PORT").unwrap_or_else(|_| "3000".into()).parse()?,
            llm_endpoint: llm_endpoint.trim_end_matches('/').to_string(),
            llm_api_key: Self::optional_var("LLM_API_KEY"),
            llm_deployment: env::var("LLM_DEPLOYMENT").unwrap_or_else(|_| "gpt-4o-mini".into()),
            llm_api_version: Self::optional_var("LLM_API_VERSION"),
            llm_timeout_seconds: env::var("LLM_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "60".into())
                .parse()?,
            llm_max_retries: env::var("LLM_MAX_RETRIES")
                .unwrap_or_else(|_| "0".into())
                .parse()?,
            llm_max_tokens: env::var("LLM_MAX_TOKENS")
                .unwrap_or_else(|_| "1000".into())
                .parse()?,
            llm_temperature: env::var("LLM_TEMPERATURE")
                .unwrap_or_else(|_| "0.7".into())
                .parse()?,
            system_prompt: env::var("SYSTEM_PROMPT").unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.into()),
            max_requests_per_user,
            allowed_user_ids,
            storage_backend: env::var("STORAGE_BACKEND")
                .unwrap_or_else(|_| "sqlite".into())
                .parse()?,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/research.db".into()),
            cors_origin: env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".into()),
            context_idle_ttl_seconds,
            request_timeout_seconds,
        })
    }

    fn optional_var(name: &str) -> Option<String> {
        env::var(name).ok().filter(|v| !v.trim().is_empty())
    }

    /// Comma-separated list; entries are trimmed and upper-cased, blanks dropped.
    pub fn parse_allow_list(raw: &str) -> HashSet<String> {
        raw.split(',')
            .map(TextUtils::normalize_user_id)
            .filter(|id| !id.is_empty())
            .collect()
    }

    pub fn is_allowed(&self, user_id: &str) -> bool {
        self.allowed_user_ids.contains(&TextUtils::normalize_user_id(user_id))
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Total time a submission may spend on model attempts and backoff. Always
    /// ends before the request timeout so a slow model surfaces as a model
    /// failure rather than a dropped request.
    pub fn model_budget(&self) -> Duration {
        let request = self.request_timeout();
        request - MAX_STORAGE_HEADROOM.min(request / 10)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Model Endpoint: {}", self.llm_endpoint);
        info!("- Model Deployment: {}", self.llm_deployment);
        info!("- Model API Version: {}", self.llm_api_version.as_deref().unwrap_or("(openai-compatible)"));
        info!("- Model API Key: {}", if self.llm_api_key.is_some() { "set" } else { "not set" });
        info!("- Model Timeout: {}s (retries: {})", self.llm_timeout_seconds, self.llm_max_retries);
        info!(
            "- Request Timeout: {}s (model budget {}ms)",
            self.request_timeout_seconds,
            self.model_budget().as_millis()
        );
        info!("- Requests Per User: {}", self.max_requests_per_user);
        info!("- Allowed Users: {}", self.allowed_user_ids.len());
        info!("- Storage: {:?} ({})", self.storage_backend, self.database_path);
        info!("- CORS Origin: {}", self.cors_origin);
        match self.context_idle_ttl_seconds {
            Some(ttl) => info!("- Context Idle TTL: {}s", ttl),
            None => info!("- Context Idle TTL: disabled"),
        }
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        api_host: "127.0.0.1".to_string(),
        api_port: 3000,
        llm_endpoint: "http://127.0.0.1:9".to_string(),
        llm_api_key: Some("test-key".to_string()),
        llm_deployment: "gpt-4o-mini".to_string(),
        llm_api_version: None,
        llm_timeout_seconds: 5,
        llm_max_retries: 0,
        llm_max_tokens: 256,
        llm_temperature: 0.7,
        system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        max_requests_per_user: 2,
        allowed_user_ids: Config::parse_allow_list("A01234567"),
        storage_backend: StorageBackend::Memory,
        database_path: ":memory:".to_string(),
        cors_origin: "*".to_string(),
        context_idle_ttl_seconds: None,
        request_timeout_seconds: 30,
    }
}
