//! Hosted model client.
//!
//! Speaks the chat-completions protocol either in its OpenAI-compatible form
//! (`/v1/chat/completions`, bearer token) or in the Azure deployment form
//! (`/openai/deployments/{name}/chat/completions?api-version=..`, `api-key` header).
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::memory::ConversationTurn;
use crate::model_runtime::{ChatModel, ModelReply};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ConversationTurn],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
enum Credentials {
    ApiKey(String),
    Bearer(String),
    None,
}

pub struct LLMWorker {
    completions_url: String,
    credentials: Credentials,
    deployment: String,
    azure_style: bool,
    max_tokens: u32,
    temperature: f32,
    http_client: reqwest::Client,
}

impl LLMWorker {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let azure_style = cfg.llm_api_version.is_some();
        let completions_url = match &cfg.llm_api_version {
            Some(version) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                cfg.llm_endpoint, cfg.llm_deployment, version
            ),
            None => format!("{}/v1/chat/completions", cfg.llm_endpoint),
        };
        let credentials = match (&cfg.llm_api_key, azure_style) {
            (Some(key), true) => Credentials::ApiKey(key.clone()),
            (Some(key), false) => Credentials::Bearer(key.clone()),
            (None, _) => Credentials::None,
        };
        let http_client = reqwest::Client::builder()
            .timeout(cfg.llm_timeout())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build model HTTP client: {}", e))?;

        info!("LLM worker initialized with deployment {} at {}", cfg.llm_deployment, cfg.llm_endpoint);
        Ok(Self {
            completions_url,
            credentials,
            deployment: cfg.llm_deployment.clone(),
            azure_style,
            max_tokens: cfg.llm_max_tokens,
            temperature: cfg.llm_temperature,
            http_client,
        })
    }

    pub fn completions_url(&self) -> &str {
        &self.completions_url
    }
}

#[async_trait]
impl ChatModel for LLMWorker {
    fn model_id(&self) -> &str {
        &self.deployment
    }

    async fn complete(&self, messages: &[ConversationTurn]) -> anyhow::Result<ModelReply> {
        debug!("LLM worker sending {} messages", messages.len());
        let request = ChatCompletionRequest {
            model: (!self.azure_style).then_some(self.deployment.as_str()),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut builder = self.http_client.post(&self.completions_url).json(&request);
        builder = match &self.credentials {
            Credentials::ApiKey(key) => builder.header("api-key", key),
            Credentials::Bearer(key) => builder.bearer_auth(key),
            Credentials::None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("LLM backend request failed: {}", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("LLM backend returned {}: {}", status, body));
        }

        let completion: ChatCompletionResponse = response.json().await
            .map_err(|e| anyhow::anyhow!("Failed to parse LLM response: {}", e))?;
        let content = completion.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("LLM backend returned no content"))?;

        Ok(ModelReply {
            content,
            token_count: completion.usage.and_then(|u| u.total_tokens),
        })
    }
}
