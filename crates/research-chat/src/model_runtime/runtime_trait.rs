use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::memory::ConversationTurn;

/// A completed model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    pub content: String,
    /// Total tokens billed for the exchange, when the backend reports it.
    pub token_count: Option<u32>,
}

/// The hosted language model, seen as one opaque request/response call.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Identifier recorded on every interaction.
    fn model_id(&self) -> &str;

    /// `messages` is the full prompt: system instruction first, then the window.
    async fn complete(&self, messages: &[ConversationTurn]) -> anyhow::Result<ModelReply>;
}
