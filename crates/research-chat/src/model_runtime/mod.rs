//! Language-model collaborator: the trait the gateway calls and its HTTP implementation
pub mod runtime_trait;
pub mod llm_worker;

pub use runtime_trait::{ChatModel, ModelReply};
pub use llm_worker::LLMWorker;
