// research-chat/src/lib.rs

pub mod api;
pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod memory;
pub mod metrics;
pub mod model_runtime;
pub mod server;
pub mod shared_state;
pub mod storage;
pub mod telemetry;
pub mod utils;

// Public API exports
pub use config::Config;
pub use error::GatewayError;
pub use events::EventType;
pub use gateway::Gateway;
pub use memory::{ContextStore, ConversationTurn, InMemoryContextStore, Role};
pub use model_runtime::{ChatModel, LLMWorker, ModelReply};
pub use server::{build_router, run_server};
pub use storage::{open_store, ResearchStore, SqliteStore};
