//! Record types for the research database
use serde::{Deserialize, Serialize};
use serde_json::Value;
use chrono::{DateTime, Utc};
use crate::events::EventType;
use crate::memory::ConversationTurn;

/// A research subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub request_count: u32,
    pub max_requests: u32,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl UserRecord {
    pub fn has_capacity(&self) -> bool {
        self.request_count < self.max_requests
    }
}

/// Partial update for a user row; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub request_count: Option<u32>,
    pub last_active: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewInteraction {
    pub user_id: String,
    pub session_id: Option<String>,
    pub prompt: String,
    pub response: String,
    pub model: String,
    pub context: Vec<ConversationTurn>,
    pub latency_ms: u64,
    pub token_count: Option<u32>,
}

/// One prompt/response exchange. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub prompt: String,
    pub response: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub context: Vec<ConversationTurn>,
    pub latency_ms: u64,
    pub token_count: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub user_id: String,
    pub session_id: Option<String>,
    pub event_type: EventType,
    pub data: Value,
}

/// One observed UI or lifecycle occurrence. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub total_users: i64,
    pub total_interactions: i64,
    pub total_events: i64,
    pub database_size_bytes: i64,
}
