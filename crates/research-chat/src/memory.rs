//! Per-user conversation window used as model context.
//!
//! The window is live state only: it is never persisted, and an interaction
//! record only carries a snapshot of it.

use serde::{Deserialize, Serialize};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Number of most recent turns kept per user.
pub const CONTEXT_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
}

/// Monotonic time source, injectable so expiry can be tested without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { origin: Instant::now(), offset_ms: AtomicU64::new(0) }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

pub trait ContextStore: Send + Sync {
    fn get_context(&self, user_id: &str) -> Vec<ConversationTurn>;
    fn append_turn(&self, user_id: &str, turn: ConversationTurn);
    /// Clears the user's window, returning how many turns were dropped.
    fn reset(&self, user_id: &str) -> usize;
}

struct ContextEntry {
    turns: Vec<ConversationTurn>,
    last_touched: Instant,
}

#[derive(Clone)]
pub struct InMemoryContextStore {
    store: Arc<DashMap<String, ContextEntry>>,
    window: usize,
    clock: Arc<dyn Clock>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            window: CONTEXT_WINDOW,
            clock,
        }
    }

    /// Number of users currently holding a window.
    pub fn active_users(&self) -> usize {
        self.store.len()
    }

    /// Drops every window untouched for longer than `max_idle`.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let before = self.store.len();
        self.store
            .retain(|_, entry| now.saturating_duration_since(entry.last_touched) <= max_idle);
        let evicted = before.saturating_sub(self.store.len());
        if evicted > 0 {
            debug!("Evicted {} idle conversation windows", evicted);
        }
        evicted
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl ContextStore for InMemoryContextStore {
    fn get_context(&self, user_id: &str) -> Vec<ConversationTurn> {
        match self.store.get(user_id) {
            Some(entry) => entry.turns.clone(),
            None => Vec::new(),
        }
    }

    fn append_turn(&self, user_id: &str, turn: ConversationTurn) {
        let now = self.clock.now();
        let mut entry = self.store
            .entry(user_id.to_string())
            .or_insert_with(|| ContextEntry { turns: Vec::new(), last_touched: now });
        entry.turns.push(turn);
        if entry.turns.len() > self.window {
            let excess = entry.turns.len() - self.window;
            entry.turns.drain(..excess);
        }
        entry.last_touched = now;
    }

    fn reset(&self, user_id: &str) -> usize {
        self.store
            .remove(user_id)
            .map(|(_, entry)| entry.turns.len())
            .unwrap_or(0)
    }
}
