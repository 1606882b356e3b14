//! Rate-limited gateway between research subjects and the hosted model.
//!
//! Every call is validated against the allow-list; submissions are counted
//! against a per-user ceiling and recorded as one interaction each.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::random;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::GatewayError;
use crate::events::EventType;
use crate::memory::{ContextStore, ConversationTurn};
use crate::metrics;
use crate::model_runtime::{ChatModel, ModelReply};
use crate::storage::{NewEvent, NewInteraction, ResearchStore};
use crate::utils::TextUtils;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckUserResponse {
    pub authorized: bool,
    pub request_count: u32,
    pub max_cap: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub response: String,
    pub new_request_count: u32,
    pub max_cap: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEventResponse {
    pub success: bool,
}

/// Exponential backoff between model attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_retries: cfg.llm_max_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }

    /// `attempt` is zero-based; up to 10% jitter is added on top.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * 2f64.powi(attempt.min(16) as i32);
        let jittered = base * (1.0 + random::<f64>() * 0.1);
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()))
    }
}

pub struct Gateway {
    config: Arc<Config>,
    store: Arc<dyn ResearchStore>,
    contexts: Arc<dyn ContextStore>,
    model: Arc<dyn ChatModel>,
    retry: RetryPolicy,
    user_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Gateway {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ResearchStore>,
        contexts: Arc<dyn ContextStore>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            config,
            store,
            contexts,
            model,
            retry,
            user_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ResearchStore> {
        &self.store
    }

    pub fn max_cap(&self) -> u32 {
        self.config.max_requests_per_user
    }

    fn require<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, GatewayError> {
        TextUtils::non_blank(value).ok_or_else(|| GatewayError::missing_field(field))
    }

    /// Allow-list check; returns the canonical identifier.
    fn authorize(&self, user_id: &str) -> Result<String, GatewayError> {
        if !self.config.is_allowed(user_id) {
            return Err(GatewayError::Unauthorized);
        }
        Ok(TextUtils::normalize_user_id(user_id))
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn check_user(&self, user_id: Option<&str>) -> Result<CheckUserResponse, GatewayError> {
        let user_id = self.authorize(Self::require(user_id, "userID")?)?;

        let user = match self.store.get_user(&user_id).await.map_err(GatewayError::Storage)? {
            Some(user) => user,
            None => {
                info!("Registering research user {}", user_id);
                self.store
                    .create_user(&user_id, self.config.max_requests_per_user)
                    .await
                    .map_err(GatewayError::Storage)?
            }
        };

        if !user.has_capacity() {
            return Err(GatewayError::CapacityExceeded {
                count: user.request_count,
                ceiling: user.max_requests,
            });
        }

        Ok(CheckUserResponse {
            authorized: true,
            request_count: user.request_count,
            max_cap: user.max_requests,
        })
    }

    pub async fn submit(
        &self,
        user_id: Option<&str>,
        prompt: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<SubmitResponse, GatewayError> {
        let started = Instant::now();
        let raw_user = Self::require(user_id, "userID")?;
        Self::require(prompt, "prompt")?;
        let prompt = prompt.unwrap_or_default().to_string();
        let user_id = self.authorize(raw_user)?;
        let session_id = TextUtils::non_blank(session_id).map(str::to_string);

        // One submission per user at a time.
        let lock = self.user_lock(&user_id);
        let _guard = lock.lock().await;

        let user = self
            .store
            .get_user(&user_id)
            .await
            .map_err(GatewayError::Storage)?
            .ok_or_else(|| GatewayError::NotFound(user_id.clone()))?;

        if !user.has_capacity() {
            return Err(GatewayError::CapacityExceeded {
                count: user.request_count,
                ceiling: user.max_requests,
            });
        }

        self.contexts.append_turn(&user_id, ConversationTurn::user(prompt.clone()));

        let mut messages = Vec::with_capacity(crate::memory::CONTEXT_WINDOW + 1);
        messages.push(ConversationTurn::system(self.config.system_prompt.clone()));
        messages.extend(self.contexts.get_context(&user_id));
        debug!("Submitting {} context turns for {}", messages.len() - 1, user_id);

        let deadline = started + self.config.model_budget();
        let reply = self.call_model(&messages, deadline).await?;

        self.contexts.append_turn(&user_id, ConversationTurn::assistant(reply.content.clone()));
        let latency = started.elapsed();
        metrics::observe_model_latency(latency.as_secs_f64());

        let (new_request_count, interaction) = self
            .store
            .record_submission(NewInteraction {
                user_id: user_id.clone(),
                session_id,
                prompt,
                response: reply.content.clone(),
                model: self.model.model_id().to_string(),
                context: self.contexts.get_context(&user_id),
                latency_ms: latency.as_millis() as u64,
                token_count: reply.token_count,
            })
            .await
            .map_err(GatewayError::Storage)?;
        metrics::inc_interactions();

        info!(
            "Recorded interaction {} for {} ({}/{}, {}ms)",
            interaction.id, user_id, new_request_count, user.max_requests, interaction.latency_ms
        );

        Ok(SubmitResponse {
            response: reply.content,
            new_request_count,
            max_cap: user.max_requests,
            token_count: reply.token_count,
        })
    }

    /// Calls the model under the configured timeout, retrying per policy.
    /// No attempt or backoff runs past `deadline`.
    async fn call_model(
        &self,
        messages: &[ConversationTurn],
        deadline: Instant,
    ) -> Result<ModelReply, GatewayError> {
        let per_attempt = self.config.llm_timeout();
        let mut attempt = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(GatewayError::Upstream(anyhow::anyhow!(
                    "model call exceeded the request budget"
                )));
            }
            let timeout = per_attempt.min(remaining);

            let failure = match tokio::time::timeout(timeout, self.model.complete(messages)).await {
                Ok(Ok(reply)) if !reply.content.trim().is_empty() => return Ok(reply),
                Ok(Ok(_)) => anyhow::anyhow!("model returned empty content"),
                Ok(Err(e)) => e,
                Err(_) => anyhow::anyhow!("model call timed out after {}ms", timeout.as_millis()),
            };

            if attempt >= self.retry.max_retries {
                return Err(GatewayError::Upstream(failure));
            }
            let delay = self.retry.delay_for_attempt(attempt);
            if Instant::now() + delay >= deadline {
                warn!("No request budget left to retry the model after attempt {}", attempt + 1);
                return Err(GatewayError::Upstream(failure));
            }
            warn!(
                "Model attempt {} failed: {:#}; retrying in {}ms",
                attempt + 1,
                failure,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    pub async fn reset(
        &self,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<ResetResponse, GatewayError> {
        let user_id = self.authorize(Self::require(user_id, "userID")?)?;

        let cleared = {
            let lock = self.user_lock(&user_id);
            let _guard = lock.lock().await;
            self.contexts.reset(&user_id)
        };
        info!("Cleared {} context turns for {}", cleared, user_id);

        let event = NewEvent {
            user_id: user_id.clone(),
            session_id: TextUtils::non_blank(session_id).map(str::to_string),
            event_type: EventType::ContextReset,
            data: json!({ "clearedTurns": cleared, "source": "server" }),
        };
        match self.store.create_event(event).await {
            Ok(_) => metrics::inc_event(EventType::ContextReset.as_str()),
            Err(e) => warn!("Failed to record server-side context reset for {}: {:#}", user_id, e),
        }

        Ok(ResetResponse {
            message: "Conversation context reset".to_string(),
        })
    }

    pub async fn log_event(
        &self,
        user_id: Option<&str>,
        session_id: Option<&str>,
        event_type: Option<&str>,
        data: Option<Value>,
    ) -> Result<LogEventResponse, GatewayError> {
        let user_id = TextUtils::normalize_user_id(Self::require(user_id, "userID")?);
        let event_type: EventType = Self::require(event_type, "eventType")?
            .parse()
            .map_err(|e: crate::events::UnknownEventType| GatewayError::Validation(e.to_string()))?;

        let data = match data {
            None | Some(Value::Null) => json!({}),
            Some(value) => value,
        };

        self.store
            .create_event(NewEvent {
                user_id,
                session_id: TextUtils::non_blank(session_id).map(str::to_string),
                event_type,
                data,
            })
            .await
            .map_err(GatewayError::Storage)?;
        metrics::inc_event(event_type.as_str());

        Ok(LogEventResponse { success: true })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::memory::{InMemoryContextStore, Role};
    use crate::storage::sqlite_store::tests::REJECT_INTERACTIONS;
    use crate::storage::{DatabaseStats, EventRecord, InteractionRecord, SqliteStore, UserRecord, UserUpdate};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Scripted model: echoes the last user turn unless told to fail or stall.
    pub(crate) struct StubModel {
        pub seen: StdMutex<Vec<Vec<ConversationTurn>>>,
        pub fail: bool,
        pub delay: Option<Duration>,
    }

    impl StubModel {
        pub fn new() -> Self {
            Self { seen: StdMutex::new(Vec::new()), fail: false, delay: None }
        }

        pub fn failing() -> Self {
            Self { fail: true, ..Self::new() }
        }

        pub fn slow(delay: Duration) -> Self {
            Self { delay: Some(delay), ..Self::new() }
        }

        pub fn calls(&self) -> Vec<Vec<ConversationTurn>> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatModel for StubModel {
        fn model_id(&self) -> &str {
            "stub-model"
        }

        async fn complete(&self, messages: &[ConversationTurn]) -> anyhow::Result<ModelReply> {
            self.seen.lock().unwrap().push(messages.to_vec());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                anyhow::bail!("upstream unavailable");
            }
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(ModelReply { content: format!("echo: {}", last), token_count: Some(7) })
        }
    }

    /// Store whose backing database is gone: every call fails.
    struct UnavailableStore;

    #[async_trait]
    impl ResearchStore for UnavailableStore {
        async fn get_user(&self, _: &str) -> anyhow::Result<Option<UserRecord>> {
            anyhow::bail!("database is locked")
        }
        async fn create_user(&self, _: &str, _: u32) -> anyhow::Result<UserRecord> {
            anyhow::bail!("database is locked")
        }
        async fn update_user(&self, _: &str, _: UserUpdate) -> anyhow::Result<Option<UserRecord>> {
            anyhow::bail!("database is locked")
        }
        async fn increment_request_count(&self, _: &str) -> anyhow::Result<u32> {
            anyhow::bail!("database is locked")
        }
        async fn create_interaction(&self, _: NewInteraction) -> anyhow::Result<InteractionRecord> {
            anyhow::bail!("database is locked")
        }
        async fn record_submission(&self, _: NewInteraction) -> anyhow::Result<(u32, InteractionRecord)> {
            anyhow::bail!("database is locked")
        }
        async fn create_event(&self, _: NewEvent) -> anyhow::Result<EventRecord> {
            anyhow::bail!("database is locked")
        }
        async fn interactions_for_user(&self, _: &str) -> anyhow::Result<Vec<InteractionRecord>> {
            anyhow::bail!("database is locked")
        }
        async fn interactions_for_session(&self, _: &str) -> anyhow::Result<Vec<InteractionRecord>> {
            anyhow::bail!("database is locked")
        }
        async fn events_for_user(&self, _: &str) -> anyhow::Result<Vec<EventRecord>> {
            anyhow::bail!("database is locked")
        }
        async fn events_for_session(&self, _: &str) -> anyhow::Result<Vec<EventRecord>> {
            anyhow::bail!("database is locked")
        }
        async fn stats(&self) -> anyhow::Result<DatabaseStats> {
            anyhow::bail!("database is locked")
        }
        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    pub(crate) struct Harness {
        pub gateway: Gateway,
        pub store: Arc<SqliteStore>,
        pub model: Arc<StubModel>,
    }

    pub(crate) fn harness_with(config: Config, model: StubModel) -> Harness {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let model = Arc::new(model);
        let gateway = Gateway::new(
            Arc::new(config),
            store.clone(),
            Arc::new(InMemoryContextStore::new()),
            model.clone(),
        );
        Harness { gateway, store, model }
    }

    fn harness() -> Harness {
        harness_with(test_config(), StubModel::new())
    }

    const USER: &str = "A01234567";

    #[tokio::test]
    async fn test_scenario_ceiling_of_two() {
        let h = harness();

        let check = h.gateway.check_user(Some(USER)).await.unwrap();
        assert_eq!(check, CheckUserResponse { authorized: true, request_count: 0, max_cap: 2 });

        let first = h.gateway.submit(Some(USER), Some("hello"), Some("s-1")).await.unwrap();
        assert_eq!(first.new_request_count, 1);
        assert_eq!(first.max_cap, 2);
        assert_eq!(first.response, "echo: hello");
        assert_eq!(h.store.interactions_for_user(USER).await.unwrap().len(), 1);

        let second = h.gateway.submit(Some(USER), Some("again"), Some("s-1")).await.unwrap();
        assert_eq!(second.new_request_count, 2);

        let third = h.gateway.submit(Some(USER), Some("one more"), Some("s-1")).await;
        assert!(matches!(third, Err(GatewayError::CapacityExceeded { count: 2, ceiling: 2 })));
        assert_eq!(h.store.interactions_for_user(USER).await.unwrap().len(), 2);
        assert_eq!(h.store.get_user(USER).await.unwrap().unwrap().request_count, 2);

        // The model never saw the rejected prompt.
        assert_eq!(h.model.calls().len(), 2);

        let check = h.gateway.check_user(Some(USER)).await;
        assert!(matches!(check, Err(GatewayError::CapacityExceeded { .. })));
    }

    #[tokio::test]
    async fn test_unlisted_user_is_rejected_without_a_row() {
        let h = harness();
        let result = h.gateway.check_user(Some("A99999999")).await;
        assert!(matches!(result, Err(GatewayError::Unauthorized)));
        assert!(h.store.get_user("A99999999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_allow_list_is_case_insensitive_and_ids_are_canonical() {
        let h = harness();
        let check = h.gateway.check_user(Some("  a01234567 ")).await.unwrap();
        assert!(check.authorized);
        assert!(h.store.get_user(USER).await.unwrap().is_some());

        let reply = h.gateway.submit(Some("a01234567"), Some("hi"), None).await.unwrap();
        assert_eq!(reply.new_request_count, 1);
    }

    #[tokio::test]
    async fn test_missing_fields_are_validation_errors() {
        let h = harness();
        assert!(matches!(h.gateway.check_user(None).await, Err(GatewayError::Validation(_))));
        assert!(matches!(
            h.gateway.submit(Some(USER), Some("   "), None).await,
            Err(GatewayError::Validation(_))
        ));
        // Presence is checked before the allow-list.
        assert!(matches!(
            h.gateway.submit(Some("A99999999"), None, None).await,
            Err(GatewayError::Validation(_))
        ));
        assert!(matches!(h.gateway.reset(Some(""), None).await, Err(GatewayError::Validation(_))));
    }

    #[tokio::test]
    async fn test_submit_before_check_user_is_not_found() {
        let h = harness();
        let result = h.gateway.submit(Some(USER), Some("hello"), None).await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
        assert!(h.model.calls().is_empty());
    }

    #[tokio::test]
    async fn test_interaction_snapshot_and_model_prompt() {
        let h = harness();
        h.gateway.check_user(Some(USER)).await.unwrap();
        h.gateway.submit(Some(USER), Some("What is Rust?"), Some("s-9")).await.unwrap();

        let calls = h.model.calls();
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[0][0].role, Role::System);
        assert_eq!(calls[0][1], ConversationTurn::user("What is Rust?"));

        let records = h.store.interactions_for_session("s-9").await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.model, "stub-model");
        assert_eq!(record.token_count, Some(7));
        assert_eq!(
            record.context,
            vec![
                ConversationTurn::user("What is Rust?"),
                ConversationTurn::assistant("echo: What is Rust?"),
            ]
        );
    }

    #[tokio::test]
    async fn test_reset_leaves_only_new_prompt_in_context() {
        let mut cfg = test_config();
        cfg.max_requests_per_user = 10;
        let h = harness_with(cfg, StubModel::new());
        h.gateway.check_user(Some(USER)).await.unwrap();

        for prompt in ["one", "two", "three"] {
            h.gateway.submit(Some(USER), Some(prompt), None).await.unwrap();
        }
        // Window is capped at five turns plus the system instruction.
        assert_eq!(h.model.calls()[2].len(), 6);

        let reset = h.gateway.reset(Some(USER), Some("s-1")).await.unwrap();
        assert!(!reset.message.is_empty());
        h.gateway.submit(Some(USER), Some("fresh"), None).await.unwrap();

        let last = h.model.calls().pop().unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[1], ConversationTurn::user("fresh"));

        // Reset does not touch the request count.
        assert_eq!(h.store.get_user(USER).await.unwrap().unwrap().request_count, 4);

        let events = h.store.events_for_user(USER).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ContextReset);
        assert_eq!(events[0].data, json!({ "clearedTurns": 5, "source": "server" }));
    }

    #[tokio::test]
    async fn test_upstream_failure_records_nothing() {
        let h = harness_with(test_config(), StubModel::failing());
        h.gateway.check_user(Some(USER)).await.unwrap();

        let result = h.gateway.submit(Some(USER), Some("hello"), None).await;
        assert!(matches!(result, Err(GatewayError::Upstream(_))));
        assert!(h.store.interactions_for_user(USER).await.unwrap().is_empty());
        assert_eq!(h.store.get_user(USER).await.unwrap().unwrap().request_count, 0);

        // The prompt stays in the window without a reply.
        assert_eq!(h.gateway.contexts.get_context(USER), vec![ConversationTurn::user("hello")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_timeout_is_upstream_failure() {
        let h = harness_with(test_config(), StubModel::slow(Duration::from_secs(600)));
        h.gateway.check_user(Some(USER)).await.unwrap();

        let result = h.gateway.submit(Some(USER), Some("hello"), None).await;
        match result {
            Err(GatewayError::Upstream(e)) => assert!(e.to_string().contains("timed out")),
            other => panic!("expected upstream failure, got {:?}", other.map(|r| r.response)),
        }
        assert!(h.store.interactions_for_user(USER).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded_and_record_nothing() {
        let mut cfg = test_config();
        cfg.llm_max_retries = 2;
        let h = harness_with(cfg, StubModel::failing());
        h.gateway.check_user(Some(USER)).await.unwrap();

        let result = h.gateway.submit(Some(USER), Some("hello"), None).await;
        assert!(matches!(result, Err(GatewayError::Upstream(_))));
        assert_eq!(h.model.calls().len(), 3);
        assert!(h.store.interactions_for_user(USER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_interaction_write_does_not_spend_quota() {
        let h = harness();
        h.gateway.check_user(Some(USER)).await.unwrap();
        h.store.execute_batch(REJECT_INTERACTIONS).await.unwrap();

        for _ in 0..2 {
            let err = h.gateway.submit(Some(USER), Some("hello"), Some("s-1")).await.unwrap_err();
            assert!(matches!(err, GatewayError::Storage(_)));
            assert_eq!(err.status().as_u16(), 500);
        }
        assert_eq!(h.store.get_user(USER).await.unwrap().unwrap().request_count, 0);
        assert!(h.store.interactions_for_user(USER).await.unwrap().is_empty());

        h.store.execute_batch("DROP TRIGGER reject_interactions").await.unwrap();
        let reply = h.gateway.submit(Some(USER), Some("hello"), Some("s-1")).await.unwrap();
        assert_eq!(reply.new_request_count, 1);
        assert_eq!(h.store.interactions_for_user(USER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_maps_to_storage_failure() {
        let model = Arc::new(StubModel::new());
        let gateway = Gateway::new(
            Arc::new(test_config()),
            Arc::new(UnavailableStore),
            Arc::new(InMemoryContextStore::new()),
            model.clone(),
        );

        let check = gateway.check_user(Some(USER)).await.unwrap_err();
        assert!(matches!(check, GatewayError::Storage(_)));
        assert_eq!(check.public_message(), "Internal server error");

        let submit = gateway.submit(Some(USER), Some("hello"), None).await.unwrap_err();
        assert!(matches!(submit, GatewayError::Storage(_)));
        assert!(model.calls().is_empty());

        let logged = gateway.log_event(Some(USER), None, Some("typing"), None).await;
        assert!(matches!(logged, Err(GatewayError::Storage(_))));

        // Reset still answers; only the audit event is lost.
        assert!(gateway.reset(Some(USER), None).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_at_request_budget() {
        let mut cfg = test_config();
        cfg.llm_timeout_seconds = 60;
        cfg.llm_max_retries = 1;
        cfg.request_timeout_seconds = 120;
        let h = harness_with(cfg, StubModel::slow(Duration::from_secs(600)));
        h.gateway.check_user(Some(USER)).await.unwrap();

        let started = Instant::now();
        let result = h.gateway.submit(Some(USER), Some("hello"), None).await;
        assert!(matches!(result, Err(GatewayError::Upstream(_))));
        assert!(started.elapsed() < Duration::from_secs(116));
        assert_eq!(h.model.calls().len(), 2);
        assert_eq!(h.store.get_user(USER).await.unwrap().unwrap().request_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_respect_ceiling() {
        let h = harness_with(test_config(), StubModel::slow(Duration::from_millis(20)));
        h.gateway.check_user(Some(USER)).await.unwrap();

        let (a, b, c) = tokio::join!(
            h.gateway.submit(Some(USER), Some("a"), None),
            h.gateway.submit(Some(USER), Some("b"), None),
            h.gateway.submit(Some(USER), Some("c"), None),
        );
        let results = [a, b, c];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let capped = results
            .iter()
            .filter(|r| matches!(r, Err(GatewayError::CapacityExceeded { .. })))
            .count();
        assert_eq!(ok, 2);
        assert_eq!(capped, 1);
        assert_eq!(h.store.get_user(USER).await.unwrap().unwrap().request_count, 2);
        assert_eq!(h.store.interactions_for_user(USER).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_log_event_validation_and_defaults() {
        let h = harness();

        let ok = h
            .gateway
            .log_event(Some("a01234567"), Some("s-1"), Some("typing"), None)
            .await
            .unwrap();
        assert!(ok.success);

        let events = h.store.events_for_session("s-1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, USER);
        assert_eq!(events[0].data, json!({}));

        assert!(matches!(
            h.gateway.log_event(Some(USER), None, Some("keypress"), None).await,
            Err(GatewayError::Validation(_))
        ));
        assert!(matches!(
            h.gateway.log_event(Some(USER), None, None, None).await,
            Err(GatewayError::Validation(_))
        ));
        assert!(matches!(
            h.gateway.log_event(None, None, Some("typing"), None).await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_log_event_payload_round_trips() {
        let h = harness();
        let payload = json!({
            "scrollPercentage": 42.5,
            "scrollTop": 425,
            "nested": { "list": [1, 2, 3], "flag": true },
            "timestamp": 1_700_000_000_000u64
        });
        h.gateway
            .log_event(Some(USER), Some("s-2"), Some("responseScroll"), Some(payload.clone()))
            .await
            .unwrap();

        let events = h.store.events_for_session("s-2").await.unwrap();
        assert_eq!(events[0].event_type, EventType::ResponseScroll);
        assert_eq!(events[0].data, payload);
    }

    #[test]
    fn test_retry_delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        };
        let first = policy.delay_for_attempt(0);
        let second = policy.delay_for_attempt(1);
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(550));
        assert!(second >= Duration::from_millis(1000) && second <= Duration::from_millis(1100));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(8));
    }
}
