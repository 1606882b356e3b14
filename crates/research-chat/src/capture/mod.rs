//! Event capture client.
//!
//! Turns raw UI signals into telemetry events and ships each one to the
//! gateway as a detached task. Delivery problems are logged and dropped; a
//! capture call never fails and never waits on the network.

pub mod client;
pub mod idle;
pub mod payload;
pub mod session;
pub mod typing;

pub use client::{ApiClient, ClientError, EventSink};
pub use idle::{replay_idle, ActivitySignal, IdleMonitor, IdleState, IdleTransition, IDLE_THRESHOLD};
pub use session::InteractiveSession;
pub use typing::{TypingBurst, TypingMonitor, TYPING_DEBOUNCE};

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::api::LogEventRequest;
use crate::events::EventType;
use crate::utils::TextUtils;

pub fn is_valid_user_id(user_id: &str) -> bool {
    TextUtils::is_valid_user_id(user_id)
}

/// Fire-and-forget event dispatcher bound to one participant and session.
#[derive(Clone)]
pub struct EventCapture {
    sink: Arc<dyn EventSink>,
    user_id: String,
    session_id: Option<String>,
}

impl EventCapture {
    pub fn new(sink: Arc<dyn EventSink>, user_id: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            sink,
            user_id: user_id.into(),
            session_id,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn request(&self, event_type: EventType, data: Value) -> LogEventRequest {
        let mut object = match data {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        object.insert("timestamp".to_string(), Value::from(Utc::now().timestamp_millis()));

        LogEventRequest {
            user_id: Some(self.user_id.clone()),
            session_id: self.session_id.clone(),
            event_type: Some(event_type.as_str().to_string()),
            data: Some(Value::Object(object)),
        }
    }

    /// Stamps and sends one event without waiting for delivery.
    pub fn emit(&self, event_type: EventType, data: Value) {
        let request = self.request(event_type, data);
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime available; dropping {} event", event_type);
                return;
            }
        };

        let sink = self.sink.clone();
        debug!("Dispatching {} event", event_type);
        handle.spawn(async move {
            if let Err(e) = sink.send_event(request).await {
                warn!("Failed to log {} event: {}", event_type, e);
            }
        });
    }

    pub fn typing(&self, input_length: usize, duration_ms: u64, keystrokes: u32) {
        self.emit(EventType::Typing, payload::typing(input_length, duration_ms, keystrokes));
    }

    pub fn paste(&self, pasted_length: usize, field_length: usize) {
        self.emit(EventType::Paste, payload::paste(pasted_length, field_length));
    }

    pub fn copy(&self, copied_length: usize, field_length: usize) {
        self.emit(EventType::Copy, payload::clipboard(copied_length, field_length));
    }

    pub fn cut(&self, cut_length: usize, field_length: usize) {
        self.emit(EventType::Cut, payload::clipboard(cut_length, field_length));
    }

    pub fn prompt_focus(&self, field_length: usize) {
        self.emit(EventType::PromptFocus, payload::field_focus(field_length));
    }

    pub fn prompt_blur(&self, field_length: usize) {
        self.emit(EventType::PromptBlur, payload::field_focus(field_length));
    }

    pub fn prompt_submit(&self, prompt: &str) {
        self.emit(EventType::PromptSubmit, payload::prompt_submit(prompt));
    }

    pub fn response_view(&self, response_length: usize, latency_ms: u64, token_count: Option<u32>) {
        self.emit(
            EventType::ResponseView,
            payload::response_view(response_length, latency_ms, token_count),
        );
    }

    pub fn response_scroll(&self, scroll_top: f64, scroll_height: f64, client_height: f64) {
        self.emit(
            EventType::ResponseScroll,
            payload::response_scroll(scroll_top, scroll_height, client_height),
        );
    }

    pub fn response_copy(&self, copied: &str, response_length: usize) {
        self.emit(EventType::ResponseCopy, payload::response_copy(copied, response_length));
    }

    pub fn prompt_clear(&self, cleared_length: usize, method: &str) {
        self.emit(EventType::PromptClear, payload::prompt_clear(cleared_length, method));
    }

    pub fn context_reset(&self, previous_prompt_length: usize, previous_response_length: usize) {
        self.emit(
            EventType::ContextReset,
            payload::context_reset(previous_prompt_length, previous_response_length),
        );
    }

    pub fn session_start(&self) {
        self.emit(EventType::SessionStart, Value::Object(Map::new()));
    }

    pub fn session_end(&self, session_duration_ms: u64) {
        self.emit(EventType::SessionEnd, payload::session_end(session_duration_ms));
    }

    pub fn idle_start(&self) {
        self.emit(EventType::IdleStart, Value::Object(Map::new()));
    }

    pub fn idle_end(&self, idle_duration_ms: u64, signal: ActivitySignal) {
        self.emit(EventType::IdleEnd, payload::idle_end(idle_duration_ms, signal.as_str()));
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_emit_stamps_and_tags_events() {
        let (sink, recorded) = recording_sink();
        let capture = EventCapture::new(sink, "A01234567", Some("s-1".into()));

        capture.paste(12, 40);
        let event = recorded.next().await;
        assert_eq!(event_type(&event), "paste");
        assert_eq!(event.user_id.as_deref(), Some("A01234567"));
        assert_eq!(event.session_id.as_deref(), Some("s-1"));
        let data = event.data.unwrap();
        assert_eq!(data["length"], 12);
        assert_eq!(data["source"], "clipboard");
        assert!(data["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_every_operation_maps_to_its_event_type() {
        let (sink, recorded) = recording_sink();
        let capture = EventCapture::new(sink, "A01234567", None);

        capture.copy(3, 10);
        capture.cut(2, 8);
        capture.prompt_focus(0);
        capture.prompt_blur(8);
        capture.prompt_submit("hello");
        capture.response_view(5, 120, Some(9));
        capture.response_scroll(0.0, 300.0, 300.0);
        capture.response_copy("hel", 5);
        capture.prompt_clear(8, "button");
        capture.context_reset(8, 5);
        capture.session_start();
        capture.session_end(1000);

        let events = recorded.drain().await;
        let types: Vec<&str> = events.iter().map(event_type).collect();
        assert_eq!(
            types,
            vec![
                "copy", "cut", "promptFocus", "promptBlur", "promptSubmit", "responseView",
                "responseScroll", "responseCopy", "promptClear", "contextReset",
                "sessionStart", "sessionEnd",
            ]
        );
        let scroll = events[6].data.as_ref().unwrap();
        assert_eq!(scroll["scrollPercentage"], 0.0);
        let submit = events[4].data.as_ref().unwrap();
        assert_eq!(submit["promptLength"], 5);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let capture = EventCapture::new(Arc::new(FailingSink), "A01234567", None);
        capture.idle_start();
        capture.idle_end(5000, ActivitySignal::KeyDown);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_emit_outside_runtime_is_dropped() {
        let (sink, _recorded) = recording_sink();
        let capture = EventCapture::new(sink, "A01234567", None);
        capture.session_start();
    }

    #[test]
    fn test_client_side_id_check() {
        assert!(is_valid_user_id("A01234567"));
        assert!(!is_valid_user_id("A1234"));
    }
}
