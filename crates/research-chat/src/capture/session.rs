//! Headless chat view: one participant session from mount to unmount.
use std::sync::Arc;

use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use super::{
    ActivitySignal, ApiClient, ClientError, EventCapture, EventSink, IdleMonitor, TypingMonitor,
};
use crate::gateway::{CheckUserResponse, ResetResponse, SubmitResponse};
use crate::utils::TextUtils;

pub struct InteractiveSession {
    client: Arc<ApiClient>,
    user_id: String,
    session_id: String,
    capture: EventCapture,
    typing: TypingMonitor,
    idle: IdleMonitor,
    mounted_at: Instant,
    last_response: Option<String>,
}

impl InteractiveSession {
    /// Checks the identifier format locally, then asks the gateway.
    pub async fn login(
        client: Arc<ApiClient>,
        user_id: &str,
    ) -> Result<(Self, CheckUserResponse), ClientError> {
        if !TextUtils::is_valid_user_id(user_id) {
            return Err(ClientError::InvalidUserId(user_id.to_string()));
        }
        let user_id = TextUtils::normalize_user_id(user_id);
        let status = client.check_user(&user_id).await?;
        Ok((Self::mount(client, user_id), status))
    }

    pub fn mount(client: Arc<ApiClient>, user_id: impl Into<String>) -> Self {
        let sink: Arc<dyn EventSink> = client.clone();
        Self::with_sink(client, sink, user_id)
    }

    /// Like `mount`, with events delivered to `sink` instead of the gateway.
    pub fn with_sink(client: Arc<ApiClient>, sink: Arc<dyn EventSink>, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let session_id = Uuid::new_v4().to_string();
        let capture = EventCapture::new(sink, user_id.clone(), Some(session_id.clone()));
        let typing = TypingMonitor::new(capture.clone());
        let idle = IdleMonitor::new(capture.clone());

        info!("Session {} started for {}", session_id, user_id);
        capture.session_start();
        idle.start();

        Self {
            client,
            user_id,
            session_id,
            capture,
            typing,
            idle,
            mounted_at: Instant::now(),
            last_response: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn capture(&self) -> &EventCapture {
        &self.capture
    }

    pub fn idle(&self) -> &IdleMonitor {
        &self.idle
    }

    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_deref()
    }

    /// Keystroke in the prompt field; `input_length` is the length after it.
    pub fn keystroke(&self, input_length: usize) {
        self.idle.activity(ActivitySignal::KeyDown);
        self.typing.keystroke(input_length);
    }

    pub fn scroll_response(&self, scroll_top: f64, scroll_height: f64, client_height: f64) {
        self.idle.activity(ActivitySignal::Scroll);
        self.capture.response_scroll(scroll_top, scroll_height, client_height);
    }

    pub async fn submit(&mut self, prompt: &str) -> Result<SubmitResponse, ClientError> {
        self.capture.prompt_submit(prompt);
        let sent = Instant::now();

        let reply = self
            .client
            .submit(&self.user_id, prompt, Some(&self.session_id))
            .await?;

        let latency = sent.elapsed().as_millis() as u64;
        self.capture.response_view(TextUtils::char_len(&reply.response), latency, reply.token_count);
        self.last_response = Some(reply.response.clone());
        Ok(reply)
    }

    /// `current_prompt` is whatever is still in the prompt field.
    pub async fn reset_context(&mut self, current_prompt: &str) -> Result<ResetResponse, ClientError> {
        let previous_response = self.last_response.as_deref().map(TextUtils::char_len).unwrap_or(0);
        self.capture.context_reset(TextUtils::char_len(current_prompt), previous_response);

        let reply = self.client.reset(&self.user_id, Some(&self.session_id)).await?;
        self.last_response = None;
        Ok(reply)
    }

    pub fn clear_prompt(&self, cleared: &str, method: &str) {
        self.capture.prompt_clear(TextUtils::char_len(cleared), method);
    }

    pub fn unmount(self) {
        self.typing.cancel();
        self.idle.stop();
        let duration = self.mounted_at.elapsed().as_millis() as u64;
        self.capture.session_end(duration);
        info!("Session {} ended after {}ms", self.session_id, duration);
    }
}
