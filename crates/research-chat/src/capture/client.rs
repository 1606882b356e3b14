//! HTTP client for the research gateway.
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::api::{CheckUserRequest, LogEventRequest, ResetRequest, SubmitRequest};
use crate::gateway::{CheckUserResponse, LogEventResponse, ResetResponse, SubmitResponse};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("'{0}' is not a valid participant ID")]
    InvalidUserId(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Destination for captured events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send_event(&self, event: LogEventRequest) -> Result<(), ClientError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);
        let response = self.http.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            return Err(ClientError::Status { status: status.as_u16(), message });
        }
        Ok(response.json().await?)
    }

    pub async fn check_user(&self, user_id: &str) -> Result<CheckUserResponse, ClientError> {
        let body = CheckUserRequest { user_id: Some(user_id.to_string()) };
        self.post("/api/check-user", &body).await
    }

    pub async fn submit(
        &self,
        user_id: &str,
        prompt: &str,
        session_id: Option<&str>,
    ) -> Result<SubmitResponse, ClientError> {
        let body = SubmitRequest {
            user_id: Some(user_id.to_string()),
            prompt: Some(prompt.to_string()),
            session_id: session_id.map(str::to_string),
        };
        self.post("/api/submit", &body).await
    }

    pub async fn reset(&self, user_id: &str, session_id: Option<&str>) -> Result<ResetResponse, ClientError> {
        let body = ResetRequest {
            user_id: Some(user_id.to_string()),
            session_id: session_id.map(str::to_string),
        };
        self.post("/api/reset", &body).await
    }

    pub async fn log_event(&self, event: &LogEventRequest) -> Result<LogEventResponse, ClientError> {
        self.post("/api/log-event", event).await
    }
}

#[async_trait]
impl EventSink for ApiClient {
    async fn send_event(&self, event: LogEventRequest) -> Result<(), ClientError> {
        self.log_event(&event).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn test_check_user_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/check-user")
            .match_body(Matcher::Json(json!({ "userID": "A01234567" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"authorized":true,"requestCount":3,"maxCap":20}"#)
            .create_async()
            .await;

        let client = ApiClient::new(server.url()).unwrap();
        let reply = client.check_user("A01234567").await.unwrap();
        assert_eq!(reply, CheckUserResponse { authorized: true, request_count: 3, max_cap: 20 });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_carries_server_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/submit")
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"Request limit reached","code":403}"#)
            .create_async()
            .await;

        let client = ApiClient::new(server.url()).unwrap();
        let err = client.submit("A01234567", "hi", Some("s-1")).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        match err {
            ClientError::Status { message, .. } => assert_eq!(message, "Request limit reached"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_event_sink_posts_log_event() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/log-event")
            .match_body(Matcher::PartialJson(json!({
                "userID": "A01234567",
                "eventType": "copy",
                "data": { "length": 4 }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;

        let client = ApiClient::new(format!("{}/", server.url())).unwrap();
        client
            .send_event(LogEventRequest {
                user_id: Some("A01234567".into()),
                session_id: None,
                event_type: Some("copy".into()),
                data: Some(json!({ "length": 4, "fieldLength": 9 })),
            })
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
