use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use validator::Validate;

use crate::error::GatewayError;
use crate::gateway::{CheckUserResponse, LogEventResponse, ResetResponse, SubmitResponse};
use crate::metrics;
use crate::shared_state::AppState;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CheckUserRequest {
    #[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 64))]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 64))]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 65536))]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 256))]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    #[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 64))]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 256))]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LogEventRequest {
    #[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 64))]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 256))]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 64))]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Malformed or oversized bodies are reported as validation failures.
fn body<T: Validate>(payload: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    let Json(inner) = payload.map_err(|rejection| GatewayError::Validation(rejection.body_text()))?;
    inner
        .validate()
        .map_err(|e| GatewayError::Validation(format!("Invalid request: {}", e)))?;
    Ok(inner)
}

fn record<T>(state: &AppState, route: &str, result: &Result<T, GatewayError>) {
    state.counters.inc_total_requests();
    let status = match result {
        Ok(_) => 200,
        Err(e) => {
            state.counters.inc_rejected();
            e.status().as_u16()
        }
    };
    metrics::inc_request(route, status);
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn check_user(
    State(state): State<AppState>,
    payload: Result<Json<CheckUserRequest>, JsonRejection>,
) -> Result<Json<CheckUserResponse>, GatewayError> {
    let result = match body(payload) {
        Ok(req) => state.gateway.check_user(req.user_id.as_deref()).await,
        Err(e) => Err(e),
    };
    record(&state, "/api/check-user", &result);
    result.map(Json)
}

pub async fn submit(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, GatewayError> {
    let result = match body(payload) {
        Ok(req) => {
            debug!("Submission received (session {:?})", req.session_id);
            state
                .gateway
                .submit(req.user_id.as_deref(), req.prompt.as_deref(), req.session_id.as_deref())
                .await
        }
        Err(e) => Err(e),
    };
    if result.is_ok() {
        state.counters.inc_submissions();
    }
    record(&state, "/api/submit", &result);
    result.map(Json)
}

pub async fn reset(
    State(state): State<AppState>,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> Result<Json<ResetResponse>, GatewayError> {
    let result = match body(payload) {
        Ok(req) => state.gateway.reset(req.user_id.as_deref(), req.session_id.as_deref()).await,
        Err(e) => Err(e),
    };
    record(&state, "/api/reset", &result);
    result.map(Json)
}

pub async fn log_event(
    State(state): State<AppState>,
    payload: Result<Json<LogEventRequest>, JsonRejection>,
) -> Result<Json<LogEventResponse>, GatewayError> {
    let result = match body(payload) {
        Ok(req) => {
            state
                .gateway
                .log_event(
                    req.user_id.as_deref(),
                    req.session_id.as_deref(),
                    req.event_type.as_deref(),
                    req.data,
                )
                .await
        }
        Err(e) => Err(e),
    };
    if result.is_ok() {
        state.counters.inc_events_logged();
    }
    record(&state, "/api/log-event", &result);
    result.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_field_names() {
        let req: SubmitRequest = serde_json::from_value(json!({
            "userID": "A01234567",
            "prompt": "hi",
            "sessionId": "s-1"
        }))
        .unwrap();
        assert_eq!(req.user_id.as_deref(), Some("A01234567"));
        assert_eq!(req.session_id.as_deref(), Some("s-1"));

        let req: LogEventRequest = serde_json::from_value(json!({
            "userID": "A01234567",
            "eventType": "copy"
        }))
        .unwrap();
        assert_eq!(req.event_type.as_deref(), Some("copy"));
        assert!(req.data.is_none());

        let encoded = serde_json::to_value(ResetRequest {
            user_id: Some("A01234567".into()),
            session_id: None,
        })
        .unwrap();
        assert_eq!(encoded, json!({ "userID": "A01234567" }));
    }

    #[test]
    fn test_oversized_fields_fail_validation() {
        let req = SubmitRequest {
            user_id: Some("A01234567".into()),
            prompt: Some("x".repeat(70_000)),
            session_id: None,
        };
        assert!(req.validate().is_err());

        let req = LogEventRequest {
            user_id: Some("A01234567".into()),
            session_id: Some("s".repeat(300)),
            event_type: Some("typing".into()),
            data: None,
        };
        assert!(req.validate().is_err());

        assert!(CheckUserRequest { user_id: Some("A01234567".into()) }.validate().is_ok());
    }
}
