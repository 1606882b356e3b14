//! API module - HTTP handlers in front of the gateway

pub mod research_api;

pub use research_api::{
    check_user, health, log_event, reset, submit,
    CheckUserRequest, LogEventRequest, ResetRequest, SubmitRequest,
};
