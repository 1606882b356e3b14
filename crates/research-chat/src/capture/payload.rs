//! Payload builders for captured UI events.
//!
//! Pure functions over raw signals; the dispatcher adds the `timestamp`.
use serde_json::{json, Value};

use crate::utils::TextUtils;

/// Characters of a response copy kept in the `copiedText` field.
pub const COPY_EXCERPT_CHARS: usize = 200;

/// Position of the viewport within the scrollable response, in percent.
///
/// Zero when the content does not overflow (`scroll_height <= client_height`)
/// or the ratio is not finite; otherwise clamped to `0..=100`.
pub fn scroll_percentage(scroll_top: f64, scroll_height: f64, client_height: f64) -> f64 {
    let range = scroll_height - client_height;
    if range.is_nan() || range <= 0.0 {
        return 0.0;
    }
    let pct = scroll_top / range * 100.0;
    if !pct.is_finite() {
        return 0.0;
    }
    pct.clamp(0.0, 100.0)
}

pub fn typing(input_length: usize, duration_ms: u64, keystrokes: u32) -> Value {
    json!({
        "inputLength": input_length,
        "duration": duration_ms,
        "keystrokes": keystrokes,
    })
}

pub fn clipboard(length: usize, field_length: usize) -> Value {
    json!({ "length": length, "fieldLength": field_length })
}

pub fn paste(length: usize, field_length: usize) -> Value {
    json!({ "length": length, "fieldLength": field_length, "source": "clipboard" })
}

pub fn field_focus(field_length: usize) -> Value {
    json!({ "fieldLength": field_length })
}

pub fn prompt_submit(prompt: &str) -> Value {
    json!({ "prompt": prompt, "promptLength": TextUtils::char_len(prompt) })
}

pub fn response_view(response_length: usize, latency_ms: u64, token_count: Option<u32>) -> Value {
    json!({
        "responseLength": response_length,
        "latency": latency_ms,
        "tokenCount": token_count,
    })
}

pub fn response_scroll(scroll_top: f64, scroll_height: f64, client_height: f64) -> Value {
    json!({
        "scrollPercentage": scroll_percentage(scroll_top, scroll_height, client_height),
        "scrollTop": scroll_top,
        "scrollHeight": scroll_height,
        "clientHeight": client_height,
    })
}

pub fn response_copy(copied: &str, response_length: usize) -> Value {
    json!({
        "copiedLength": TextUtils::char_len(copied),
        "responseLength": response_length,
        "copiedText": TextUtils::first_chars(copied, COPY_EXCERPT_CHARS),
    })
}

pub fn prompt_clear(cleared_length: usize, method: &str) -> Value {
    json!({ "clearedLength": cleared_length, "method": method })
}

pub fn context_reset(previous_prompt_length: usize, previous_response_length: usize) -> Value {
    json!({
        "previousPromptLength": previous_prompt_length,
        "previousResponseLength": previous_response_length,
    })
}

pub fn session_end(session_duration_ms: u64) -> Value {
    json!({ "sessionDuration": session_duration_ms })
}

pub fn idle_end(idle_duration_ms: u64, signal: &str) -> Value {
    json!({ "idleDuration": idle_duration_ms, "signal": signal })
}
