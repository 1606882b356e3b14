//! The closed set of telemetry event types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    Typing,
    Paste,
    Copy,
    Cut,
    PromptFocus,
    PromptBlur,
    PromptSubmit,
    ResponseView,
    ResponseScroll,
    ResponseCopy,
    PromptClear,
    ContextReset,
    SessionStart,
    SessionEnd,
    IdleStart,
    IdleEnd,
}

impl EventType {
    pub const ALL: [EventType; 16] = [
        EventType::Typing,
        EventType::Paste,
        EventType::Copy,
        EventType::Cut,
        EventType::PromptFocus,
        EventType::PromptBlur,
        EventType::PromptSubmit,
        EventType::ResponseView,
        EventType::ResponseScroll,
        EventType::ResponseCopy,
        EventType::PromptClear,
        EventType::ContextReset,
        EventType::SessionStart,
        EventType::SessionEnd,
        EventType::IdleStart,
        EventType::IdleEnd,
    ];

    /// Wire and storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Typing => "typing",
            EventType::Paste => "paste",
            EventType::Copy => "copy",
            EventType::Cut => "cut",
            EventType::PromptFocus => "promptFocus",
            EventType::PromptBlur => "promptBlur",
            EventType::PromptSubmit => "promptSubmit",
            EventType::ResponseView => "responseView",
            EventType::ResponseScroll => "responseScroll",
            EventType::ResponseCopy => "responseCopy",
            EventType::PromptClear => "promptClear",
            EventType::ContextReset => "contextReset",
            EventType::SessionStart => "sessionStart",
            EventType::SessionEnd => "sessionEnd",
            EventType::IdleStart => "idleStart",
            EventType::IdleEnd => "idleEnd",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType(pub String);

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type '{}'", self.0)
    }
}

impl std::error::Error for UnknownEventType {}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_matches_wire_name() {
        for event_type in EventType::ALL {
            assert_eq!(event_type.as_str().parse::<EventType>(), Ok(event_type));
            let json = serde_json::to_string(&event_type).unwrap();
            assert_eq!(json, format!("\"{}\"", event_type.as_str()));
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!("scrollResponse".parse::<EventType>().is_err());
        assert!("Typing".parse::<EventType>().is_err());
    }
}
