//! Deterministic event -> identifier mapping.

use serde_json::Value;

use crate::domain::Event;

/// Identifier returned for events that carry no usable key.
pub const UNKNOWN_IDENTIFIER: &str = "0";

/// Default pointers: the chat an incoming message or button press belongs to.
pub const DEFAULT_POINTERS: &[&str] = &[
    "/message/chat/id",
    "/edited_message/chat/id",
    "/channel_post/chat/id",
    "/callback_query/message/chat/id",
];

/// Maps an event to the first JSON pointer that resolves to a string or integer.
#[derive(Debug, Clone)]
pub struct PointerIdentifier {
    pointers: Vec<String>,
}

impl Default for PointerIdentifier {
    fn default() -> Self {
        Self::new(DEFAULT_POINTERS.iter().map(|p| p.to_string()).collect())
    }
}

impl PointerIdentifier {
    /// Create an identifier trying `pointers` in order
    pub fn new(pointers: Vec<String>) -> Self {
        Self { pointers }
    }

    /// Identifier for `event`, or [`UNKNOWN_IDENTIFIER`] if no pointer matches.
    pub fn identify(&self, event: &Event) -> String {
        self.pointers
            .iter()
            .filter_map(|pointer| event.payload.pointer(pointer))
            .find_map(key_of)
            .unwrap_or_else(|| UNKNOWN_IDENTIFIER.to_string())
    }
}

fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_chat_id() {
        let event = Event::new(1, json!({"update_id": 1, "message": {"chat": {"id": -1001}}}));
        assert_eq!(PointerIdentifier::default().identify(&event), "-1001");
    }

    #[test]
    fn test_callback_query_chat_id() {
        let event = Event::new(
            2,
            json!({"callback_query": {"message": {"chat": {"id": 55}}}}),
        );
        assert_eq!(PointerIdentifier::default().identify(&event), "55");
    }

    #[test]
    fn test_malformed_event_yields_sentinel() {
        let event = Event::new(3, json!({"poll": {"id": "abc"}}));
        assert_eq!(PointerIdentifier::default().identify(&event), UNKNOWN_IDENTIFIER);
    }

    #[test]
    fn test_non_scalar_keys_are_skipped() {
        let identifier = PointerIdentifier::new(vec!["/a".to_string(), "/b".to_string()]);
        let event = Event::new(4, json!({"a": {"nested": true}, "b": "user-9"}));
        assert_eq!(identifier.identify(&event), "user-9");
    }

    #[test]
    fn test_deterministic() {
        let identifier = PointerIdentifier::default();
        let event = Event::new(5, json!({"message": {"chat": {"id": 8}}}));
        assert_eq!(identifier.identify(&event), identifier.identify(&event.clone()));
    }
}
