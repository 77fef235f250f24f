//! Router Wire Protocol
//!
//! Messages exchanged between routers over a socket. Each message is a flat
//! JSON object with a `type` discriminator:
//!
//! ```json
//! {"type":"event","topic":"orders","message":"..."}
//! {"type":"subscribe","topic":"orders"}
//! {"type":"unsubscribe","topic":"orders"}
//! {"type":"ack","topic":"orders"}
//! ```
//!
//! There is no request id; the socket a message arrives on is its context.

use serde::{Deserialize, Serialize};

/// Messages exchanged between routers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    /// An event published on a topic
    Event { topic: String, message: String },

    /// Ask the topic owner to relay events for a topic over this socket
    Subscribe { topic: String },

    /// Stop relaying events for a topic over this socket
    Unsubscribe { topic: String },

    /// The owner accepted a subscription
    Ack { topic: String },

    /// Anything this version does not understand. Newer peers may send
    /// message types we don't know about; those are ignored, not errors.
    #[serde(other)]
    Unknown,
}

impl WireMessage {
    /// Encode to JSON text
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from JSON text. Never fails: malformed input yields `Unknown`.
    pub fn decode(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or(WireMessage::Unknown)
    }

    /// Topic this message refers to
    pub fn topic(&self) -> Option<&str> {
        match self {
            WireMessage::Event { topic, .. }
            | WireMessage::Subscribe { topic }
            | WireMessage::Unsubscribe { topic }
            | WireMessage::Ack { topic } => Some(topic.as_str()),
            WireMessage::Unknown => None,
        }
    }

    /// Get the message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            WireMessage::Event { .. } => "event",
            WireMessage::Subscribe { .. } => "subscribe",
            WireMessage::Unsubscribe { .. } => "unsubscribe",
            WireMessage::Ack { .. } => "ack",
            WireMessage::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_encode_event() {
        let msg = WireMessage::Event {
            topic: "orders".to_string(),
            message: "x".to_string(),
        };
        assert_eq!(
            msg.encode().unwrap(),
            r#"{"type":"event","topic":"orders","message":"x"}"#
        );
    }

    #[test]
    fn test_encode_control_messages_have_no_message_field() {
        let msg = WireMessage::Subscribe {
            topic: "orders".to_string(),
        };
        assert_eq!(
            msg.encode().unwrap(),
            r#"{"type":"subscribe","topic":"orders"}"#
        );
        let msg = WireMessage::Ack {
            topic: "orders".to_string(),
        };
        assert_eq!(msg.encode().unwrap(), r#"{"type":"ack","topic":"orders"}"#);
    }

    #[test]
    fn test_round_trip_all_variants() {
        let messages = [
            WireMessage::Event {
                topic: "chat".to_string(),
                message: "hello everyone!".to_string(),
            },
            WireMessage::Subscribe {
                topic: "chat".to_string(),
            },
            WireMessage::Unsubscribe {
                topic: "chat".to_string(),
            },
            WireMessage::Ack {
                topic: "chat".to_string(),
            },
        ];
        for msg in messages {
            let encoded = msg.encode().unwrap();
            assert_eq!(WireMessage::decode(&encoded), msg);
        }
    }

    #[test]
    fn test_decode_accepts_null_message_on_control_messages() {
        let decoded = WireMessage::decode(r#"{"type":"unsubscribe","topic":"chat","message":null}"#);
        assert_eq!(
            decoded,
            WireMessage::Unsubscribe {
                topic: "chat".to_string()
            }
        );
    }

    #[test_case(r#"{"type":"heartbeat","topic":"chat"}"# ; "unrecognized type")]
    #[test_case(r#"{"topic":"chat"}"# ; "missing type")]
    #[test_case(r#"{"type":"event","topic":"chat"}"# ; "event without message")]
    #[test_case(r#"{"type":"ack"}"# ; "ack without topic")]
    #[test_case("not json" ; "garbage")]
    #[test_case("" ; "empty")]
    fn test_decode_unknown(text: &str) {
        assert_eq!(WireMessage::decode(text), WireMessage::Unknown);
    }

    #[test]
    fn test_type_name_and_topic() {
        let msg = WireMessage::Ack {
            topic: "chat".to_string(),
        };
        assert_eq!(msg.type_name(), "ack");
        assert_eq!(msg.topic(), Some("chat"));
        assert_eq!(WireMessage::Unknown.topic(), None);
        assert_eq!(WireMessage::Unknown.type_name(), "unknown");
    }
}
