use std::collections::HashMap;

use super::{UNNUMBERED, params};

/// Single protocol exchange in either direction.
///
/// Parameter and attribute maps are unordered; nothing may depend on the order
/// in which entries were inserted or received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sequence: i32,
    pub message_type: String,
    pub parameters: HashMap<String, String>,
    pub attributes: HashMap<String, String>,
}

impl Message {
    /// Creates an unnumbered message of the given type. Sessions assign the
    /// sequence number when a message is sent as numbered.
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            sequence: UNNUMBERED,
            message_type: message_type.into(),
            parameters: HashMap::new(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_sequence(mut self, sequence: i32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_parameter(name, value);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(name.into(), value.into());
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn is_type(&self, message_type: &str) -> bool {
        self.message_type == message_type
    }

    pub fn is_unnumbered(&self) -> bool {
        self.sequence == UNNUMBERED
    }

    /// Sequence number acknowledged by an ACK/NACK, if present.
    pub fn ackseq(&self) -> Option<&str> {
        self.parameter(params::ACKSEQ)
    }

    /// Human readable text attached to an ACK/NACK.
    pub fn response(&self) -> Option<&str> {
        self.parameter(params::RESPONSE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types;

    #[test]
    fn new_message_is_unnumbered() {
        let message = Message::new(types::QUIT);

        assert!(message.is_unnumbered());
        assert!(message.is_type(types::QUIT));
        assert!(message.parameters.is_empty());
    }

    #[test]
    fn parameters_overwrite_by_name() {
        let message = Message::new("ECHO")
            .with_parameter("TEXT", "first")
            .with_parameter("TEXT", "second")
            .with_attribute("origin", "test");

        assert_eq!(message.parameters.len(), 1);
        assert_eq!(message.parameter("TEXT"), Some("second"));
        assert_eq!(message.attribute("origin"), Some("test"));
        assert_eq!(message.parameter("missing"), None);
    }
}
