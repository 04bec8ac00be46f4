use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

pub const APPLICATION_JSON: &str = "application/json";

/// System attribute holding the time the message was sent, in Unix epoch milliseconds.
pub const SENT_TIMESTAMP_ATTRIBUTE: &str = "SentTimestamp";

/// A typed message attribute, as set by the producer of a queue message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageAttribute {
    pub data_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_binary")]
    pub binary_value: Option<Bytes>,
}

impl MessageAttribute {
    pub fn string(data_type: &str, value: &str) -> Self {
        Self {
            data_type: data_type.to_owned(),
            string_value: Some(value.to_owned()),
            binary_value: None,
        }
    }

    /// Binary attributes have a data type of `Binary`, optionally followed by a
    /// custom label (`Binary.png`).
    pub fn is_binary(&self) -> bool {
        self.data_type == "Binary" || self.data_type.starts_with("Binary.")
    }
}

fn serialize_binary<S>(value: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(bytes) => serializer.serialize_bytes(bytes),
        None => serializer.serialize_none(),
    }
}

/// A message as received from the source queue. Never mutated after receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    /// Opaque handle required to delete the message. Distinct from `id`.
    pub ack_token: String,
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    pub message_attributes: HashMap<String, MessageAttribute>,
}

impl RawMessage {
    pub fn new(id: &str, ack_token: &str, body: impl Into<Bytes>) -> Self {
        Self {
            id: id.to_owned(),
            ack_token: ack_token.to_owned(),
            body: body.into(),
            attributes: HashMap::new(),
            message_attributes: HashMap::new(),
        }
    }

    /// Time at which the message was sent, if the queue reported it.
    pub fn sent_time(&self) -> Option<DateTime<Utc>> {
        let millis = self
            .attributes
            .get(SENT_TIMESTAMP_ATTRIBUTE)?
            .parse::<i64>()
            .ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Reduces the message to what the deleter needs.
    pub fn into_delete_entry(self) -> DeleteEntry {
        DeleteEntry {
            id: self.id,
            ack_token: self.ack_token,
        }
    }
}

/// Reference to a fully processed message, handed over to the deleters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEntry {
    pub id: String,
    pub ack_token: String,
}

/// Message ids mapped to their ack tokens, as sent in a single batch delete call.
pub type AckEntries = HashMap<String, String>;

/// The canonical event produced from a queue message, modelled after the
/// CloudEvents 1.0 context attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub id: String,
    pub event_type: String,
    pub source: String,
    pub subject: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub content_type: String,
    pub data: Bytes,
    pub extensions: BTreeMap<String, String>,
}

impl NormalizedEvent {
    pub fn new(id: &str, event_type: &str, source: &str) -> Self {
        Self {
            id: id.to_owned(),
            event_type: event_type.to_owned(),
            source: source.to_owned(),
            subject: None,
            time: None,
            content_type: APPLICATION_JSON.to_owned(),
            data: Bytes::new(),
            extensions: BTreeMap::new(),
        }
    }

    pub fn set_json_data<T: Serialize + ?Sized>(&mut self, data: &T) -> serde_json::Result<()> {
        self.data = Bytes::from(serde_json::to_vec(data)?);
        self.content_type = APPLICATION_JSON.to_owned();
        Ok(())
    }

    /// Sets an extension attribute. CloudEvents restricts attribute names to
    /// lowercase ASCII letters and digits, so any other character is dropped.
    /// Returns false when nothing is left of the name.
    pub fn set_extension(&mut self, name: &str, value: &str) -> bool {
        let name = extension_name(name);
        if name.is_empty() {
            return false;
        }
        self.extensions.insert(name, value.to_owned());
        true
    }
}

pub fn extension_name(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sent_time_from_millis() {
        let mut msg = RawMessage::new("id", "token", "body");
        assert_eq!(msg.sent_time(), None);

        msg.attributes.insert(
            SENT_TIMESTAMP_ATTRIBUTE.to_owned(),
            "1700000000123".to_owned(),
        );
        let time = msg.sent_time().expect("timestamp should parse");
        assert_eq!(time.timestamp_millis(), 1_700_000_000_123);

        msg.attributes
            .insert(SENT_TIMESTAMP_ATTRIBUTE.to_owned(), "yesterday".to_owned());
        assert_eq!(msg.sent_time(), None);
    }

    #[test]
    fn test_extension_names_are_sanitized() {
        let mut event = NormalizedEvent::new("1", "type", "source");

        assert!(event.set_extension("Trace-Parent_Id", "abc"));
        assert!(!event.set_extension("--", "dropped"));

        assert_eq!(event.extensions.len(), 1);
        assert_eq!(
            event.extensions.get("traceparentid"),
            Some(&"abc".to_owned())
        );
    }

    #[test]
    fn test_binary_attribute_detection() {
        let mut attr = MessageAttribute::string("Binary", "");
        assert!(attr.is_binary());
        attr.data_type = "Binary.gif".to_owned();
        assert!(attr.is_binary());
        attr.data_type = "String".to_owned();
        assert!(!attr.is_binary());
        attr.data_type = "Number.float".to_owned();
        assert!(!attr.is_binary());
    }

    #[test]
    fn test_into_delete_entry() {
        let msg = RawMessage::new("00000001", "handle", "{}");
        assert_eq!(
            msg.into_delete_entry(),
            DeleteEntry {
                id: "00000001".to_owned(),
                ack_token: "handle".to_owned(),
            }
        );
    }
}
