use std::borrow::Cow;
use std::collections::HashMap;

use serde::Serialize;
use serde_json::value::RawValue;
use sqs_common::message::{MessageAttribute, NormalizedEvent, RawMessage};

use super::{aws_event_type, Overrides};
use crate::error::TransformError;

/// Wraps the whole message, metadata included, into a single event.
#[derive(Debug, Clone)]
pub struct GenericWrap {
    source: String,
    event_type: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct MessageData<'a> {
    message_id: &'a str,
    receipt_handle: &'a str,
    body: Body<'a>,
    attributes: &'a HashMap<String, String>,
    message_attributes: &'a HashMap<String, MessageAttribute>,
}

/// JSON bodies are embedded byte for byte, anything else as a string.
#[derive(Serialize)]
#[serde(untagged)]
enum Body<'a> {
    Json(&'a RawValue),
    Text(Cow<'a, str>),
}

impl<'a> Body<'a> {
    fn from_bytes(body: &'a [u8]) -> Self {
        match serde_json::from_slice(body) {
            Ok(raw) => Body::Json(raw),
            Err(_) => Body::Text(String::from_utf8_lossy(body)),
        }
    }
}

impl GenericWrap {
    pub fn new(queue_arn: &str, overrides: &Overrides) -> Self {
        Self {
            source: overrides
                .source
                .clone()
                .unwrap_or_else(|| queue_arn.to_owned()),
            event_type: overrides
                .event_type
                .clone()
                .unwrap_or_else(|| aws_event_type("sqs", "message")),
        }
    }

    pub fn wrap(&self, msg: &RawMessage) -> Result<NormalizedEvent, TransformError> {
        let mut event = NormalizedEvent::new(&msg.id, &self.event_type, &self.source);
        event.time = msg.sent_time();

        for (name, attribute) in &msg.message_attributes {
            if attribute.is_binary() {
                continue;
            }
            if let Some(value) = &attribute.string_value {
                event.set_extension(name, value);
            }
        }

        event.set_json_data(&MessageData {
            message_id: &msg.id,
            receipt_handle: &msg.ack_token,
            body: Body::from_bytes(&msg.body),
            attributes: &msg.attributes,
            message_attributes: &msg.message_attributes,
        })?;

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::Value;
    use sqs_common::message::SENT_TIMESTAMP_ATTRIBUTE;

    use super::*;

    const ARN: &str = "arn:aws:sqs:us-west-2:123456789012:queue";

    fn data_of(event: &NormalizedEvent) -> Value {
        serde_json::from_slice(&event.data).expect("event data is json")
    }

    #[test]
    fn test_wrap_json_body() {
        let mut msg = RawMessage::new("00000001", "handle-1", r#"{"hello":"world"}"#);
        msg.attributes.insert(
            SENT_TIMESTAMP_ATTRIBUTE.to_owned(),
            "1700000000000".to_owned(),
        );

        let event = GenericWrap::new(ARN, &Overrides::default())
            .wrap(&msg)
            .expect("wrap never fails on valid input");

        assert_eq!(event.id, "00000001");
        assert_eq!(event.event_type, "com.amazon.sqs.message");
        assert_eq!(event.source, ARN);
        assert_eq!(event.content_type, "application/json");
        assert_eq!(event.time.map(|t| t.timestamp()), Some(1_700_000_000));

        let data = data_of(&event);
        assert_eq!(data["MessageId"], "00000001");
        assert_eq!(data["ReceiptHandle"], "handle-1");
        assert_eq!(data["Body"]["hello"], "world");
        assert_eq!(data["Attributes"]["SentTimestamp"], "1700000000000");
    }

    #[test]
    fn test_wrap_text_body() {
        let msg = RawMessage::new("00000001", "handle-1", "hello, world");

        let event = GenericWrap::new(ARN, &Overrides::default())
            .wrap(&msg)
            .expect("wrap");

        assert_eq!(data_of(&event)["Body"], "hello, world");
        assert_eq!(event.time, None);
    }

    #[test]
    fn test_json_body_is_embedded_verbatim() {
        let body = r#"{"z":1,"a":12345678901234567890123,"f":0.10000000000000000001}"#;
        let msg = RawMessage::new("00000001", "handle-1", body);

        let event = GenericWrap::new(ARN, &Overrides::default())
            .wrap(&msg)
            .expect("wrap");

        let data = std::str::from_utf8(&event.data).expect("event data is utf-8");
        assert!(data.contains(&format!(r#""Body":{body}"#)), "data was {data}");
    }

    #[test]
    fn test_overrides() {
        let overrides = Overrides {
            source: Some("custom.source".to_owned()),
            event_type: Some("custom.type".to_owned()),
        };
        let msg = RawMessage::new("00000001", "handle-1", "{}");

        let event = GenericWrap::new(ARN, &overrides).wrap(&msg).expect("wrap");

        assert_eq!(event.source, "custom.source");
        assert_eq!(event.event_type, "custom.type");
    }

    #[test]
    fn test_attributes_become_extensions() {
        let mut msg = RawMessage::new("00000001", "handle-1", "{}");
        msg.message_attributes.insert(
            "Trace_ID".to_owned(),
            MessageAttribute::string("String", "abc"),
        );
        msg.message_attributes
            .insert("count".to_owned(), MessageAttribute::string("Number", "3"));
        msg.message_attributes.insert(
            "thumbnail".to_owned(),
            MessageAttribute {
                data_type: "Binary.png".to_owned(),
                string_value: None,
                binary_value: Some(Bytes::from_static(&[0x89, 0x50])),
            },
        );

        let event = GenericWrap::new(ARN, &Overrides::default())
            .wrap(&msg)
            .expect("wrap");

        assert_eq!(event.extensions.len(), 2);
        assert_eq!(event.extensions.get("traceid").map(String::as_str), Some("abc"));
        assert_eq!(event.extensions.get("count").map(String::as_str), Some("3"));

        // the data keeps every attribute, binary ones included
        let data = data_of(&event);
        assert_eq!(data["MessageAttributes"]["Trace_ID"]["StringValue"], "abc");
        assert_eq!(data["MessageAttributes"]["thumbnail"]["DataType"], "Binary.png");
    }
}
