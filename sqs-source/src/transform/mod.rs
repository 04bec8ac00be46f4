//! Conversion of queue messages into normalized events.
//!
//! The variant is picked once at startup from its configured name. Every
//! variant is a pure function of the message, so a single instance is shared
//! by all processors.
use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use sqs_common::message::{NormalizedEvent, RawMessage};

use crate::error::TransformError;

mod envelope;
mod eventbridge;
mod generic;

pub use generic::GenericWrap;

/// `com.amazon.<service>.<kind>`
pub fn aws_event_type(service: &str, kind: &str) -> String {
    format!("com.amazon.{service}.{kind}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformName {
    GenericWrap,
    NestedEnvelopeUnwrap,
    SyntheticTestEvent,
    EventBridge,
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownTransformError(pub String);

impl fmt::Display for UnknownTransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported message processor {:?}", self.0)
    }
}

impl FromStr for TransformName {
    type Err = UnknownTransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" | "generic-wrap" => Ok(TransformName::GenericWrap),
            "s3" | "nested-envelope-unwrap" => Ok(TransformName::NestedEnvelopeUnwrap),
            "synthetic-test-event" => Ok(TransformName::SyntheticTestEvent),
            "eventbridge" => Ok(TransformName::EventBridge),
            other => Err(UnknownTransformError(other.to_owned())),
        }
    }
}

/// Operator supplied replacements for the `source` and `type` attributes.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source: Option<String>,
    pub event_type: Option<String>,
}

#[derive(Debug, Clone)]
pub enum MessageTransform {
    GenericWrap(GenericWrap),
    /// S3 event notifications, one event per record.
    NestedEnvelopeUnwrap(GenericWrap),
    SyntheticTestEvent(GenericWrap),
    EventBridge {
        source: String,
        fallback: GenericWrap,
    },
}

impl MessageTransform {
    /// `queue_arn` is the default `source` of the events.
    pub fn new(name: TransformName, queue_arn: &str, overrides: Overrides) -> Self {
        let generic = GenericWrap::new(queue_arn, &overrides);
        match name {
            TransformName::GenericWrap => MessageTransform::GenericWrap(generic),
            TransformName::NestedEnvelopeUnwrap => MessageTransform::NestedEnvelopeUnwrap(generic),
            TransformName::SyntheticTestEvent => MessageTransform::SyntheticTestEvent(generic),
            TransformName::EventBridge => MessageTransform::EventBridge {
                source: overrides.source.unwrap_or_else(|| queue_arn.to_owned()),
                fallback: generic,
            },
        }
    }

    pub fn process(&self, msg: &RawMessage) -> Result<Vec<NormalizedEvent>, TransformError> {
        match self {
            MessageTransform::GenericWrap(generic) => Ok(vec![generic.wrap(msg)?]),
            MessageTransform::NestedEnvelopeUnwrap(fallback) => {
                let Some(body) = json_object(msg) else {
                    return Ok(vec![fallback.wrap(msg)?]);
                };
                if let Some(records) = envelope::records(&body) {
                    return envelope::record_events(msg, records);
                }
                match envelope::test_event(msg, &body) {
                    Some(event) => Ok(vec![event]),
                    None => Ok(vec![fallback.wrap(msg)?]),
                }
            }
            MessageTransform::SyntheticTestEvent(fallback) => {
                let event = json_object(msg).and_then(|body| envelope::test_event(msg, &body));
                match event {
                    Some(event) => Ok(vec![event]),
                    None => Ok(vec![fallback.wrap(msg)?]),
                }
            }
            MessageTransform::EventBridge { source, fallback } => {
                match json_object(msg).filter(eventbridge::is_eventbridge_event) {
                    Some(body) => Ok(vec![eventbridge::make_event(msg, body, source)?]),
                    None => Ok(vec![fallback.wrap(msg)?]),
                }
            }
        }
    }
}

/// The message body, if it holds a JSON object.
fn json_object(msg: &RawMessage) -> Option<Map<String, Value>> {
    serde_json::from_slice(&msg.body).ok()
}
