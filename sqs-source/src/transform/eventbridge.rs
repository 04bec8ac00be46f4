use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqs_common::message::{NormalizedEvent, RawMessage};

use super::aws_event_type;
use crate::error::TransformError;

pub(super) fn is_eventbridge_event(body: &Map<String, Value>) -> bool {
    body.contains_key("detail") && body.contains_key("detail-type") && body.contains_key("source")
}

pub(super) fn make_event(
    msg: &RawMessage,
    body: Map<String, Value>,
    source: &str,
) -> Result<NormalizedEvent, TransformError> {
    let id = body.get("id").and_then(Value::as_str).unwrap_or(&msg.id);
    let mut event = NormalizedEvent::new(id, &aws_event_type("events", "event"), source);

    event.time = body
        .get("time")
        .and_then(Value::as_str)
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));

    for (extension, field) in [
        ("awseventssource", "source"),
        ("awseventsdetailtype", "detail-type"),
    ] {
        if let Some(value) = body.get(field) {
            event.set_extension(extension, &attribute_value(value));
        }
    }

    event.set_json_data(&body)?;
    Ok(event)
}

fn attribute_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
