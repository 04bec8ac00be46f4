use serde_json::{Map, Value};
use sqs_common::message::{NormalizedEvent, RawMessage};

use super::aws_event_type;
use crate::error::TransformError;

/// The `Records` array of an S3 event notification.
pub(super) fn records(body: &Map<String, Value>) -> Option<&Vec<Value>> {
    body.get("Records")?.as_array()
}

/// One event per record. A single invalid record fails the whole message.
pub(super) fn record_events(
    msg: &RawMessage,
    records: &[Value],
) -> Result<Vec<NormalizedEvent>, TransformError> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| record_event(msg, index, record))
        .collect()
}

fn record_event(
    msg: &RawMessage,
    index: usize,
    record: &Value,
) -> Result<NormalizedEvent, TransformError> {
    let invalid = |reason: &str| TransformError::InvalidRecord {
        index,
        reason: reason.to_owned(),
    };

    let event_name = record
        .get("eventName")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing eventName"))?;
    let bucket_arn = record
        .pointer("/s3/bucket/arn")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing s3.bucket.arn"))?;
    let object_key = record
        .pointer("/s3/object/key")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing s3.object.key"))?;

    let mut event = NormalizedEvent::new(
        &format!("{}-{index}", msg.id),
        &aws_event_type("s3", &record_kind(event_name)),
        bucket_arn,
    );
    event.subject = Some(object_key.to_owned());
    event.set_json_data(record)?;
    Ok(event)
}

/// "ObjectRemoved:DeleteMarkerCreated" -> "objectremoved"
fn record_kind(event_name: &str) -> String {
    event_name
        .split(':')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// S3 sends this payload whenever the notification configuration of a bucket
/// changes.
pub(super) fn test_event(msg: &RawMessage, body: &Map<String, Value>) -> Option<NormalizedEvent> {
    let is_test_event = body.get("Service").and_then(Value::as_str) == Some("Amazon S3")
        && body.get("Event").and_then(Value::as_str) == Some("s3:TestEvent");
    if !is_test_event {
        return None;
    }
    let bucket = body.get("Bucket").and_then(Value::as_str)?;

    let mut event = NormalizedEvent::new(
        &msg.id,
        &aws_event_type("s3", "testevent"),
        &format!("arn:aws:s3:::{bucket}"),
    );
    event.data = msg.body.clone();
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind() {
        assert_eq!(record_kind("ObjectCreated:Put"), "objectcreated");
        assert_eq!(record_kind("ObjectRemoved:DeleteMarkerCreated"), "objectremoved");
        assert_eq!(record_kind("Replication"), "replication");
        assert_eq!(record_kind(""), "");
    }

    #[test]
    fn test_test_event_needs_both_markers() {
        let msg = RawMessage::new("1", "h", "{}");
        let body = |json: &str| -> Map<String, Value> { serde_json::from_str(json).expect("object") };

        assert!(test_event(&msg, &body(r#"{"Service":"Amazon S3","Bucket":"b"}"#)).is_none());
        assert!(test_event(&msg, &body(r#"{"Event":"s3:TestEvent","Bucket":"b"}"#)).is_none());
        assert!(test_event(
            &msg,
            &body(r#"{"Service":"Amazon SNS","Event":"s3:TestEvent","Bucket":"b"}"#)
        )
        .is_none());
        assert!(test_event(&msg, &body(r#"{"Service":"Amazon S3","Event":"s3:TestEvent"}"#))
            .is_none());
        assert!(test_event(
            &msg,
            &body(r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Bucket":"b"}"#)
        )
        .is_some());
    }
}
