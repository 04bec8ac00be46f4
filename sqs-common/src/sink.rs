use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use http::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info};

use crate::message::NormalizedEvent;

pub const CLOUDEVENTS_SPEC_VERSION: &str = "1.0";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to send event: {0}")]
    Request(#[from] reqwest::Error),
    #[error("event rejected with status {status}")]
    Nack { status: StatusCode },
    #[error("event attribute {name} cannot be encoded: {error}")]
    Encode { name: String, error: String },
}

/// Destination of normalized events. `Ok` means the event was acknowledged.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: &NormalizedEvent) -> Result<(), SinkError>;
}

/// Logs events instead of delivering them, for local runs.
pub struct PrintSink {}

#[async_trait]
impl EventSink for PrintSink {
    async fn send(&self, event: &NormalizedEvent) -> Result<(), SinkError> {
        info!(
            msg_id = event.id,
            event_type = event.event_type,
            source = event.source,
            "event: {}",
            String::from_utf8_lossy(&event.data)
        );
        Ok(())
    }
}

/// Delivers events over HTTP in the CloudEvents binary content mode: context
/// attributes travel as `ce-` headers, the body is the event data.
pub struct HttpSink {
    client: reqwest::Client,
    url: Url,
}

impl HttpSink {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .user_agent("SQS Source")
            .timeout(timeout)
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl EventSink for HttpSink {
    async fn send(&self, event: &NormalizedEvent) -> Result<(), SinkError> {
        let headers = binary_mode_headers(event)?;

        let response = self
            .client
            .post(self.url.clone())
            .headers(headers)
            .body(event.data.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Nack { status });
        }

        debug!(msg_id = event.id, %status, "event delivered");
        Ok(())
    }
}

fn binary_mode_headers(event: &NormalizedEvent) -> Result<HeaderMap, SinkError> {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "ce-specversion", CLOUDEVENTS_SPEC_VERSION)?;
    insert_header(&mut headers, "ce-id", &event.id)?;
    insert_header(&mut headers, "ce-type", &event.event_type)?;
    insert_header(&mut headers, "ce-source", &event.source)?;
    if let Some(subject) = &event.subject {
        insert_header(&mut headers, "ce-subject", subject)?;
    }
    if let Some(time) = &event.time {
        let time = time.to_rfc3339_opts(SecondsFormat::Millis, true);
        insert_header(&mut headers, "ce-time", &time)?;
    }
    for (name, value) in &event.extensions {
        insert_header(&mut headers, &format!("ce-{name}"), value)?;
    }
    insert_header(&mut headers, CONTENT_TYPE.as_str(), &event.content_type)?;
    Ok(headers)
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), SinkError> {
    let encode_error = |error: String| SinkError::Encode {
        name: name.to_owned(),
        error,
    };
    let header_name =
        HeaderName::from_bytes(name.as_bytes()).map_err(|e| encode_error(e.to_string()))?;
    let header_value = HeaderValue::from_str(value).map_err(|e| encode_error(e.to_string()))?;
    headers.insert(header_name, header_value);
    Ok(())
}
