use std::collections::HashMap;
use std::fmt::{self, Write};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::SdkError;
use aws_sdk_sqs::types::{DeleteMessageBatchRequestEntry, Message, MessageSystemAttributeName};
use aws_sdk_sqs::Client;
use bytes::Bytes;
use tracing::warn;

use crate::message::{AckEntries, MessageAttribute, RawMessage};
use crate::queue::{DeleteFailure, QueueClient, QueueError, ReceiveRequest};

/// Queue client backed by the AWS SDK. Credentials come from the default
/// provider chain (environment, profile, web identity, instance metadata).
#[derive(Clone)]
pub struct SqsQueueClient {
    client: Client,
}

impl SqsQueueClient {
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .load()
            .await;
        Self::from_client(Client::new(&config))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn resolve_queue_url(
        &self,
        name: &str,
        owner_account: Option<&str>,
    ) -> Result<String, QueueError> {
        let output = self
            .client
            .get_queue_url()
            .queue_name(name)
            .set_queue_owner_aws_account_id(owner_account.map(str::to_owned))
            .send()
            .await
            .map_err(|err| QueueError::Resolve {
                name: name.to_owned(),
                error: flatten_error(&err),
            })?;

        output
            .queue_url()
            .map(str::to_owned)
            .ok_or_else(|| QueueError::Resolve {
                name: name.to_owned(),
                error: "response carries no queue url".to_owned(),
            })
    }

    async fn receive(
        &self,
        queue_url: &str,
        request: &ReceiveRequest,
    ) -> Result<Vec<RawMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(request.max_messages)
            .wait_time_seconds(request.wait_time_seconds)
            .set_visibility_timeout(request.visibility_timeout)
            .message_system_attribute_names(MessageSystemAttributeName::SentTimestamp)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|err| QueueError::Receive(flatten_error(&err)))?;

        Ok(output
            .messages()
            .iter()
            .filter_map(|message| {
                let converted = to_raw_message(message);
                if converted.is_none() {
                    warn!(
                        msg_id = message.message_id(),
                        "skipping message without id or receipt handle"
                    );
                }
                converted
            })
            .collect())
    }

    async fn delete_batch(
        &self,
        queue_url: &str,
        entries: &AckEntries,
    ) -> Result<Vec<DeleteFailure>, QueueError> {
        let entries = entries
            .iter()
            .map(|(id, ack_token)| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(id)
                    .receipt_handle(ack_token)
                    .build()
                    .map_err(|err| QueueError::InvalidEntry {
                        id: id.clone(),
                        error: err.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .delete_message_batch()
            .queue_url(queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|err| QueueError::Delete(flatten_error(&err)))?;

        Ok(output
            .failed()
            .iter()
            .map(|failure| DeleteFailure {
                id: failure.id().to_owned(),
                code: failure.code().to_owned(),
                message: failure.message().map(str::to_owned),
            })
            .collect())
    }
}

fn to_raw_message(message: &Message) -> Option<RawMessage> {
    let id = message.message_id()?;
    let ack_token = message.receipt_handle()?;

    let mut raw = RawMessage::new(
        id,
        ack_token,
        Bytes::copy_from_slice(message.body().unwrap_or_default().as_bytes()),
    );

    if let Some(attributes) = message.attributes() {
        raw.attributes = attributes
            .iter()
            .map(|(name, value)| (name.as_str().to_owned(), value.clone()))
            .collect();
    }

    if let Some(attributes) = message.message_attributes() {
        raw.message_attributes = attributes
            .iter()
            .map(|(name, value)| {
                let attribute = MessageAttribute {
                    data_type: value.data_type().to_owned(),
                    string_value: value.string_value().map(str::to_owned),
                    binary_value: value
                        .binary_value()
                        .map(|blob| Bytes::copy_from_slice(blob.as_ref())),
                };
                (name.clone(), attribute)
            })
            .collect::<HashMap<_, _>>();
    }

    Some(raw)
}

/// SDK errors print a generic "service error" at the top level, the useful
/// part lives in the source chain.
fn flatten_error<E>(err: &SdkError<E>) -> String
where
    E: std::error::Error + 'static,
{
    let mut message = String::new();
    if write_chain(&mut message, err).is_err() {
        return err.to_string();
    }
    message
}

fn write_chain(s: &mut String, err: &dyn std::error::Error) -> fmt::Result {
    write!(s, "{err}")?;
    if let Some(source) = err.source() {
        write!(s, ": ")?;
        write_chain(s, source)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use aws_sdk_sqs::primitives::Blob;
    use aws_sdk_sqs::types::MessageAttributeValue;

    use super::*;

    #[test]
    fn test_convert_sdk_message() {
        let message = Message::builder()
            .message_id("00000001")
            .receipt_handle("handle-1")
            .body("{\"hello\":\"world\"}")
            .attributes(MessageSystemAttributeName::SentTimestamp, "1700000000000")
            .message_attributes(
                "Trace",
                MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value("abc")
                    .build()
                    .expect("data type is set"),
            )
            .message_attributes(
                "Blob",
                MessageAttributeValue::builder()
                    .data_type("Binary")
                    .binary_value(Blob::new(vec![1, 2, 3]))
                    .build()
                    .expect("data type is set"),
            )
            .build();

        let raw = to_raw_message(&message).expect("message is complete");
        assert_eq!(raw.id, "00000001");
        assert_eq!(raw.ack_token, "handle-1");
        assert_eq!(raw.body, Bytes::from_static(b"{\"hello\":\"world\"}"));
        assert_eq!(
            raw.attributes.get("SentTimestamp"),
            Some(&"1700000000000".to_owned())
        );
        assert_eq!(
            raw.message_attributes.get("Trace"),
            Some(&MessageAttribute::string("String", "abc"))
        );
        assert_eq!(
            raw.message_attributes
                .get("Blob")
                .and_then(|attr| attr.binary_value.clone()),
            Some(Bytes::from_static(&[1, 2, 3]))
        );
    }

    #[test]
    fn test_skip_message_without_receipt_handle() {
        let message = Message::builder().message_id("00000001").body("x").build();
        assert!(to_raw_message(&message).is_none());
    }
}
