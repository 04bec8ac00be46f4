use async_trait::async_trait;
use thiserror::Error;

use crate::message::{AckEntries, RawMessage};

/// SQS hard limit on entries per batch call, for both receive and delete.
pub const MAX_BATCH_SIZE: usize = 10;

/// Longest visibility timeout SQS accepts, 12 hours.
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: i64 = 12 * 60 * 60;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("failed to resolve queue url for {name}: {error}")]
    Resolve { name: String, error: String },
    #[error("receive call failed: {0}")]
    Receive(String),
    #[error("batch delete call failed: {0}")]
    Delete(String),
    #[error("invalid delete entry {id}: {error}")]
    InvalidEntry { id: String, error: String },
}

/// Parameters of a single receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub max_messages: i32,
    pub wait_time_seconds: i32,
    /// None leaves the queue's own visibility timeout in place.
    pub visibility_timeout: Option<i32>,
}

/// A single entry the queue refused to delete in an otherwise successful batch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub id: String,
    pub code: String,
    pub message: Option<String>,
}

/// The subset of a pull-based queue API used by the source.
#[async_trait]
pub trait QueueClient: Send + Sync {
    async fn resolve_queue_url(
        &self,
        name: &str,
        owner_account: Option<&str>,
    ) -> Result<String, QueueError>;

    async fn receive(
        &self,
        queue_url: &str,
        request: &ReceiveRequest,
    ) -> Result<Vec<RawMessage>, QueueError>;

    /// Deletes every entry in a single call. Entries rejected by the queue are
    /// returned, a failed call as a whole is an error.
    async fn delete_batch(
        &self,
        queue_url: &str,
        entries: &AckEntries,
    ) -> Result<Vec<DeleteFailure>, QueueError>;
}
