use sqs_common::queue::QueueError;
use sqs_common::sink::SinkError;
use thiserror::Error;

/// Reasons a message cannot be turned into events. The message is dropped and
/// left on the queue for redelivery.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("record {index} is invalid: {reason}")]
    InvalidRecord { index: usize, reason: String },
    #[error("failed to serialize event data")]
    Serialize(#[from] serde_json::Error),
}

/// Errors aborting the source before or while starting the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to resolve source queue: {0}")]
    QueueResolution(#[source] QueueError),
    #[error("no sink configured, set K_SINK or PRINT_SINK")]
    MissingSink,
    #[error("failed to build sink: {0}")]
    Sink(#[from] SinkError),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
    #[error("failed to bind http server: {0}")]
    Server(#[from] std::io::Error),
}
