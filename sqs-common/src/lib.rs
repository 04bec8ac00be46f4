pub mod message;
pub mod metrics;
pub mod queue;
pub mod sink;
pub mod sqs;
