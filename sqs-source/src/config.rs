use std::fmt;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use sqs_common::queue::{ReceiveRequest, MAX_BATCH_SIZE, MAX_VISIBILITY_TIMEOUT_SECONDS};
use tracing::warn;
use url::Url;

use crate::error::PipelineError;
use crate::pipeline::PipelineConfig;
use crate::transform::{MessageTransform, Overrides, TransformName};

/// Longest long-poll wait SQS accepts on a receive call.
const MAX_WAIT_TIME_SECONDS: i32 = 20;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(from = "ARN")]
    pub arn: QueueArn,

    #[envconfig(from = "SQS_MESSAGE_PROCESSOR", default = "default")]
    pub message_processor: TransformName,

    /// Seconds. Unset keeps the visibility timeout configured on the queue.
    #[envconfig(from = "SQS_VISIBILITY_TIMEOUT")]
    pub visibility_timeout: Option<i64>,

    #[envconfig(from = "CE_SOURCE")]
    pub ce_source: Option<NonEmptyString>,

    #[envconfig(from = "CE_TYPE")]
    pub ce_type: Option<NonEmptyString>,

    #[envconfig(from = "K_SINK")]
    pub sink_url: Option<Url>,

    #[envconfig(from = "PRINT_SINK", default = "false")]
    pub print_sink: bool,

    #[envconfig(from = "SINK_TIMEOUT", default = "5000")]
    pub sink_timeout: EnvMsDuration,

    #[envconfig(from = "AWS_SQS_MAX_BATCH_SIZE", default = "10")]
    pub max_batch_size: i32,

    #[envconfig(from = "AWS_SQS_WAIT_TIME_SECONDS", default = "3")]
    pub wait_time_seconds: i32,

    #[envconfig(from = "AWS_SQS_POLL_FAILED_WAIT_TIME", default = "1000")]
    pub poll_failed_wait_time: EnvMsDuration,

    #[envconfig(from = "RECEIVE_IDLE_PERIOD", default = "5000")]
    pub receive_idle_period: EnvMsDuration,

    #[envconfig(from = "DELETE_PERIOD", default = "3000")]
    pub delete_period: EnvMsDuration,

    #[envconfig(from = "DELETE_TIMEOUT", default = "10000")]
    pub delete_timeout: EnvMsDuration,

    #[envconfig(from = "LIVENESS_DEADLINE", default = "60000")]
    pub liveness_deadline: EnvMsDuration,

    #[envconfig(nested = true)]
    pub concurrency: ConcurrencyConfig,
}

#[derive(Envconfig, Clone)]
pub struct ConcurrencyConfig {
    #[envconfig(from = "RECEIVERS_PER_CPU", default = "2")]
    pub receivers_per_cpu: usize,

    #[envconfig(from = "PROCESSORS_PER_CPU", default = "8")]
    pub processors_per_cpu: usize,

    #[envconfig(from = "DELETERS_PER_CPU", default = "2")]
    pub deleters_per_cpu: usize,

    /// Capacity of both the process and delete queues.
    #[envconfig(from = "QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn transform(&self) -> MessageTransform {
        MessageTransform::new(
            self.message_processor,
            &self.arn.to_string(),
            Overrides {
                source: self.ce_source.as_ref().map(|s| s.0.clone()),
                event_type: self.ce_type.as_ref().map(|s| s.0.clone()),
            },
        )
    }

    /// Validates the tunables and derives the worker counts from `parallelism`.
    pub fn pipeline_config(&self, parallelism: usize) -> Result<PipelineConfig, PipelineError> {
        let batch_limit = i32::try_from(MAX_BATCH_SIZE).unwrap_or(i32::MAX);
        if !(1..=batch_limit).contains(&self.max_batch_size) {
            return Err(PipelineError::InvalidConfig(format!(
                "AWS_SQS_MAX_BATCH_SIZE must be between 1 and {batch_limit}, got {}",
                self.max_batch_size
            )));
        }
        if !(0..=MAX_WAIT_TIME_SECONDS).contains(&self.wait_time_seconds) {
            return Err(PipelineError::InvalidConfig(format!(
                "AWS_SQS_WAIT_TIME_SECONDS must be between 0 and {MAX_WAIT_TIME_SECONDS}, got {}",
                self.wait_time_seconds
            )));
        }

        let concurrency = &self.concurrency;
        for (name, multiplier) in [
            ("RECEIVERS_PER_CPU", concurrency.receivers_per_cpu),
            ("PROCESSORS_PER_CPU", concurrency.processors_per_cpu),
            ("DELETERS_PER_CPU", concurrency.deleters_per_cpu),
        ] {
            if multiplier == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be at least 1"
                )));
            }
        }

        let parallelism = parallelism.max(1);
        let queue_capacity = concurrency
            .queue_capacity
            .unwrap_or(default_queue_capacity(parallelism));

        Ok(PipelineConfig {
            queue_name: self.arn.resource.clone(),
            owner_account: Some(self.arn.account.clone()).filter(|a| !a.is_empty()),
            receive: ReceiveRequest {
                max_messages: self.max_batch_size,
                wait_time_seconds: self.wait_time_seconds,
                visibility_timeout: visibility_timeout(self.visibility_timeout),
            },
            receive_backoff: self.poll_failed_wait_time.0,
            receive_idle_period: self.receive_idle_period.0,
            delete_period: self.delete_period.0,
            delete_timeout: self.delete_timeout.0,
            receivers: parallelism * concurrency.receivers_per_cpu,
            processors: parallelism * concurrency.processors_per_cpu,
            deleters: parallelism * concurrency.deleters_per_cpu,
            process_capacity: queue_capacity,
            delete_capacity: queue_capacity,
        })
    }
}

/// Sized so a full burst from every processor fits in the queues.
pub fn default_queue_capacity(parallelism: usize) -> usize {
    MAX_BATCH_SIZE * parallelism * 9
}

/// Out of range values are ignored so the queue's own setting applies.
fn visibility_timeout(seconds: Option<i64>) -> Option<i32> {
    let seconds = seconds?;
    if !(0..=MAX_VISIBILITY_TIMEOUT_SECONDS).contains(&seconds) {
        warn!(
            visibility_timeout = seconds,
            "ignoring visibility timeout outside of [0, {MAX_VISIBILITY_TIMEOUT_SECONDS}] seconds"
        );
        return None;
    }
    i32::try_from(seconds).ok()
}

/// An SQS queue ARN, `arn:<partition>:sqs:<region>:<account>:<queue name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueArn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account: String,
    pub resource: String,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseArnError(pub String);

impl fmt::Display for ParseArnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid queue ARN: {}", self.0)
    }
}

impl FromStr for QueueArn {
    type Err = ParseArnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(6, ':').collect();
        let [prefix, partition, service, region, account, resource] = parts[..] else {
            return Err(ParseArnError(s.to_owned()));
        };
        if prefix != "arn" || service != "sqs" || region.is_empty() || resource.is_empty() {
            return Err(ParseArnError(s.to_owned()));
        }

        Ok(QueueArn {
            partition: partition.to_owned(),
            service: service.to_owned(),
            region: region.to_owned(),
            account: account.to_owned(),
            resource: resource.to_owned(),
        })
    }
}

impl fmt::Display for QueueArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account, self.resource
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
