use std::sync::Arc;
use std::time::Duration;

use health::{HealthRegistry, ReadinessFlag};
use sqs_common::queue::{QueueClient, ReceiveRequest};
use sqs_common::sink::EventSink;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::deleter::Deleter;
use crate::error::PipelineError;
use crate::processor::Processor;
use crate::receiver::Receiver;
use crate::stats::StatsReporter;
use crate::transform::MessageTransform;

/// Validated settings of the pipeline, see `Config::pipeline_config`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queue_name: String,
    pub owner_account: Option<String>,
    pub receive: ReceiveRequest,
    pub receive_backoff: Duration,
    pub receive_idle_period: Duration,
    pub delete_period: Duration,
    pub delete_timeout: Duration,
    pub receivers: usize,
    pub processors: usize,
    pub deleters: usize,
    pub process_capacity: usize,
    pub delete_capacity: usize,
}

/// Wires the receiver, processor and deleter pools together over two bounded queues.
pub struct Pipeline {
    config: PipelineConfig,
    queue: Arc<dyn QueueClient>,
    sink: Arc<dyn EventSink>,
    transform: Arc<MessageTransform>,
    stats: StatsReporter,
    readiness: Option<ReadinessFlag>,
    liveness: Option<(HealthRegistry, Duration)>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        queue: Arc<dyn QueueClient>,
        sink: Arc<dyn EventSink>,
        transform: MessageTransform,
        stats: StatsReporter,
    ) -> Self {
        Self {
            config,
            queue,
            sink,
            transform: Arc::new(transform),
            stats,
            readiness: None,
            liveness: None,
        }
    }

    /// Raised once the queue url is resolved.
    pub fn with_readiness(mut self, readiness: ReadinessFlag) -> Self {
        self.readiness = Some(readiness);
        self
    }

    /// Receivers and deleters must report at least once per `deadline`.
    pub fn with_liveness(mut self, registry: HealthRegistry, deadline: Duration) -> Self {
        self.liveness = Some((registry, deadline));
        self
    }

    /// Runs until `shutdown` is cancelled and every worker has exited.
    /// Only a failed queue url resolution is an error, everything after is
    /// handled by the workers.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), PipelineError> {
        let config = self.config;

        let queue_url = self
            .queue
            .resolve_queue_url(&config.queue_name, config.owner_account.as_deref())
            .await
            .map_err(PipelineError::QueueResolution)?;
        info!(queue_url, "resolved source queue");

        if let Some(readiness) = &self.readiness {
            readiness.mark_ready();
        }

        let (process_tx, process_rx) = flume::bounded(config.process_capacity);
        let (delete_tx, delete_rx) = flume::bounded(config.delete_capacity);
        self.stats
            .report_queue_capacity_process(config.process_capacity);
        self.stats.report_queue_capacity_delete(config.delete_capacity);

        let (receivers_health, deleters_health) = match &self.liveness {
            Some((registry, deadline)) => (
                Some(registry.register("receivers", *deadline)),
                Some(registry.register("deleters", *deadline)),
            ),
            None => (None, None),
        };

        let mut workers = JoinSet::new();

        for _ in 0..config.receivers {
            let receiver = Receiver {
                queue: self.queue.clone(),
                queue_url: queue_url.clone(),
                request: config.receive,
                backoff: config.receive_backoff,
                idle_period: config.receive_idle_period,
                process_queue: process_tx.clone(),
                stats: self.stats.clone(),
                liveness: receivers_health.clone(),
            };
            workers.spawn(receiver.run(shutdown.clone()));
        }

        for _ in 0..config.processors {
            let processor = Processor {
                transform: self.transform.clone(),
                sink: self.sink.clone(),
                process_queue: process_rx.clone(),
                delete_queue: delete_tx.clone(),
                stats: self.stats.clone(),
            };
            workers.spawn(processor.run(shutdown.clone()));
        }

        for _ in 0..config.deleters {
            let deleter = Deleter {
                queue: self.queue.clone(),
                queue_url: queue_url.clone(),
                delete_queue: delete_rx.clone(),
                period: config.delete_period,
                timeout: config.delete_timeout,
                stats: self.stats.clone(),
                liveness: deleters_health.clone(),
            };
            workers.spawn(deleter.run(shutdown.clone()));
        }

        // Workers own the queues from here on, deleters exit once the last
        // processor drops its sender.
        drop(process_tx);
        drop(process_rx);
        drop(delete_tx);
        drop(delete_rx);

        info!(
            receivers = config.receivers,
            processors = config.processors,
            deleters = config.deleters,
            process_capacity = config.process_capacity,
            delete_capacity = config.delete_capacity,
            "pipeline started"
        );

        while let Some(result) = workers.join_next().await {
            if let Err(error) = result {
                error!(%error, "pipeline worker failed");
            }
        }

        info!("pipeline stopped");
        Ok(())
    }
}
