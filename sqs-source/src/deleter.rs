use std::mem;
use std::sync::Arc;
use std::time::Duration;

use health::HealthHandle;
use sqs_common::message::{AckEntries, DeleteEntry};
use sqs_common::queue::{QueueClient, MAX_BATCH_SIZE};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::stats::StatsReporter;

/// Pending acknowledgements of one deleter, keyed by message id.
/// A redelivered message replaces its older entry.
struct DeleteBuffer {
    entries: AckEntries,
    capacity: usize,
}

impl DeleteBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            entries: AckEntries::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns true when the buffer is full and must be flushed.
    fn insert(&mut self, entry: DeleteEntry) -> bool {
        self.entries.insert(entry.id, entry.ack_token);
        self.entries.len() >= self.capacity
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn take(&mut self) -> AckEntries {
        mem::replace(&mut self.entries, AckEntries::with_capacity(self.capacity))
    }
}

/// Batches processed messages and deletes them from the source queue.
pub struct Deleter {
    pub queue: Arc<dyn QueueClient>,
    pub queue_url: String,
    pub delete_queue: flume::Receiver<DeleteEntry>,
    /// Longest time an entry waits in the buffer.
    pub period: Duration,
    pub timeout: Duration,
    pub stats: StatsReporter,
    pub liveness: Option<HealthHandle>,
}

impl Deleter {
    pub async fn run(self, cancel: CancellationToken) {
        let mut buffer = DeleteBuffer::new(MAX_BATCH_SIZE);
        let timer = sleep(self.period);
        tokio::pin!(timer);
        let mut draining = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !draining => {
                    debug!("flushing buffered deletes on shutdown");
                    self.flush(&mut buffer).await;
                    // Processors may still hand over entries, keep going until
                    // the delete queue is closed.
                    draining = true;
                }
                _ = &mut timer => {
                    self.flush(&mut buffer).await;
                    timer.as_mut().reset(Instant::now() + self.period);
                }
                entry = self.delete_queue.recv_async() => match entry {
                    Ok(entry) => {
                        self.stats.report_message_dequeued_delete_count();
                        if buffer.insert(entry) {
                            self.flush(&mut buffer).await;
                            timer.as_mut().reset(Instant::now() + self.period);
                        }
                    }
                    Err(_) => {
                        self.flush(&mut buffer).await;
                        break;
                    }
                },
            }
            // A steady stream of full batches keeps the timer from firing.
            self.report_healthy();
        }

        debug!("deleter stopped");
    }

    /// Issues a single batch delete. The buffer is emptied whatever the
    /// outcome, failed entries are redelivered by the queue.
    async fn flush(&self, buffer: &mut DeleteBuffer) {
        if buffer.is_empty() {
            return;
        }
        let entries = buffer.take();
        self.stats.report_delete_batch_size(entries.len());

        let started = Instant::now();
        let result = timeout(
            self.timeout,
            self.queue.delete_batch(&self.queue_url, &entries),
        )
        .await;
        self.stats.report_delete_duration(started.elapsed());

        match result {
            Ok(Ok(failures)) => {
                for failure in &failures {
                    warn!(
                        msg_id = failure.id,
                        code = failure.code,
                        reason = failure.message,
                        "failed to delete message"
                    );
                }
                if !failures.is_empty() {
                    self.stats.report_delete_failures(failures.len());
                }
                debug!(
                    count = entries.len().saturating_sub(failures.len()),
                    "deleted messages"
                );
            }
            Ok(Err(error)) => {
                error!(msg_ids = ?ids(&entries), %error, "failed to delete messages");
                self.stats.report_delete_failures(entries.len());
            }
            Err(_) => {
                error!(
                    msg_ids = ?ids(&entries),
                    timeout = ?self.timeout,
                    "timed out deleting messages"
                );
                self.stats.report_delete_failures(entries.len());
            }
        }
    }

    fn report_healthy(&self) {
        if let Some(liveness) = &self.liveness {
            liveness.report_healthy();
        }
    }
}

fn ids(entries: &AckEntries) -> Vec<&str> {
    entries.keys().map(String::as_str).collect()
}
