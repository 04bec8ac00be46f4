use std::sync::Arc;
use std::time::Duration;

use health::HealthHandle;
use sqs_common::message::RawMessage;
use sqs_common::queue::{QueueClient, ReceiveRequest};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stats::StatsReporter;

/// Long-polls the source queue and feeds the process queue.
pub struct Receiver {
    pub queue: Arc<dyn QueueClient>,
    pub queue_url: String,
    pub request: ReceiveRequest,
    /// Delay before the next poll after a failed one.
    pub backoff: Duration,
    /// Delay before the next poll after an empty one.
    pub idle_period: Duration,
    pub process_queue: flume::Sender<RawMessage>,
    pub stats: StatsReporter,
    pub liveness: Option<HealthHandle>,
}

impl Receiver {
    pub async fn run(self, cancel: CancellationToken) {
        let timer = sleep(Duration::ZERO);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = &mut timer => {}
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.queue.receive(&self.queue_url, &self.request) => result,
            };

            // Failed polls count as activity, receive errors are never fatal.
            self.report_healthy();

            let messages = match result {
                Ok(messages) => messages,
                Err(error) => {
                    warn!(queue_url = self.queue_url, %error, "failed to receive messages");
                    self.stats.report_receive_error();
                    timer.as_mut().reset(Instant::now() + self.backoff);
                    continue;
                }
            };

            // Keep polling without delay while the queue has messages.
            let delay = if messages.is_empty() {
                self.idle_period
            } else {
                Duration::ZERO
            };
            timer.as_mut().reset(Instant::now() + delay);

            debug!(count = messages.len(), "received messages");
            if !self.push(messages, &cancel).await {
                break;
            }
        }

        debug!("receiver stopped");
    }

    /// Returns false when the pipeline is going away. Keeps reporting
    /// liveness while blocked on a full process queue.
    async fn push(&self, messages: Vec<RawMessage>, cancel: &CancellationToken) -> bool {
        for msg in messages {
            let send = self.process_queue.send_async(msg);
            tokio::pin!(send);
            loop {
                tokio::select! {
                    biased;
                    sent = &mut send => {
                        if sent.is_err() {
                            return false;
                        }
                        break;
                    }
                    _ = cancel.cancelled() => return false,
                    _ = self.heartbeat() => self.report_healthy(),
                }
            }
            self.stats.report_message_enqueued_process_count();
        }
        true
    }

    async fn heartbeat(&self) {
        match &self.liveness {
            Some(liveness) => sleep(liveness.heartbeat_interval()).await,
            None => std::future::pending::<()>().await,
        }
    }

    fn report_healthy(&self) {
        if let Some(liveness) = &self.liveness {
            liveness.report_healthy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use health::HealthRegistry;
    use crate::test_utils::{make_mock_messages, wait_until, MockQueue, MOCK_QUEUE_URL};

    fn receiver(queue: Arc<MockQueue>, process_queue: flume::Sender<RawMessage>) -> Receiver {
        Receiver {
            queue,
            queue_url: MOCK_QUEUE_URL.to_owned(),
            request: ReceiveRequest {
                max_messages: 10,
                wait_time_seconds: 3,
                visibility_timeout: None,
            },
            backoff: Duration::from_secs(1),
            idle_period: Duration::from_secs(5),
            process_queue,
            stats: StatsReporter::new("queue"),
            liveness: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_idle() {
        let queue = Arc::new(MockQueue::new(make_mock_messages(25)));
        let (tx, rx) = flume::bounded(100);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(receiver(queue.clone(), tx).run(cancel.clone()));
        wait_until(Duration::from_secs(60), || queue.poll_times().len() >= 6).await;
        cancel.cancel();
        handle.await.expect("receiver exits cleanly");

        let polls = queue.poll_times();
        // three full-ish batches and the first empty poll all run back to back
        for poll in &polls[1..4] {
            assert!(poll.duration_since(polls[0]) < Duration::from_millis(1));
        }
        // empty polls are spaced by the idle period
        for pair in polls[3..6].windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(gap >= Duration::from_secs(5), "gap was {gap:?}");
            assert!(gap < Duration::from_secs(6), "gap was {gap:?}");
        }

        assert_eq!(rx.len(), 25);
        let ids: Vec<String> = rx.drain().map(|msg| msg.id).collect();
        assert_eq!(ids.first().map(String::as_str), Some("00000001"));
        assert_eq!(ids.last().map(String::as_str), Some("00000025"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_after_failed_poll() {
        let queue = Arc::new(MockQueue::new(make_mock_messages(1)).failing_polls(2));
        let (tx, rx) = flume::bounded(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(receiver(queue.clone(), tx).run(cancel.clone()));
        wait_until(Duration::from_secs(60), || !rx.is_empty()).await;
        cancel.cancel();
        handle.await.expect("receiver exits cleanly");

        let polls = queue.poll_times();
        assert!(polls.len() >= 3);
        for pair in polls[..3].windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(gap >= Duration::from_secs(1), "gap was {gap:?}");
            assert!(gap < Duration::from_secs(2), "gap was {gap:?}");
        }
        assert_eq!(rx.recv().map(|msg| msg.id).ok().as_deref(), Some("00000001"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_push_gives_way_to_cancellation() {
        let queue = Arc::new(MockQueue::new(make_mock_messages(5)));
        let (tx, rx) = flume::bounded(1);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(receiver(queue.clone(), tx).run(cancel.clone()));
        wait_until(Duration::from_secs(60), || rx.is_full()).await;
        cancel.cancel();
        handle.await.expect("receiver exits cleanly");

        assert_eq!(queue.poll_times().len(), 1);
        assert_eq!(rx.len(), 1);
    }

    #[tokio::test]
    async fn test_stays_live_while_blocked_on_full_queue() {
        let queue = Arc::new(MockQueue::new(make_mock_messages(5)));
        let (tx, rx) = flume::bounded(1);
        let registry = HealthRegistry::new("liveness");
        let cancel = CancellationToken::new();

        let mut receiver = receiver(queue.clone(), tx);
        receiver.liveness = Some(registry.register("receivers", Duration::from_millis(300)));
        let handle = tokio::spawn(receiver.run(cancel.clone()));

        wait_until(Duration::from_secs(1), || rx.is_full()).await;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let status = registry.get_status();
            assert!(status.healthy, "status was {:?}", status.components);
        }

        cancel.cancel();
        handle.await.expect("receiver exits cleanly");
        assert_eq!(queue.poll_times().len(), 1);
    }
}
