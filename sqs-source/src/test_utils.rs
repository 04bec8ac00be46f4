//! In-memory queue and sink used by the unit and integration tests.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use axum::http::StatusCode;
use sqs_common::message::{AckEntries, DeleteEntry, NormalizedEvent, RawMessage};
use sqs_common::queue::{DeleteFailure, QueueClient, QueueError, ReceiveRequest};
use sqs_common::sink::{EventSink, SinkError};
use tokio::time::{Duration, Instant};

pub const MOCK_QUEUE_URL: &str = "https://sqs.us-west-2.amazonaws.com/123456789012/queue";

pub fn make_mock_messages(count: usize) -> Vec<RawMessage> {
    (1..=count)
        .map(|i| {
            RawMessage::new(
                &format!("{i:08}"),
                &format!("handle-{i}"),
                format!("{{\"seq\":{i}}}"),
            )
        })
        .collect()
}

#[derive(Default)]
struct MockQueueState {
    available: VecDeque<RawMessage>,
    in_flight: HashMap<String, String>,
    deleted: Vec<String>,
    polls: Vec<Instant>,
    delete_batches: Vec<usize>,
    failing_polls: usize,
}

/// Queue double that tracks every message from available to in flight to
/// deleted. Received messages stay in flight until deleted with their handle.
#[derive(Default)]
pub struct MockQueue {
    state: Mutex<MockQueueState>,
    fail_resolution: bool,
}

impl MockQueue {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            state: Mutex::new(MockQueueState {
                available: messages.into(),
                ..Default::default()
            }),
            fail_resolution: false,
        }
    }

    pub fn failing_resolution(mut self) -> Self {
        self.fail_resolution = true;
        self
    }

    /// The next `count` receive calls return an error.
    pub fn failing_polls(self, count: usize) -> Self {
        self.lock().failing_polls = count;
        self
    }

    pub fn available_count(&self) -> usize {
        self.lock().available.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub fn poll_times(&self) -> Vec<Instant> {
        self.lock().polls.clone()
    }

    pub fn delete_batch_sizes(&self) -> Vec<usize> {
        self.lock().delete_batches.clone()
    }

    /// Receives everything available and returns it as delete entries.
    pub fn take_in_flight(&self) -> Vec<DeleteEntry> {
        let mut state = self.lock();
        let mut entries = Vec::new();
        while let Some(msg) = state.available.pop_front() {
            state.in_flight.insert(msg.id.clone(), msg.ack_token.clone());
            entries.push(msg.into_delete_entry());
        }
        entries
    }

    fn lock(&self) -> MutexGuard<'_, MockQueueState> {
        self.state.lock().expect("mock queue lock poisoned")
    }
}

#[async_trait]
impl QueueClient for MockQueue {
    async fn resolve_queue_url(
        &self,
        name: &str,
        _owner_account: Option<&str>,
    ) -> Result<String, QueueError> {
        if self.fail_resolution {
            return Err(QueueError::Resolve {
                name: name.to_owned(),
                error: "AWS.SimpleQueueService.NonExistentQueue".to_owned(),
            });
        }
        Ok(MOCK_QUEUE_URL.to_owned())
    }

    async fn receive(
        &self,
        _queue_url: &str,
        request: &ReceiveRequest,
    ) -> Result<Vec<RawMessage>, QueueError> {
        let mut state = self.lock();
        state.polls.push(Instant::now());

        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(QueueError::Receive("mock receive failure".to_owned()));
        }

        let max = usize::try_from(request.max_messages).unwrap_or_default();
        let mut batch = Vec::with_capacity(max);
        while batch.len() < max {
            let Some(msg) = state.available.pop_front() else {
                break;
            };
            state.in_flight.insert(msg.id.clone(), msg.ack_token.clone());
            batch.push(msg);
        }
        Ok(batch)
    }

    async fn delete_batch(
        &self,
        _queue_url: &str,
        entries: &AckEntries,
    ) -> Result<Vec<DeleteFailure>, QueueError> {
        let mut state = self.lock();
        state.delete_batches.push(entries.len());

        let mut failures = Vec::new();
        for (id, ack_token) in entries {
            if state.in_flight.get(id) == Some(ack_token) {
                state.in_flight.remove(id);
                state.deleted.push(id.clone());
            } else {
                failures.push(DeleteFailure {
                    id: id.clone(),
                    code: "ReceiptHandleIsInvalid".to_owned(),
                    message: None,
                });
            }
        }
        Ok(failures)
    }
}

/// Sink double keeping every acknowledged event. Events whose id is in the
/// reject list are refused.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<NormalizedEvent>>,
    rejected_ids: HashSet<String>,
    delay: Duration,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(ids: &[&str]) -> Self {
        Self {
            events: Mutex::default(),
            rejected_ids: ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Every send takes `delay` before it is acknowledged.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn events(&self) -> Vec<NormalizedEvent> {
        self.events.lock().expect("sink lock poisoned").clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&self, event: &NormalizedEvent) -> Result<(), SinkError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.rejected_ids.contains(&event.id) {
            return Err(SinkError::Nack {
                status: StatusCode::SERVICE_UNAVAILABLE,
            });
        }
        self.events
            .lock()
            .expect("sink lock poisoned")
            .push(event.clone());
        Ok(())
    }
}

/// Polls `condition` until it holds, or panics once `deadline` has passed.
pub async fn wait_until(deadline: Duration, condition: impl Fn() -> bool) {
    let started = Instant::now();
    while !condition() {
        assert!(
            started.elapsed() < deadline,
            "condition not met within {deadline:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
