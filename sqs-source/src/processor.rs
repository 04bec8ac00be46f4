use std::sync::Arc;

use sqs_common::message::{DeleteEntry, RawMessage};
use sqs_common::sink::EventSink;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::stats::StatsReporter;
use crate::transform::MessageTransform;

/// Turns messages into events and hands fully dispatched messages over for deletion.
pub struct Processor {
    pub transform: Arc<MessageTransform>,
    pub sink: Arc<dyn EventSink>,
    pub process_queue: flume::Receiver<RawMessage>,
    pub delete_queue: flume::Sender<DeleteEntry>,
    pub stats: StatsReporter,
}

impl Processor {
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = self.process_queue.recv_async() => match msg {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
            };
            self.stats.report_message_dequeued_process_count();

            if !self.dispatch(&msg).await {
                continue;
            }

            // Deleters drain until every sender is dropped, no need to race cancellation.
            if self.delete_queue.send_async(msg.into_delete_entry()).await.is_err() {
                break;
            }
            self.stats.report_message_enqueued_delete_count();
        }

        debug!("processor stopped");
    }

    /// Returns true once every event derived from `msg` was acknowledged.
    async fn dispatch(&self, msg: &RawMessage) -> bool {
        debug!(msg_id = msg.id, "processing message");

        let events = match self.transform.process(msg) {
            Ok(events) => events,
            Err(error) => {
                error!(msg_id = msg.id, %error, "failed to process message");
                self.stats.report_transform_error();
                return false;
            }
        };

        for event in &events {
            if let Err(error) = self.sink.send(event).await {
                error!(
                    msg_id = msg.id,
                    event_id = event.id,
                    %error,
                    "failed to send event to the sink"
                );
                self.stats.report_dispatch_error();
                return false;
            }
        }

        debug!(msg_id = msg.id, count = events.len(), "dispatched events");
        true
    }
}
