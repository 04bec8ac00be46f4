use std::sync::Arc;
use std::time::Duration;

/// Handle over the source metrics. Every metric carries the queue label.
#[derive(Clone)]
pub struct StatsReporter {
    labels: Arc<Vec<(String, String)>>,
}

impl StatsReporter {
    pub fn new(queue_name: &str) -> Self {
        Self {
            labels: Arc::new(vec![("queue".to_owned(), queue_name.to_owned())]),
        }
    }

    pub fn report_queue_capacity_process(&self, capacity: usize) {
        metrics::gauge!("sqs_source_queue_capacity_process", &*self.labels).set(capacity as f64);
    }

    pub fn report_queue_capacity_delete(&self, capacity: usize) {
        metrics::gauge!("sqs_source_queue_capacity_delete", &*self.labels).set(capacity as f64);
    }

    pub fn report_message_enqueued_process_count(&self) {
        metrics::counter!("sqs_source_message_enqueued_process_count", &*self.labels).increment(1);
    }

    pub fn report_message_dequeued_process_count(&self) {
        metrics::counter!("sqs_source_message_dequeued_process_count", &*self.labels).increment(1);
    }

    pub fn report_message_enqueued_delete_count(&self) {
        metrics::counter!("sqs_source_message_enqueued_delete_count", &*self.labels).increment(1);
    }

    pub fn report_message_dequeued_delete_count(&self) {
        metrics::counter!("sqs_source_message_dequeued_delete_count", &*self.labels).increment(1);
    }

    pub fn report_receive_error(&self) {
        metrics::counter!("sqs_source_receive_errors_total", &*self.labels).increment(1);
    }

    pub fn report_transform_error(&self) {
        metrics::counter!("sqs_source_transform_errors_total", &*self.labels).increment(1);
    }

    pub fn report_dispatch_error(&self) {
        metrics::counter!("sqs_source_dispatch_errors_total", &*self.labels).increment(1);
    }

    pub fn report_delete_failures(&self, count: usize) {
        metrics::counter!("sqs_source_delete_failures_total", &*self.labels)
            .increment(count as u64);
    }

    pub fn report_delete_batch_size(&self, size: usize) {
        metrics::histogram!("sqs_source_delete_batch_size", &*self.labels).record(size as f64);
    }

    pub fn report_delete_duration(&self, elapsed: Duration) {
        metrics::histogram!("sqs_source_delete_duration_seconds", &*self.labels)
            .record(elapsed.as_secs_f64());
    }
}
