//! Reactor metrics.
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the host binary.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Per-queue metric recorder.
#[derive(Debug, Clone)]
pub struct ReactorMetrics {
    queue_id: String,
}

impl ReactorMetrics {
    pub fn new(queue_id: &str) -> Self {
        Self {
            queue_id: queue_id.to_string(),
        }
    }

    pub fn queue_id(&self) -> &str {
        &self.queue_id
    }

    /// Record a message taken off the queue.
    pub fn message_received(&self) {
        counter!("queue_reactor_messages_received_total", "queue" => self.queue_id.clone())
            .increment(1);
    }

    /// Record a message claimed by a processor.
    pub fn message_claimed(&self, processor: &'static str, duration: Duration) {
        counter!(
            "queue_reactor_messages_claimed_total",
            "queue" => self.queue_id.clone(),
            "processor" => processor
        )
        .increment(1);

        self.record_duration(duration);
    }

    /// Record a message no processor claimed.
    pub fn message_unhandled(&self, duration: Duration) {
        counter!("queue_reactor_messages_unhandled_total", "queue" => self.queue_id.clone())
            .increment(1);

        self.record_duration(duration);
    }

    /// Record a dispatch that raised an error.
    pub fn message_failed(&self, error_category: &str) {
        counter!(
            "queue_reactor_messages_failed_total",
            "queue" => self.queue_id.clone(),
            "category" => error_category.to_string()
        )
        .increment(1);
    }

    /// Record a message skipped because its time-to-live elapsed.
    pub fn message_expired(&self) {
        counter!("queue_reactor_messages_expired_total", "queue" => self.queue_id.clone())
            .increment(1);
    }

    pub fn committed(&self) {
        counter!("queue_reactor_commits_total", "queue" => self.queue_id.clone()).increment(1);
    }

    pub fn rolled_back(&self) {
        counter!("queue_reactor_rollbacks_total", "queue" => self.queue_id.clone()).increment(1);
    }

    /// Record a connect attempt that failed.
    pub fn connect_failed(&self, timeout: bool) {
        counter!(
            "queue_reactor_connect_failures_total",
            "queue" => self.queue_id.clone(),
            "kind" => if timeout { "timeout" } else { "error" }
        )
        .increment(1);
    }

    /// Record a reconnect trigger.
    pub fn reconnect_requested(&self) {
        counter!("queue_reactor_reconnects_requested_total", "queue" => self.queue_id.clone())
            .increment(1);
    }

    /// Update the running gauge (1 running, 0 stopped).
    pub fn set_running(&self, running: bool) {
        gauge!("queue_reactor_running", "queue" => self.queue_id.clone())
            .set(if running { 1.0 } else { 0.0 });
    }

    fn record_duration(&self, duration: Duration) {
        histogram!(
            "queue_reactor_dispatch_duration_seconds",
            "queue" => self.queue_id.clone()
        )
        .record(duration.as_secs_f64());
    }
}
