//! Consumer coordination metrics
//!
//! Purely advisory counters and gauges shared by both threads. Nothing in the
//! core reads them back for decisions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for event queues and the reapers
#[derive(Debug, Default)]
pub struct AsyncConsumerMetrics {
    /// Events currently waiting in the application queue
    pub application_event_queue_size: AtomicU64,
    /// Events currently waiting in the background queue
    pub background_event_queue_size: AtomicU64,
    /// Total time application events spent queued (milliseconds)
    pub application_event_queue_time_ms: AtomicU64,
    /// Total time background events spent queued (milliseconds)
    pub background_event_queue_time_ms: AtomicU64,
    /// Application events processed by the background thread
    pub application_events_processed: AtomicU64,
    /// Events completed with a timeout by a reaper
    pub expired_events: AtomicU64,
    /// Events force-expired when the consumer closed
    pub shutdown_expired_events: AtomicU64,
}

/// Point-in-time copy of [`AsyncConsumerMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub application_event_queue_size: u64,
    pub background_event_queue_size: u64,
    pub application_event_queue_time_ms: u64,
    pub background_event_queue_time_ms: u64,
    pub application_events_processed: u64,
    pub expired_events: u64,
    pub shutdown_expired_events: u64,
}

impl AsyncConsumerMetrics {
    /// Create new metrics with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_application_event_queue_size(&self, size: usize) {
        self.application_event_queue_size
            .store(size as u64, Ordering::Relaxed);
    }

    pub fn record_background_event_queue_size(&self, size: usize) {
        self.background_event_queue_size
            .store(size as u64, Ordering::Relaxed);
    }

    pub fn record_application_event_queue_time(&self, elapsed_ms: i64) {
        self.application_event_queue_time_ms
            .fetch_add(elapsed_ms.max(0) as u64, Ordering::Relaxed);
    }

    pub fn record_background_event_queue_time(&self, elapsed_ms: i64) {
        self.background_event_queue_time_ms
            .fetch_add(elapsed_ms.max(0) as u64, Ordering::Relaxed);
    }

    pub fn record_application_events_processed(&self, count: usize) {
        self.application_events_processed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_expired_events(&self, count: usize) {
        self.expired_events
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_shutdown_expired_events(&self, count: usize) {
        self.shutdown_expired_events
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metric values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            application_event_queue_size: self.application_event_queue_size.load(Ordering::Relaxed),
            background_event_queue_size: self.background_event_queue_size.load(Ordering::Relaxed),
            application_event_queue_time_ms: self
                .application_event_queue_time_ms
                .load(Ordering::Relaxed),
            background_event_queue_time_ms: self
                .background_event_queue_time_ms
                .load(Ordering::Relaxed),
            application_events_processed: self.application_events_processed.load(Ordering::Relaxed),
            expired_events: self.expired_events.load(Ordering::Relaxed),
            shutdown_expired_events: self.shutdown_expired_events.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauges_overwrite_counters_accumulate() {
        let metrics = AsyncConsumerMetrics::new();
        metrics.record_background_event_queue_size(4);
        metrics.record_background_event_queue_size(1);
        metrics.record_expired_events(2);
        metrics.record_expired_events(3);
        metrics.record_application_event_queue_time(-5);
        metrics.record_application_event_queue_time(7);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.background_event_queue_size, 1);
        assert_eq!(snapshot.expired_events, 5);
        assert_eq!(snapshot.application_event_queue_time_ms, 7);
        assert_eq!(snapshot.shutdown_expired_events, 0);
    }
}
