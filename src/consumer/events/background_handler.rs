//! Publishing background events to the caller thread

use std::sync::Arc;

use tracing::trace;

use crate::consumer::events::background::BackgroundEvent;
use crate::consumer::events::queue::EventQueue;
use crate::consumer::metrics::AsyncConsumerMetrics;
use crate::consumer::time::Clock;

/// Producer side of the background queue, used on the background thread.
/// The caller thread drains through a clone of the same handler.
#[derive(Clone)]
pub struct BackgroundEventHandler {
    queue: EventQueue<BackgroundEvent>,
    clock: Arc<dyn Clock>,
    metrics: Arc<AsyncConsumerMetrics>,
}

impl BackgroundEventHandler {
    pub fn new(
        queue: EventQueue<BackgroundEvent>,
        clock: Arc<dyn Clock>,
        metrics: Arc<AsyncConsumerMetrics>,
    ) -> Self {
        Self {
            queue,
            clock,
            metrics,
        }
    }

    /// Stamp `event` with the enqueue time and publish it
    pub fn add(&self, event: BackgroundEvent) {
        let event_type = event.event_type();
        let depth = self.queue.add(event, self.clock.now_ms());
        self.metrics.record_background_event_queue_size(depth);
        trace!("Enqueued {} background event, queue depth {}", event_type, depth);
    }

    /// Take every queued event, oldest first
    pub fn drain_events(&self) -> Vec<BackgroundEvent> {
        let drained = self.queue.drain();
        let now = self.clock.now_ms();
        self.metrics.record_background_event_queue_size(0);

        drained
            .into_iter()
            .map(|queued| {
                self.metrics
                    .record_background_event_queue_time(now - queued.enqueued_ms);
                queued.event
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
