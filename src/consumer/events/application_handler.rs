//! Submitting application events from the caller thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, trace};

use crate::consumer::error::{ConsumerError, Result};
use crate::consumer::events::application::ApplicationEvent;
use crate::consumer::events::completable::{AsCompletable, CompletableEvent, EventHandle};
use crate::consumer::events::queue::EventQueue;
use crate::consumer::future::CompletableFuture;
use crate::consumer::metrics::AsyncConsumerMetrics;
use crate::consumer::time::{remaining_ms, Clock};

/// Producer side of the application queue
///
/// Every add wakes the background thread so it does not sit out its full
/// poll wait while work is queued.
#[derive(Clone)]
pub struct ApplicationEventHandler {
    queue: EventQueue<ApplicationEvent>,
    wakeup: Sender<()>,
    clock: Arc<dyn Clock>,
    metrics: Arc<AsyncConsumerMetrics>,
    closed: Arc<AtomicBool>,
}

impl ApplicationEventHandler {
    pub fn new(
        queue: EventQueue<ApplicationEvent>,
        wakeup: Sender<()>,
        clock: Arc<dyn Clock>,
        metrics: Arc<AsyncConsumerMetrics>,
    ) -> Self {
        Self {
            queue,
            wakeup,
            clock,
            metrics,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueue `event` for the background thread.
    ///
    /// After [`mark_closed`](Self::mark_closed) nothing is enqueued: the
    /// event is failed with [`ConsumerError::Closed`] and that error returned.
    pub fn add(&self, event: ApplicationEvent) -> Result<()> {
        if self.is_closed() {
            if let Some(completable) = event.as_completable() {
                completable.complete_exceptionally(ConsumerError::Closed);
            }
            return Err(ConsumerError::Closed);
        }

        let event_type = event.event_type();
        let depth = self.queue.add(event, self.clock.now_ms());
        self.metrics.record_application_event_queue_size(depth);
        trace!("Enqueued {} application event, queue depth {}", event_type, depth);

        // A full channel already holds a pending wakeup; a disconnected one
        // means the background thread is gone and close will report it.
        let _ = self.wakeup.try_send(());
        Ok(())
    }

    /// Enqueue `event` and block until `handle` completes or its deadline
    /// passes. `handle` must be the handle carried by `event`.
    pub fn add_and_get<T: Clone + Send + 'static>(
        &self,
        event: ApplicationEvent,
        handle: &EventHandle<T>,
    ) -> Result<T> {
        self.add(event)?;
        self.wait(handle)
    }

    /// Block until `handle` completes or its deadline passes.
    ///
    /// Uses the same deadline as the reaper, so a timeout observed here and
    /// one recorded by the reaper describe the same expiry.
    pub fn wait<T: Clone + Send + 'static>(&self, handle: &EventHandle<T>) -> Result<T> {
        let remaining = remaining_ms(self.clock.now_ms(), handle.deadline_ms());
        match handle.future().wait_for(Duration::from_millis(remaining as u64)) {
            Some(outcome) => outcome,
            None => Err(ConsumerError::timeout(
                handle.describe(),
                self.clock.now_ms(),
                handle.deadline_ms(),
            )),
        }
    }

    /// Enqueue `event` once `gate` resolves.
    ///
    /// Blocks until the gate completes or `deadline_ms` passes. On expiry the
    /// event is failed with a timeout and never enqueued.
    pub fn add_after(
        &self,
        gate: &CompletableFuture<()>,
        event: ApplicationEvent,
        deadline_ms: i64,
    ) -> Result<()> {
        let remaining = remaining_ms(self.clock.now_ms(), deadline_ms);
        match gate.wait_for(Duration::from_millis(remaining as u64)) {
            Some(Ok(())) => self.add(event),
            Some(Err(e)) => {
                if let Some(completable) = event.as_completable() {
                    completable.complete_exceptionally(e.clone());
                }
                Err(e)
            }
            None => {
                debug!(
                    "Gate for {} event still open at its deadline, not enqueuing",
                    event.event_type()
                );
                let err = ConsumerError::timeout(
                    format!("{} gate", event.event_type()),
                    self.clock.now_ms(),
                    deadline_ms,
                );
                if let Some(completable) = event.as_completable() {
                    completable.complete_exceptionally(err.clone());
                }
                Err(err)
            }
        }
    }

    /// Refuse further events
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
