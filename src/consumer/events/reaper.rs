//! Deadline enforcement for completable events
//!
//! The reaper owns the set of events that have been handed to the background
//! thread and not yet observed complete. It runs on a single thread, so the set
//! needs no locking.
//!
//! ## Reap order
//!
//! For each tracked event the reaper asks "is it done?" **before** "is it
//! overdue?". A response can complete an event at any moment relative to the
//! sweep; checking completion first means a finished event is never reported
//! as timed out just because it had not been removed yet.
//!
//! Losing a completion race is not an error. The event is removed either way,
//! but only completions recorded by this reaper are counted.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::consumer::error::ConsumerError;
use crate::consumer::events::completable::{AsCompletable, CompletableEvent};
use crate::consumer::metrics::AsyncConsumerMetrics;

/// Tracks outstanding completable events and expires them
#[derive(Debug, Default)]
pub struct CompletableEventReaper {
    tracked: Vec<Box<dyn CompletableEvent>>,
    metrics: Option<Arc<AsyncConsumerMetrics>>,
}

impl CompletableEventReaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report expirations to `metrics`
    pub fn with_metrics(metrics: Arc<AsyncConsumerMetrics>) -> Self {
        Self {
            tracked: Vec::new(),
            metrics: Some(metrics),
        }
    }

    /// Start tracking `event`
    pub fn add(&mut self, event: Box<dyn CompletableEvent>) {
        self.tracked.push(event);
    }

    /// Expire every tracked event whose deadline is at or before `now_ms`.
    ///
    /// Returns the number of events this call timed out. Events found already
    /// complete, and events completed by another path during the sweep, are
    /// dropped from the set without being counted.
    pub fn reap(&mut self, now_ms: i64) -> usize {
        let mut expired = 0;

        self.tracked.retain(|event| {
            if event.is_done() {
                return false;
            }

            let deadline_ms = event.deadline_ms();
            if now_ms.saturating_sub(deadline_ms) < 0 {
                return true;
            }

            let error = ConsumerError::timeout(event.describe(), now_ms, deadline_ms);
            if event.complete_exceptionally(error.clone()) {
                expired += 1;
                warn!("Event expired: {}", error);
            } else {
                debug!(
                    "Event {} completed before it could be expired at {}",
                    event.describe(),
                    now_ms
                );
            }
            false
        });

        if expired > 0 {
            if let Some(metrics) = &self.metrics {
                metrics.record_expired_events(expired);
            }
        }
        expired
    }

    /// Force-expire everything on shutdown, ignoring deadlines.
    ///
    /// Completes every incomplete event in the tracked set and in `external`
    /// with [`ConsumerError::ShutdownForced`], then clears both. Items in
    /// `external` that carry no result slot are skipped. Returns the number of
    /// events this call completed.
    pub fn reap_all<E: AsCompletable>(&mut self, external: &mut Vec<E>) -> usize {
        let mut expired = 0;

        for event in self.tracked.drain(..) {
            if force_expire(event.as_ref()) {
                expired += 1;
            }
        }

        for item in external.drain(..) {
            if let Some(event) = item.as_completable() {
                if force_expire(event.as_ref()) {
                    expired += 1;
                }
            }
        }

        if expired > 0 {
            if let Some(metrics) = &self.metrics {
                metrics.record_shutdown_expired_events(expired);
            }
        }
        expired
    }

    pub fn size(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.tracked.iter().any(|event| event.id() == id)
    }

    /// Tracked events that are not complete yet
    pub fn uncompleted_events(&self) -> Vec<&dyn CompletableEvent> {
        self.tracked
            .iter()
            .map(|event| &**event)
            .filter(|event| !event.is_done())
            .collect()
    }
}

fn force_expire(event: &dyn CompletableEvent) -> bool {
    if event.is_done() {
        return false;
    }
    let completed = event.complete_exceptionally(ConsumerError::shutdown_forced(event.describe()));
    if completed {
        debug!("Expired {} on shutdown", event.describe());
    }
    completed
}
