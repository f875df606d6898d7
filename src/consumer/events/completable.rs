//! Completable events
//!
//! An event that a caller waits on carries an [`EventHandle`]: a unique id, the
//! creation time, an absolute deadline fixed at construction, and the
//! [`CompletableFuture`] through which its outcome is delivered.
//!
//! The reaper does not care about the result type, so handles are tracked
//! through the object-safe [`CompletableEvent`] trait.

use std::fmt;

use uuid::Uuid;

use crate::consumer::error::{ConsumerError, Result};
use crate::consumer::future::CompletableFuture;

/// Type-erased view of an event with a deadline and a result slot
pub trait CompletableEvent: Send + fmt::Debug {
    fn id(&self) -> Uuid;

    /// Event type tag used in logs and timeout messages
    fn event_type(&self) -> &'static str;

    fn created_ms(&self) -> i64;

    /// Absolute expiry instant in milliseconds
    fn deadline_ms(&self) -> i64;

    /// True once the result slot holds a value or an error
    fn is_done(&self) -> bool;

    /// Fail the event. Returns false if it was already complete.
    fn complete_exceptionally(&self, error: ConsumerError) -> bool;

    /// Human-readable subject for error messages
    fn describe(&self) -> String {
        format!("{} event {}", self.event_type(), self.id())
    }
}

/// Identity, deadline and result slot of a completable event
pub struct EventHandle<T> {
    id: Uuid,
    event_type: &'static str,
    created_ms: i64,
    deadline_ms: i64,
    future: CompletableFuture<T>,
}

impl<T> Clone for EventHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            event_type: self.event_type,
            created_ms: self.created_ms,
            deadline_ms: self.deadline_ms,
            future: self.future.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> EventHandle<T> {
    /// Create a handle for an event created at `created_ms` that expires at
    /// `deadline_ms`
    pub fn new(event_type: &'static str, created_ms: i64, deadline_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            created_ms,
            deadline_ms,
            future: CompletableFuture::new(),
        }
    }

    pub fn future(&self) -> &CompletableFuture<T> {
        &self.future
    }

    pub fn complete(&self, value: T) -> bool {
        self.future.complete(value)
    }

    pub fn complete_with(&self, outcome: Result<T>) -> bool {
        self.future.complete_with(outcome)
    }

    /// Forward the outcome of a request manager's future into this event
    pub fn chain(&self, source: &CompletableFuture<T>) {
        source.chain_into(&self.future);
    }

    /// Boxed clone for the reaper's tracked set
    pub fn tracked(&self) -> Box<dyn CompletableEvent> {
        Box::new(self.clone())
    }
}

impl<T: Clone + Send + 'static> CompletableEvent for EventHandle<T> {
    fn id(&self) -> Uuid {
        self.id
    }

    fn event_type(&self) -> &'static str {
        self.event_type
    }

    fn created_ms(&self) -> i64 {
        self.created_ms
    }

    fn deadline_ms(&self) -> i64 {
        self.deadline_ms
    }

    fn is_done(&self) -> bool {
        self.future.is_done()
    }

    fn complete_exceptionally(&self, error: ConsumerError) -> bool {
        self.future.complete_exceptionally(error)
    }
}

impl<T> fmt::Debug for EventHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandle")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("created_ms", &self.created_ms)
            .field("deadline_ms", &self.deadline_ms)
            .field("future", &self.future)
            .finish()
    }
}

/// Items that may wrap a completable event
///
/// Used by the shutdown reap so queued items that carry no result slot can be
/// skipped instead of rejected.
pub trait AsCompletable {
    fn as_completable(&self) -> Option<Box<dyn CompletableEvent>>;
}

impl<T: Clone + Send + 'static> AsCompletable for EventHandle<T> {
    fn as_completable(&self) -> Option<Box<dyn CompletableEvent>> {
        Some(self.tracked())
    }
}
