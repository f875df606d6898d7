//! Unbounded FIFO hand-off between the caller and background threads

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::consumer::events::completable::{AsCompletable, CompletableEvent};

/// An event stamped with the time it was enqueued
#[derive(Debug)]
pub struct Queued<T> {
    pub event: T,
    pub enqueued_ms: i64,
}

impl<T: AsCompletable> AsCompletable for Queued<T> {
    fn as_completable(&self) -> Option<Box<dyn CompletableEvent>> {
        self.event.as_completable()
    }
}

/// Thread-safe unbounded queue
///
/// Clones share the same underlying channel, so one clone can live on each
/// side of the thread boundary.
pub struct EventQueue<T> {
    sender: Sender<Queued<T>>,
    receiver: Receiver<Queued<T>>,
}

impl<T> Clone for EventQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Enqueue `event` and return the queue depth after the push.
    ///
    /// Never blocks. The queue owns both channel ends, so the send cannot fail.
    pub fn add(&self, event: T, now_ms: i64) -> usize {
        let _ = self.sender.send(Queued {
            event,
            enqueued_ms: now_ms,
        });
        self.receiver.len()
    }

    /// Remove and return everything queued when the drain started, oldest first.
    ///
    /// Items pushed while the drain is running stay queued for the next drain.
    pub fn drain(&self) -> Vec<Queued<T>> {
        let available = self.receiver.len();
        let mut drained = Vec::with_capacity(available);
        for _ in 0..available {
            match self.receiver.try_recv() {
                Ok(item) => drained.push(item),
                Err(_) => break,
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
