//! Single-assignment result slot
//!
//! [`CompletableFuture`] is the channel through which every event's outcome
//! reaches its caller. It can be completed exactly once, either with a value or
//! with a [`ConsumerError`]; later attempts return `false` and change nothing.
//!
//! ## Waiting
//!
//! - Blocking callers use [`CompletableFuture::wait_for`], bounded by a timeout.
//! - Async callers can `.await` the slot directly (it implements `Future`).
//! - The background thread chains request-manager futures into event slots with
//!   [`CompletableFuture::when_complete`] / [`CompletableFuture::chain_into`].
//!
//! Callbacks and wakers run on the thread that completes the slot, after the
//! internal lock is released.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::consumer::error::{ConsumerError, Result};

type Callback<T> = Box<dyn FnOnce(&Result<T>) + Send>;

struct State<T> {
    outcome: Option<Result<T>>,
    callbacks: Vec<Callback<T>>,
    wakers: Vec<Waker>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    completed: Condvar,
}

/// A result slot shared between the thread that completes it and every
/// observer. Cloning shares the same slot.
pub struct CompletableFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for CompletableFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for CompletableFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> CompletableFuture<T> {
    /// Create an incomplete slot
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    outcome: None,
                    callbacks: Vec::new(),
                    wakers: Vec::new(),
                }),
                completed: Condvar::new(),
            }),
        }
    }

    /// Create a slot already completed with `value`
    pub fn completed(value: T) -> Self {
        let future = Self::new();
        future.complete(value);
        future
    }

    /// Create a slot already completed with `error`
    pub fn failed(error: ConsumerError) -> Self {
        let future = Self::new();
        future.complete_exceptionally(error);
        future
    }

    /// Complete with a value. Returns false if the slot was already complete.
    pub fn complete(&self, value: T) -> bool {
        self.complete_with(Ok(value))
    }

    /// Complete with an error. Returns false if the slot was already complete.
    pub fn complete_exceptionally(&self, error: ConsumerError) -> bool {
        self.complete_with(Err(error))
    }

    /// Record `outcome` unless the slot is already complete
    pub fn complete_with(&self, outcome: Result<T>) -> bool {
        let (callbacks, wakers) = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.wakers),
            )
        };

        self.inner.completed.notify_all();
        for callback in callbacks {
            callback(&outcome);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    pub fn is_done(&self) -> bool {
        self.inner.state.lock().outcome.is_some()
    }

    pub fn is_completed_exceptionally(&self) -> bool {
        matches!(self.inner.state.lock().outcome, Some(Err(_)))
    }

    /// The outcome, if the slot is complete
    pub fn try_get(&self) -> Option<Result<T>> {
        self.inner.state.lock().outcome.clone()
    }

    /// Block until the slot completes or `timeout` elapses.
    ///
    /// Returns `None` on timeout; the slot itself is left untouched.
    pub fn wait_for(&self, timeout: Duration) -> Option<Result<T>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = state.outcome.as_ref() {
                return Some(outcome.clone());
            }
            match deadline {
                Some(deadline) => {
                    if self.inner.completed.wait_until(&mut state, deadline).timed_out() {
                        return state.outcome.clone();
                    }
                }
                None => self.inner.completed.wait(&mut state),
            }
        }
    }

    /// Run `callback` once the slot completes (immediately if it already has)
    pub fn when_complete<F>(&self, callback: F)
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        match state.outcome.clone() {
            Some(outcome) => {
                drop(state);
                callback(&outcome);
            }
            None => state.callbacks.push(Box::new(callback)),
        }
    }

    /// Forward this slot's outcome into `target`
    pub fn chain_into(&self, target: &CompletableFuture<T>) {
        let target = target.clone();
        self.when_complete(move |outcome| {
            target.complete_with(outcome.clone());
        });
    }

    /// Derive a slot whose value is `f` applied to this slot's value.
    /// Errors pass through unchanged.
    pub fn map<U, F>(&self, f: F) -> CompletableFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let mapped = CompletableFuture::new();
        let target = mapped.clone();
        self.when_complete(move |outcome| {
            target.complete_with(outcome.clone().map(f));
        });
        mapped
    }

    /// True if both handles refer to the same slot
    pub fn ptr_eq(&self, other: &CompletableFuture<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + Send + 'static> Future for CompletableFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.state.lock();
        if let Some(outcome) = state.outcome.as_ref() {
            return Poll::Ready(outcome.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for CompletableFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        let status = match state.outcome {
            None => "pending",
            Some(Ok(_)) => "completed",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("CompletableFuture")
            .field("status", &status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_complete_once() {
        let future = CompletableFuture::new();
        assert!(!future.is_done());
        assert!(future.complete(1));
        assert!(!future.complete(2));
        assert!(!future.complete_exceptionally(ConsumerError::Closed));
        assert_eq!(future.try_get(), Some(Ok(1)));
        assert!(!future.is_completed_exceptionally());
    }

    #[test]
    fn test_exceptional_completion_wins_when_first() {
        let future: CompletableFuture<i32> = CompletableFuture::new();
        assert!(future.complete_exceptionally(ConsumerError::Closed));
        assert!(!future.complete(5));
        assert!(future.is_completed_exceptionally());
        assert_eq!(future.try_get(), Some(Err(ConsumerError::Closed)));
    }

    #[test]
    fn test_wait_for_times_out_without_completing() {
        let future: CompletableFuture<()> = CompletableFuture::new();
        assert!(future.wait_for(Duration::from_millis(10)).is_none());
        assert!(!future.is_done());
    }

    #[test]
    fn test_wait_for_wakes_on_completion() {
        let future: CompletableFuture<&'static str> = CompletableFuture::new();
        let completer = future.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete("done");
        });

        let outcome = future.wait_for(Duration::from_secs(5));
        assert_eq!(outcome, Some(Ok("done")));
        handle.join().unwrap();
    }

    #[test]
    fn test_when_complete_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let future = CompletableFuture::new();

        let counter = calls.clone();
        future.when_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        future.complete(7);
        future.complete(8);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_when_complete_on_done_future_runs_immediately() {
        let future = CompletableFuture::completed(3);
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        future.when_complete(move |outcome| {
            *sink.lock() = Some(outcome.clone());
        });
        assert_eq!(*seen.lock(), Some(Ok(3)));
    }

    #[test]
    fn test_chain_into_forwards_error() {
        let source: CompletableFuture<u8> = CompletableFuture::new();
        let target = CompletableFuture::new();
        source.chain_into(&target);

        source.complete_exceptionally(ConsumerError::Fatal("boom".to_string()));
        assert_eq!(
            target.try_get(),
            Some(Err(ConsumerError::Fatal("boom".to_string())))
        );
    }

    #[test]
    fn test_chain_into_does_not_override_completed_target() {
        let source = CompletableFuture::new();
        let target = CompletableFuture::new();
        source.chain_into(&target);

        target.complete_exceptionally(ConsumerError::timeout("event", 10, 5));
        source.complete(1);
        assert!(target.is_completed_exceptionally());
    }

    #[test]
    fn test_map() {
        let source = CompletableFuture::new();
        let mapped = source.map(|v: i32| v * 2);
        source.complete(21);
        assert_eq!(mapped.try_get(), Some(Ok(42)));
    }

    #[test]
    fn test_clone_shares_slot() {
        let a: CompletableFuture<()> = CompletableFuture::new();
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        b.complete(());
        assert!(a.is_done());
        assert!(!a.ptr_eq(&CompletableFuture::new()));
    }

    #[tokio::test]
    async fn test_await_completion_from_other_thread() {
        let future: CompletableFuture<u32> = CompletableFuture::new();
        let completer = future.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completer.complete(99);
        });

        let result = tokio::time::timeout(Duration::from_secs(5), future).await;
        assert_eq!(result.expect("should complete"), Ok(99));
    }

    #[test]
    fn test_block_on_completed() {
        let future = CompletableFuture::failed(ConsumerError::Closed);
        assert_eq!(
            futures::executor::block_on(future),
            Err::<(), _>(ConsumerError::Closed)
        );
    }
}
