// Background network thread
//
// The thread owns the processor, the reaper and the network client. Each loop
// iteration drains the application queue, lets the request managers produce
// requests, drives the network and expires overdue events, then sleeps until
// woken by a new event, asked to close, or the computed wait elapses.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::{debug, info, trace, warn};

use crate::consumer::constants::{NETWORK_THREAD_NAME, PENDING_REQUEST_POLL_INTERVAL_MS};
use crate::consumer::error::{ConsumerError, Result};
use crate::consumer::events::{
    ApplicationEvent, AsCompletable, CompletableEventReaper, EventQueue,
};
use crate::consumer::metrics::AsyncConsumerMetrics;
use crate::consumer::network::{NetworkClientDelegate, PollResult};
use crate::consumer::processor::ApplicationEventProcessor;
use crate::consumer::time::Clock;

/// Everything the background thread owns
pub struct NetworkThread {
    app_queue: EventQueue<ApplicationEvent>,
    processor: ApplicationEventProcessor,
    reaper: CompletableEventReaper,
    network: Box<dyn NetworkClientDelegate>,
    clock: Arc<dyn Clock>,
    metrics: Arc<AsyncConsumerMetrics>,
    wakeup: Receiver<()>,
    max_poll_wait_ms: i64,
}

impl NetworkThread {
    pub fn new(
        app_queue: EventQueue<ApplicationEvent>,
        processor: ApplicationEventProcessor,
        network: Box<dyn NetworkClientDelegate>,
        clock: Arc<dyn Clock>,
        metrics: Arc<AsyncConsumerMetrics>,
        wakeup: Receiver<()>,
        max_poll_wait_ms: i64,
    ) -> Self {
        Self {
            app_queue,
            processor,
            reaper: CompletableEventReaper::with_metrics(metrics.clone()),
            network,
            clock,
            metrics,
            wakeup,
            max_poll_wait_ms,
        }
    }

    pub fn processor(&self) -> &ApplicationEventProcessor {
        &self.processor
    }

    pub fn reaper(&self) -> &CompletableEventReaper {
        &self.reaper
    }

    /// Run one loop iteration. Returns how long the thread may sleep before
    /// the next one (milliseconds).
    pub fn run_once(&mut self) -> i64 {
        // Step 1: Process everything queued so far; later adds wait for the
        // next iteration
        let now = self.clock.now_ms();
        let events = self.app_queue.drain();
        self.metrics.record_application_event_queue_size(0);

        let processed = events.len();
        for queued in events {
            self.metrics
                .record_application_event_queue_time(now - queued.enqueued_ms);
            if let Some(tracked) = queued.event.as_completable() {
                self.reaper.add(tracked);
            }
            self.processor.process(queued.event);
        }
        if processed > 0 {
            self.metrics.record_application_events_processed(processed);
        }

        // Step 2: Apply manager results and heartbeat outcomes
        self.processor.poll_background_progress(now);

        // Step 3: Collect and send outbound requests
        let now = self.clock.now_ms();
        let results = self.processor.request_managers_mut().poll(now);
        let mut wait = self.send_all(results).min(self.max_poll_wait_ms);
        wait = wait.min(self.processor.request_managers_mut().maximum_time_to_wait(now));

        // Step 4: Drive I/O without blocking; the select in `run` is the sleep
        self.network.poll(0, now);
        if self.network.has_pending_requests() {
            wait = wait.min(PENDING_REQUEST_POLL_INTERVAL_MS);
        }

        // Step 5: Expire overdue events
        self.reaper.reap(self.clock.now_ms());

        wait.max(0)
    }

    /// Hand every unsent request to the network. Returns the smallest
    /// time-until-next-poll among `results`.
    fn send_all(&mut self, results: Vec<PollResult>) -> i64 {
        let mut wait = i64::MAX;
        for result in results {
            wait = wait.min(result.time_until_next_poll_ms);
            for request in result.unsent_requests {
                trace!("Sending request with api key {}", request.api_key);
                self.network.send(request);
            }
        }
        wait
    }

    /// Loop until asked to close or every event producer is gone
    pub fn run(mut self, close: Receiver<i64>) {
        info!("{} started", NETWORK_THREAD_NAME);
        let wakeup = self.wakeup.clone();

        loop {
            let wait_ms = self.run_once();
            let timeout = Duration::from_millis(wait_ms as u64);

            select! {
                recv(close) -> msg => {
                    // A dropped handle closes without a flush budget
                    let timeout_ms = msg.unwrap_or(0);
                    self.cleanup(timeout_ms);
                    break;
                }
                recv(wakeup) -> msg => {
                    if msg.is_err() {
                        debug!("All event producers dropped, shutting down");
                        self.cleanup(0);
                        break;
                    }
                }
                default(timeout) => {}
            }
        }

        info!("{} stopped", NETWORK_THREAD_NAME);
    }

    /// Flush close-time requests within `timeout_ms`, then fail everything
    /// still outstanding with a shutdown error
    pub fn cleanup(&mut self, timeout_ms: i64) {
        debug!("Closing {} with a {} ms budget", NETWORK_THREAD_NAME, timeout_ms);
        let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(0) as u64);

        self.processor.signal_close();
        let now = self.clock.now_ms();
        let results = self.processor.request_managers_mut().poll_on_close(now);
        self.send_all(results);

        loop {
            self.network.poll(0, self.clock.now_ms());
            if !self.network.has_pending_requests() {
                break;
            }
            if Instant::now() >= deadline {
                warn!("Close timed out with requests still in flight");
                break;
            }
            thread::sleep(Duration::from_millis(PENDING_REQUEST_POLL_INTERVAL_MS as u64));
        }

        let mut remaining = self.app_queue.drain();
        let expired = self.reaper.reap_all(&mut remaining);
        if expired > 0 {
            info!("Failed {} outstanding events on close", expired);
        }
    }

    /// Start the loop on its own named thread
    pub fn spawn(self) -> Result<NetworkThreadHandle> {
        let (close_tx, close_rx) = bounded(1);
        let join = thread::Builder::new()
            .name(NETWORK_THREAD_NAME.to_string())
            .spawn(move || self.run(close_rx))
            .map_err(|e| {
                ConsumerError::Internal(format!("Failed to spawn {}: {}", NETWORK_THREAD_NAME, e))
            })?;

        Ok(NetworkThreadHandle {
            close_tx,
            join: Some(join),
        })
    }
}

/// Caller-side handle of a running [`NetworkThread`]
pub struct NetworkThreadHandle {
    close_tx: Sender<i64>,
    join: Option<JoinHandle<()>>,
}

impl NetworkThreadHandle {
    pub fn is_running(&self) -> bool {
        self.join.is_some()
    }

    /// Ask the thread to close within `timeout_ms` and wait for it to exit
    pub fn close(&mut self, timeout_ms: i64) -> Result<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        // The thread may already have exited after its producers dropped
        let _ = self.close_tx.send(timeout_ms);
        join.join()
            .map_err(|_| ConsumerError::Internal(format!("{} panicked", NETWORK_THREAD_NAME)))
    }
}
