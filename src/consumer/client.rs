//! Caller-side consumer facade
//!
//! [`AsyncConsumer`] turns each public call into an application event, hands
//! it to the background thread and, for blocking calls, waits on the event's
//! result slot until it completes or its deadline passes.
//!
//! Background events are consumed here on the caller thread: errors are
//! returned from the next [`poll`](AsyncConsumer::poll), and rebalance
//! callbacks run against the registered listener before their completion is
//! sent back.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::bounded;
use tracing::{debug, info, warn};

use crate::config::ConsumerConfig;
use crate::consumer::constants::{CALLBACK_CHECK_INTERVAL_MS, EARLIEST_TIMESTAMP, LATEST_TIMESTAMP};
use crate::consumer::error::{ConsumerError, Result};
use crate::consumer::events::{
    ApplicationEvent, ApplicationEventHandler, ApplicationEventType, AsCompletable,
    BackgroundEvent, BackgroundEventHandler, CommitEvent, CompletableEvent,
    CompletableEventReaper, EventHandle, EventQueue, ListOffsetsResult, PollEvent,
    RebalanceCallbackCompleted, RebalanceCallbackMethod, RebalanceCallbackNeeded,
    StreamsCallbackKind, StreamsCallbackNeeded,
};
use crate::consumer::future::CompletableFuture;
use crate::consumer::managers::RequestManagers;
use crate::consumer::membership::MembershipManager;
use crate::consumer::metrics::{AsyncConsumerMetrics, MetricsSnapshot};
use crate::consumer::network::NetworkClientDelegate;
use crate::consumer::processor::ApplicationEventProcessor;
use crate::consumer::subscription::SubscriptionState;
use crate::consumer::time::{calculate_deadline, remaining_ms, Clock, SystemClock};
use crate::consumer::types::{OffsetMap, OffsetResetStrategy, TopicPartition};
use crate::worker::{NetworkThread, NetworkThreadHandle};

/// Callbacks run on the caller thread when the group assignment changes
pub trait ConsumerRebalanceListener: Send {
    fn on_partitions_revoked(&mut self, partitions: &BTreeSet<TopicPartition>) -> Result<()>;

    fn on_partitions_assigned(&mut self, partitions: &BTreeSet<TopicPartition>) -> Result<()>;

    /// Partitions were taken away without a chance to commit.
    /// Defaults to treating them as revoked.
    fn on_partitions_lost(&mut self, partitions: &BTreeSet<TopicPartition>) -> Result<()> {
        self.on_partitions_revoked(partitions)
    }
}

/// Task callbacks of a streams group member
pub trait StreamsRebalanceListener: Send {
    fn on_tasks_assigned(&mut self, task_ids: &BTreeSet<String>) -> Result<()>;

    fn on_tasks_revoked(&mut self, task_ids: &BTreeSet<String>) -> Result<()>;

    fn on_all_tasks_lost(&mut self) -> Result<()>;
}

/// Identity of this consumer in its group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMetadata {
    pub group_id: String,
    pub member_id: String,
    pub member_epoch: i32,
}

fn duration_ms(timeout: Duration) -> i64 {
    i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX)
}

fn validate_topic(topic: &str) -> Result<()> {
    if topic.trim().is_empty() {
        return Err(ConsumerError::InvalidArgument(
            "Topic name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Consumer whose protocol work runs on a background thread
pub struct AsyncConsumer {
    config: ConsumerConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<AsyncConsumerMetrics>,
    app: ApplicationEventHandler,
    background: BackgroundEventHandler,
    /// Tracks callback requests until the caller has run them
    reaper: CompletableEventReaper,
    thread: NetworkThreadHandle,
    rebalance_listener: Option<Box<dyn ConsumerRebalanceListener>>,
    streams_listener: Option<Box<dyn StreamsRebalanceListener>>,
    group_metadata: Option<GroupMetadata>,
    /// Background error seen while blocked in another call
    pending_error: Option<ConsumerError>,
    closed: bool,
}

impl AsyncConsumer {
    /// Start a consumer on the wall clock.
    ///
    /// The membership manager is always built here, from `config.group_id`;
    /// one supplied in `managers` is replaced.
    pub fn new(
        config: ConsumerConfig,
        managers: RequestManagers,
        network: Box<dyn NetworkClientDelegate>,
    ) -> Result<Self> {
        Self::with_clock(config, managers, network, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: ConsumerConfig,
        mut managers: RequestManagers,
        network: Box<dyn NetworkClientDelegate>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(AsyncConsumerMetrics::new());
        let app_queue = EventQueue::new();
        // One pending wakeup is enough to get the loop around again
        let (wakeup_tx, wakeup_rx) = bounded(1);
        let app = ApplicationEventHandler::new(
            app_queue.clone(),
            wakeup_tx,
            clock.clone(),
            metrics.clone(),
        );
        let background =
            BackgroundEventHandler::new(EventQueue::new(), clock.clone(), metrics.clone());

        managers.membership = config.group_id.as_ref().map(|group_id| {
            MembershipManager::new(
                group_id.clone(),
                background.clone(),
                clock.clone(),
                config.default_api_timeout_ms,
            )
        });

        let processor = ApplicationEventProcessor::new(
            SubscriptionState::new(config.auto_offset_reset),
            managers,
            background.clone(),
            clock.clone(),
        );
        let thread = NetworkThread::new(
            app_queue,
            processor,
            network,
            clock.clone(),
            metrics.clone(),
            wakeup_rx,
            config.max_poll_wait_ms,
        )
        .spawn()?;

        let group_metadata = config.group_id.as_ref().map(|group_id| GroupMetadata {
            group_id: group_id.clone(),
            member_id: String::new(),
            member_epoch: 0,
        });

        info!("Consumer {} started: {:?}", config.client_id, config);

        Ok(Self {
            config,
            clock,
            reaper: CompletableEventReaper::new(),
            metrics,
            app,
            background,
            thread,
            rebalance_listener: None,
            streams_listener: None,
            group_metadata,
            pending_error: None,
            closed: false,
        })
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Latest member id and epoch reported by the group
    pub fn group_metadata(&self) -> Option<&GroupMetadata> {
        self.group_metadata.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_streams_listener(&mut self, listener: Box<dyn StreamsRebalanceListener>) {
        self.streams_listener = Some(listener);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ConsumerError::Closed);
        }
        Ok(())
    }

    fn deadline_after(&self, timeout: Duration) -> i64 {
        calculate_deadline(self.clock.now_ms(), duration_ms(timeout))
    }

    fn api_deadline(&self) -> i64 {
        calculate_deadline(self.clock.now_ms(), self.config.default_api_timeout_ms)
    }

    fn handle<T: Clone + Send + 'static>(
        &self,
        event_type: ApplicationEventType,
        deadline_ms: i64,
    ) -> EventHandle<T> {
        event_type.handle(self.clock.now_ms(), deadline_ms)
    }

    // ===== Subscription =====

    /// Subscribe to `topics`. An empty set unsubscribes.
    pub fn subscribe<I, S>(
        &mut self,
        topics: I,
        listener: Option<Box<dyn ConsumerRebalanceListener>>,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_open()?;
        let topics: BTreeSet<String> = topics.into_iter().map(Into::into).collect();
        if topics.is_empty() {
            return self.unsubscribe();
        }
        for topic in &topics {
            validate_topic(topic)?;
        }

        let handle = self.handle(ApplicationEventType::TopicSubscriptionChange, self.api_deadline());
        self.app.add_and_get(
            ApplicationEvent::TopicSubscriptionChange {
                handle: handle.clone(),
                topics,
            },
            &handle,
        )?;
        // A rejected change keeps the listener of the current subscription
        self.rebalance_listener = listener;
        Ok(())
    }

    /// Subscribe to every topic whose full name matches `pattern`
    pub fn subscribe_pattern(
        &mut self,
        pattern: &str,
        listener: Option<Box<dyn ConsumerRebalanceListener>>,
    ) -> Result<()> {
        self.ensure_open()?;
        let handle = self.handle(
            ApplicationEventType::TopicPatternSubscriptionChange,
            self.api_deadline(),
        );
        self.app.add_and_get(
            ApplicationEvent::TopicPatternSubscriptionChange {
                handle: handle.clone(),
                pattern: pattern.to_string(),
            },
            &handle,
        )?;
        self.rebalance_listener = listener;
        Ok(())
    }

    /// Re-match the pattern subscription against the latest metadata
    pub fn update_pattern_subscription(&mut self) -> Result<()> {
        self.ensure_open()?;
        let handle = self.handle(
            ApplicationEventType::UpdatePatternSubscription,
            self.api_deadline(),
        );
        self.app.add_and_get(
            ApplicationEvent::UpdatePatternSubscription(handle.clone()),
            &handle,
        )
    }

    /// Consume exactly `partitions`, outside any group. An empty set
    /// unsubscribes.
    pub fn assign<I>(&mut self, partitions: I) -> Result<()>
    where
        I: IntoIterator<Item = TopicPartition>,
    {
        self.ensure_open()?;
        let partitions: BTreeSet<TopicPartition> = partitions.into_iter().collect();
        if partitions.is_empty() {
            return self.unsubscribe();
        }
        for tp in &partitions {
            validate_topic(&tp.topic)?;
        }

        let handle = self.handle(ApplicationEventType::AssignmentChange, self.api_deadline());
        self.app.add_and_get(
            ApplicationEvent::AssignmentChange {
                handle: handle.clone(),
                current_time_ms: self.clock.now_ms(),
                partitions,
            },
            &handle,
        )
    }

    /// Drop the subscription or assignment, leaving the group if a member.
    /// Revocation callbacks run while waiting.
    pub fn unsubscribe(&mut self) -> Result<()> {
        self.ensure_open()?;
        let handle = self.handle(ApplicationEventType::Unsubscribe, self.api_deadline());
        self.app.add(ApplicationEvent::Unsubscribe(handle.clone()))?;
        self.wait_processing_callbacks(&handle)
    }

    // ===== Commits and offsets =====

    /// Commit `offsets`, or everything consumed when `None`, and wait for the
    /// result
    pub fn commit_sync(&mut self, offsets: Option<OffsetMap>, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        self.commit_sync_until(offsets, self.deadline_after(timeout))
    }

    fn commit_sync_until(&mut self, offsets: Option<OffsetMap>, deadline_ms: i64) -> Result<()> {
        let handle = self.handle(ApplicationEventType::CommitSync, deadline_ms);
        self.app
            .add_and_get(
                ApplicationEvent::CommitSync(CommitEvent {
                    handle: handle.clone(),
                    offsets,
                }),
                &handle,
            )
            .map(|committed| debug!("Committed {} offsets", committed.len()))
    }

    /// Commit without waiting. The returned slot completes with the committed
    /// offsets.
    pub fn commit_async(&mut self, offsets: Option<OffsetMap>) -> Result<CompletableFuture<OffsetMap>> {
        self.ensure_open()?;
        let handle: EventHandle<OffsetMap> =
            self.handle(ApplicationEventType::CommitAsync, i64::MAX);
        let future = handle.future().clone();
        self.app.add(ApplicationEvent::CommitAsync(CommitEvent {
            handle,
            offsets,
        }))?;
        Ok(future)
    }

    /// Last committed offsets of `partitions`
    pub fn committed(
        &mut self,
        partitions: BTreeSet<TopicPartition>,
        timeout: Duration,
    ) -> Result<OffsetMap> {
        self.ensure_open()?;
        let handle = self.handle(
            ApplicationEventType::FetchCommittedOffsets,
            self.deadline_after(timeout),
        );
        self.app.add_and_get(
            ApplicationEvent::FetchCommittedOffsets {
                handle: handle.clone(),
                partitions,
            },
            &handle,
        )
    }

    /// Earliest offset whose timestamp is at or after the requested one, per
    /// partition
    pub fn offsets_for_times(
        &mut self,
        timestamps: HashMap<TopicPartition, i64>,
        timeout: Duration,
    ) -> Result<ListOffsetsResult> {
        self.ensure_open()?;
        if let Some((tp, ts)) = timestamps.iter().find(|(_, ts)| **ts < 0) {
            return Err(ConsumerError::InvalidArgument(format!(
                "Search timestamp for {} must not be negative, got {}",
                tp, ts
            )));
        }
        self.list_offsets(timestamps, true, self.deadline_after(timeout))
    }

    pub fn beginning_offsets(
        &mut self,
        partitions: BTreeSet<TopicPartition>,
        timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>> {
        self.ensure_open()?;
        self.boundary_offsets(partitions, EARLIEST_TIMESTAMP, timeout)
    }

    pub fn end_offsets(
        &mut self,
        partitions: BTreeSet<TopicPartition>,
        timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>> {
        self.ensure_open()?;
        self.boundary_offsets(partitions, LATEST_TIMESTAMP, timeout)
    }

    fn boundary_offsets(
        &mut self,
        partitions: BTreeSet<TopicPartition>,
        sentinel: i64,
        timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>> {
        let timestamps = partitions.into_iter().map(|tp| (tp, sentinel)).collect();
        let found = self.list_offsets(timestamps, false, self.deadline_after(timeout))?;
        Ok(found
            .into_iter()
            .filter_map(|(tp, offset)| offset.map(|o| (tp, o.offset)))
            .collect())
    }

    fn list_offsets(
        &mut self,
        timestamps: HashMap<TopicPartition, i64>,
        require_timestamps: bool,
        deadline_ms: i64,
    ) -> Result<ListOffsetsResult> {
        let handle = self.handle(ApplicationEventType::ListOffsets, deadline_ms);
        self.app.add_and_get(
            ApplicationEvent::ListOffsets {
                handle: handle.clone(),
                timestamps,
                require_timestamps,
            },
            &handle,
        )
    }

    /// Move the fetch position of an assigned partition
    pub fn seek(&mut self, partition: TopicPartition, offset: i64) -> Result<()> {
        self.ensure_open()?;
        if offset < 0 {
            return Err(ConsumerError::InvalidArgument(format!(
                "Seek offset must not be negative, got {}",
                offset
            )));
        }
        let handle = self.handle(ApplicationEventType::SeekUnvalidated, self.api_deadline());
        self.app.add_and_get(
            ApplicationEvent::SeekUnvalidated {
                handle: handle.clone(),
                partition,
                offset,
                leader_epoch: None,
            },
            &handle,
        )
    }

    pub fn seek_to_beginning(&mut self, partitions: BTreeSet<TopicPartition>) -> Result<()> {
        self.ensure_open()?;
        self.reset_offsets(partitions, OffsetResetStrategy::Earliest)
    }

    pub fn seek_to_end(&mut self, partitions: BTreeSet<TopicPartition>) -> Result<()> {
        self.ensure_open()?;
        self.reset_offsets(partitions, OffsetResetStrategy::Latest)
    }

    fn reset_offsets(
        &mut self,
        partitions: BTreeSet<TopicPartition>,
        strategy: OffsetResetStrategy,
    ) -> Result<()> {
        let handle = self.handle(ApplicationEventType::ResetOffset, self.api_deadline());
        self.app.add_and_get(
            ApplicationEvent::ResetOffset {
                handle: handle.clone(),
                partitions,
                strategy,
            },
            &handle,
        )
    }

    /// Known lag of `partition`, or `None` until an end offset has been seen
    pub fn current_lag(&mut self, partition: TopicPartition) -> Result<Option<i64>> {
        self.ensure_open()?;
        let handle = self.handle(ApplicationEventType::CurrentLag, self.api_deadline());
        self.app.add_and_get(
            ApplicationEvent::CurrentLag {
                handle: handle.clone(),
                partition,
                isolation: self.config.isolation_level,
            },
            &handle,
        )
    }

    // ===== Poll =====

    /// Run one poll cycle: surface background errors and callbacks, let the
    /// background thread reconcile and auto-commit, make sure positions are
    /// known, then create fetches once the cycle's commits are queued.
    pub fn poll(&mut self, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        self.process_background_events()?;

        let now = self.clock.now_ms();
        let deadline_ms = calculate_deadline(now, duration_ms(timeout));

        let poll = PollEvent::new(now);
        let gate = poll.reconcile_and_auto_commit().clone();
        self.app.add(ApplicationEvent::Poll(poll))?;

        let positions = self.handle(ApplicationEventType::CheckAndUpdatePositions, deadline_ms);
        match self.app.add_and_get(
            ApplicationEvent::CheckAndUpdatePositions(positions.clone()),
            &positions,
        ) {
            Ok(_) => {}
            Err(e) if e.is_timeout() => debug!("Positions not resolved within poll: {}", e),
            Err(e) => return Err(e),
        }

        let fetch = self.handle(ApplicationEventType::CreateFetchRequests, deadline_ms);
        match self
            .app
            .add_after(&gate, ApplicationEvent::CreateFetchRequests(fetch), deadline_ms)
        {
            Ok(()) => {}
            Err(e) if e.is_timeout() => debug!("Poll ended before fetches could be created: {}", e),
            Err(e) => return Err(e),
        }

        self.process_background_events()
    }

    // ===== Background events =====

    /// Handle everything the background thread has published. Returns the
    /// first error, including one held over from a blocking call.
    pub fn process_background_events(&mut self) -> Result<()> {
        let mut first_error = self.pending_error.take();

        for event in self.background.drain_events() {
            if let Some(tracked) = event.as_completable() {
                self.reaper.add(tracked);
            }
            match event {
                BackgroundEvent::Error(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    } else {
                        warn!("Dropping additional background error: {}", e);
                    }
                }
                BackgroundEvent::ConsumerRebalanceListenerCallbackNeeded(needed) => {
                    self.run_rebalance_callback(needed)
                }
                BackgroundEvent::StreamsTasksCallbackNeeded(needed) => {
                    self.run_streams_callback(needed)
                }
                BackgroundEvent::GroupMetadataUpdate {
                    member_id,
                    member_epoch,
                } => {
                    if let Some(metadata) = self.group_metadata.as_mut() {
                        metadata.member_id = member_id;
                        metadata.member_epoch = member_epoch;
                    }
                }
            }
        }

        self.reaper.reap(self.clock.now_ms());
        first_error.map_or(Ok(()), Err)
    }

    fn run_rebalance_callback(&mut self, needed: RebalanceCallbackNeeded) {
        let result = match self.rebalance_listener.as_mut() {
            Some(listener) => match needed.method {
                RebalanceCallbackMethod::OnPartitionsRevoked => {
                    listener.on_partitions_revoked(&needed.partitions)
                }
                RebalanceCallbackMethod::OnPartitionsAssigned => {
                    listener.on_partitions_assigned(&needed.partitions)
                }
                RebalanceCallbackMethod::OnPartitionsLost => {
                    listener.on_partitions_lost(&needed.partitions)
                }
            },
            None => Ok(()),
        };

        let error = result.err();
        if let Some(e) = &error {
            warn!(
                "Rebalance listener {} failed for {:?}: {}",
                needed.method.as_str(),
                needed.partitions,
                e
            );
        }

        let completed = ApplicationEvent::ConsumerRebalanceListenerCallbackCompleted(
            RebalanceCallbackCompleted {
                method: needed.method,
                future: needed.handle.future().clone(),
                error,
            },
        );
        if let Err(e) = self.app.add(completed) {
            debug!("Could not report {} completion: {}", needed.method.as_str(), e);
        }
    }

    fn run_streams_callback(&mut self, needed: StreamsCallbackNeeded) {
        let result = match self.streams_listener.as_mut() {
            Some(listener) => match needed.kind {
                StreamsCallbackKind::TasksAssigned => listener.on_tasks_assigned(&needed.task_ids),
                StreamsCallbackKind::TasksRevoked => listener.on_tasks_revoked(&needed.task_ids),
                StreamsCallbackKind::AllTasksLost => listener.on_all_tasks_lost(),
            },
            None => Ok(()),
        };

        let error = result.err();
        if let Some(e) = &error {
            warn!("Streams listener {:?} failed: {}", needed.kind, e);
        }

        let completed = ApplicationEvent::streams_callback_completed(
            needed.kind,
            needed.handle.future().clone(),
            error,
        );
        if let Err(e) = self.app.add(completed) {
            debug!("Could not report {:?} completion: {}", needed.kind, e);
        }
    }

    /// Wait on `handle` in short slices, running callbacks between them so a
    /// background step waiting on a callback can finish
    fn wait_processing_callbacks<T: Clone + Send + 'static>(
        &mut self,
        handle: &EventHandle<T>,
    ) -> Result<T> {
        loop {
            if let Err(e) = self.process_background_events() {
                self.pending_error.get_or_insert(e);
            }
            if let Some(outcome) = handle.future().try_get() {
                return outcome;
            }

            let now = self.clock.now_ms();
            let remaining = remaining_ms(now, handle.deadline_ms());
            if remaining == 0 {
                return Err(ConsumerError::timeout(
                    handle.describe(),
                    now,
                    handle.deadline_ms(),
                ));
            }

            let slice = (remaining as u64).min(CALLBACK_CHECK_INTERVAL_MS);
            if let Some(outcome) = handle.future().wait_for(Duration::from_millis(slice)) {
                return outcome;
            }
        }
    }

    // ===== Close =====

    /// Commit, leave the group and stop the background thread within
    /// `timeout`. Events still outstanding afterwards fail with a shutdown
    /// error. Closing twice is a no-op.
    pub fn close(&mut self, timeout: Duration) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        info!("Closing consumer {}", self.config.client_id);

        let deadline_ms = self.deadline_after(timeout);
        let mut first_error: Option<ConsumerError> = None;

        if self.config.auto_commit_enabled() {
            match self.commit_sync_until(None, deadline_ms) {
                Ok(()) => {}
                Err(ConsumerError::MissingCollaborator { .. }) => {
                    debug!("No commit request manager, skipping auto-commit on close")
                }
                Err(e) => {
                    warn!("Auto-commit on close failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Err(e) = self.app.add(ApplicationEvent::CommitOnClose) {
            first_error.get_or_insert(e);
        }

        if self.config.has_group() {
            let leave = self.handle(ApplicationEventType::LeaveGroupOnClose, deadline_ms);
            let result = self
                .app
                .add(ApplicationEvent::LeaveGroupOnClose(leave.clone()))
                .and_then(|()| self.wait_processing_callbacks(&leave));
            if let Err(e) = result {
                warn!("Leaving group on close failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.app.add(ApplicationEvent::StopFindCoordinatorOnClose) {
            first_error.get_or_insert(e);
        }

        self.app.mark_closed();
        let remaining = remaining_ms(self.clock.now_ms(), deadline_ms);
        if let Err(e) = self.thread.close(remaining) {
            first_error.get_or_insert(e);
        }

        let mut leftover = self.background.drain_events();
        let expired = self.reaper.reap_all(&mut leftover);
        if expired > 0 {
            debug!("Failed {} unprocessed callback requests on close", expired);
        }

        info!("Consumer {} closed", self.config.client_id);
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for AsyncConsumer {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let timeout = Duration::from_millis(self.config.close_timeout_ms.max(0) as u64);
        if let Err(e) = self.close(timeout) {
            warn!("Error closing consumer on drop: {}", e);
        }
    }
}
