//! Application event processor
//!
//! Runs on the background thread and handles every [`ApplicationEvent`]
//! drained from the application queue. Each variant maps to exactly one
//! handler, and every completable event leaves its handler either completed
//! or chained to a request manager future that will complete it.
//!
//! ## Side effects
//!
//! Handlers only ever:
//! - read or change the subscription state and the membership state machine
//! - hand work to request managers, which queue outbound requests themselves
//! - complete the triggering event's result slot
//!
//! The processor never touches the network.
//!
//! ## Deferred results
//!
//! Some manager results must be applied to the subscription state, which the
//! processor owns. Their callbacks push a [`PendingUpdate`] instead, and
//! [`ApplicationEventProcessor::poll_background_progress`] applies them on the
//! next loop iteration.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::consumer::constants::LATEST_TIMESTAMP;
use crate::consumer::error::ConsumerError;
use crate::consumer::events::{
    ApplicationEvent, ApplicationEventType, BackgroundEvent, BackgroundEventHandler, CommitEvent,
    CompletableEvent, EventHandle, ListOffsetsResult, PollEvent, RebalanceCallbackCompleted,
    StreamsCallbackCompleted, StreamsCallbackKind,
};
use crate::consumer::managers::RequestManagers;
use crate::consumer::membership::MembershipManager;
use crate::consumer::subscription::{SubscriptionState, SubscriptionType};
use crate::consumer::time::Clock;
use crate::consumer::types::{
    IsolationLevel, OffsetMap, OffsetResetStrategy, TopicPartition,
};


/// A manager result waiting to be applied on the background thread
#[derive(Debug)]
enum PendingUpdate {
    /// Positions resolved by reset strategy
    Positions {
        positions: HashMap<TopicPartition, i64>,
        handle: EventHandle<bool>,
    },
    /// Committed offsets to use as positions; anything left is reset
    CommittedPositions {
        offsets: OffsetMap,
        handle: EventHandle<bool>,
    },
    /// End offsets fetched for lag computation
    EndOffsets {
        offsets: ListOffsetsResult,
        isolation: IsolationLevel,
    },
}

type PendingUpdates = Arc<Mutex<Vec<PendingUpdate>>>;

fn missing(collaborator: &'static str, event_type: ApplicationEventType) -> ConsumerError {
    ConsumerError::MissingCollaborator {
        collaborator,
        event_type: event_type.to_string(),
    }
}

/// Dispatches application events on the background thread
pub struct ApplicationEventProcessor {
    subscriptions: SubscriptionState,
    request_managers: RequestManagers,
    background: BackgroundEventHandler,
    clock: Arc<dyn Clock>,
    /// Metadata version the pattern subscription was last evaluated against
    pattern_metadata_version: Option<u64>,
    pending: PendingUpdates,
}

impl ApplicationEventProcessor {
    pub fn new(
        subscriptions: SubscriptionState,
        request_managers: RequestManagers,
        background: BackgroundEventHandler,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subscriptions,
            request_managers,
            background,
            clock,
            pattern_metadata_version: None,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscriptions(&self) -> &SubscriptionState {
        &self.subscriptions
    }

    pub fn membership(&self) -> Option<&MembershipManager> {
        self.request_managers.membership.as_ref()
    }

    pub fn request_managers_mut(&mut self) -> &mut RequestManagers {
        &mut self.request_managers
    }

    /// Handle one event
    pub fn process(&mut self, event: ApplicationEvent) {
        trace!("Processing {} event", event.event_type());

        match event {
            ApplicationEvent::Poll(poll) => self.process_poll(poll),
            ApplicationEvent::CommitAsync(commit) => self.process_commit_async(commit),
            ApplicationEvent::CommitSync(commit) => self.process_commit_sync(commit),
            ApplicationEvent::CommitOnClose => self.process_commit_on_close(),
            ApplicationEvent::FetchCommittedOffsets { handle, partitions } => {
                self.process_fetch_committed_offsets(handle, partitions)
            }
            ApplicationEvent::ListOffsets {
                handle,
                timestamps,
                require_timestamps,
            } => self.process_list_offsets(handle, timestamps, require_timestamps),
            ApplicationEvent::CheckAndUpdatePositions(handle) => {
                self.process_check_and_update_positions(handle)
            }
            ApplicationEvent::ResetOffset {
                handle,
                partitions,
                strategy,
            } => {
                handle.complete_with(self.subscriptions.request_offset_reset(&partitions, strategy));
            }
            ApplicationEvent::TopicSubscriptionChange { handle, topics } => {
                self.process_topic_subscription_change(handle, topics)
            }
            ApplicationEvent::TopicPatternSubscriptionChange { handle, pattern } => {
                self.process_topic_pattern_subscription_change(handle, pattern)
            }
            ApplicationEvent::UpdatePatternSubscription(handle) => {
                self.process_update_pattern_subscription(handle)
            }
            ApplicationEvent::Unsubscribe(handle) => self.process_unsubscribe(handle),
            ApplicationEvent::AssignmentChange {
                handle,
                current_time_ms,
                partitions,
            } => self.process_assignment_change(handle, current_time_ms, partitions),
            ApplicationEvent::SeekUnvalidated {
                handle,
                partition,
                offset,
                leader_epoch,
            } => {
                handle.complete_with(self.subscriptions.seek_unvalidated(
                    &partition,
                    offset,
                    leader_epoch,
                ));
            }
            ApplicationEvent::CurrentLag {
                handle,
                partition,
                isolation,
            } => self.process_current_lag(handle, partition, isolation),
            ApplicationEvent::CreateFetchRequests(handle) => {
                self.process_create_fetch_requests(handle)
            }
            ApplicationEvent::LeaveGroupOnClose(handle) => self.process_leave_group_on_close(handle),
            ApplicationEvent::StopFindCoordinatorOnClose => {
                self.process_stop_find_coordinator_on_close()
            }
            ApplicationEvent::ConsumerRebalanceListenerCallbackCompleted(completed) => {
                self.process_rebalance_callback_completed(completed)
            }
            ApplicationEvent::StreamsOnTasksAssignedCallbackCompleted(completed) => {
                self.process_streams_callback_completed(StreamsCallbackKind::TasksAssigned, completed)
            }
            ApplicationEvent::StreamsOnTasksRevokedCallbackCompleted(completed) => {
                self.process_streams_callback_completed(StreamsCallbackKind::TasksRevoked, completed)
            }
            ApplicationEvent::StreamsOnAllTasksLostCallbackCompleted(completed) => {
                self.process_streams_callback_completed(StreamsCallbackKind::AllTasksLost, completed)
            }
        }
    }

    /// Surface an error no caller is waiting on
    fn report(&self, error: ConsumerError) {
        warn!("Background error: {}", error);
        self.background.add(BackgroundEvent::Error(error));
    }

    fn process_poll(&mut self, poll: PollEvent) {
        let now = poll.poll_time_ms;
        let managers = &mut self.request_managers;

        if let Some(heartbeat) = managers.heartbeat.as_mut() {
            heartbeat.reset_poll_timer(now);
        }

        let mut errors = Vec::new();
        if let Some(membership) = managers.membership.as_mut() {
            if let Err(e) = membership.on_consumer_poll() {
                errors.push(e);
            }
            if let Err(e) = membership.maybe_reconcile(
                &mut self.subscriptions,
                managers.commit.as_deref_mut(),
                now,
            ) {
                errors.push(e);
            }
        }

        if let Some(commit) = managers.commit.as_mut() {
            commit.update_timer_and_maybe_commit(now, &self.subscriptions.all_consumed());
        }

        // Every commit this poll can trigger has been generated
        poll.mark_reconcile_and_auto_commit_complete();

        for error in errors {
            self.report(error);
        }
    }

    fn process_commit_async(&mut self, event: CommitEvent) {
        let Some(commit) = self.request_managers.commit.as_mut() else {
            event
                .handle
                .complete_with(Err(missing("commit request manager", ApplicationEventType::CommitAsync)));
            return;
        };
        let offsets = event
            .offsets
            .unwrap_or_else(|| self.subscriptions.all_consumed());
        if offsets.is_empty() {
            event.handle.complete(OffsetMap::new());
            return;
        }
        event.handle.chain(&commit.commit_async(offsets));
    }

    fn process_commit_sync(&mut self, event: CommitEvent) {
        let Some(commit) = self.request_managers.commit.as_mut() else {
            event
                .handle
                .complete_with(Err(missing("commit request manager", ApplicationEventType::CommitSync)));
            return;
        };
        let offsets = event
            .offsets
            .unwrap_or_else(|| self.subscriptions.all_consumed());
        if offsets.is_empty() {
            event.handle.complete(OffsetMap::new());
            return;
        }
        let deadline_ms = event.handle.deadline_ms();
        event.handle.chain(&commit.commit_sync(offsets, deadline_ms));
    }

    fn process_commit_on_close(&mut self) {
        match self.request_managers.commit.as_mut() {
            Some(commit) => commit.signal_close(),
            None => debug!("No commit request manager to signal on close"),
        }
    }

    fn process_fetch_committed_offsets(
        &mut self,
        handle: EventHandle<OffsetMap>,
        partitions: BTreeSet<TopicPartition>,
    ) {
        let Some(commit) = self.request_managers.commit.as_mut() else {
            handle.complete_with(Err(missing(
                "commit request manager",
                ApplicationEventType::FetchCommittedOffsets,
            )));
            return;
        };
        if partitions.is_empty() {
            handle.complete(OffsetMap::new());
            return;
        }
        let deadline_ms = handle.deadline_ms();
        handle.chain(&commit.fetch_offsets(partitions, deadline_ms));
    }

    fn process_list_offsets(
        &mut self,
        handle: EventHandle<ListOffsetsResult>,
        timestamps: HashMap<TopicPartition, i64>,
        require_timestamps: bool,
    ) {
        let Some(offsets) = self.request_managers.offsets.as_mut() else {
            handle.complete_with(Err(missing(
                "offsets request manager",
                ApplicationEventType::ListOffsets,
            )));
            return;
        };
        if timestamps.is_empty() {
            handle.complete(ListOffsetsResult::new());
            return;
        }
        handle.chain(&offsets.fetch_offsets(timestamps, require_timestamps));
    }

    fn process_check_and_update_positions(&mut self, handle: EventHandle<bool>) {
        let needing = self.subscriptions.partitions_needing_position();
        if needing.is_empty() {
            handle.complete(true);
            return;
        }

        // Partitions with no explicit reset start from their committed offset
        let uncommitted: BTreeSet<TopicPartition> = needing
            .iter()
            .filter(|(_, strategy)| strategy.is_none())
            .map(|(tp, _)| tp.clone())
            .collect();

        let commit = match self.request_managers.commit.as_mut() {
            Some(commit) if !uncommitted.is_empty() => Some(commit),
            _ => None,
        };
        if let Some(commit) = commit {
            let deadline_ms = handle.deadline_ms();
            let committed = commit.fetch_offsets(uncommitted, deadline_ms);
            let pending = self.pending.clone();
            committed.when_complete(move |outcome| match outcome {
                Ok(offsets) => pending.lock().push(PendingUpdate::CommittedPositions {
                    offsets: offsets.clone(),
                    handle,
                }),
                Err(e) => {
                    handle.complete_exceptionally(e.clone());
                }
            });
            return;
        }

        self.reset_positions(handle);
    }

    /// Resolve every missing position by reset strategy
    fn reset_positions(&mut self, handle: EventHandle<bool>) {
        let needing = self.subscriptions.partitions_needing_position();
        if needing.is_empty() {
            handle.complete(true);
            return;
        }

        let default_strategy = self.subscriptions.default_reset_strategy();
        let mut resets = Vec::with_capacity(needing.len());
        for (tp, strategy) in needing {
            let strategy = strategy.unwrap_or(default_strategy);
            if strategy == OffsetResetStrategy::None {
                handle.complete_exceptionally(ConsumerError::IllegalState(format!(
                    "No committed offset and no reset policy for partition {}",
                    tp
                )));
                return;
            }
            resets.push((tp, strategy));
        }

        let Some(offsets) = self.request_managers.offsets.as_mut() else {
            handle.complete_with(Err(missing(
                "offsets request manager",
                ApplicationEventType::CheckAndUpdatePositions,
            )));
            return;
        };

        let deadline_ms = handle.deadline_ms();
        let resolved = offsets.update_fetch_positions(resets, deadline_ms);
        let pending = self.pending.clone();
        resolved.when_complete(move |outcome| match outcome {
            Ok(positions) => pending.lock().push(PendingUpdate::Positions {
                positions: positions.clone(),
                handle,
            }),
            Err(e) => {
                handle.complete_exceptionally(e.clone());
            }
        });
    }

    fn process_topic_subscription_change(
        &mut self,
        handle: EventHandle<()>,
        topics: BTreeSet<String>,
    ) {
        if self.request_managers.membership.is_none() {
            handle.complete_with(Err(missing(
                "membership manager",
                ApplicationEventType::TopicSubscriptionChange,
            )));
            return;
        }

        match self.subscriptions.subscribe(topics) {
            Ok(changed) => {
                if changed {
                    info!("Subscribed to topics {:?}", self.subscriptions.subscription());
                    if let Some(metadata) = self.request_managers.metadata.as_mut() {
                        metadata.request_update();
                    }
                }
                if let Some(membership) = self.request_managers.membership.as_mut() {
                    membership.on_subscription_updated();
                }
                handle.complete(());
            }
            Err(e) => {
                handle.complete_exceptionally(e);
            }
        }
    }

    fn process_topic_pattern_subscription_change(
        &mut self,
        handle: EventHandle<()>,
        pattern: String,
    ) {
        if self.request_managers.membership.is_none() {
            handle.complete_with(Err(missing(
                "membership manager",
                ApplicationEventType::TopicPatternSubscriptionChange,
            )));
            return;
        }

        if let Err(e) = self.subscriptions.subscribe_pattern(&pattern) {
            handle.complete_exceptionally(e);
            return;
        }
        info!("Subscribed to pattern '{}'", pattern);

        self.pattern_metadata_version = None;
        self.update_pattern_subscription();
        if let Some(metadata) = self.request_managers.metadata.as_mut() {
            metadata.request_update();
        }
        if let Some(membership) = self.request_managers.membership.as_mut() {
            membership.on_subscription_updated();
        }
        handle.complete(());
    }

    fn process_update_pattern_subscription(&mut self, handle: EventHandle<()>) {
        if self.request_managers.metadata.is_none() {
            handle.complete_with(Err(missing(
                "cluster metadata",
                ApplicationEventType::UpdatePatternSubscription,
            )));
            return;
        }
        if self.update_pattern_subscription() {
            if let Some(membership) = self.request_managers.membership.as_mut() {
                membership.on_subscription_updated();
            }
        }
        handle.complete(());
    }

    /// Re-match the pattern against cluster topics if metadata has advanced
    /// since the last evaluation. Returns true if the matched set changed.
    fn update_pattern_subscription(&mut self) -> bool {
        if self.subscriptions.subscription_type() != SubscriptionType::AutoPattern {
            return false;
        }
        let Some(metadata) = self.request_managers.metadata.as_ref() else {
            return false;
        };

        let version = metadata.update_version();
        if let Some(last) = self.pattern_metadata_version {
            if version <= last {
                trace!("Metadata version {} already evaluated, skipping pattern update", version);
                return false;
            }
        }

        let topics = metadata.topics();
        let matched = self.subscriptions.matching_topics(&topics);
        self.pattern_metadata_version = Some(version);

        match self.subscriptions.subscribe_from_pattern(matched) {
            Ok(changed) => {
                if changed {
                    info!(
                        "Pattern subscription now matches {:?}",
                        self.subscriptions.subscription()
                    );
                }
                changed
            }
            Err(e) => {
                warn!("Failed to update pattern subscription: {}", e);
                false
            }
        }
    }

    fn process_unsubscribe(&mut self, handle: EventHandle<()>) {
        self.pattern_metadata_version = None;
        match self.request_managers.membership.as_mut() {
            Some(membership) => {
                let leave = membership.leave_group(&mut self.subscriptions);
                handle.chain(&leave);
            }
            None => {
                self.subscriptions.unsubscribe();
                handle.complete(());
            }
        }
    }

    fn process_assignment_change(
        &mut self,
        handle: EventHandle<()>,
        current_time_ms: i64,
        partitions: BTreeSet<TopicPartition>,
    ) {
        if let Some(commit) = self.request_managers.commit.as_mut() {
            commit.update_timer_and_maybe_commit(current_time_ms, &self.subscriptions.all_consumed());
        }
        handle.complete_with(self.subscriptions.assign_from_user(partitions).map(|changed| {
            if changed {
                info!("Assigned partitions {:?}", self.subscriptions.assigned_partitions());
            }
        }));
    }

    fn process_current_lag(
        &mut self,
        handle: EventHandle<Option<i64>>,
        partition: TopicPartition,
        isolation: IsolationLevel,
    ) {
        let lag = self.subscriptions.partition_lag(&partition, isolation);

        // Fetch the end offset so a later call can answer
        if lag.is_none() && self.subscriptions.is_assigned(&partition) {
            if let Some(offsets) = self.request_managers.offsets.as_mut() {
                let end_offsets =
                    offsets.fetch_offsets(HashMap::from([(partition, LATEST_TIMESTAMP)]), false);
                let pending = self.pending.clone();
                end_offsets.when_complete(move |outcome| match outcome {
                    Ok(offsets) => pending.lock().push(PendingUpdate::EndOffsets {
                        offsets: offsets.clone(),
                        isolation,
                    }),
                    Err(e) => debug!("End offset lookup for lag failed: {}", e),
                });
            }
        }

        handle.complete(lag);
    }

    fn process_create_fetch_requests(&mut self, handle: EventHandle<()>) {
        let Some(fetch) = self.request_managers.fetch.as_mut() else {
            handle.complete_with(Err(missing(
                "fetch request manager",
                ApplicationEventType::CreateFetchRequests,
            )));
            return;
        };
        handle.chain(&fetch.create_fetch_requests(self.subscriptions.fetchable_partitions()));
    }

    fn process_leave_group_on_close(&mut self, handle: EventHandle<()>) {
        match self.request_managers.membership.as_mut() {
            Some(membership) => {
                let leave = membership.leave_group_on_close(&mut self.subscriptions);
                handle.chain(&leave);
            }
            None => {
                debug!("Consumer is not in a group, nothing to leave on close");
                handle.complete(());
            }
        }
    }

    fn process_stop_find_coordinator_on_close(&mut self) {
        match self.request_managers.coordinator.as_mut() {
            Some(coordinator) => coordinator.signal_close(),
            None => debug!("No coordinator request manager to stop on close"),
        }
    }

    fn process_rebalance_callback_completed(&mut self, completed: RebalanceCallbackCompleted) {
        let managers = &mut self.request_managers;
        let Some(membership) = managers.membership.as_mut() else {
            warn!(
                "Received {} completion for {}, but no membership manager is configured",
                completed.method.as_str(),
                ApplicationEventType::ConsumerRebalanceListenerCallbackCompleted
            );
            return;
        };

        membership.consumer_rebalance_listener_callback_completed(completed);
        let now = self.clock.now_ms();
        if let Err(e) = membership.maybe_reconcile(
            &mut self.subscriptions,
            managers.commit.as_deref_mut(),
            now,
        ) {
            self.report(e);
        }
    }

    fn process_streams_callback_completed(
        &mut self,
        kind: StreamsCallbackKind,
        completed: StreamsCallbackCompleted,
    ) {
        match self.request_managers.streams_membership.as_mut() {
            Some(streams) => {
                streams.on_tasks_callback_completed(kind, completed.future, completed.error)
            }
            None => warn!(
                "Received {:?} callback completion, but no streams membership manager is configured",
                kind
            ),
        }
    }

    /// Apply deferred manager results and heartbeat outcomes, then advance
    /// membership. Called once per background loop iteration.
    pub fn poll_background_progress(&mut self, now_ms: i64) {
        let updates = std::mem::take(&mut *self.pending.lock());
        for update in updates {
            self.apply_pending_update(update);
        }

        let mut errors = Vec::new();
        let managers = &mut self.request_managers;
        let outcomes = match managers.heartbeat.as_mut() {
            Some(heartbeat) => heartbeat.drain_outcomes(),
            None => Vec::new(),
        };

        if let Some(membership) = managers.membership.as_mut() {
            for outcome in outcomes {
                if let Err(e) = membership.on_heartbeat_outcome(outcome, &mut self.subscriptions) {
                    errors.push(e);
                }
            }
            if let Err(e) = membership.maybe_reconcile(
                &mut self.subscriptions,
                managers.commit.as_deref_mut(),
                now_ms,
            ) {
                errors.push(e);
            }
            if let Some(heartbeat) = managers.heartbeat.as_mut() {
                heartbeat.update_membership(membership.snapshot(&self.subscriptions));
            }
        } else if !outcomes.is_empty() {
            debug!(
                "Dropping {} heartbeat outcomes, no membership manager is configured",
                outcomes.len()
            );
        }

        for error in errors {
            self.report(error);
        }
    }

    fn apply_pending_update(&mut self, update: PendingUpdate) {
        match update {
            PendingUpdate::Positions { positions, handle } => {
                for (tp, offset) in positions {
                    if !self.subscriptions.update_position(&tp, offset) {
                        debug!("Dropping position for {}, no longer assigned", tp);
                    }
                }
                handle.complete(self.subscriptions.has_all_fetch_positions());
            }
            PendingUpdate::CommittedPositions { offsets, handle } => {
                for (tp, committed) in offsets {
                    let missing_position = self
                        .subscriptions
                        .partition_state(&tp)
                        .map(|state| state.position.is_none())
                        .unwrap_or(false);
                    if missing_position {
                        self.subscriptions.update_position(&tp, committed.offset);
                    }
                }
                self.reset_positions(handle);
            }
            PendingUpdate::EndOffsets { offsets, isolation } => {
                for (tp, found) in offsets {
                    let Some(found) = found else { continue };
                    match isolation {
                        IsolationLevel::ReadUncommitted => {
                            self.subscriptions.update_high_watermark(&tp, found.offset);
                        }
                        IsolationLevel::ReadCommitted => {
                            self.subscriptions.update_last_stable_offset(&tp, found.offset);
                        }
                    }
                }
            }
        }
    }

    /// Close-time hook: stop every manager from generating new traffic
    pub fn signal_close(&mut self) {
        debug!("Signalling close to every request manager");
        self.request_managers.signal_close();
    }
}
