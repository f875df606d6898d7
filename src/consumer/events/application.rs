//! Events submitted by the caller thread for the background thread
//!
//! [`ApplicationEvent`] is a closed set. The processor matches on it
//! exhaustively, so adding a variant forces a decision on how it completes.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::consumer::error::ConsumerError;
use crate::consumer::events::background::{RebalanceCallbackMethod, StreamsCallbackKind};
use crate::consumer::events::completable::{AsCompletable, CompletableEvent, EventHandle};
use crate::consumer::future::CompletableFuture;
use crate::consumer::types::{
    IsolationLevel, OffsetAndTimestamp, OffsetMap, OffsetResetStrategy, TopicPartition,
};

/// Type tag of an [`ApplicationEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplicationEventType {
    Poll,
    CommitAsync,
    CommitSync,
    CommitOnClose,
    FetchCommittedOffsets,
    ListOffsets,
    CheckAndUpdatePositions,
    ResetOffset,
    TopicSubscriptionChange,
    TopicPatternSubscriptionChange,
    UpdatePatternSubscription,
    Unsubscribe,
    AssignmentChange,
    SeekUnvalidated,
    CurrentLag,
    CreateFetchRequests,
    LeaveGroupOnClose,
    StopFindCoordinatorOnClose,
    ConsumerRebalanceListenerCallbackCompleted,
    StreamsOnTasksAssignedCallbackCompleted,
    StreamsOnTasksRevokedCallbackCompleted,
    StreamsOnAllTasksLostCallbackCompleted,
}

impl ApplicationEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poll => "POLL",
            Self::CommitAsync => "COMMIT_ASYNC",
            Self::CommitSync => "COMMIT_SYNC",
            Self::CommitOnClose => "COMMIT_ON_CLOSE",
            Self::FetchCommittedOffsets => "FETCH_COMMITTED_OFFSETS",
            Self::ListOffsets => "LIST_OFFSETS",
            Self::CheckAndUpdatePositions => "CHECK_AND_UPDATE_POSITIONS",
            Self::ResetOffset => "RESET_OFFSET",
            Self::TopicSubscriptionChange => "TOPIC_SUBSCRIPTION_CHANGE",
            Self::TopicPatternSubscriptionChange => "TOPIC_PATTERN_SUBSCRIPTION_CHANGE",
            Self::UpdatePatternSubscription => "UPDATE_SUBSCRIPTION_METADATA",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::AssignmentChange => "ASSIGNMENT_CHANGE",
            Self::SeekUnvalidated => "SEEK_UNVALIDATED",
            Self::CurrentLag => "CURRENT_LAG",
            Self::CreateFetchRequests => "CREATE_FETCH_REQUESTS",
            Self::LeaveGroupOnClose => "LEAVE_GROUP_ON_CLOSE",
            Self::StopFindCoordinatorOnClose => "STOP_FIND_COORDINATOR_ON_CLOSE",
            Self::ConsumerRebalanceListenerCallbackCompleted => {
                "CONSUMER_REBALANCE_LISTENER_CALLBACK_COMPLETED"
            }
            Self::StreamsOnTasksAssignedCallbackCompleted => {
                "STREAMS_ON_TASKS_ASSIGNED_CALLBACK_COMPLETED"
            }
            Self::StreamsOnTasksRevokedCallbackCompleted => {
                "STREAMS_ON_TASKS_REVOKED_CALLBACK_COMPLETED"
            }
            Self::StreamsOnAllTasksLostCallbackCompleted => {
                "STREAMS_ON_ALL_TASKS_LOST_CALLBACK_COMPLETED"
            }
        }
    }

    /// Create a result handle tagged with this event type
    pub fn handle<T: Clone + Send + 'static>(
        self,
        created_ms: i64,
        deadline_ms: i64,
    ) -> EventHandle<T> {
        EventHandle::new(self.as_str(), created_ms, deadline_ms)
    }
}

impl fmt::Display for ApplicationEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One poll cycle
///
/// Not completable itself. It carries the reconcile-and-auto-commit gate,
/// which the processor resolves once every commit that the poll may trigger
/// has been generated. Fetch creation for this cycle waits on that gate.
#[derive(Debug, Clone)]
pub struct PollEvent {
    pub poll_time_ms: i64,
    reconcile_and_auto_commit: CompletableFuture<()>,
}

impl PollEvent {
    pub fn new(poll_time_ms: i64) -> Self {
        Self {
            poll_time_ms,
            reconcile_and_auto_commit: CompletableFuture::new(),
        }
    }

    /// Gate resolved once reconciliation and auto-commit have been triggered
    pub fn reconcile_and_auto_commit(&self) -> &CompletableFuture<()> {
        &self.reconcile_and_auto_commit
    }

    pub fn mark_reconcile_and_auto_commit_complete(&self) {
        self.reconcile_and_auto_commit.complete(());
    }
}

/// Commit request. `offsets: None` commits everything consumed so far.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    pub handle: EventHandle<OffsetMap>,
    pub offsets: Option<OffsetMap>,
}

/// Offsets-for-times lookup result
pub type ListOffsetsResult = HashMap<TopicPartition, Option<OffsetAndTimestamp>>;

/// Completion of a rebalance listener callback run on the caller thread
#[derive(Debug, Clone)]
pub struct RebalanceCallbackCompleted {
    pub method: RebalanceCallbackMethod,
    /// Result slot of the `ConsumerRebalanceListenerCallbackNeeded` event
    pub future: CompletableFuture<()>,
    /// Error raised by the user callback, if any
    pub error: Option<ConsumerError>,
}

/// Completion of a streams task callback run on the caller thread
#[derive(Debug, Clone)]
pub struct StreamsCallbackCompleted {
    /// Result slot of the `StreamsTasksCallbackNeeded` event
    pub future: CompletableFuture<()>,
    pub error: Option<ConsumerError>,
}

/// Event flowing from the caller thread to the background thread
#[derive(Debug, Clone)]
pub enum ApplicationEvent {
    Poll(PollEvent),
    CommitAsync(CommitEvent),
    CommitSync(CommitEvent),
    /// Stop issuing auto-commits; the consumer is closing
    CommitOnClose,
    FetchCommittedOffsets {
        handle: EventHandle<OffsetMap>,
        partitions: BTreeSet<TopicPartition>,
    },
    ListOffsets {
        handle: EventHandle<ListOffsetsResult>,
        timestamps: HashMap<TopicPartition, i64>,
        require_timestamps: bool,
    },
    /// Resolve positions for assigned partitions that have none.
    /// Completes with true once every assigned partition has a position.
    CheckAndUpdatePositions(EventHandle<bool>),
    ResetOffset {
        handle: EventHandle<()>,
        partitions: BTreeSet<TopicPartition>,
        strategy: OffsetResetStrategy,
    },
    TopicSubscriptionChange {
        handle: EventHandle<()>,
        topics: BTreeSet<String>,
    },
    TopicPatternSubscriptionChange {
        handle: EventHandle<()>,
        pattern: String,
    },
    /// Re-evaluate the pattern subscription against current metadata
    UpdatePatternSubscription(EventHandle<()>),
    Unsubscribe(EventHandle<()>),
    AssignmentChange {
        handle: EventHandle<()>,
        current_time_ms: i64,
        partitions: BTreeSet<TopicPartition>,
    },
    SeekUnvalidated {
        handle: EventHandle<()>,
        partition: TopicPartition,
        offset: i64,
        leader_epoch: Option<i32>,
    },
    CurrentLag {
        handle: EventHandle<Option<i64>>,
        partition: TopicPartition,
        isolation: IsolationLevel,
    },
    CreateFetchRequests(EventHandle<()>),
    LeaveGroupOnClose(EventHandle<()>),
    StopFindCoordinatorOnClose,
    ConsumerRebalanceListenerCallbackCompleted(RebalanceCallbackCompleted),
    StreamsOnTasksAssignedCallbackCompleted(StreamsCallbackCompleted),
    StreamsOnTasksRevokedCallbackCompleted(StreamsCallbackCompleted),
    StreamsOnAllTasksLostCallbackCompleted(StreamsCallbackCompleted),
}

impl ApplicationEvent {
    pub fn event_type(&self) -> ApplicationEventType {
        match self {
            Self::Poll(_) => ApplicationEventType::Poll,
            Self::CommitAsync(_) => ApplicationEventType::CommitAsync,
            Self::CommitSync(_) => ApplicationEventType::CommitSync,
            Self::CommitOnClose => ApplicationEventType::CommitOnClose,
            Self::FetchCommittedOffsets { .. } => ApplicationEventType::FetchCommittedOffsets,
            Self::ListOffsets { .. } => ApplicationEventType::ListOffsets,
            Self::CheckAndUpdatePositions(_) => ApplicationEventType::CheckAndUpdatePositions,
            Self::ResetOffset { .. } => ApplicationEventType::ResetOffset,
            Self::TopicSubscriptionChange { .. } => ApplicationEventType::TopicSubscriptionChange,
            Self::TopicPatternSubscriptionChange { .. } => {
                ApplicationEventType::TopicPatternSubscriptionChange
            }
            Self::UpdatePatternSubscription(_) => ApplicationEventType::UpdatePatternSubscription,
            Self::Unsubscribe(_) => ApplicationEventType::Unsubscribe,
            Self::AssignmentChange { .. } => ApplicationEventType::AssignmentChange,
            Self::SeekUnvalidated { .. } => ApplicationEventType::SeekUnvalidated,
            Self::CurrentLag { .. } => ApplicationEventType::CurrentLag,
            Self::CreateFetchRequests(_) => ApplicationEventType::CreateFetchRequests,
            Self::LeaveGroupOnClose(_) => ApplicationEventType::LeaveGroupOnClose,
            Self::StopFindCoordinatorOnClose => ApplicationEventType::StopFindCoordinatorOnClose,
            Self::ConsumerRebalanceListenerCallbackCompleted(_) => {
                ApplicationEventType::ConsumerRebalanceListenerCallbackCompleted
            }
            Self::StreamsOnTasksAssignedCallbackCompleted(_) => {
                ApplicationEventType::StreamsOnTasksAssignedCallbackCompleted
            }
            Self::StreamsOnTasksRevokedCallbackCompleted(_) => {
                ApplicationEventType::StreamsOnTasksRevokedCallbackCompleted
            }
            Self::StreamsOnAllTasksLostCallbackCompleted(_) => {
                ApplicationEventType::StreamsOnAllTasksLostCallbackCompleted
            }
        }
    }

    /// Build the completion event for a streams callback of `kind`
    pub fn streams_callback_completed(
        kind: StreamsCallbackKind,
        future: CompletableFuture<()>,
        error: Option<ConsumerError>,
    ) -> Self {
        let completed = StreamsCallbackCompleted { future, error };
        match kind {
            StreamsCallbackKind::TasksAssigned => {
                Self::StreamsOnTasksAssignedCallbackCompleted(completed)
            }
            StreamsCallbackKind::TasksRevoked => {
                Self::StreamsOnTasksRevokedCallbackCompleted(completed)
            }
            StreamsCallbackKind::AllTasksLost => {
                Self::StreamsOnAllTasksLostCallbackCompleted(completed)
            }
        }
    }
}

impl AsCompletable for ApplicationEvent {
    fn as_completable(&self) -> Option<Box<dyn CompletableEvent>> {
        match self {
            Self::CommitAsync(event) | Self::CommitSync(event) => Some(event.handle.tracked()),
            Self::FetchCommittedOffsets { handle, .. } => Some(handle.tracked()),
            Self::ListOffsets { handle, .. } => Some(handle.tracked()),
            Self::CheckAndUpdatePositions(handle) => Some(handle.tracked()),
            Self::CurrentLag { handle, .. } => Some(handle.tracked()),
            Self::ResetOffset { handle, .. }
            | Self::TopicSubscriptionChange { handle, .. }
            | Self::TopicPatternSubscriptionChange { handle, .. }
            | Self::UpdatePatternSubscription(handle)
            | Self::Unsubscribe(handle)
            | Self::AssignmentChange { handle, .. }
            | Self::SeekUnvalidated { handle, .. }
            | Self::CreateFetchRequests(handle)
            | Self::LeaveGroupOnClose(handle) => Some(handle.tracked()),
            Self::Poll(_)
            | Self::CommitOnClose
            | Self::StopFindCoordinatorOnClose
            | Self::ConsumerRebalanceListenerCallbackCompleted(_)
            | Self::StreamsOnTasksAssignedCallbackCompleted(_)
            | Self::StreamsOnTasksRevokedCallbackCompleted(_)
            | Self::StreamsOnAllTasksLostCallbackCompleted(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_gate() {
        let poll = PollEvent::new(10);
        assert!(!poll.reconcile_and_auto_commit().is_done());
        let gate = poll.reconcile_and_auto_commit().clone();

        poll.mark_reconcile_and_auto_commit_complete();
        assert!(gate.is_done());
        // marking twice is harmless
        poll.mark_reconcile_and_auto_commit_complete();
    }

    #[test]
    fn test_completable_variants() {
        let handle = ApplicationEventType::Unsubscribe.handle(0, 100);
        let event = ApplicationEvent::Unsubscribe(handle.clone());
        let tracked = event.as_completable().expect("unsubscribe is completable");
        assert_eq!(tracked.id(), handle.id());
        assert_eq!(tracked.event_type(), "UNSUBSCRIBE");

        assert!(ApplicationEvent::Poll(PollEvent::new(0))
            .as_completable()
            .is_none());
        assert!(ApplicationEvent::CommitOnClose.as_completable().is_none());
        assert!(ApplicationEvent::streams_callback_completed(
            StreamsCallbackKind::TasksRevoked,
            CompletableFuture::new(),
            None
        )
        .as_completable()
        .is_none());
    }

    #[test]
    fn test_streams_callback_completed_variant() {
        let event = ApplicationEvent::streams_callback_completed(
            StreamsCallbackKind::AllTasksLost,
            CompletableFuture::new(),
            None,
        );
        assert_eq!(
            event.event_type(),
            ApplicationEventType::StreamsOnAllTasksLostCallbackCompleted
        );
    }

    #[test]
    fn test_commit_event_type() {
        let event = ApplicationEvent::CommitSync(CommitEvent {
            handle: ApplicationEventType::CommitSync.handle(0, 10),
            offsets: None,
        });
        assert_eq!(event.event_type(), ApplicationEventType::CommitSync);
        assert_eq!(event.event_type().to_string(), "COMMIT_SYNC");
    }
}
