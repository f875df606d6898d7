//! Request manager interfaces
//!
//! Each request manager owns one protocol concern (coordinator discovery,
//! commits, offsets lookups, heartbeats, fetches). They are collaborators of
//! this crate: the processor calls them and chains the futures they return
//! into event result slots; the background loop polls them for outbound
//! requests. Retries and backoff live inside the managers.
//!
//! Every manager is optional. A consumer without a group id has no
//! coordinator, commit or heartbeat manager, and events that need one fail
//! with [`ConsumerError::MissingCollaborator`](crate::consumer::error::ConsumerError::MissingCollaborator).

use std::collections::{BTreeSet, HashMap};

use crate::consumer::error::ConsumerError;
use crate::consumer::events::background::StreamsCallbackKind;
use crate::consumer::events::ListOffsetsResult;
use crate::consumer::future::CompletableFuture;
use crate::consumer::membership::{MemberState, MembershipManager};
use crate::consumer::network::PollResult;
use crate::consumer::types::{OffsetMap, OffsetResetStrategy, TopicPartition};

/// Common polling surface of every request manager
pub trait RequestManager: Send {
    /// Produce requests that are ready to send
    fn poll(&mut self, now_ms: i64) -> PollResult;

    /// Produce the final requests to flush while closing
    fn poll_on_close(&mut self, _now_ms: i64) -> PollResult {
        PollResult::empty()
    }

    /// Stop generating new protocol traffic
    fn signal_close(&mut self) {}

    /// Upper bound on how long the background loop may sleep
    fn maximum_time_to_wait(&self, _now_ms: i64) -> i64 {
        i64::MAX
    }
}

/// Group coordinator discovery
pub trait CoordinatorRequestManager: RequestManager {
    /// Node id of the known coordinator
    fn coordinator(&self) -> Option<i32>;

    fn mark_coordinator_unknown(&mut self, cause: &str, now_ms: i64);
}

/// Offset commits and committed-offset lookups
pub trait CommitRequestManager: RequestManager {
    fn commit_async(&mut self, offsets: OffsetMap) -> CompletableFuture<OffsetMap>;

    /// Commit, retrying until `deadline_ms`
    fn commit_sync(&mut self, offsets: OffsetMap, deadline_ms: i64)
        -> CompletableFuture<OffsetMap>;

    fn fetch_offsets(
        &mut self,
        partitions: BTreeSet<TopicPartition>,
        deadline_ms: i64,
    ) -> CompletableFuture<OffsetMap>;

    /// Advance the auto-commit timer and commit `consumed` if the interval
    /// elapsed
    fn update_timer_and_maybe_commit(&mut self, now_ms: i64, consumed: &OffsetMap);

    /// Commit `consumed` before partitions are revoked. Completes immediately
    /// when auto-commit is disabled.
    fn maybe_auto_commit_sync_before_revocation(
        &mut self,
        consumed: OffsetMap,
        deadline_ms: i64,
    ) -> CompletableFuture<()>;
}

/// ListOffsets lookups and position resolution
pub trait OffsetsRequestManager: RequestManager {
    fn fetch_offsets(
        &mut self,
        timestamps: HashMap<TopicPartition, i64>,
        require_timestamps: bool,
    ) -> CompletableFuture<ListOffsetsResult>;

    /// Resolve positions for partitions by reset strategy
    fn update_fetch_positions(
        &mut self,
        partitions: Vec<(TopicPartition, OffsetResetStrategy)>,
        deadline_ms: i64,
    ) -> CompletableFuture<HashMap<TopicPartition, i64>>;
}

/// Fetch request creation
pub trait FetchRequestManager: RequestManager {
    /// Build fetches for `partitions` at the given positions
    fn create_fetch_requests(
        &mut self,
        partitions: Vec<(TopicPartition, i64)>,
    ) -> CompletableFuture<()>;
}

/// What the heartbeat manager needs to know about the member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub member_id: String,
    pub member_epoch: i32,
    pub state: MemberState,
    pub subscribed_topics: BTreeSet<String>,
    pub subscribed_pattern: Option<String>,
    pub owned_partitions: BTreeSet<TopicPartition>,
}

/// Result of a heartbeat round trip, reported to the membership manager
#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatOutcome {
    /// Heartbeat accepted. `assignment` is set when the coordinator sent a
    /// new target assignment.
    Success {
        member_id: String,
        member_epoch: i32,
        assignment: Option<BTreeSet<TopicPartition>>,
    },
    /// Member epoch rejected (fenced or unknown member)
    Fenced,
    /// Unrecoverable error
    Fatal(ConsumerError),
    /// A heartbeat carrying `member_epoch` was handed to the network
    RequestSent { member_epoch: i32 },
}

/// Group heartbeats
pub trait HeartbeatRequestManager: RequestManager {
    /// The caller polled; resets the max-poll-interval timer
    fn reset_poll_timer(&mut self, now_ms: i64);

    /// Latest member state to carry in the next heartbeat
    fn update_membership(&mut self, snapshot: MemberSnapshot);

    /// Outcomes observed since the last call
    fn drain_outcomes(&mut self) -> Vec<HeartbeatOutcome>;
}

/// Streams-group task callbacks
pub trait StreamsMembershipManager: Send {
    /// The caller finished a task callback. Completes `future`, with `error`
    /// if the callback failed.
    fn on_tasks_callback_completed(
        &mut self,
        kind: StreamsCallbackKind,
        future: CompletableFuture<()>,
        error: Option<ConsumerError>,
    );
}

/// Client view of cluster metadata
pub trait ConsumerMetadata: Send {
    /// Incremented on every metadata update
    fn update_version(&self) -> u64;

    /// Every topic known to the cluster
    fn topics(&self) -> Vec<String>;

    fn request_update(&mut self);
}

/// The collaborators of one consumer
#[derive(Default)]
pub struct RequestManagers {
    pub coordinator: Option<Box<dyn CoordinatorRequestManager>>,
    pub commit: Option<Box<dyn CommitRequestManager>>,
    pub heartbeat: Option<Box<dyn HeartbeatRequestManager>>,
    pub membership: Option<MembershipManager>,
    pub streams_membership: Option<Box<dyn StreamsMembershipManager>>,
    pub offsets: Option<Box<dyn OffsetsRequestManager>>,
    pub fetch: Option<Box<dyn FetchRequestManager>>,
    pub metadata: Option<Box<dyn ConsumerMetadata>>,
}

macro_rules! for_each_manager {
    ($managers:expr, |$m:ident| $body:expr) => {{
        if let Some($m) = $managers.coordinator.as_mut() {
            $body;
        }
        if let Some($m) = $managers.commit.as_mut() {
            $body;
        }
        if let Some($m) = $managers.heartbeat.as_mut() {
            $body;
        }
        if let Some($m) = $managers.offsets.as_mut() {
            $body;
        }
        if let Some($m) = $managers.fetch.as_mut() {
            $body;
        }
    }};
}

impl RequestManagers {
    /// Poll every manager
    pub fn poll(&mut self, now_ms: i64) -> Vec<PollResult> {
        let mut results = Vec::new();
        for_each_manager!(self, |m| results.push(m.poll(now_ms)));
        results
    }

    /// Collect the final requests of every manager
    pub fn poll_on_close(&mut self, now_ms: i64) -> Vec<PollResult> {
        let mut results = Vec::new();
        for_each_manager!(self, |m| results.push(m.poll_on_close(now_ms)));
        results
    }

    pub fn signal_close(&mut self) {
        for_each_manager!(self, |m| m.signal_close());
    }

    /// Smallest wait any manager allows
    pub fn maximum_time_to_wait(&mut self, now_ms: i64) -> i64 {
        let mut wait = i64::MAX;
        for_each_manager!(self, |m| wait = wait.min(m.maximum_time_to_wait(now_ms)));
        wait
    }
}
