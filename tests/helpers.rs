// Test helpers for consumer integration tests
//
// Hand-written fakes for the request managers and the transport. They answer
// immediately (or never, when told to) and record what they were asked, so
// tests can drive an AsyncConsumer through its public API without a cluster.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use kafka_consumer_core::consumer::events::ListOffsetsResult;
use kafka_consumer_core::consumer::managers::{
    CommitRequestManager, FetchRequestManager, HeartbeatOutcome, HeartbeatRequestManager,
    MemberSnapshot, OffsetsRequestManager, RequestManager, RequestManagers,
};
use kafka_consumer_core::consumer::network::{NetworkClientDelegate, PollResult, UnsentRequest};
use kafka_consumer_core::consumer::types::{OffsetAndTimestamp, OffsetResetStrategy};
use kafka_consumer_core::consumer::{
    CompletableFuture, ConsumerRebalanceListener, MemberState, OffsetMap, TopicPartition,
};
use kafka_consumer_core::{AsyncConsumer, ConsumerConfig, Result};

pub const GROUP_ID: &str = "test-group";
pub const MEMBER_ID: &str = "member-1";

/// Shared, ordered record of what the fakes were asked to do
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn tp(topic: &str, partition: i32) -> TopicPartition {
    TopicPartition::new(topic, partition)
}

/// Config with a short background wait so tests don't sit in the loop
pub fn test_config(group_id: Option<&str>) -> ConsumerConfig {
    let mut config = match group_id {
        Some(group_id) => ConsumerConfig::for_group(group_id),
        None => ConsumerConfig::default(),
    };
    config.client_id = "integration-test".to_string();
    config.max_poll_wait_ms = 20;
    config.default_api_timeout_ms = 5_000;
    config.close_timeout_ms = 5_000;
    config
}

/// Transport that accepts everything and never has work in flight
pub struct NullNetwork;

impl NetworkClientDelegate for NullNetwork {
    fn send(&mut self, _request: UnsentRequest) {}

    fn poll(&mut self, _timeout_ms: i64, _now_ms: i64) {}

    fn has_pending_requests(&self) -> bool {
        false
    }
}

/// How the fake commit manager answers commits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitBehavior {
    /// Commit succeeds right away
    Succeed,
    /// Commit never completes
    Hang,
}

pub struct FakeCommitManager {
    behavior: CommitBehavior,
    committed: Arc<Mutex<Vec<OffsetMap>>>,
    log: CallLog,
}

impl FakeCommitManager {
    pub fn new(behavior: CommitBehavior, log: CallLog) -> (Self, Arc<Mutex<Vec<OffsetMap>>>) {
        let committed = Arc::new(Mutex::new(Vec::new()));
        let manager = FakeCommitManager {
            behavior,
            committed: committed.clone(),
            log,
        };
        (manager, committed)
    }

    fn answer(&self, offsets: OffsetMap) -> CompletableFuture<OffsetMap> {
        match self.behavior {
            CommitBehavior::Succeed => {
                self.committed.lock().push(offsets.clone());
                CompletableFuture::completed(offsets)
            }
            CommitBehavior::Hang => CompletableFuture::new(),
        }
    }
}

impl RequestManager for FakeCommitManager {
    fn poll(&mut self, _now_ms: i64) -> PollResult {
        PollResult::empty()
    }
}

impl CommitRequestManager for FakeCommitManager {
    fn commit_async(&mut self, offsets: OffsetMap) -> CompletableFuture<OffsetMap> {
        self.answer(offsets)
    }

    fn commit_sync(&mut self, offsets: OffsetMap, _deadline_ms: i64) -> CompletableFuture<OffsetMap> {
        self.answer(offsets)
    }

    fn fetch_offsets(
        &mut self,
        _partitions: BTreeSet<TopicPartition>,
        _deadline_ms: i64,
    ) -> CompletableFuture<OffsetMap> {
        // Nothing committed yet
        CompletableFuture::completed(OffsetMap::new())
    }

    fn update_timer_and_maybe_commit(&mut self, _now_ms: i64, _consumed: &OffsetMap) {
        self.log.lock().push("auto-commit".to_string());
    }

    fn maybe_auto_commit_sync_before_revocation(
        &mut self,
        _consumed: OffsetMap,
        _deadline_ms: i64,
    ) -> CompletableFuture<()> {
        CompletableFuture::completed(())
    }
}

/// Resolves every position to a fixed offset
pub struct FakeOffsetsManager {
    pub reset_offset: i64,
}

impl RequestManager for FakeOffsetsManager {
    fn poll(&mut self, _now_ms: i64) -> PollResult {
        PollResult::empty()
    }
}

impl OffsetsRequestManager for FakeOffsetsManager {
    fn fetch_offsets(
        &mut self,
        timestamps: HashMap<TopicPartition, i64>,
        _require_timestamps: bool,
    ) -> CompletableFuture<ListOffsetsResult> {
        let found = timestamps
            .into_keys()
            .map(|tp| {
                let offset = OffsetAndTimestamp {
                    offset: self.reset_offset,
                    timestamp: -1,
                    leader_epoch: None,
                };
                (tp, Some(offset))
            })
            .collect();
        CompletableFuture::completed(found)
    }

    fn update_fetch_positions(
        &mut self,
        partitions: Vec<(TopicPartition, OffsetResetStrategy)>,
        _deadline_ms: i64,
    ) -> CompletableFuture<HashMap<TopicPartition, i64>> {
        let positions = partitions
            .into_iter()
            .map(|(tp, _)| (tp, self.reset_offset))
            .collect();
        CompletableFuture::completed(positions)
    }
}

/// Records every fetch it is asked to build
pub struct FakeFetchManager {
    pub fetches: Arc<Mutex<Vec<Vec<(TopicPartition, i64)>>>>,
    log: CallLog,
}

impl FakeFetchManager {
    pub fn new(log: CallLog) -> Self {
        FakeFetchManager {
            fetches: Arc::new(Mutex::new(Vec::new())),
            log,
        }
    }
}

impl RequestManager for FakeFetchManager {
    fn poll(&mut self, _now_ms: i64) -> PollResult {
        PollResult::empty()
    }
}

impl FetchRequestManager for FakeFetchManager {
    fn create_fetch_requests(
        &mut self,
        partitions: Vec<(TopicPartition, i64)>,
    ) -> CompletableFuture<()> {
        self.log.lock().push("fetch".to_string());
        self.fetches.lock().push(partitions);
        CompletableFuture::completed(())
    }
}

/// Plays the group coordinator's side of the heartbeat exchange.
///
/// A joining member is given `assignment` once, acknowledgements and the
/// leave heartbeat are reported as sent.
pub struct FakeHeartbeatManager {
    assignment: BTreeSet<TopicPartition>,
    snapshot: Option<MemberSnapshot>,
    joined: bool,
}

impl FakeHeartbeatManager {
    pub fn new(assignment: BTreeSet<TopicPartition>) -> Self {
        FakeHeartbeatManager {
            assignment,
            snapshot: None,
            joined: false,
        }
    }
}

impl RequestManager for FakeHeartbeatManager {
    fn poll(&mut self, _now_ms: i64) -> PollResult {
        PollResult::empty()
    }
}

impl HeartbeatRequestManager for FakeHeartbeatManager {
    fn reset_poll_timer(&mut self, _now_ms: i64) {}

    fn update_membership(&mut self, snapshot: MemberSnapshot) {
        self.snapshot = Some(snapshot);
    }

    fn drain_outcomes(&mut self) -> Vec<HeartbeatOutcome> {
        let Some(snapshot) = self.snapshot.as_ref() else {
            return Vec::new();
        };
        match snapshot.state {
            MemberState::Joining if !self.joined => {
                self.joined = true;
                vec![HeartbeatOutcome::Success {
                    member_id: MEMBER_ID.to_string(),
                    member_epoch: 1,
                    assignment: Some(self.assignment.clone()),
                }]
            }
            MemberState::Acknowledging | MemberState::Leaving => {
                vec![HeartbeatOutcome::RequestSent {
                    member_epoch: snapshot.member_epoch,
                }]
            }
            _ => Vec::new(),
        }
    }
}

/// Rebalance listener that records each callback as "method:partitions"
#[derive(Clone, Default)]
pub struct RecordingListener {
    pub calls: Arc<Mutex<Vec<(String, BTreeSet<TopicPartition>)>>>,
}

impl RecordingListener {
    pub fn assigned(&self) -> Vec<BTreeSet<TopicPartition>> {
        self.named("assigned")
    }

    pub fn revoked(&self) -> Vec<BTreeSet<TopicPartition>> {
        self.named("revoked")
    }

    fn named(&self, method: &str) -> Vec<BTreeSet<TopicPartition>> {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == method)
            .map(|(_, partitions)| partitions.clone())
            .collect()
    }
}

impl ConsumerRebalanceListener for RecordingListener {
    fn on_partitions_revoked(&mut self, partitions: &BTreeSet<TopicPartition>) -> Result<()> {
        self.calls.lock().push(("revoked".to_string(), partitions.clone()));
        Ok(())
    }

    fn on_partitions_assigned(&mut self, partitions: &BTreeSet<TopicPartition>) -> Result<()> {
        self.calls.lock().push(("assigned".to_string(), partitions.clone()));
        Ok(())
    }
}

/// What the fakes recorded while the consumer ran
pub struct Recorders {
    pub log: CallLog,
    pub committed: Arc<Mutex<Vec<OffsetMap>>>,
    pub fetches: Arc<Mutex<Vec<Vec<(TopicPartition, i64)>>>>,
}

/// Managers for a consumer with commits, offsets and fetches
pub struct Fakes {
    recorders: Recorders,
    managers: RequestManagers,
}

impl Fakes {
    pub fn new(commit: CommitBehavior) -> Self {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let (commit_manager, committed) = FakeCommitManager::new(commit, log.clone());
        let fetch_manager = FakeFetchManager::new(log.clone());
        let fetches = fetch_manager.fetches.clone();

        let managers = RequestManagers {
            commit: Some(Box::new(commit_manager)),
            offsets: Some(Box::new(FakeOffsetsManager { reset_offset: 0 })),
            fetch: Some(Box::new(fetch_manager)),
            ..Default::default()
        };
        Fakes {
            recorders: Recorders {
                log,
                committed,
                fetches,
            },
            managers,
        }
    }

    /// Add a heartbeat manager that hands out `assignment`
    pub fn with_heartbeat(mut self, assignment: BTreeSet<TopicPartition>) -> Self {
        self.managers.heartbeat = Some(Box::new(FakeHeartbeatManager::new(assignment)));
        self
    }

    pub fn start(self, config: ConsumerConfig) -> (AsyncConsumer, Recorders) {
        let consumer = AsyncConsumer::new(config, self.managers, Box::new(NullNetwork))
            .expect("consumer should start");
        (consumer, self.recorders)
    }
}

/// Poll until `done` holds, failing the test after `limit`
pub fn poll_until<F>(consumer: &mut AsyncConsumer, limit: Duration, mut done: F)
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while !done() {
        assert!(
            start.elapsed() < limit,
            "Condition not reached within {:?}",
            limit
        );
        consumer
            .poll(Duration::from_millis(50))
            .expect("poll should succeed");
    }
}
