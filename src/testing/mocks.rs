//! Mock request managers
//!
//! Generated with mockall so tests can set expectations on exactly the
//! collaborator calls the processor makes. Default trait methods that a test
//! does not care about are left unmocked.

use std::collections::{BTreeSet, HashMap};

use mockall::mock;

use crate::consumer::error::ConsumerError;
use crate::consumer::events::{ListOffsetsResult, StreamsCallbackKind};
use crate::consumer::future::CompletableFuture;
use crate::consumer::managers::{
    CommitRequestManager, ConsumerMetadata, CoordinatorRequestManager, FetchRequestManager,
    HeartbeatOutcome, HeartbeatRequestManager, MemberSnapshot, OffsetsRequestManager,
    RequestManager, StreamsMembershipManager,
};
use crate::consumer::network::PollResult;
use crate::consumer::types::{OffsetMap, OffsetResetStrategy, TopicPartition};

mock! {
    pub CoordinatorManager {}

    impl RequestManager for CoordinatorManager {
        fn poll(&mut self, now_ms: i64) -> PollResult;
        fn signal_close(&mut self);
    }

    impl CoordinatorRequestManager for CoordinatorManager {
        fn coordinator(&self) -> Option<i32>;
        fn mark_coordinator_unknown(&mut self, cause: &str, now_ms: i64);
    }
}

mock! {
    pub CommitManager {}

    impl RequestManager for CommitManager {
        fn poll(&mut self, now_ms: i64) -> PollResult;
        fn signal_close(&mut self);
    }

    impl CommitRequestManager for CommitManager {
        fn commit_async(&mut self, offsets: OffsetMap) -> CompletableFuture<OffsetMap>;
        fn commit_sync(&mut self, offsets: OffsetMap, deadline_ms: i64) -> CompletableFuture<OffsetMap>;
        fn fetch_offsets(
            &mut self,
            partitions: BTreeSet<TopicPartition>,
            deadline_ms: i64,
        ) -> CompletableFuture<OffsetMap>;
        fn update_timer_and_maybe_commit(&mut self, now_ms: i64, consumed: &OffsetMap);
        fn maybe_auto_commit_sync_before_revocation(
            &mut self,
            consumed: OffsetMap,
            deadline_ms: i64,
        ) -> CompletableFuture<()>;
    }
}

mock! {
    pub OffsetsManager {}

    impl RequestManager for OffsetsManager {
        fn poll(&mut self, now_ms: i64) -> PollResult;
    }

    impl OffsetsRequestManager for OffsetsManager {
        fn fetch_offsets(
            &mut self,
            timestamps: HashMap<TopicPartition, i64>,
            require_timestamps: bool,
        ) -> CompletableFuture<ListOffsetsResult>;
        fn update_fetch_positions(
            &mut self,
            partitions: Vec<(TopicPartition, OffsetResetStrategy)>,
            deadline_ms: i64,
        ) -> CompletableFuture<HashMap<TopicPartition, i64>>;
    }
}

mock! {
    pub FetchManager {}

    impl RequestManager for FetchManager {
        fn poll(&mut self, now_ms: i64) -> PollResult;
    }

    impl FetchRequestManager for FetchManager {
        fn create_fetch_requests(&mut self, partitions: Vec<(TopicPartition, i64)>) -> CompletableFuture<()>;
    }
}

mock! {
    pub HeartbeatManager {}

    impl RequestManager for HeartbeatManager {
        fn poll(&mut self, now_ms: i64) -> PollResult;
    }

    impl HeartbeatRequestManager for HeartbeatManager {
        fn reset_poll_timer(&mut self, now_ms: i64);
        fn update_membership(&mut self, snapshot: MemberSnapshot);
        fn drain_outcomes(&mut self) -> Vec<HeartbeatOutcome>;
    }
}

mock! {
    pub StreamsMembership {}

    impl StreamsMembershipManager for StreamsMembership {
        fn on_tasks_callback_completed(
            &mut self,
            kind: StreamsCallbackKind,
            future: CompletableFuture<()>,
            error: Option<ConsumerError>,
        );
    }
}

mock! {
    pub Metadata {}

    impl ConsumerMetadata for Metadata {
        fn update_version(&self) -> u64;
        fn topics(&self) -> Vec<String>;
        fn request_update(&mut self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_commit_manager_returns_configured_future() {
        let mut mock = MockCommitManager::new();
        mock.expect_commit_async()
            .times(1)
            .returning(|offsets| CompletableFuture::completed(offsets));

        let future = mock.commit_async(OffsetMap::new());
        assert_eq!(future.try_get(), Some(Ok(OffsetMap::new())));
    }

    #[test]
    fn test_unmocked_default_method_is_used() {
        let mock = MockFetchManager::new();
        assert_eq!(mock.maximum_time_to_wait(0), i64::MAX);
    }
}
