//! Test helper functions
//!
//! Fixtures for building handlers, processors and partitions against a
//! manual clock.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::consumer::events::{BackgroundEvent, BackgroundEventHandler, EventQueue};
use crate::consumer::managers::RequestManagers;
use crate::consumer::membership::MembershipManager;
use crate::consumer::metrics::AsyncConsumerMetrics;
use crate::consumer::processor::ApplicationEventProcessor;
use crate::consumer::subscription::SubscriptionState;
use crate::consumer::time::{Clock, ManualClock};
use crate::consumer::types::{OffsetResetStrategy, TopicPartition};

/// Group id used by test fixtures
pub const TEST_GROUP_ID: &str = "test-group";

/// Rebalance callback timeout used by test fixtures
pub const TEST_CALLBACK_TIMEOUT_MS: i64 = 30_000;

pub fn tp(topic: &str, partition: i32) -> TopicPartition {
    TopicPartition::new(topic, partition)
}

/// Builds a sorted partition set from (topic, partition) pairs
pub fn partitions(pairs: &[(&str, i32)]) -> BTreeSet<TopicPartition> {
    pairs.iter().map(|(t, p)| tp(t, *p)).collect()
}

pub fn topics(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Background handler over a fresh queue
///
/// # Returns
/// The handler and the metrics it records into
pub fn background_handler(
    clock: Arc<dyn Clock>,
) -> (BackgroundEventHandler, Arc<AsyncConsumerMetrics>) {
    let metrics = Arc::new(AsyncConsumerMetrics::new());
    let handler = BackgroundEventHandler::new(EventQueue::new(), clock, metrics.clone());
    (handler, metrics)
}

/// Everything a processor test needs to drive and observe the processor
pub struct ProcessorFixture {
    pub clock: Arc<ManualClock>,
    pub background: BackgroundEventHandler,
    pub processor: ApplicationEventProcessor,
}

impl ProcessorFixture {
    /// Processor with the given managers, starting at `start_ms`
    pub fn new(managers: RequestManagers, start_ms: i64) -> Self {
        let clock = Arc::new(ManualClock::new(start_ms));
        let (background, _) = background_handler(clock.clone());
        let processor = ApplicationEventProcessor::new(
            SubscriptionState::new(OffsetResetStrategy::Latest),
            managers,
            background.clone(),
            clock.clone(),
        );
        Self {
            clock,
            background,
            processor,
        }
    }

    /// Processor with a membership manager plus `managers`
    pub fn with_membership(mut managers: RequestManagers, start_ms: i64) -> Self {
        let clock = Arc::new(ManualClock::new(start_ms));
        let (background, _) = background_handler(clock.clone());
        managers.membership = Some(MembershipManager::new(
            TEST_GROUP_ID,
            background.clone(),
            clock.clone(),
            TEST_CALLBACK_TIMEOUT_MS,
        ));
        let processor = ApplicationEventProcessor::new(
            SubscriptionState::new(OffsetResetStrategy::Latest),
            managers,
            background.clone(),
            clock.clone(),
        );
        Self {
            clock,
            background,
            processor,
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn drain_background(&self) -> Vec<BackgroundEvent> {
        self.background.drain_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partitions_sorted() {
        let set = partitions(&[("b", 0), ("a", 1), ("a", 0)]);
        let ordered: Vec<String> = set.iter().map(|p| p.to_string()).collect();
        assert_eq!(ordered, vec!["a-0", "a-1", "b-0"]);
    }

    #[test]
    fn test_fixture_starts_empty() {
        let fixture = ProcessorFixture::new(RequestManagers::default(), 1_000);
        assert_eq!(fixture.now(), 1_000);
        assert!(fixture.drain_background().is_empty());
        assert!(fixture.processor.membership().is_none());
    }
}
