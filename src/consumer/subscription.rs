//! Subscription state
//!
//! A consumer subscribes in exactly one way at a time: to a set of topic
//! names, to a topic pattern, or to partitions it assigns itself. Switching
//! forms requires an unsubscribe first; any attempt to mix them fails with
//! [`ConsumerError::SubscriptionConflict`] and leaves the state untouched.
//!
//! Alongside the subscription, the state tracks each assigned partition's
//! fetch position, watermarks, pending offset reset and pause flag.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use regex::Regex;

use crate::consumer::error::{ConsumerError, Result};
use crate::consumer::types::{
    IsolationLevel, OffsetAndMetadata, OffsetMap, OffsetResetStrategy, TopicPartition,
};

/// How the consumer is subscribed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionType {
    #[default]
    None,
    /// Subscribed to topic names; partitions come from the group
    AutoTopics,
    /// Subscribed to a topic pattern; partitions come from the group
    AutoPattern,
    /// Partitions assigned directly by the user
    UserAssigned,
}

impl SubscriptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::AutoTopics => "AUTO_TOPICS",
            Self::AutoPattern => "AUTO_PATTERN",
            Self::UserAssigned => "USER_ASSIGNED",
        }
    }

    /// True for the group-managed forms
    pub fn is_auto(&self) -> bool {
        matches!(self, Self::AutoTopics | Self::AutoPattern)
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A topic pattern, matched against whole topic names
#[derive(Debug, Clone)]
pub struct SubscriptionPattern {
    source: String,
    regex: Regex,
}

impl SubscriptionPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.trim().is_empty() {
            return Err(ConsumerError::InvalidArgument(
                "Topic pattern to subscribe to cannot be empty".to_string(),
            ));
        }
        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }
}

impl PartialEq for SubscriptionPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Fetch state of one assigned partition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionState {
    /// Offset of the next record to fetch
    pub position: Option<i64>,
    pub leader_epoch: Option<i32>,
    pub high_watermark: Option<i64>,
    pub last_stable_offset: Option<i64>,
    /// Reset requested for this partition and not yet resolved
    pub reset_strategy: Option<OffsetResetStrategy>,
    pub paused: bool,
}

/// Subscription and assignment, owned by the background thread
#[derive(Debug, Clone, Default)]
pub struct SubscriptionState {
    subscription_type: SubscriptionType,
    subscription: BTreeSet<String>,
    pattern: Option<SubscriptionPattern>,
    assignment: BTreeMap<TopicPartition, PartitionState>,
    default_reset_strategy: OffsetResetStrategy,
}

impl SubscriptionState {
    pub fn new(default_reset_strategy: OffsetResetStrategy) -> Self {
        Self {
            default_reset_strategy,
            ..Self::default()
        }
    }

    pub fn subscription_type(&self) -> SubscriptionType {
        self.subscription_type
    }

    /// Subscribed topic names. For a pattern subscription these are the topics
    /// the pattern matched at the last evaluation.
    pub fn subscription(&self) -> &BTreeSet<String> {
        &self.subscription
    }

    pub fn pattern(&self) -> Option<&SubscriptionPattern> {
        self.pattern.as_ref()
    }

    pub fn default_reset_strategy(&self) -> OffsetResetStrategy {
        self.default_reset_strategy
    }

    pub fn has_auto_subscription(&self) -> bool {
        self.subscription_type.is_auto()
    }

    pub fn assigned_partitions(&self) -> BTreeSet<TopicPartition> {
        self.assignment.keys().cloned().collect()
    }

    pub fn is_assigned(&self, partition: &TopicPartition) -> bool {
        self.assignment.contains_key(partition)
    }

    pub fn partition_state(&self, partition: &TopicPartition) -> Option<&PartitionState> {
        self.assignment.get(partition)
    }

    fn set_subscription_type(&mut self, requested: SubscriptionType) -> Result<()> {
        if self.subscription_type == SubscriptionType::None {
            self.subscription_type = requested;
            Ok(())
        } else if self.subscription_type == requested {
            Ok(())
        } else {
            Err(ConsumerError::SubscriptionConflict {
                current: self.subscription_type.to_string(),
                requested: requested.to_string(),
            })
        }
    }

    /// Subscribe to topic names. Returns true if the topic set changed.
    pub fn subscribe(&mut self, topics: BTreeSet<String>) -> Result<bool> {
        if topics.iter().any(|t| t.trim().is_empty()) {
            return Err(ConsumerError::InvalidArgument(
                "Topic collection to subscribe to cannot contain null or empty topic".to_string(),
            ));
        }
        self.set_subscription_type(SubscriptionType::AutoTopics)?;
        let changed = self.subscription != topics;
        self.subscription = topics;
        Ok(changed)
    }

    /// Subscribe to a topic pattern. Matching topics are filled in by
    /// [`subscribe_from_pattern`](Self::subscribe_from_pattern).
    pub fn subscribe_pattern(&mut self, pattern: &str) -> Result<()> {
        let pattern = SubscriptionPattern::new(pattern)?;
        self.set_subscription_type(SubscriptionType::AutoPattern)?;
        if self.pattern.as_ref() != Some(&pattern) {
            self.subscription.clear();
        }
        self.pattern = Some(pattern);
        Ok(())
    }

    /// Topics in `topics` matched by the current pattern
    pub fn matching_topics<'a, I>(&self, topics: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        match &self.pattern {
            Some(pattern) => topics
                .into_iter()
                .filter(|t| pattern.matches(t))
                .cloned()
                .collect(),
            None => BTreeSet::new(),
        }
    }

    /// Replace the pattern-matched topic set. Returns true if it changed.
    pub fn subscribe_from_pattern(&mut self, topics: BTreeSet<String>) -> Result<bool> {
        if self.subscription_type != SubscriptionType::AutoPattern {
            return Err(ConsumerError::IllegalState(format!(
                "Cannot update pattern-matched topics of a {} subscription",
                self.subscription_type
            )));
        }
        let changed = self.subscription != topics;
        self.subscription = topics;
        Ok(changed)
    }

    /// Assign partitions directly. Returns true if the assignment changed.
    pub fn assign_from_user(&mut self, partitions: BTreeSet<TopicPartition>) -> Result<bool> {
        if let Some(tp) = partitions.iter().find(|tp| tp.topic.trim().is_empty()) {
            return Err(ConsumerError::InvalidArgument(format!(
                "Topic partitions to assign to cannot have null or empty topic: {}",
                tp
            )));
        }
        self.set_subscription_type(SubscriptionType::UserAssigned)?;
        Ok(self.replace_assignment(partitions))
    }

    /// Apply an assignment received from the group
    pub fn assign_from_subscribed(&mut self, partitions: BTreeSet<TopicPartition>) -> Result<bool> {
        if !self.has_auto_subscription() {
            return Err(ConsumerError::IllegalState(format!(
                "Cannot apply a group assignment to a {} subscription",
                self.subscription_type
            )));
        }
        Ok(self.replace_assignment(partitions))
    }

    fn replace_assignment(&mut self, partitions: BTreeSet<TopicPartition>) -> bool {
        let current: BTreeSet<TopicPartition> = self.assignment.keys().cloned().collect();
        if current == partitions {
            return false;
        }
        self.assignment.retain(|tp, _| partitions.contains(tp));
        for tp in partitions {
            self.assignment.entry(tp).or_default();
        }
        true
    }

    /// Drop the subscription and every assigned partition
    pub fn unsubscribe(&mut self) {
        self.subscription_type = SubscriptionType::None;
        self.subscription.clear();
        self.pattern = None;
        self.assignment.clear();
    }

    /// Set the fetch position of an assigned partition without validating it
    /// against the leader
    pub fn seek_unvalidated(
        &mut self,
        partition: &TopicPartition,
        offset: i64,
        leader_epoch: Option<i32>,
    ) -> Result<()> {
        let state = self.assigned_state_mut(partition)?;
        state.position = Some(offset);
        state.leader_epoch = leader_epoch;
        state.reset_strategy = None;
        Ok(())
    }

    /// Clear the positions of `partitions` and request a reset with `strategy`.
    /// Fails without changing anything if any partition is not assigned.
    pub fn request_offset_reset(
        &mut self,
        partitions: &BTreeSet<TopicPartition>,
        strategy: OffsetResetStrategy,
    ) -> Result<()> {
        if let Some(tp) = partitions.iter().find(|tp| !self.is_assigned(tp)) {
            return Err(not_assigned(tp));
        }
        for tp in partitions {
            if let Some(state) = self.assignment.get_mut(tp) {
                state.position = None;
                state.reset_strategy = Some(strategy);
            }
        }
        Ok(())
    }

    /// Assigned partitions without a position, with any pending reset strategy
    pub fn partitions_needing_position(&self) -> Vec<(TopicPartition, Option<OffsetResetStrategy>)> {
        self.assignment
            .iter()
            .filter(|(_, state)| state.position.is_none())
            .map(|(tp, state)| (tp.clone(), state.reset_strategy))
            .collect()
    }

    /// True once every assigned partition has a position
    pub fn has_all_fetch_positions(&self) -> bool {
        self.assignment.values().all(|state| state.position.is_some())
    }

    /// Record a resolved position. Ignored for partitions no longer assigned.
    pub fn update_position(&mut self, partition: &TopicPartition, offset: i64) -> bool {
        match self.assignment.get_mut(partition) {
            Some(state) => {
                state.position = Some(offset);
                state.reset_strategy = None;
                true
            }
            None => false,
        }
    }

    pub fn update_high_watermark(&mut self, partition: &TopicPartition, high_watermark: i64) -> bool {
        match self.assignment.get_mut(partition) {
            Some(state) => {
                state.high_watermark = Some(high_watermark);
                true
            }
            None => false,
        }
    }

    pub fn update_last_stable_offset(&mut self, partition: &TopicPartition, offset: i64) -> bool {
        match self.assignment.get_mut(partition) {
            Some(state) => {
                state.last_stable_offset = Some(offset);
                true
            }
            None => false,
        }
    }

    /// Distance between the position and the end offset for `isolation`,
    /// or `None` if either is unknown
    pub fn partition_lag(&self, partition: &TopicPartition, isolation: IsolationLevel) -> Option<i64> {
        let state = self.assignment.get(partition)?;
        let position = state.position?;
        let end = match isolation {
            IsolationLevel::ReadUncommitted => state.high_watermark?,
            IsolationLevel::ReadCommitted => state.last_stable_offset?,
        };
        Some(end - position)
    }

    /// Positions of every assigned partition, as committable offsets
    pub fn all_consumed(&self) -> OffsetMap {
        self.assignment
            .iter()
            .filter_map(|(tp, state)| {
                state.position.map(|offset| {
                    (
                        tp.clone(),
                        OffsetAndMetadata {
                            offset,
                            leader_epoch: state.leader_epoch,
                            metadata: String::new(),
                        },
                    )
                })
            })
            .collect()
    }

    /// Unpaused partitions with a position, ready to fetch from
    pub fn fetchable_partitions(&self) -> Vec<(TopicPartition, i64)> {
        self.assignment
            .iter()
            .filter(|(_, state)| !state.paused)
            .filter_map(|(tp, state)| state.position.map(|p| (tp.clone(), p)))
            .collect()
    }

    pub fn pause(&mut self, partition: &TopicPartition) -> Result<()> {
        self.assigned_state_mut(partition)?.paused = true;
        Ok(())
    }

    pub fn resume(&mut self, partition: &TopicPartition) -> Result<()> {
        self.assigned_state_mut(partition)?.paused = false;
        Ok(())
    }

    fn assigned_state_mut(&mut self, partition: &TopicPartition) -> Result<&mut PartitionState> {
        self.assignment
            .get_mut(partition)
            .ok_or_else(|| not_assigned(partition))
    }
}

fn not_assigned(partition: &TopicPartition) -> ConsumerError {
    ConsumerError::IllegalState(format!("No current assignment for partition {}", partition))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn partitions(tps: &[(&str, i32)]) -> BTreeSet<TopicPartition> {
        tps.iter().map(|(t, p)| TopicPartition::new(*t, *p)).collect()
    }

    #[test]
    fn test_subscribe_topics() {
        let mut state = SubscriptionState::new(OffsetResetStrategy::Latest);
        assert!(state.subscribe(topics(&["a", "b"])).unwrap());
        assert!(!state.subscribe(topics(&["a", "b"])).unwrap());
        assert_eq!(state.subscription_type(), SubscriptionType::AutoTopics);
        assert_eq!(state.subscription(), &topics(&["a", "b"]));
    }

    #[test]
    fn test_topic_subscription_rejected_while_pattern_active() {
        let mut state = SubscriptionState::default();
        state.subscribe_pattern("orders-.*").unwrap();
        state
            .subscribe_from_pattern(topics(&["orders-eu"]))
            .unwrap();

        let err = state.subscribe(topics(&["payments"])).unwrap_err();
        assert!(matches!(err, ConsumerError::SubscriptionConflict { .. }));
        assert!(err.to_string().contains("AUTO_PATTERN"));

        assert_eq!(state.subscription_type(), SubscriptionType::AutoPattern);
        assert_eq!(state.pattern().map(|p| p.as_str()), Some("orders-.*"));
        assert_eq!(state.subscription(), &topics(&["orders-eu"]));
    }

    #[test]
    fn test_assign_rejected_while_subscribed() {
        let mut state = SubscriptionState::default();
        state.subscribe(topics(&["a"])).unwrap();
        let err = state.assign_from_user(partitions(&[("a", 0)])).unwrap_err();
        assert!(matches!(err, ConsumerError::SubscriptionConflict { .. }));
        assert!(state.assigned_partitions().is_empty());
    }

    #[test]
    fn test_pattern_rejected_while_user_assigned() {
        let mut state = SubscriptionState::default();
        state.assign_from_user(partitions(&[("a", 0)])).unwrap();
        assert!(state.subscribe_pattern("a.*").is_err());
        assert_eq!(state.subscription_type(), SubscriptionType::UserAssigned);
    }

    #[test]
    fn test_unsubscribe_allows_switching_forms() {
        let mut state = SubscriptionState::default();
        state.subscribe(topics(&["a"])).unwrap();
        state.unsubscribe();
        assert_eq!(state.subscription_type(), SubscriptionType::None);
        state.assign_from_user(partitions(&[("a", 0)])).unwrap();
        assert_eq!(state.subscription_type(), SubscriptionType::UserAssigned);
    }

    #[test]
    fn test_invalid_pattern_leaves_state_unchanged() {
        let mut state = SubscriptionState::default();
        let err = state.subscribe_pattern("(unclosed").unwrap_err();
        assert!(matches!(err, ConsumerError::InvalidArgument(_)));
        assert_eq!(state.subscription_type(), SubscriptionType::None);
    }

    #[test]
    fn test_pattern_matches_whole_topic_name() {
        let mut state = SubscriptionState::default();
        state.subscribe_pattern("orders").unwrap();
        let all = vec!["orders".to_string(), "orders-eu".to_string()];
        assert_eq!(state.matching_topics(&all), topics(&["orders"]));
    }

    #[test]
    fn test_empty_topic_rejected() {
        let mut state = SubscriptionState::default();
        assert!(matches!(
            state.subscribe(topics(&["ok", " "])),
            Err(ConsumerError::InvalidArgument(_))
        ));
        assert_eq!(state.subscription_type(), SubscriptionType::None);
    }

    #[test]
    fn test_assignment_keeps_state_of_retained_partitions() {
        let mut state = SubscriptionState::default();
        state.assign_from_user(partitions(&[("a", 0), ("a", 1)])).unwrap();
        state.seek_unvalidated(&TopicPartition::new("a", 0), 42, None).unwrap();

        assert!(state.assign_from_user(partitions(&[("a", 0), ("b", 0)])).unwrap());
        assert_eq!(
            state.partition_state(&TopicPartition::new("a", 0)).unwrap().position,
            Some(42)
        );
        assert!(!state.is_assigned(&TopicPartition::new("a", 1)));
        assert!(state.is_assigned(&TopicPartition::new("b", 0)));
    }

    #[test]
    fn test_seek_unassigned_partition_fails() {
        let mut state = SubscriptionState::default();
        let err = state
            .seek_unvalidated(&TopicPartition::new("a", 0), 1, None)
            .unwrap_err();
        assert!(err.to_string().contains("No current assignment for partition a-0"));
    }

    #[test]
    fn test_offset_reset_and_positions() {
        let mut state = SubscriptionState::default();
        let tp0 = TopicPartition::new("a", 0);
        let tp1 = TopicPartition::new("a", 1);
        state.assign_from_user(partitions(&[("a", 0), ("a", 1)])).unwrap();
        state.seek_unvalidated(&tp0, 10, None).unwrap();
        state.seek_unvalidated(&tp1, 20, None).unwrap();
        assert!(state.has_all_fetch_positions());

        state
            .request_offset_reset(&partitions(&[("a", 1)]), OffsetResetStrategy::Earliest)
            .unwrap();
        assert_eq!(
            state.partitions_needing_position(),
            vec![(tp1.clone(), Some(OffsetResetStrategy::Earliest))]
        );

        assert!(state.update_position(&tp1, 0));
        assert!(state.has_all_fetch_positions());
        assert!(!state.update_position(&TopicPartition::new("gone", 0), 5));
    }

    #[test]
    fn test_reset_of_unassigned_partition_changes_nothing() {
        let mut state = SubscriptionState::default();
        let tp0 = TopicPartition::new("a", 0);
        state.assign_from_user(partitions(&[("a", 0)])).unwrap();
        state.seek_unvalidated(&tp0, 10, None).unwrap();

        let result = state.request_offset_reset(
            &partitions(&[("a", 0), ("b", 0)]),
            OffsetResetStrategy::Latest,
        );
        assert!(result.is_err());
        assert_eq!(state.partition_state(&tp0).unwrap().position, Some(10));
    }

    #[test]
    fn test_lag_by_isolation_level() {
        let mut state = SubscriptionState::default();
        let tp = TopicPartition::new("a", 0);
        state.assign_from_user(partitions(&[("a", 0)])).unwrap();
        assert_eq!(state.partition_lag(&tp, IsolationLevel::ReadUncommitted), None);

        state.seek_unvalidated(&tp, 90, None).unwrap();
        state.update_high_watermark(&tp, 100);
        state.update_last_stable_offset(&tp, 95);
        assert_eq!(state.partition_lag(&tp, IsolationLevel::ReadUncommitted), Some(10));
        assert_eq!(state.partition_lag(&tp, IsolationLevel::ReadCommitted), Some(5));
    }

    #[test]
    fn test_all_consumed_and_fetchable() {
        let mut state = SubscriptionState::default();
        let tp0 = TopicPartition::new("a", 0);
        let tp1 = TopicPartition::new("a", 1);
        state.assign_from_user(partitions(&[("a", 0), ("a", 1), ("a", 2)])).unwrap();
        state.seek_unvalidated(&tp0, 5, Some(2)).unwrap();
        state.seek_unvalidated(&tp1, 7, None).unwrap();
        state.pause(&tp1).unwrap();

        let consumed = state.all_consumed();
        assert_eq!(consumed.len(), 2);
        assert_eq!(consumed[&tp0].offset, 5);
        assert_eq!(consumed[&tp0].leader_epoch, Some(2));

        assert_eq!(state.fetchable_partitions(), vec![(tp0, 5)]);
        state.resume(&tp1).unwrap();
        assert_eq!(state.fetchable_partitions().len(), 2);
    }

    #[test]
    fn test_group_assignment_requires_auto_subscription() {
        let mut state = SubscriptionState::default();
        assert!(matches!(
            state.assign_from_subscribed(partitions(&[("a", 0)])),
            Err(ConsumerError::IllegalState(_))
        ));
        state.subscribe(topics(&["a"])).unwrap();
        assert!(state.assign_from_subscribed(partitions(&[("a", 0)])).unwrap());
    }
}
