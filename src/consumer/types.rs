//! Shared value types: partitions, offsets and reset/isolation settings

use std::collections::HashMap;
use std::fmt;

/// A topic partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Committed offset information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetAndMetadata {
    /// Offset of the next record to consume
    pub offset: i64,
    /// Leader epoch of the last consumed record, if known
    pub leader_epoch: Option<i32>,
    /// Optional metadata stored with the commit
    pub metadata: String,
}

impl OffsetAndMetadata {
    pub fn new(offset: i64) -> Self {
        Self {
            offset,
            leader_epoch: None,
            metadata: String::new(),
        }
    }
}

/// Result of an offsets-for-times lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetAndTimestamp {
    pub offset: i64,
    pub timestamp: i64,
    pub leader_epoch: Option<i32>,
}

/// Offsets keyed by partition
pub type OffsetMap = HashMap<TopicPartition, OffsetAndMetadata>;

/// Consumer isolation level
///
/// Controls which end offset lag is computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Lag is measured against the high watermark
    #[default]
    ReadUncommitted = 0,
    /// Lag is measured against the last stable offset
    ReadCommitted = 1,
}

impl IsolationLevel {
    /// Create from Kafka protocol value
    pub fn from_i8(value: i8) -> Self {
        match value {
            1 => Self::ReadCommitted,
            _ => Self::ReadUncommitted,
        }
    }
}

/// What to do when a partition has no valid position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetResetStrategy {
    /// Start from the earliest available offset
    Earliest,
    /// Start from the end of the log
    #[default]
    Latest,
    /// Fail instead of resetting
    None,
}

impl OffsetResetStrategy {
    /// Parse from a configuration string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "earliest" => Some(Self::Earliest),
            "latest" => Some(Self::Latest),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
            Self::None => "none",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_partition_display_and_order() {
        let a = TopicPartition::new("orders", 0);
        let b = TopicPartition::new("orders", 1);
        assert_eq!(a.to_string(), "orders-0");
        assert!(a < b);
    }

    #[test]
    fn test_reset_strategy_parse() {
        assert_eq!(
            OffsetResetStrategy::parse("EARLIEST"),
            Some(OffsetResetStrategy::Earliest)
        );
        assert_eq!(
            OffsetResetStrategy::parse("latest"),
            Some(OffsetResetStrategy::Latest)
        );
        assert_eq!(
            OffsetResetStrategy::parse("none"),
            Some(OffsetResetStrategy::None)
        );
        assert_eq!(OffsetResetStrategy::parse("middle"), None);
        assert_eq!(OffsetResetStrategy::Earliest.as_str(), "earliest");
    }

    #[test]
    fn test_isolation_level_from_i8() {
        assert_eq!(IsolationLevel::from_i8(1), IsolationLevel::ReadCommitted);
        assert_eq!(IsolationLevel::from_i8(0), IsolationLevel::ReadUncommitted);
        assert_eq!(IsolationLevel::from_i8(9), IsolationLevel::ReadUncommitted);
    }
}
