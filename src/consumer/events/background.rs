//! Events published by the background thread for the caller thread
//!
//! Some of these ask the caller to run a user callback. Those carry an
//! [`EventHandle`] so the background thread can hold a membership transition
//! until the callback has finished.

use std::collections::BTreeSet;
use std::fmt;

use crate::consumer::error::ConsumerError;
use crate::consumer::events::completable::{AsCompletable, CompletableEvent, EventHandle};
use crate::consumer::types::TopicPartition;

/// Type tag of a [`BackgroundEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackgroundEventType {
    Error,
    ConsumerRebalanceListenerCallbackNeeded,
    StreamsTasksCallbackNeeded,
    GroupMetadataUpdate,
}

impl BackgroundEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::ConsumerRebalanceListenerCallbackNeeded => {
                "CONSUMER_REBALANCE_LISTENER_CALLBACK_NEEDED"
            }
            Self::StreamsTasksCallbackNeeded => "STREAMS_TASKS_CALLBACK_NEEDED",
            Self::GroupMetadataUpdate => "GROUP_METADATA_UPDATE",
        }
    }
}

impl fmt::Display for BackgroundEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rebalance listener method the caller is asked to invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RebalanceCallbackMethod {
    OnPartitionsRevoked,
    OnPartitionsAssigned,
    OnPartitionsLost,
}

impl RebalanceCallbackMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnPartitionsRevoked => "onPartitionsRevoked",
            Self::OnPartitionsAssigned => "onPartitionsAssigned",
            Self::OnPartitionsLost => "onPartitionsLost",
        }
    }
}

/// Streams task callback the caller is asked to invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamsCallbackKind {
    TasksAssigned,
    TasksRevoked,
    AllTasksLost,
}

/// Request to run a rebalance listener callback on the caller thread
#[derive(Debug, Clone)]
pub struct RebalanceCallbackNeeded {
    pub handle: EventHandle<()>,
    pub method: RebalanceCallbackMethod,
    pub partitions: BTreeSet<TopicPartition>,
}

/// Request to run a streams task callback on the caller thread
#[derive(Debug, Clone)]
pub struct StreamsCallbackNeeded {
    pub handle: EventHandle<()>,
    pub kind: StreamsCallbackKind,
    pub task_ids: BTreeSet<String>,
}

/// Event flowing from the background thread to the caller thread
#[derive(Debug, Clone)]
pub enum BackgroundEvent {
    /// An error with no caller waiting on it, rethrown from the next poll
    Error(ConsumerError),
    ConsumerRebalanceListenerCallbackNeeded(RebalanceCallbackNeeded),
    StreamsTasksCallbackNeeded(StreamsCallbackNeeded),
    /// Member id or epoch changed
    GroupMetadataUpdate { member_id: String, member_epoch: i32 },
}

impl BackgroundEvent {
    pub fn event_type(&self) -> BackgroundEventType {
        match self {
            Self::Error(_) => BackgroundEventType::Error,
            Self::ConsumerRebalanceListenerCallbackNeeded(_) => {
                BackgroundEventType::ConsumerRebalanceListenerCallbackNeeded
            }
            Self::StreamsTasksCallbackNeeded(_) => BackgroundEventType::StreamsTasksCallbackNeeded,
            Self::GroupMetadataUpdate { .. } => BackgroundEventType::GroupMetadataUpdate,
        }
    }
}

impl AsCompletable for BackgroundEvent {
    fn as_completable(&self) -> Option<Box<dyn CompletableEvent>> {
        match self {
            Self::ConsumerRebalanceListenerCallbackNeeded(event) => Some(event.handle.tracked()),
            Self::StreamsTasksCallbackNeeded(event) => Some(event.handle.tracked()),
            Self::Error(_) | Self::GroupMetadataUpdate { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_callback_events_are_completable() {
        let callback = BackgroundEvent::ConsumerRebalanceListenerCallbackNeeded(
            RebalanceCallbackNeeded {
                handle: EventHandle::new(
                    BackgroundEventType::ConsumerRebalanceListenerCallbackNeeded.as_str(),
                    0,
                    100,
                ),
                method: RebalanceCallbackMethod::OnPartitionsRevoked,
                partitions: BTreeSet::new(),
            },
        );
        assert!(callback.as_completable().is_some());
        assert!(BackgroundEvent::Error(ConsumerError::Closed)
            .as_completable()
            .is_none());
        assert!(BackgroundEvent::GroupMetadataUpdate {
            member_id: "m".to_string(),
            member_epoch: 1
        }
        .as_completable()
        .is_none());
    }

    #[test]
    fn test_event_type_tags() {
        assert_eq!(
            BackgroundEvent::Error(ConsumerError::Closed).event_type(),
            BackgroundEventType::Error
        );
        assert_eq!(
            BackgroundEventType::GroupMetadataUpdate.to_string(),
            "GROUP_METADATA_UPDATE"
        );
        assert_eq!(
            RebalanceCallbackMethod::OnPartitionsLost.as_str(),
            "onPartitionsLost"
        );
    }
}
