//! Consumer coordination error types
//!
//! Every failure that can reach a caller flows through [`ConsumerError`]. Errors
//! are `Clone` because a single failure is routinely recorded twice: once in a
//! request manager's future and once in the event result slot chained to it.

use thiserror::Error;

use crate::consumer::constants::{
    ERROR_FENCED_MEMBER_EPOCH, ERROR_INVALID_CONFIG, ERROR_REQUEST_TIMED_OUT,
    ERROR_UNKNOWN_SERVER_ERROR,
};

/// Errors surfaced by the consumer coordination core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// The deadline of an operation passed before it completed
    #[error("{subject} was {overdue_ms} ms past its expiration of {deadline_ms}")]
    Timeout {
        subject: String,
        overdue_ms: i64,
        deadline_ms: i64,
    },

    /// The consumer closed while the operation was still outstanding
    #[error("{subject} could not be completed before the consumer closed")]
    ShutdownForced { subject: String },

    /// Topic, pattern and user-assigned subscriptions were mixed
    #[error(
        "Subscription to topics, partitions and pattern are mutually exclusive: \
         cannot change a {current} subscription to {requested}"
    )]
    SubscriptionConflict { current: String, requested: String },

    /// The operation is not valid in the current subscription or member state
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Caller supplied an invalid argument (empty topic name, bad pattern, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The event requires a collaborator this consumer was not built with
    #[error("{event_type} requires the {collaborator}, which is not configured for this consumer")]
    MissingCollaborator {
        collaborator: &'static str,
        event_type: String,
    },

    /// The group coordinator rejected the member epoch
    #[error("Member {member_id} was fenced at epoch {member_epoch}")]
    Fenced { member_id: String, member_epoch: i32 },

    /// Unrecoverable error; the member cannot rejoin the group
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Kafka protocol error code returned by the broker
    #[error("Kafka error code {code}: {message}")]
    Protocol { code: i16, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The consumer has been closed
    #[error("The consumer is closed")]
    Closed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConsumerError {
    /// Build a timeout error for `subject` that expired at `deadline_ms`,
    /// observed at `now_ms`
    pub fn timeout(subject: impl Into<String>, now_ms: i64, deadline_ms: i64) -> Self {
        ConsumerError::Timeout {
            subject: subject.into(),
            overdue_ms: now_ms.saturating_sub(deadline_ms),
            deadline_ms,
        }
    }

    /// Build the close-time error for `subject`
    pub fn shutdown_forced(subject: impl Into<String>) -> Self {
        ConsumerError::ShutdownForced {
            subject: subject.into(),
        }
    }

    /// True for errors produced by an expired deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConsumerError::Timeout { .. })
    }

    /// Convert this error to a Kafka protocol error code
    pub fn to_kafka_error_code(&self) -> i16 {
        match self {
            ConsumerError::Timeout { .. } => ERROR_REQUEST_TIMED_OUT,
            ConsumerError::Fenced { .. } => ERROR_FENCED_MEMBER_EPOCH,
            ConsumerError::InvalidConfig(_) => ERROR_INVALID_CONFIG,
            ConsumerError::Protocol { code, .. } => *code,
            ConsumerError::ShutdownForced { .. }
            | ConsumerError::SubscriptionConflict { .. }
            | ConsumerError::IllegalState(_)
            | ConsumerError::InvalidArgument(_)
            | ConsumerError::MissingCollaborator { .. }
            | ConsumerError::Fatal(_)
            | ConsumerError::Closed
            | ConsumerError::Internal(_) => ERROR_UNKNOWN_SERVER_ERROR,
        }
    }
}

impl From<regex::Error> for ConsumerError {
    fn from(err: regex::Error) -> Self {
        ConsumerError::InvalidArgument(format!("Invalid subscription pattern: {}", err))
    }
}

/// Result type alias for consumer operations
pub type Result<T> = std::result::Result<T, ConsumerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::constants::ERROR_COORDINATOR_NOT_AVAILABLE;

    #[test]
    fn test_timeout_display() {
        let err = ConsumerError::timeout("CommitSync event", 150, 100);
        let msg = err.to_string();
        assert!(msg.contains("CommitSync event"));
        assert!(msg.contains("50 ms past"));
        assert!(msg.contains("expiration of 100"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_timeout_saturates() {
        let err = ConsumerError::timeout("x", i64::MAX, i64::MIN);
        match err {
            ConsumerError::Timeout { overdue_ms, .. } => assert_eq!(overdue_ms, i64::MAX),
            _ => panic!("Expected timeout"),
        }
    }

    #[test]
    fn test_shutdown_is_distinct_from_timeout() {
        let err = ConsumerError::shutdown_forced("Unsubscribe event");
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("before the consumer closed"));
    }

    #[test]
    fn test_subscription_conflict_names_both_forms() {
        let err = ConsumerError::SubscriptionConflict {
            current: "AUTO_PATTERN".to_string(),
            requested: "AUTO_TOPICS".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("mutually exclusive"));
        assert!(msg.contains("AUTO_PATTERN"));
        assert!(msg.contains("AUTO_TOPICS"));
    }

    #[test]
    fn test_missing_collaborator_display() {
        let err = ConsumerError::MissingCollaborator {
            collaborator: "commit request manager",
            event_type: "CommitSync".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "CommitSync requires the commit request manager, which is not configured for this consumer"
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ConsumerError::timeout("x", 1, 0).to_kafka_error_code(),
            ERROR_REQUEST_TIMED_OUT
        );
        assert_eq!(
            ConsumerError::Fenced {
                member_id: "m".to_string(),
                member_epoch: 3
            }
            .to_kafka_error_code(),
            ERROR_FENCED_MEMBER_EPOCH
        );
        assert_eq!(
            ConsumerError::Protocol {
                code: ERROR_COORDINATOR_NOT_AVAILABLE,
                message: "no coordinator".to_string()
            }
            .to_kafka_error_code(),
            ERROR_COORDINATOR_NOT_AVAILABLE
        );
        assert_eq!(
            ConsumerError::Closed.to_kafka_error_code(),
            ERROR_UNKNOWN_SERVER_ERROR
        );
    }

    #[test]
    fn test_regex_error_conversion() {
        let regex_err = regex::Regex::new("(unclosed").unwrap_err();
        let err: ConsumerError = regex_err.into();
        assert!(err.to_string().contains("Invalid subscription pattern"));
    }
}
