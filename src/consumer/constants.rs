//! Consumer coordination constants
//!
//! This module centralizes the timeouts, bounds and Kafka protocol codes used by
//! the coordination core. Keeping them in one place makes the defaults in
//! [`crate::config::ConsumerConfig`] and the error-code mapping in
//! [`crate::consumer::error`] easy to audit.
//!
//! # Terminology
//! - **API Key**: Identifies which request type a request manager produced
//!   (e.g., 8 = OffsetCommit, 68 = ConsumerGroupHeartbeat)
//! - **Error Code**: The numeric Kafka error returned in a response

// ===== API Keys =====
// Request managers tag outbound requests with these.
// See: https://kafka.apache.org/protocol.html#protocol_api_keys

/// API key for Fetch requests
pub const API_KEY_FETCH: i16 = 1;

/// API key for ListOffsets requests
///
/// Used to resolve earliest/latest offsets and offsets-for-times
pub const API_KEY_LIST_OFFSETS: i16 = 2;

/// API key for Metadata requests
pub const API_KEY_METADATA: i16 = 3;

/// API key for OffsetCommit requests
pub const API_KEY_OFFSET_COMMIT: i16 = 8;

/// API key for OffsetFetch requests
pub const API_KEY_OFFSET_FETCH: i16 = 9;

/// API key for FindCoordinator requests
pub const API_KEY_FIND_COORDINATOR: i16 = 10;

/// API key for ConsumerGroupHeartbeat requests (KIP-848)
///
/// The heartbeat carries join, assignment acknowledgement and leave.
pub const API_KEY_CONSUMER_GROUP_HEARTBEAT: i16 = 68;

// ===== Timeouts =====

/// Default timeout for blocking consumer API calls (milliseconds)
pub const DEFAULT_API_TIMEOUT_MS: i64 = 60_000;

/// Default request timeout (milliseconds)
pub const DEFAULT_REQUEST_TIMEOUT_MS: i64 = 30_000;

/// Minimum request timeout (milliseconds)
pub const MIN_REQUEST_TIMEOUT_MS: i64 = 1;

/// Default auto-commit interval (milliseconds)
pub const DEFAULT_AUTO_COMMIT_INTERVAL_MS: i64 = 5_000;

/// Default retry backoff used by request managers (milliseconds)
pub const DEFAULT_RETRY_BACKOFF_MS: i64 = 100;

/// Default close timeout (milliseconds)
pub const DEFAULT_CLOSE_TIMEOUT_MS: i64 = 30_000;

// ===== Background Loop =====

/// Upper bound on how long the background thread sleeps between iterations
/// (milliseconds)
///
/// This is also the granularity of deadline enforcement: an overdue event is
/// reaped at most this long after its deadline when nothing else wakes the loop.
pub const DEFAULT_MAX_POLL_WAIT_MS: i64 = 5_000;

/// Minimum background loop wait (milliseconds)
pub const MIN_MAX_POLL_WAIT_MS: i64 = 1;

/// Maximum background loop wait (milliseconds)
pub const MAX_MAX_POLL_WAIT_MS: i64 = 60_000;

/// How often a caller blocked on an event re-checks the background queue
/// for callbacks it must run (milliseconds)
pub const CALLBACK_CHECK_INTERVAL_MS: u64 = 10;

/// Longest the background thread sleeps while requests are in flight
/// (milliseconds)
pub const PENDING_REQUEST_POLL_INTERVAL_MS: i64 = 10;

/// Client id used when none is configured
pub const DEFAULT_CLIENT_ID: &str = "kafka-consumer";

/// Name given to the background thread
pub const NETWORK_THREAD_NAME: &str = "consumer-network-thread";

// ===== Offsets =====

/// ListOffsets timestamp sentinel for the latest offset
pub const LATEST_TIMESTAMP: i64 = -1;

/// ListOffsets timestamp sentinel for the earliest offset
pub const EARLIEST_TIMESTAMP: i64 = -2;

// ===== Membership =====

/// Member epoch sent in a heartbeat to leave the group
pub const LEAVE_GROUP_MEMBER_EPOCH: i32 = -1;

/// Member epoch for a member that has not joined yet
pub const JOIN_GROUP_MEMBER_EPOCH: i32 = 0;

// ===== Kafka Error Codes =====
// See: https://kafka.apache.org/protocol.html#protocol_error_codes

/// No error
pub const ERROR_NONE: i16 = 0;

/// Unknown server error
pub const ERROR_UNKNOWN_SERVER_ERROR: i16 = -1;

/// Unknown topic or partition
pub const ERROR_UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;

/// Request timed out
pub const ERROR_REQUEST_TIMED_OUT: i16 = 7;

/// Coordinator not available
pub const ERROR_COORDINATOR_NOT_AVAILABLE: i16 = 15;

/// Not coordinator for group
pub const ERROR_NOT_COORDINATOR: i16 = 16;

/// Unknown member ID
pub const ERROR_UNKNOWN_MEMBER_ID: i16 = 25;

/// Group authorization failed
pub const ERROR_GROUP_AUTHORIZATION_FAILED: i16 = 30;

/// Invalid configuration
pub const ERROR_INVALID_CONFIG: i16 = 40;

/// Member epoch was rejected by the group coordinator
pub const ERROR_FENCED_MEMBER_EPOCH: i16 = 110;
