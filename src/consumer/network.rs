//! Network client interface
//!
//! The transport is a collaborator. Request managers produce [`UnsentRequest`]s;
//! the background loop hands them to a [`NetworkClientDelegate`], which
//! eventually completes each request's response slot with a [`ClientResponse`]
//! or an error.

use bytes::Bytes;

use crate::consumer::constants::ERROR_NONE;
use crate::consumer::error::ConsumerError;
use crate::consumer::future::CompletableFuture;

/// A serialized request waiting to be sent
#[derive(Debug, Clone)]
pub struct UnsentRequest {
    pub api_key: i16,
    /// Target node, or `None` for "least loaded node"
    pub destination: Option<i32>,
    pub body: Bytes,
    /// Completed by the transport with the response or a failure
    pub response: CompletableFuture<ClientResponse>,
    pub created_ms: i64,
}

impl UnsentRequest {
    pub fn new(api_key: i16, body: Bytes, created_ms: i64) -> Self {
        Self {
            api_key,
            destination: None,
            body,
            response: CompletableFuture::new(),
            created_ms,
        }
    }

    pub fn with_destination(mut self, node_id: i32) -> Self {
        self.destination = Some(node_id);
        self
    }
}

/// A response surfaced by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResponse {
    pub api_key: i16,
    pub destination: Option<i32>,
    /// Top-level Kafka error code
    pub error_code: i16,
    pub body: Bytes,
    pub received_ms: i64,
}

impl ClientResponse {
    /// The top-level error, if the response carries one
    pub fn error(&self) -> Option<ConsumerError> {
        if self.error_code == ERROR_NONE {
            None
        } else {
            Some(ConsumerError::Protocol {
                code: self.error_code,
                message: format!("api key {} failed", self.api_key),
            })
        }
    }
}

/// Outcome of polling a request manager
#[derive(Debug)]
pub struct PollResult {
    /// How long until the manager wants to be polled again
    pub time_until_next_poll_ms: i64,
    pub unsent_requests: Vec<UnsentRequest>,
}

impl PollResult {
    /// Nothing to send and no need to be polled again
    pub fn empty() -> Self {
        Self {
            time_until_next_poll_ms: i64::MAX,
            unsent_requests: Vec::new(),
        }
    }

    pub fn new(time_until_next_poll_ms: i64, unsent_requests: Vec<UnsentRequest>) -> Self {
        Self {
            time_until_next_poll_ms,
            unsent_requests,
        }
    }
}

impl Default for PollResult {
    fn default() -> Self {
        Self::empty()
    }
}

/// Transport seen from the background thread
pub trait NetworkClientDelegate: Send {
    /// Queue `request` for sending
    fn send(&mut self, request: UnsentRequest);

    /// Perform I/O and complete the response slots of finished requests.
    /// Must not block longer than `timeout_ms`.
    fn poll(&mut self, timeout_ms: i64, now_ms: i64);

    /// True while requests are queued or in flight
    fn has_pending_requests(&self) -> bool;
}
