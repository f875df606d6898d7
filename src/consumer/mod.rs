// Consumer coordination core
//
// This module contains the machinery that sits between the caller-facing
// consumer API and the background thread that talks to the cluster:
// - Event types and the two queues that carry them
// - Result slots that callers block on
// - The reaper that enforces event deadlines
// - The processor that applies application events to request managers
// - Subscription and group membership state
//
// Architecture Overview:
// =====================
//
// 1. CALLER THREAD:
//    - Public API calls become application events
//    - Blocks on each event's result slot (with a deadline)
//    - Runs rebalance callbacks requested by the background thread
//
// 2. BACKGROUND THREAD (worker::NetworkThread):
//    - Drains the application queue and processes every event
//    - Polls request managers and drives the network client
//    - Reaps events whose deadline has passed
//
// The QUEUES are the bridge:
//   Caller → [Application Queue] → Background thread → [Background Queue] → Caller
//
// Apart from the queues, the only shared state is the result slot of each
// completable event and the advisory metrics.

pub mod client;
pub mod constants;
pub mod error;
pub mod events;
pub mod future;
pub mod managers;
pub mod membership;
pub mod metrics;
pub mod network;
pub mod processor;
pub mod subscription;
pub mod time;
pub mod types;

// Re-export commonly used types for convenience
pub use client::{AsyncConsumer, ConsumerRebalanceListener, GroupMetadata, StreamsRebalanceListener};
pub use error::{ConsumerError, Result};
pub use events::{
    ApplicationEvent, ApplicationEventHandler, BackgroundEvent, BackgroundEventHandler,
    CompletableEvent, CompletableEventReaper, EventHandle, EventQueue,
};
pub use future::CompletableFuture;
pub use managers::RequestManagers;
pub use membership::{MemberState, MembershipManager};
pub use processor::ApplicationEventProcessor;
pub use subscription::{SubscriptionState, SubscriptionType};
pub use time::{calculate_deadline, Clock, ManualClock, SystemClock};
pub use types::{OffsetAndMetadata, OffsetMap, TopicPartition};
