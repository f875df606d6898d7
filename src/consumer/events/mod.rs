//! Event passing between the caller thread and the background thread
//!
//! ```text
//! caller thread                                  background thread
//! ─────────────                                  ─────────────────
//! ApplicationEventHandler::add ──► app queue ──► drain ─► reaper.add ─► processor
//!        │                                                                 │
//!        └─ wait on EventHandle ◄──────── result slot completed ◄──────────┘
//!
//! drain_events ◄──────────────── bg queue ◄──── BackgroundEventHandler::add
//! ```
//!
//! Both queues are unbounded FIFOs. The result slot of each completable event
//! is the only channel through which its outcome reaches the caller.

pub mod application;
pub mod application_handler;
pub mod background;
pub mod background_handler;
pub mod completable;
pub mod queue;
pub mod reaper;

pub use application::{
    ApplicationEvent, ApplicationEventType, CommitEvent, ListOffsetsResult, PollEvent,
    RebalanceCallbackCompleted, StreamsCallbackCompleted,
};
pub use application_handler::ApplicationEventHandler;
pub use background::{
    BackgroundEvent, BackgroundEventType, RebalanceCallbackMethod, RebalanceCallbackNeeded,
    StreamsCallbackKind, StreamsCallbackNeeded,
};
pub use background_handler::BackgroundEventHandler;
pub use completable::{AsCompletable, CompletableEvent, EventHandle};
pub use queue::{EventQueue, Queued};
pub use reaper::CompletableEventReaper;
