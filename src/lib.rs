// Module declarations for the consumer core
pub mod config; // Consumer configuration
pub mod consumer; // Events, queues, reaper, processor and membership
pub mod worker; // Background network thread

// Test utilities (only compiled in test builds)
#[cfg(test)]
pub mod testing;

pub use config::ConsumerConfig;
pub use consumer::{AsyncConsumer, ConsumerError, Result};
