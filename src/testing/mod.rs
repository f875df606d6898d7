//! Testing utilities
//!
//! Only compiled for unit tests.
//!
//! # Organization
//! - `mocks.rs` - mockall doubles for the request manager traits
//! - `helpers.rs` - fixtures for partitions, handlers and processors

#![cfg(test)]

pub mod helpers;
pub mod mocks;

pub use helpers::{partitions, topics, tp, ProcessorFixture};
