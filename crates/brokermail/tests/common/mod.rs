//! Shared test utilities for brokermail integration tests.
//!
//! - `TestHarness`: in-memory database, fault-injecting store and a scripted
//!   mailbox wired into a `SyncOrchestrator`
//! - fakes for the mailbox, the record store and the inbox processor
//! - builders for raw confirmation messages

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::{run_cycle, TestHarness, USER};
