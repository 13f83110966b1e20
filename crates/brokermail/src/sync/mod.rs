//! Poll-cycle orchestration.

pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{CycleReport, RemoteArchive, SyncOrchestrator};
pub use scheduler::SyncScheduler;
