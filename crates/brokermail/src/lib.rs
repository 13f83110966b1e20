pub mod archive;
pub mod classify;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod logging;
pub mod models;
pub mod resilience;
pub mod secrets;
pub mod store;
pub mod sync;

pub use archive::{ArchivalMover, ArchiveBatch, BatchState};
pub use classify::{Classifier, ClassifyingProcessor, HttpClassifier, InboxProcessor, Verdict};
pub use config::{load_config, SyncConfig};
pub use db::Database;
pub use email::{ImapMailbox, MailFetcher, Mailbox};
pub use error::{BrokermailError, ConfigError, Result};
pub use models::{InboxRecord, NewInboxRecord, ProcessedRecord, ProcessingResult, RecordStatus};
pub use resilience::{
    execute_with_retry, CircuitBreaker, DependencyError, GuardedDependency, RequestQueue,
    RetryPolicy,
};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use store::{RecordStore, SqliteRecordStore, TwoStageStore};
pub use sync::{CycleReport, SyncOrchestrator, SyncScheduler};
