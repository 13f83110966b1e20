//! Two-stage record storage.
//!
//! Ingested messages live in the `inbox` collection until processing finishes,
//! then the archival mover copies them into `processed` and removes the inbox
//! row. A message's identity is `(user_id, message_id)`; existence is always
//! checked against both collections.
//!
//! The backing store only guarantees atomicity for a single chunk write.

pub mod dedup;
pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::models::{InboxRecord, ProcessedRecord, ProcessingResult, RecordStatus};

pub use dedup::{BatchInsertReport, TwoStageStore};
pub use sqlite::SqliteRecordStore;

/// Errors surfaced by a record store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// The store could not be reached or refused the write.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The operations this crate needs from the `inbox` and `processed` collections.
///
/// Each write method receives at most one chunk and must apply it atomically.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Message ids from `message_ids` that exist in the inbox for `user_id`.
    async fn inbox_message_ids(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> Result<HashSet<String>>;

    /// Message ids from `message_ids` that exist in the processed collection.
    async fn processed_message_ids(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> Result<HashSet<String>>;

    async fn insert_inbox(&self, records: &[InboxRecord]) -> Result<usize>;

    async fn inbox_by_message_ids(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<InboxRecord>>;

    async fn list_inbox(
        &self,
        user_id: &str,
        status: Option<RecordStatus>,
    ) -> Result<Vec<InboxRecord>>;

    async fn update_inbox_status(
        &self,
        id: &str,
        status: RecordStatus,
        error_message: Option<&str>,
    ) -> Result<bool>;

    /// Returns every `error` record of the user to `pending`.
    async fn requeue_errored(&self, user_id: &str) -> Result<usize>;

    async fn delete_inbox(&self, ids: &[String]) -> Result<usize>;

    /// Inbox row ids whose dedup key is already present in `processed`.
    async fn inbox_ids_already_processed(&self, user_id: &str) -> Result<Vec<String>>;

    /// Inserts processed copies; existing dedup keys are left untouched.
    async fn insert_processed(&self, records: &[ProcessedRecord]) -> Result<usize>;

    async fn processed_by_message_ids(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<ProcessedRecord>>;

    async fn update_processed_review(
        &self,
        id: &str,
        result: ProcessingResult,
        notes: Option<&str>,
    ) -> Result<bool>;

    async fn count_inbox(&self, user_id: &str) -> Result<u64>;

    async fn count_processed(&self, user_id: &str) -> Result<u64>;

    /// UIDs from `uids` already ingested from `folder` under `uid_validity`.
    async fn known_uids(
        &self,
        user_id: &str,
        folder: &str,
        uid_validity: u32,
        uids: &[u32],
    ) -> Result<HashSet<u32>>;

    /// Records mailbox positions as ingested, as `(uid, message_id)` pairs.
    async fn mark_uids_seen(
        &self,
        user_id: &str,
        folder: &str,
        uid_validity: u32,
        entries: &[(u32, String)],
    ) -> Result<usize>;
}
