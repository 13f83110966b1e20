//! Dedup-checked ingestion into the two-stage store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};

use crate::models::{InboxRecord, NewInboxRecord};

use super::{RecordStore, Result};

/// Default number of candidates written per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Outcome of [`TwoStageStore::insert_batch`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchInsertReport {
    /// Records actually written to the inbox.
    pub inserted: usize,
    /// Candidates dropped because their key already existed somewhere.
    pub skipped_existing: usize,
    /// Chunks that failed and were skipped.
    pub failed_chunks: usize,
    /// Candidates lost with a failed chunk.
    pub failed_records: usize,
    /// Message ids written in this batch, in insertion order.
    pub inserted_message_ids: Vec<String>,
}

/// Dedup layer over the inbox and processed collections.
#[derive(Clone)]
pub struct TwoStageStore {
    store: Arc<dyn RecordStore>,
    chunk_size: usize,
}

impl TwoStageStore {
    pub fn new(store: Arc<dyn RecordStore>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// True if the key exists in the inbox **or** in the processed collection.
    pub async fn exists(&self, user_id: &str, message_id: &str) -> Result<bool> {
        let ids = [message_id.to_string()];
        if !self.store.inbox_message_ids(user_id, &ids).await?.is_empty() {
            return Ok(true);
        }
        Ok(!self.store.processed_message_ids(user_id, &ids).await?.is_empty())
    }

    /// Subset of `message_ids` already known in either collection.
    pub async fn existing_message_ids(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> Result<HashSet<String>> {
        let mut known = self.store.inbox_message_ids(user_id, message_ids).await?;
        known.extend(self.store.processed_message_ids(user_id, message_ids).await?);
        Ok(known)
    }

    /// Inserts candidates chunk by chunk, skipping any whose key already exists.
    ///
    /// A failing chunk is logged and skipped; later chunks still run. Callers
    /// must read `inserted` rather than assume every candidate was written.
    pub async fn insert_batch(&self, candidates: Vec<NewInboxRecord>) -> BatchInsertReport {
        let mut report = BatchInsertReport::default();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let total_chunks = candidates.len().div_ceil(self.chunk_size);

        for (index, chunk) in candidates.chunks(self.chunk_size).enumerate() {
            match self.insert_chunk(chunk, &mut seen).await {
                Ok((inserted, skipped)) => {
                    report.skipped_existing += skipped;
                    report.inserted += inserted.len();
                    report.inserted_message_ids.extend(inserted);
                }
                Err(e) => {
                    warn!(
                        "Inbox chunk {}/{} ({} records) failed, continuing: {}",
                        index + 1,
                        total_chunks,
                        chunk.len(),
                        e
                    );
                    report.failed_chunks += 1;
                    report.failed_records += chunk.len();
                }
            }
        }

        info!(
            "Inserted {} of {} candidates ({} already known, {} failed chunks)",
            report.inserted,
            candidates.len(),
            report.skipped_existing,
            report.failed_chunks
        );
        report
    }

    /// Filters and writes one chunk. Returns the inserted message ids and the
    /// number of skipped candidates.
    async fn insert_chunk(
        &self,
        chunk: &[NewInboxRecord],
        seen: &mut HashSet<(String, String)>,
    ) -> Result<(Vec<String>, usize)> {
        let mut by_user: HashMap<&str, Vec<String>> = HashMap::new();
        for candidate in chunk {
            by_user
                .entry(candidate.user_id.as_str())
                .or_default()
                .push(candidate.message_id.clone());
        }

        let mut known: HashSet<(String, String)> = HashSet::new();
        for (user_id, message_ids) in &by_user {
            for message_id in self.existing_message_ids(user_id, message_ids).await? {
                known.insert((user_id.to_string(), message_id));
            }
        }

        let now = Utc::now();
        let mut fresh = Vec::with_capacity(chunk.len());
        let mut pending_keys = Vec::with_capacity(chunk.len());
        let mut skipped = 0;
        for candidate in chunk {
            let key = (candidate.user_id.clone(), candidate.message_id.clone());
            if known.contains(&key) || seen.contains(&key) || pending_keys.contains(&key) {
                debug!(
                    "Skipping known message '{}' for user '{}'",
                    candidate.message_id, candidate.user_id
                );
                skipped += 1;
                continue;
            }
            pending_keys.push(key);
            fresh.push(InboxRecord::from_new(candidate.clone(), now));
        }

        if fresh.is_empty() {
            return Ok((Vec::new(), skipped));
        }

        self.store.insert_inbox(&fresh).await?;
        seen.extend(pending_keys);
        Ok((fresh.into_iter().map(|r| r.message_id).collect(), skipped))
    }

    /// Read path used before archival.
    pub async fn get_by_message_ids(
        &self,
        message_ids: &[String],
        user_id: &str,
    ) -> Result<Vec<InboxRecord>> {
        self.store.inbox_by_message_ids(user_id, message_ids).await
    }
}
