//! Moving finished records from the inbox to the processed collection.
//!
//! A move is insert-then-delete: processed copies are written first, and
//! inbox rows are deleted by id only once every copy has been written. A
//! crash between the two steps leaves the key in both collections; the
//! reconciliation pass removes such inbox rows before the next cycle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};

use crate::classify::Verdict;
use crate::models::ProcessedRecord;
use crate::store::{RecordStore, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Moved,
    /// Not moved; retried on the next cycle.
    Failed,
}

/// Verdicts for one user, moved together.
#[derive(Debug, Clone)]
pub struct ArchiveBatch {
    pub user_id: String,
    pub verdicts: Vec<Verdict>,
    pub state: BatchState,
    pub attempts: u32,
}

impl ArchiveBatch {
    pub fn new(user_id: impl Into<String>, verdicts: Vec<Verdict>) -> Self {
        Self {
            user_id: user_id.into(),
            verdicts,
            state: BatchState::Pending,
            attempts: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }
}

pub struct ArchivalMover {
    store: Arc<dyn RecordStore>,
    chunk_size: usize,
}

impl ArchivalMover {
    pub fn new(store: Arc<dyn RecordStore>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Moves `batch` and updates its state. Returns the number of inbox rows
    /// removed.
    pub async fn move_batch(&self, batch: &mut ArchiveBatch) -> Result<usize> {
        batch.state = BatchState::Pending;
        batch.attempts += 1;

        match self.try_move(batch).await {
            Ok(moved) => {
                batch.state = BatchState::Moved;
                Ok(moved)
            }
            Err(e) => {
                warn!(
                    "Archival of {} records for '{}' failed (attempt {}): {}",
                    batch.len(),
                    batch.user_id,
                    batch.attempts,
                    e
                );
                batch.state = BatchState::Failed;
                Err(e)
            }
        }
    }

    async fn try_move(&self, batch: &ArchiveBatch) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let message_ids: Vec<String> = batch.verdicts.iter().map(|v| v.message_id.clone()).collect();
        let records = self
            .store
            .inbox_by_message_ids(&batch.user_id, &message_ids)
            .await?;
        if records.len() < message_ids.len() {
            debug!(
                "{} of {} records already left the inbox",
                message_ids.len() - records.len(),
                message_ids.len()
            );
        }

        let verdicts: HashMap<&str, &Verdict> = batch
            .verdicts
            .iter()
            .map(|v| (v.message_id.as_str(), v))
            .collect();
        let processed_at = Utc::now();
        let processed: Vec<ProcessedRecord> = records
            .into_iter()
            .filter_map(|record| {
                let verdict = verdicts.get(record.message_id.as_str())?;
                Some(ProcessedRecord::from_inbox(
                    record,
                    verdict.result,
                    verdict.notes.clone(),
                    verdict.transaction_id.clone(),
                    processed_at,
                ))
            })
            .collect();

        for chunk in processed.chunks(self.chunk_size) {
            self.store.insert_processed(chunk).await?;
        }

        // Every processed copy exists now; only then may inbox rows go.
        let inbox_ids: Vec<String> = processed
            .iter()
            .map(|p| p.original_inbox_id.clone())
            .collect();
        let mut deleted = 0;
        for chunk in inbox_ids.chunks(self.chunk_size) {
            deleted += self.store.delete_inbox(chunk).await?;
        }

        info!(
            "Archived {} records for '{}'",
            deleted, batch.user_id
        );
        Ok(deleted)
    }

    /// Deletes inbox rows whose key already exists in the processed
    /// collection. Safe to run any number of times.
    pub async fn reconcile(&self, user_id: &str) -> Result<usize> {
        let stale = self.store.inbox_ids_already_processed(user_id).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        for chunk in stale.chunks(self.chunk_size) {
            removed += self.store.delete_inbox(chunk).await?;
        }
        info!(
            "Reconciliation removed {} inbox records already archived for '{}'",
            removed, user_id
        );
        Ok(removed)
    }
}
