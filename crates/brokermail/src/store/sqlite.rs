//! SQLite-backed record store.
//!
//! rusqlite is synchronous, so every call runs on the blocking pool with a
//! clone of the [`Database`] handle.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;

use crate::db::{inbox_repo, processed_repo, uid_repo, Database, DatabaseError};
use crate::models::{InboxRecord, ProcessedRecord, ProcessingResult, RecordStatus};

use super::{RecordStore, Result, StoreError};

/// [`RecordStore`] over the local SQLite database.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Database,
}

impl SqliteRecordStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Database) -> std::result::Result<T, DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let value = tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StoreError::Unavailable(format!("database task failed: {}", e)))??;
        Ok(value)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn inbox_message_ids(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> Result<HashSet<String>> {
        let (user_id, message_ids) = (user_id.to_string(), message_ids.to_vec());
        let found = self
            .run(move |db| inbox_repo::find_existing_message_ids(db, &user_id, &message_ids))
            .await?;
        Ok(found.into_iter().collect())
    }

    async fn processed_message_ids(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> Result<HashSet<String>> {
        let (user_id, message_ids) = (user_id.to_string(), message_ids.to_vec());
        let found = self
            .run(move |db| processed_repo::find_existing_message_ids(db, &user_id, &message_ids))
            .await?;
        Ok(found.into_iter().collect())
    }

    async fn insert_inbox(&self, records: &[InboxRecord]) -> Result<usize> {
        let records = records.to_vec();
        self.run(move |db| inbox_repo::insert_chunk(db, &records)).await
    }

    async fn inbox_by_message_ids(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<InboxRecord>> {
        let (user_id, message_ids) = (user_id.to_string(), message_ids.to_vec());
        self.run(move |db| inbox_repo::find_by_message_ids(db, &user_id, &message_ids))
            .await
    }

    async fn list_inbox(
        &self,
        user_id: &str,
        status: Option<RecordStatus>,
    ) -> Result<Vec<InboxRecord>> {
        let user_id = user_id.to_string();
        self.run(move |db| inbox_repo::list(db, &user_id, status)).await
    }

    async fn update_inbox_status(
        &self,
        id: &str,
        status: RecordStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let id = id.to_string();
        let error_message = error_message.map(str::to_string);
        self.run(move |db| {
            inbox_repo::update_status(db, &id, status, error_message.as_deref(), Utc::now())
        })
        .await
    }

    async fn requeue_errored(&self, user_id: &str) -> Result<usize> {
        let user_id = user_id.to_string();
        self.run(move |db| inbox_repo::requeue_errored(db, &user_id, Utc::now()))
            .await
    }

    async fn delete_inbox(&self, ids: &[String]) -> Result<usize> {
        let ids = ids.to_vec();
        self.run(move |db| inbox_repo::delete_by_ids(db, &ids)).await
    }

    async fn inbox_ids_already_processed(&self, user_id: &str) -> Result<Vec<String>> {
        let user_id = user_id.to_string();
        self.run(move |db| inbox_repo::find_archived_duplicates(db, &user_id))
            .await
    }

    async fn insert_processed(&self, records: &[ProcessedRecord]) -> Result<usize> {
        let records = records.to_vec();
        self.run(move |db| processed_repo::insert_chunk(db, &records)).await
    }

    async fn processed_by_message_ids(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<ProcessedRecord>> {
        let (user_id, message_ids) = (user_id.to_string(), message_ids.to_vec());
        self.run(move |db| processed_repo::find_by_message_ids(db, &user_id, &message_ids))
            .await
    }

    async fn update_processed_review(
        &self,
        id: &str,
        result: ProcessingResult,
        notes: Option<&str>,
    ) -> Result<bool> {
        let id = id.to_string();
        let notes = notes.map(str::to_string);
        self.run(move |db| {
            processed_repo::update_review(db, &id, result, notes.as_deref(), Utc::now())
        })
        .await
    }

    async fn count_inbox(&self, user_id: &str) -> Result<u64> {
        let user_id = user_id.to_string();
        self.run(move |db| inbox_repo::count(db, &user_id)).await
    }

    async fn count_processed(&self, user_id: &str) -> Result<u64> {
        let user_id = user_id.to_string();
        self.run(move |db| processed_repo::count(db, &user_id)).await
    }

    async fn known_uids(
        &self,
        user_id: &str,
        folder: &str,
        uid_validity: u32,
        uids: &[u32],
    ) -> Result<HashSet<u32>> {
        let (user_id, folder, uids) = (user_id.to_string(), folder.to_string(), uids.to_vec());
        self.run(move |db| uid_repo::find_known(db, &user_id, &folder, uid_validity, &uids))
            .await
    }

    async fn mark_uids_seen(
        &self,
        user_id: &str,
        folder: &str,
        uid_validity: u32,
        entries: &[(u32, String)],
    ) -> Result<usize> {
        let (user_id, folder, entries) =
            (user_id.to_string(), folder.to_string(), entries.to_vec());
        self.run(move |db| {
            uid_repo::mark_seen(db, &user_id, &folder, uid_validity, &entries, Utc::now())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewInboxRecord;

    #[tokio::test]
    async fn test_already_processed_detects_cross_store_duplicate() {
        let store = SqliteRecordStore::new(Database::open_in_memory().unwrap());
        let inbox = InboxRecord::from_new(NewInboxRecord::new("u1", "m1"), Utc::now());
        let other = InboxRecord::from_new(NewInboxRecord::new("u1", "m2"), Utc::now());
        store.insert_inbox(&[inbox.clone(), other]).await.unwrap();

        let processed = ProcessedRecord::from_inbox(
            inbox.clone(),
            ProcessingResult::Expense,
            None,
            None,
            Utc::now(),
        );
        store.insert_processed(&[processed]).await.unwrap();

        let stale = store.inbox_ids_already_processed("u1").await.unwrap();
        assert_eq!(stale, vec![inbox.id]);
        assert!(store.inbox_ids_already_processed("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_counts() {
        let store = SqliteRecordStore::new(Database::open_in_memory().unwrap());
        let inbox = InboxRecord::from_new(NewInboxRecord::new("u1", "m1"), Utc::now());
        store.insert_inbox(std::slice::from_ref(&inbox)).await.unwrap();

        assert_eq!(store.count_inbox("u1").await.unwrap(), 1);
        assert_eq!(store.count_processed("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_uid_ledger_round_trip() {
        let store = SqliteRecordStore::new(Database::open_in_memory().unwrap());
        let seen = vec![(3, "m3".to_string()), (4, "m4".to_string())];
        assert_eq!(store.mark_uids_seen("u1", "INBOX", 1, &seen).await.unwrap(), 2);

        let known = store.known_uids("u1", "INBOX", 1, &[2, 3, 4]).await.unwrap();
        assert_eq!(known, HashSet::from([3, 4]));
        assert!(store.known_uids("u1", "INBOX", 2, &[3]).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writes_from_several_tasks() {
        let store = SqliteRecordStore::new(Database::open_in_memory().unwrap());

        let mut handles = Vec::new();
        for i in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let record =
                    InboxRecord::from_new(NewInboxRecord::new("u1", format!("m{}", i)), Utc::now());
                store.insert_inbox(&[record]).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }

        assert_eq!(store.count_inbox("u1").await.unwrap(), 4);
    }
}
