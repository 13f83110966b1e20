//! Scripted stand-ins for the mailbox, the record store and the processor.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use brokermail::classify::{InboxProcessor, ProcessingReport, Verdict};
use brokermail::email::error::Result as EmailResult;
use brokermail::email::{EmailError, FetchedMessage, Mailbox, SearchCriteria};
use brokermail::models::{InboxRecord, ProcessedRecord, ProcessingResult, RecordStatus};
use brokermail::store::{RecordStore, Result as StoreResult, SqliteRecordStore, StoreError};
use brokermail::Database;

// ---------------------------------------------------------------------------
// Mailbox
// ---------------------------------------------------------------------------

/// Server-side state of a [`FakeMailbox`]. Tests keep a handle to it after the
/// mailbox has been moved into a fetcher.
#[derive(Debug, Default)]
pub struct MailboxState {
    pub messages: BTreeMap<u32, Vec<u8>>,
    pub uid_validity: u32,
    pub connected: bool,
    pub connects: usize,
    pub fail_connect: bool,
    pub fail_move: bool,
    /// UIDs whose fetch yields a per-message error.
    pub broken_uids: HashSet<u32>,
    /// Every `move_or_flag` call as `(uids, destination)`.
    pub archived: Vec<(Vec<u32>, Option<String>)>,
    pub seen: HashSet<u32>,
}

impl MailboxState {
    pub fn archived_uids(&self) -> Vec<u32> {
        let mut uids: Vec<u32> = self.archived.iter().flat_map(|(u, _)| u.clone()).collect();
        uids.sort_unstable();
        uids
    }
}

pub type SharedMailbox = Arc<Mutex<MailboxState>>;

pub struct FakeMailbox {
    state: SharedMailbox,
}

impl FakeMailbox {
    pub fn new(state: SharedMailbox) -> Self {
        Self { state }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn connect(&mut self) -> EmailResult<()> {
        let mut state = self.state();
        if state.connected {
            return Ok(());
        }
        if state.fail_connect {
            return Err(EmailError::ConnectionFailed("connection refused".to_string()));
        }
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn folder(&self) -> &str {
        "INBOX"
    }

    fn uid_validity(&self) -> Option<u32> {
        Some(self.state().uid_validity)
    }

    async fn search(&mut self, _criteria: &SearchCriteria) -> EmailResult<Vec<u32>> {
        let state = self.state();
        if !state.connected {
            return Err(EmailError::NotConnected);
        }
        Ok(state.messages.keys().copied().collect())
    }

    async fn fetch(&mut self, uids: &[u32]) -> EmailResult<Vec<EmailResult<FetchedMessage>>> {
        let state = self.state();
        if !state.connected {
            return Err(EmailError::NotConnected);
        }
        Ok(uids
            .iter()
            .filter_map(|uid| {
                let raw = state.messages.get(uid)?;
                if state.broken_uids.contains(uid) {
                    return Some(Err(EmailError::MessageError {
                        uid: *uid,
                        reason: "missing body".to_string(),
                    }));
                }
                Some(Ok(FetchedMessage {
                    uid: *uid,
                    raw: raw.clone(),
                }))
            })
            .collect())
    }

    async fn move_or_flag(&mut self, uids: &[u32], destination: Option<&str>) -> EmailResult<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(EmailError::NotConnected);
        }
        if state.fail_move {
            return Err(EmailError::ProtocolError("MOVE rejected".to_string()));
        }
        match destination {
            Some(_) => {
                for uid in uids {
                    state.messages.remove(uid);
                }
            }
            None => state.seen.extend(uids.iter().copied()),
        }
        state
            .archived
            .push((uids.to_vec(), destination.map(str::to_string)));
        Ok(())
    }

    async fn disconnect(&mut self) -> EmailResult<()> {
        self.state().connected = false;
        Ok(())
    }

    fn invalidate(&mut self) {
        self.state().connected = false;
    }
}

// ---------------------------------------------------------------------------
// Record store
// ---------------------------------------------------------------------------

/// A SQLite-backed store with switchable write failures.
pub struct FlakyStore {
    inner: SqliteRecordStore,
    inbox_inserts: AtomicUsize,
    /// 1-based `insert_inbox` calls that fail.
    failing_inbox_inserts: Mutex<HashSet<usize>>,
    pub fail_processed_insert: AtomicBool,
    pub fail_inbox_delete: AtomicBool,
    pub fail_uid_lookup: AtomicBool,
}

impl FlakyStore {
    pub fn new(db: Database) -> Self {
        Self {
            inner: SqliteRecordStore::new(db),
            inbox_inserts: AtomicUsize::new(0),
            failing_inbox_inserts: Mutex::new(HashSet::new()),
            fail_processed_insert: AtomicBool::new(false),
            fail_inbox_delete: AtomicBool::new(false),
            fail_uid_lookup: AtomicBool::new(false),
        }
    }

    pub fn fail_inbox_insert_call(&self, call: usize) {
        self.failing_inbox_inserts.lock().unwrap().insert(call);
    }

    pub fn set_fail_processed_insert(&self, fail: bool) {
        self.fail_processed_insert.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_inbox_delete(&self, fail: bool) {
        self.fail_inbox_delete.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_uid_lookup(&self, fail: bool) {
        self.fail_uid_lookup.store(fail, Ordering::SeqCst);
    }

    pub fn clear_faults(&self) {
        self.failing_inbox_inserts.lock().unwrap().clear();
        self.set_fail_processed_insert(false);
        self.set_fail_inbox_delete(false);
        self.set_fail_uid_lookup(false);
    }
}

fn injected(operation: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {} failure", operation))
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn inbox_message_ids(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> StoreResult<HashSet<String>> {
        self.inner.inbox_message_ids(user_id, message_ids).await
    }

    async fn processed_message_ids(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> StoreResult<HashSet<String>> {
        self.inner.processed_message_ids(user_id, message_ids).await
    }

    async fn insert_inbox(&self, records: &[InboxRecord]) -> StoreResult<usize> {
        let call = self.inbox_inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_inbox_inserts.lock().unwrap().contains(&call) {
            return Err(injected("inbox insert"));
        }
        self.inner.insert_inbox(records).await
    }

    async fn inbox_by_message_ids(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> StoreResult<Vec<InboxRecord>> {
        self.inner.inbox_by_message_ids(user_id, message_ids).await
    }

    async fn list_inbox(
        &self,
        user_id: &str,
        status: Option<RecordStatus>,
    ) -> StoreResult<Vec<InboxRecord>> {
        self.inner.list_inbox(user_id, status).await
    }

    async fn update_inbox_status(
        &self,
        id: &str,
        status: RecordStatus,
        error_message: Option<&str>,
    ) -> StoreResult<bool> {
        self.inner.update_inbox_status(id, status, error_message).await
    }

    async fn requeue_errored(&self, user_id: &str) -> StoreResult<usize> {
        self.inner.requeue_errored(user_id).await
    }

    async fn delete_inbox(&self, ids: &[String]) -> StoreResult<usize> {
        if self.fail_inbox_delete.load(Ordering::SeqCst) {
            return Err(injected("inbox delete"));
        }
        self.inner.delete_inbox(ids).await
    }

    async fn inbox_ids_already_processed(&self, user_id: &str) -> StoreResult<Vec<String>> {
        self.inner.inbox_ids_already_processed(user_id).await
    }

    async fn insert_processed(&self, records: &[ProcessedRecord]) -> StoreResult<usize> {
        if self.fail_processed_insert.load(Ordering::SeqCst) {
            return Err(injected("processed insert"));
        }
        self.inner.insert_processed(records).await
    }

    async fn processed_by_message_ids(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> StoreResult<Vec<ProcessedRecord>> {
        self.inner.processed_by_message_ids(user_id, message_ids).await
    }

    async fn update_processed_review(
        &self,
        id: &str,
        result: ProcessingResult,
        notes: Option<&str>,
    ) -> StoreResult<bool> {
        self.inner.update_processed_review(id, result, notes).await
    }

    async fn count_inbox(&self, user_id: &str) -> StoreResult<u64> {
        self.inner.count_inbox(user_id).await
    }

    async fn count_processed(&self, user_id: &str) -> StoreResult<u64> {
        self.inner.count_processed(user_id).await
    }

    async fn known_uids(
        &self,
        user_id: &str,
        folder: &str,
        uid_validity: u32,
        uids: &[u32],
    ) -> StoreResult<HashSet<u32>> {
        if self.fail_uid_lookup.load(Ordering::SeqCst) {
            return Err(injected("uid lookup"));
        }
        self.inner
            .known_uids(user_id, folder, uid_validity, uids)
            .await
    }

    async fn mark_uids_seen(
        &self,
        user_id: &str,
        folder: &str,
        uid_validity: u32,
        entries: &[(u32, String)],
    ) -> StoreResult<usize> {
        self.inner
            .mark_uids_seen(user_id, folder, uid_validity, entries)
            .await
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Returns a fixed verdict for scripted message ids and defers the rest.
#[derive(Default)]
pub struct ScriptedProcessor {
    outcomes: HashMap<String, ProcessingResult>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, message_id: &str, result: ProcessingResult) -> Self {
        self.outcomes.insert(message_id.to_string(), result);
        self
    }

    /// Message ids handed to `process`, across all calls.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl InboxProcessor for ScriptedProcessor {
    async fn process(
        &self,
        records: Vec<InboxRecord>,
        _cancel: &CancellationToken,
    ) -> ProcessingReport {
        let mut report = ProcessingReport::default();
        let mut seen = self.seen.lock().unwrap();
        for record in records {
            seen.push(record.message_id.clone());
            match self.outcomes.get(&record.message_id) {
                Some(result) => report.verdicts.push(Verdict {
                    inbox_id: record.id,
                    message_id: record.message_id,
                    result: *result,
                    notes: None,
                    transaction_id: None,
                }),
                None => report.deferred += 1,
            }
        }
        report
    }
}
