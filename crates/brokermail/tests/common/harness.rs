//! Test harness wiring a scripted mailbox and an in-memory store into a
//! `SyncOrchestrator`.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use brokermail::classify::InboxProcessor;
use brokermail::email::{MailFetcher, SearchCriteria};
use brokermail::store::{RecordStore, TwoStageStore};
use brokermail::sync::{CycleReport, RemoteArchive, SyncOrchestrator};
use brokermail::Database;

use super::builders::confirmation;
use super::fakes::{FakeMailbox, FlakyStore, MailboxState, SharedMailbox};

pub const USER: &str = "user-1";

pub struct TestHarness {
    pub store: Arc<FlakyStore>,
    pub mailbox: SharedMailbox,
    pub chunk_size: usize,
    pub archive_chunk_size: usize,
    pub max_messages: usize,
    pub remote_archive: RemoteArchive,
}

impl TestHarness {
    pub fn new() -> Self {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        Self {
            store: Arc::new(FlakyStore::new(db)),
            mailbox: Arc::new(Mutex::new(MailboxState {
                uid_validity: 1,
                ..MailboxState::default()
            })),
            chunk_size: 10,
            archive_chunk_size: 10,
            max_messages: 50,
            remote_archive: RemoteArchive::default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_archive_chunk_size(mut self, chunk_size: usize) -> Self {
        self.archive_chunk_size = chunk_size;
        self
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    pub fn with_remote_archive(mut self, folder: Option<&str>) -> Self {
        self.remote_archive = RemoteArchive {
            enabled: true,
            folder: folder.map(str::to_string),
        };
        self
    }

    /// Puts a confirmation with `message_id` at `uid` in the mailbox.
    pub fn deliver(&self, uid: u32, message_id: &str) {
        self.mailbox.lock().unwrap().messages.insert(
            uid,
            confirmation(message_id, &format!("Trade confirmation {}", uid)),
        );
    }

    pub fn deliver_raw(&self, uid: u32, raw: &[u8]) {
        self.mailbox.lock().unwrap().messages.insert(uid, raw.to_vec());
    }

    pub fn mailbox_state(&self) -> std::sync::MutexGuard<'_, MailboxState> {
        self.mailbox.lock().unwrap()
    }

    pub fn records(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    pub fn fetcher(&self) -> MailFetcher {
        MailFetcher::new(
            Box::new(FakeMailbox::new(Arc::clone(&self.mailbox))),
            SearchCriteria::All,
            self.max_messages,
        )
    }

    pub fn orchestrator(&self, processor: Arc<dyn InboxProcessor>) -> SyncOrchestrator {
        SyncOrchestrator::new(
            USER,
            self.fetcher(),
            TwoStageStore::new(self.records(), self.chunk_size),
            processor,
            self.archive_chunk_size,
            self.remote_archive.clone(),
        )
    }

    pub async fn inbox_count(&self) -> u64 {
        self.store.count_inbox(USER).await.unwrap()
    }

    pub async fn processed_count(&self) -> u64 {
        self.store.count_processed(USER).await.unwrap()
    }

    pub async fn inbox_message_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .store
            .list_inbox(USER, None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.message_id)
            .collect();
        ids.sort();
        ids
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one cycle with a fresh token.
pub async fn run_cycle(orchestrator: &mut SyncOrchestrator) -> CycleReport {
    orchestrator.run_cycle(&CancellationToken::new()).await
}
