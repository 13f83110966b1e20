//! One poll cycle: reconcile, retry deferred moves, fetch, insert, process, archive.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::archive::{ArchivalMover, ArchiveBatch, BatchState};
use crate::classify::{
    ClassifyingProcessor, HttpClassifier, InboxProcessor, ManualProcessor, Verdict,
};
use crate::config::SyncConfig;
use crate::email::{FetchOutcome, ImapMailbox, MailFetcher, MailboxPosition, SearchOutcome};
use crate::error::{ConfigError, Result};
use crate::models::{InboxRecord, RecordStatus};
use crate::resilience::GuardedDependency;
use crate::store::{RecordStore, TwoStageStore};

/// Counters for one cycle. A cycle never fails; problems are counted here.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    /// Inbox rows removed because their key was already archived.
    pub reconciled: usize,
    pub deferred_retried: usize,
    pub deferred_moved: usize,
    /// Matching UIDs skipped because they were ingested in an earlier cycle.
    pub already_seen: usize,
    pub fetched: usize,
    pub fetch_skipped: usize,
    /// Unseen UIDs left for later cycles by the fetch window.
    pub fetch_backlog: usize,
    pub inserted: usize,
    pub already_known: usize,
    pub failed_chunks: usize,
    pub remote_archived: usize,
    pub remote_archive_failed: bool,
    pub verdicts: usize,
    pub processing_errors: usize,
    pub processing_deferred: usize,
    pub archived: usize,
    /// Batches kept for the next cycle.
    pub archive_failures: usize,
    pub store_errors: usize,
    /// Set when the mailbox connection failed and the cycle ended early.
    pub connection_error: Option<String>,
}

impl CycleReport {
    pub fn completed(&self) -> bool {
        self.connection_error.is_none()
    }
}

/// Remote handling of fetched messages once they are stored.
#[derive(Debug, Clone, Default)]
pub struct RemoteArchive {
    pub enabled: bool,
    /// `None` marks messages seen instead of moving them.
    pub folder: Option<String>,
}

pub struct SyncOrchestrator {
    user_id: String,
    fetcher: MailFetcher,
    store: TwoStageStore,
    processor: Arc<dyn InboxProcessor>,
    mover: ArchivalMover,
    archive_chunk_size: usize,
    remote_archive: RemoteArchive,
    deferred: Vec<ArchiveBatch>,
}

impl SyncOrchestrator {
    pub fn new(
        user_id: impl Into<String>,
        fetcher: MailFetcher,
        store: TwoStageStore,
        processor: Arc<dyn InboxProcessor>,
        archive_chunk_size: usize,
        remote_archive: RemoteArchive,
    ) -> Self {
        let mover = ArchivalMover::new(Arc::clone(store.records()), archive_chunk_size);
        Self {
            user_id: user_id.into(),
            fetcher,
            store,
            processor,
            mover,
            archive_chunk_size: archive_chunk_size.max(1),
            remote_archive,
            deferred: Vec::new(),
        }
    }

    /// Wires the IMAP mailbox, the classifier (if configured) and the store
    /// from configuration. Must be called inside a tokio runtime.
    pub fn from_config(config: &SyncConfig, records: Arc<dyn RecordStore>) -> Result<Self> {
        let criteria = config.mailbox.search_criteria().map_err(|e| {
            ConfigError::invalid("mailbox.since_date", e.to_string())
        })?;
        let fetcher = MailFetcher::new(
            Box::new(ImapMailbox::new(config.mailbox.clone())),
            criteria,
            config.sync.max_messages_per_sync,
        );

        let processor: Arc<dyn InboxProcessor> = match &config.classifier {
            Some(classifier) => {
                let dependency = GuardedDependency::new(
                    "classifier",
                    config.circuit_breaker.breaker_config(),
                    config.queue.min_delay(),
                    config.retry.policy(),
                );
                Arc::new(ClassifyingProcessor::new(
                    Arc::new(HttpClassifier::from_config(classifier)?),
                    dependency,
                    Arc::clone(&records),
                    classifier.auto_archive_confidence,
                ))
            }
            None => {
                info!("No classifier configured; records stay pending for manual review");
                Arc::new(ManualProcessor)
            }
        };

        Ok(Self::new(
            config.user_id.clone(),
            fetcher,
            TwoStageStore::new(records, config.sync.chunk_size),
            processor,
            config.sync.archive_chunk_size,
            RemoteArchive {
                enabled: config.sync.archive_after_sync,
                folder: config.mailbox.archive_folder.clone(),
            },
        ))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn store(&self) -> &TwoStageStore {
        &self.store
    }

    /// Failed archival batches waiting for the next cycle.
    pub fn deferred_batches(&self) -> usize {
        self.deferred.len()
    }

    /// Runs one cycle. Only a mailbox connection failure ends it early.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleReport {
        let span = info_span!("sync_cycle", user = %self.user_id);
        self.cycle(cancel).instrument(span).await
    }

    async fn cycle(&mut self, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();

        match self.mover.reconcile(&self.user_id).await {
            Ok(removed) => report.reconciled = removed,
            Err(e) => {
                warn!("Reconciliation failed: {}", e);
                report.store_errors += 1;
            }
        }

        self.retry_deferred(&mut report).await;

        let search = match self.fetcher.search().await {
            Ok(search) => search,
            Err(e) => {
                error!("Cycle aborted, mailbox unavailable: {}", e);
                report.connection_error = Some(e.to_string());
                return report;
            }
        };
        let unseen = self.unseen_uids(&search, &mut report).await;

        let outcome = match self.fetcher.fetch(&unseen).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Cycle aborted, mailbox unavailable: {}", e);
                report.connection_error = Some(e.to_string());
                return report;
            }
        };
        report.fetched = outcome.messages.len();
        report.fetch_skipped = outcome.skipped;
        report.fetch_backlog = outcome.remaining;

        self.ingest(&search.position, outcome, &mut report).await;

        if cancel.is_cancelled() {
            info!("Shutdown requested, skipping processing");
            return report;
        }

        let verdicts = self.process(cancel, &mut report).await;
        self.archive(verdicts, &mut report).await;

        info!(
            "Cycle finished: {} fetched, {} inserted, {} archived, {} deferred batches",
            report.fetched,
            report.inserted,
            report.archived,
            self.deferred.len()
        );
        report
    }

    async fn retry_deferred(&mut self, report: &mut CycleReport) {
        if self.deferred.is_empty() {
            return;
        }

        let batches = std::mem::take(&mut self.deferred);
        for mut batch in batches {
            report.deferred_retried += 1;
            match self.mover.move_batch(&mut batch).await {
                Ok(moved) => report.deferred_moved += moved,
                Err(_) => {
                    report.store_errors += 1;
                    self.deferred.push(batch);
                }
            }
        }
    }

    /// Drops UIDs recorded by earlier cycles. Without the ledger every
    /// matching UID is a candidate; dedup still keeps the store clean.
    async fn unseen_uids(&self, search: &SearchOutcome, report: &mut CycleReport) -> Vec<u32> {
        if search.uids.is_empty() {
            return Vec::new();
        }

        let known = match self
            .store
            .records()
            .known_uids(
                &self.user_id,
                &search.position.folder,
                search.position.uid_validity,
                &search.uids,
            )
            .await
        {
            Ok(known) => known,
            Err(e) => {
                warn!("UID ledger lookup failed, considering every match: {}", e);
                report.store_errors += 1;
                return search.uids.clone();
            }
        };

        report.already_seen = known.len();
        search
            .uids
            .iter()
            .copied()
            .filter(|uid| !known.contains(uid))
            .collect()
    }

    async fn ingest(
        &mut self,
        position: &MailboxPosition,
        outcome: FetchOutcome,
        report: &mut CycleReport,
    ) {
        if outcome.messages.is_empty() {
            debug!("Nothing new in the mailbox");
            return;
        }

        let uids: Vec<(String, u32)> = outcome
            .messages
            .iter()
            .map(|m| (m.message_id.clone(), m.uid))
            .collect();
        let candidates = outcome
            .messages
            .into_iter()
            .map(|m| m.into_candidate(&self.user_id))
            .collect();

        let inserted = self.store.insert_batch(candidates).await;
        report.inserted = inserted.inserted;
        report.already_known = inserted.skipped_existing;
        report.failed_chunks = inserted.failed_chunks;

        // Only messages whose key made it into the store count as ingested.
        // Those lost with a failed chunk are fetched again next cycle.
        let ids: Vec<String> = uids.iter().map(|(id, _)| id.clone()).collect();
        let stored = match self.store.existing_message_ids(&self.user_id, &ids).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Could not confirm stored messages: {}", e);
                report.store_errors += 1;
                if self.remote_archive.enabled {
                    report.remote_archive_failed = true;
                }
                return;
            }
        };
        let stored: Vec<(u32, String)> = uids
            .into_iter()
            .filter(|(id, _)| stored.contains(id))
            .map(|(id, uid)| (uid, id))
            .collect();

        if let Err(e) = self
            .store
            .records()
            .mark_uids_seen(
                &self.user_id,
                &position.folder,
                position.uid_validity,
                &stored,
            )
            .await
        {
            warn!("Could not record ingested UIDs: {}", e);
            report.store_errors += 1;
        }

        if self.remote_archive.enabled {
            let safe: Vec<u32> = stored.iter().map(|(uid, _)| *uid).collect();
            self.archive_remote(&safe, report).await;
        }
    }

    /// Moves or flags messages whose key is stored.
    async fn archive_remote(&mut self, uids: &[u32], report: &mut CycleReport) {
        if uids.is_empty() {
            return;
        }

        match self
            .fetcher
            .archive(uids, self.remote_archive.folder.as_deref())
            .await
        {
            Ok(()) => report.remote_archived = uids.len(),
            Err(e) => {
                warn!("Remote archive of {} messages failed: {}", uids.len(), e);
                report.remote_archive_failed = true;
            }
        }
    }

    async fn process(&self, cancel: &CancellationToken, report: &mut CycleReport) -> Vec<Verdict> {
        let records = match self.open_records().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Could not load inbox records for processing: {}", e);
                report.store_errors += 1;
                return Vec::new();
            }
        };
        if records.is_empty() {
            return Vec::new();
        }

        let processed = self.processor.process(records, cancel).await;
        report.verdicts = processed.verdicts.len();
        report.processing_errors = processed.errored;
        report.processing_deferred = processed.deferred;
        processed.verdicts
    }

    /// Pending records plus any left `processing` by an interrupted cycle.
    /// Records already decided and waiting in a deferred batch are left out.
    async fn open_records(&self) -> crate::store::Result<Vec<InboxRecord>> {
        let records = self.store.records();
        let mut open = records
            .list_inbox(&self.user_id, Some(RecordStatus::Pending))
            .await?;
        open.extend(
            records
                .list_inbox(&self.user_id, Some(RecordStatus::Processing))
                .await?,
        );

        let deferred = self.deferred_message_ids();
        if !deferred.is_empty() {
            open.retain(|record| !deferred.contains(&record.message_id));
        }
        Ok(open)
    }

    fn deferred_message_ids(&self) -> HashSet<String> {
        self.deferred
            .iter()
            .flat_map(|batch| batch.verdicts.iter().map(|v| v.message_id.clone()))
            .collect()
    }

    async fn archive(&mut self, verdicts: Vec<Verdict>, report: &mut CycleReport) {
        let deferred = self.deferred_message_ids();
        let verdicts: Vec<Verdict> = verdicts
            .into_iter()
            .filter(|v| !deferred.contains(&v.message_id))
            .collect();

        for chunk in verdicts.chunks(self.archive_chunk_size) {
            let mut batch = ArchiveBatch::new(self.user_id.clone(), chunk.to_vec());
            match self.mover.move_batch(&mut batch).await {
                Ok(moved) => report.archived += moved,
                Err(_) => {
                    debug_assert_eq!(batch.state, BatchState::Failed);
                    report.archive_failures += 1;
                    self.deferred.push(batch);
                }
            }
        }
    }

    /// Closes the mailbox connection.
    pub async fn shutdown(&mut self) {
        self.fetcher.close().await;
    }
}
