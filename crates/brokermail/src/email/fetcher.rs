//! Bounded polling fetches over a [`Mailbox`].

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};

use super::error::Result;
use super::parser::{parse_message, RawMessage};
use super::{Mailbox, SearchCriteria};

/// Where a set of UIDs lives. A UID only identifies a message within one
/// folder under one UIDVALIDITY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxPosition {
    pub folder: String,
    pub uid_validity: u32,
}

/// Every UID matching the search criteria.
#[derive(Debug)]
pub struct SearchOutcome {
    pub position: MailboxPosition,
    pub uids: Vec<u32>,
}

/// What one fetch produced.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Parsed messages, newest first.
    pub messages: Vec<RawMessage>,
    /// Messages that could not be fetched or parsed.
    pub skipped: usize,
    /// Candidates left for a later cycle by the fetch window.
    pub remaining: usize,
}

/// Owns the mailbox connection across cycles.
///
/// Does no dedup and no storage; the orchestrator decides which UIDs are
/// worth fetching and what to keep.
pub struct MailFetcher {
    mailbox: Box<dyn Mailbox>,
    criteria: SearchCriteria,
    max_messages: usize,
}

impl MailFetcher {
    pub fn new(mailbox: Box<dyn Mailbox>, criteria: SearchCriteria, max_messages: usize) -> Self {
        Self {
            mailbox,
            criteria,
            max_messages: max_messages.max(1),
        }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Connects if needed and lists every UID matching the criteria.
    ///
    /// A connection-level error drops the session so the next call reconnects.
    pub async fn search(&mut self) -> Result<SearchOutcome> {
        let span = info_span!("mail_search", folder = %self.mailbox.folder());
        let result = self.search_inner().instrument(span).await;
        if let Err(e) = &result {
            warn!("Mailbox search failed: {}", e);
            self.mailbox.invalidate();
        }
        result
    }

    async fn search_inner(&mut self) -> Result<SearchOutcome> {
        self.mailbox.connect().await?;

        let mut uids = self.mailbox.search(&self.criteria).await?;
        uids.sort_unstable();
        uids.dedup();
        debug!("{} messages match {:?}", uids.len(), self.criteria);

        Ok(SearchOutcome {
            position: MailboxPosition {
                folder: self.mailbox.folder().to_string(),
                uid_validity: self.mailbox.uid_validity().unwrap_or(0),
            },
            uids,
        })
    }

    /// Fetches up to `max_messages` of the newest `uids`. Callers pass only
    /// UIDs they have not ingested yet, so older ones are reached on later
    /// cycles.
    pub async fn fetch(&mut self, uids: &[u32]) -> Result<FetchOutcome> {
        let span = info_span!("mail_fetch", candidates = uids.len(), max = self.max_messages);
        let result = self.fetch_inner(uids).instrument(span).await;
        if let Err(e) = &result {
            warn!("Mailbox fetch failed: {}", e);
            self.mailbox.invalidate();
        }
        result
    }

    async fn fetch_inner(&mut self, uids: &[u32]) -> Result<FetchOutcome> {
        if uids.is_empty() {
            return Ok(FetchOutcome::default());
        }

        // Highest UIDs are the newest.
        let mut window = uids.to_vec();
        window.sort_unstable_by(|a, b| b.cmp(a));
        window.dedup();
        let remaining = window.len().saturating_sub(self.max_messages);
        window.truncate(self.max_messages);

        self.mailbox.connect().await?;
        let fetched = self.mailbox.fetch(&window).await?;
        let uid_validity = self.mailbox.uid_validity();
        let fetched_at = Utc::now();

        let mut outcome = FetchOutcome {
            remaining,
            ..FetchOutcome::default()
        };
        for item in fetched {
            match item.and_then(|m| parse_message(&m, uid_validity, fetched_at)) {
                Ok(message) => outcome.messages.push(message),
                Err(e) if e.is_connection_error() => return Err(e),
                Err(e) => {
                    warn!("Skipping message: {}", e);
                    outcome.skipped += 1;
                }
            }
        }
        outcome.messages.sort_by(|a, b| b.uid.cmp(&a.uid));

        info!(
            "Fetched {} messages ({} skipped, {} left for later cycles)",
            outcome.messages.len(),
            outcome.skipped,
            outcome.remaining
        );
        Ok(outcome)
    }

    /// Moves or flags messages remotely. Connection errors drop the session.
    pub async fn archive(&mut self, uids: &[u32], destination: Option<&str>) -> Result<()> {
        let result = self.mailbox.move_or_flag(uids, destination).await;
        if matches!(&result, Err(e) if e.is_connection_error()) {
            self.mailbox.invalidate();
        }
        result
    }

    pub fn is_connected(&self) -> bool {
        self.mailbox.is_connected()
    }

    /// Logs out, if connected.
    pub async fn close(&mut self) {
        if let Err(e) = self.mailbox.disconnect().await {
            warn!("Error while disconnecting from mailbox: {}", e);
        }
    }
}
