//! Mailbox access: connection lifecycle, bounded fetches and message parsing.
//!
//! The [`Mailbox`] trait is the seam between the sync pipeline and a concrete
//! protocol. [`ImapMailbox`] is the production implementation; tests use
//! scripted fakes.

pub mod client;
pub mod error;
pub mod fetcher;
pub mod parser;

use async_trait::async_trait;
use chrono::NaiveDate;

pub use client::ImapMailbox;
pub use error::EmailError;
pub use fetcher::{FetchOutcome, MailFetcher, MailboxPosition, SearchOutcome};
pub use parser::{parse_message, RawMessage};

use error::Result;

/// Which messages a search should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    All,
    Since(NaiveDate),
}

impl SearchCriteria {
    /// IMAP `SEARCH` key for these criteria (dates as `01-Jan-2024`).
    pub fn to_imap_query(&self) -> String {
        match self {
            SearchCriteria::All => "ALL".to_string(),
            SearchCriteria::Since(date) => format!("SINCE {}", date.format("%d-%b-%Y")),
        }
    }
}

/// A message body as returned by the server, before parsing.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub uid: u32,
    pub raw: Vec<u8>,
}

/// The mailbox operations the sync pipeline needs.
///
/// Outer errors are connection-level; [`Mailbox::fetch`] reports per-message
/// failures inside the returned vector.
#[async_trait]
pub trait Mailbox: Send {
    /// Connects and opens the configured folder. No-op when already connected.
    async fn connect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// The folder searched and fetched from.
    fn folder(&self) -> &str;

    /// UIDVALIDITY of the open folder, if known.
    fn uid_validity(&self) -> Option<u32>;

    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>>;

    async fn fetch(&mut self, uids: &[u32]) -> Result<Vec<Result<FetchedMessage>>>;

    /// Moves messages to `destination`, or marks them seen when there is none.
    async fn move_or_flag(&mut self, uids: &[u32], destination: Option<&str>) -> Result<()>;

    /// Logs out and drops the session.
    async fn disconnect(&mut self) -> Result<()>;

    /// Drops the session without talking to the server.
    fn invalidate(&mut self);
}
