//! Record types shared by the store, the archival mover and the sync cycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of a record that still lives in the inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Processing,
    Error,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Processing => "processing",
            RecordStatus::Error => "error",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecordStatus::Pending),
            "processing" => Ok(RecordStatus::Processing),
            "error" => Ok(RecordStatus::Error),
            other => Err(format!("unknown record status '{}'", other)),
        }
    }
}

/// Final outcome stamped on a record when it leaves the inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingResult {
    Approved,
    Rejected,
    AutoArchived,
    Expense,
}

impl ProcessingResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingResult::Approved => "approved",
            ProcessingResult::Rejected => "rejected",
            ProcessingResult::AutoArchived => "auto_archived",
            ProcessingResult::Expense => "expense",
        }
    }
}

impl fmt::Display for ProcessingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(ProcessingResult::Approved),
            "rejected" => Ok(ProcessingResult::Rejected),
            "auto_archived" => Ok(ProcessingResult::AutoArchived),
            "expense" => Ok(ProcessingResult::Expense),
            other => Err(format!("unknown processing result '{}'", other)),
        }
    }
}

/// A message as produced by the mail fetcher, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInboxRecord {
    pub user_id: String,
    /// Provider-assigned identifier. Opaque.
    pub message_id: String,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub raw_body: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub received_at: DateTime<Utc>,
    /// Mailbox UID the message was fetched under, used for remote archiving.
    pub mailbox_uid: Option<u32>,
}

impl NewInboxRecord {
    pub fn new(user_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            message_id: message_id.into(),
            thread_id: None,
            subject: None,
            from_address: None,
            to_address: None,
            raw_body: None,
            text_body: None,
            html_body: None,
            received_at: Utc::now(),
            mailbox_uid: None,
        }
    }

    pub fn dedup_key(&self) -> (&str, &str) {
        (&self.user_id, &self.message_id)
    }
}

/// One ingested message awaiting processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxRecord {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub raw_body: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub received_at: DateTime<Utc>,
    pub status: RecordStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InboxRecord {
    /// Materializes a candidate as a freshly inserted, pending record.
    pub fn from_new(new: NewInboxRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: new.user_id,
            message_id: new.message_id,
            thread_id: new.thread_id,
            subject: new.subject,
            from_address: new.from_address,
            to_address: new.to_address,
            raw_body: new.raw_body,
            text_body: new.text_body,
            html_body: new.html_body,
            received_at: new.received_at,
            status: RecordStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Archival copy of a record after it has left the inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub raw_body: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Audit back-reference to the inbox row this copy came from.
    pub original_inbox_id: String,
    pub processing_result: ProcessingResult,
    pub processed_at: DateTime<Utc>,
    pub processing_notes: Option<String>,
    pub transaction_id: Option<String>,
}

impl ProcessedRecord {
    pub fn from_inbox(
        inbox: InboxRecord,
        result: ProcessingResult,
        notes: Option<String>,
        transaction_id: Option<String>,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            original_inbox_id: inbox.id,
            user_id: inbox.user_id,
            message_id: inbox.message_id,
            thread_id: inbox.thread_id,
            subject: inbox.subject,
            from_address: inbox.from_address,
            to_address: inbox.to_address,
            raw_body: inbox.raw_body,
            text_body: inbox.text_body,
            html_body: inbox.html_body,
            received_at: inbox.received_at,
            created_at: inbox.created_at,
            updated_at: processed_at,
            processing_result: result,
            processed_at,
            processing_notes: notes,
            transaction_id,
        }
    }
}
