//! Content classification of ingested messages.
//!
//! Classification itself is a black box behind [`Classifier`]. The
//! [`InboxProcessor`] seam turns pending inbox records into archival
//! verdicts; [`ClassifyingProcessor`] is the default implementation.

pub mod http;
pub mod processor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::models::{InboxRecord, ProcessingResult};
use crate::resilience::DependencyError;

pub use http::HttpClassifier;
pub use processor::ClassifyingProcessor;

/// What the classifier is shown for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRequest {
    pub message_id: String,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub text: Option<String>,
}

impl From<&InboxRecord> for ClassificationRequest {
    fn from(record: &InboxRecord) -> Self {
        Self {
            message_id: record.message_id.clone(),
            subject: record.subject.clone(),
            from: record.from_address.clone(),
            text: record.text_body.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Buy/sell confirmation.
    Trade,
    Dividend,
    /// Fees and other charges.
    Expense,
    Statement,
    Marketing,
    Other,
}

impl Category {
    /// Categories that lead to a bookkeeping entry.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Category::Trade | Category::Dividend | Category::Expense)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub confidence: f64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

impl Classification {
    /// Maps the classification onto a processing result.
    pub fn verdict(&self, auto_archive_confidence: f64) -> ProcessingResult {
        match self.category {
            Category::Trade | Category::Dividend => ProcessingResult::Approved,
            Category::Expense => ProcessingResult::Expense,
            _ if self.confidence >= auto_archive_confidence => ProcessingResult::AutoArchived,
            _ => ProcessingResult::Rejected,
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<Classification, DependencyError>;
}

/// A terminal decision for one inbox record.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub inbox_id: String,
    pub message_id: String,
    pub result: ProcessingResult,
    pub notes: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProcessingReport {
    pub verdicts: Vec<Verdict>,
    /// Records marked `error` by a fatal failure.
    pub errored: usize,
    /// Records returned to `pending` for a later cycle.
    pub deferred: usize,
}

/// Turns inbox records into verdicts. Records without a verdict stay in the inbox.
#[async_trait]
pub trait InboxProcessor: Send + Sync {
    async fn process(
        &self,
        records: Vec<InboxRecord>,
        cancel: &CancellationToken,
    ) -> ProcessingReport;
}

/// Leaves every record pending, for deployments without a classifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualProcessor;

#[async_trait]
impl InboxProcessor for ManualProcessor {
    async fn process(
        &self,
        records: Vec<InboxRecord>,
        _cancel: &CancellationToken,
    ) -> ProcessingReport {
        ProcessingReport {
            deferred: records.len(),
            ..ProcessingReport::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification(category: Category, confidence: f64) -> Classification {
        Classification {
            category,
            confidence,
            notes: None,
            transaction_id: None,
        }
    }

    #[test]
    fn test_actionable_categories_map_directly() {
        assert_eq!(
            classification(Category::Trade, 0.2).verdict(0.9),
            ProcessingResult::Approved
        );
        assert_eq!(
            classification(Category::Dividend, 0.99).verdict(0.9),
            ProcessingResult::Approved
        );
        assert_eq!(
            classification(Category::Expense, 0.99).verdict(0.9),
            ProcessingResult::Expense
        );
    }

    #[test]
    fn test_confident_noise_is_auto_archived() {
        assert_eq!(
            classification(Category::Marketing, 0.95).verdict(0.9),
            ProcessingResult::AutoArchived
        );
        assert_eq!(
            classification(Category::Statement, 0.9).verdict(0.9),
            ProcessingResult::AutoArchived
        );
        assert_eq!(
            classification(Category::Other, 0.5).verdict(0.9),
            ProcessingResult::Rejected
        );
    }

    #[test]
    fn test_classification_from_json() {
        let parsed: Classification =
            serde_json::from_str(r#"{"category": "trade", "confidence": 0.97}"#).unwrap();
        assert_eq!(parsed.category, Category::Trade);
        assert!(parsed.notes.is_none());
    }
}
