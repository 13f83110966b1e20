//! Default [`InboxProcessor`]: classify each record through a guarded dependency.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{InboxRecord, RecordStatus};
use crate::resilience::GuardedDependency;
use crate::store::RecordStore;

use super::{ClassificationRequest, Classifier, InboxProcessor, ProcessingReport, Verdict};

pub struct ClassifyingProcessor {
    classifier: Arc<dyn Classifier>,
    dependency: GuardedDependency,
    store: Arc<dyn RecordStore>,
    auto_archive_confidence: f64,
}

impl ClassifyingProcessor {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        dependency: GuardedDependency,
        store: Arc<dyn RecordStore>,
        auto_archive_confidence: f64,
    ) -> Self {
        Self {
            classifier,
            dependency,
            store,
            auto_archive_confidence,
        }
    }

    pub fn dependency(&self) -> &GuardedDependency {
        &self.dependency
    }

    async fn set_status(&self, record: &InboxRecord, status: RecordStatus, error: Option<&str>) {
        if let Err(e) = self.store.update_inbox_status(&record.id, status, error).await {
            warn!(
                "Could not mark '{}' as {}: {}",
                record.message_id, status, e
            );
        }
    }
}

#[async_trait]
impl InboxProcessor for ClassifyingProcessor {
    async fn process(
        &self,
        records: Vec<InboxRecord>,
        cancel: &CancellationToken,
    ) -> ProcessingReport {
        let mut report = ProcessingReport::default();
        let total = records.len();

        for (index, record) in records.into_iter().enumerate() {
            if cancel.is_cancelled() {
                report.deferred += total - index;
                break;
            }

            self.set_status(&record, RecordStatus::Processing, None).await;

            let request = ClassificationRequest::from(&record);
            let outcome = self
                .dependency
                .call(cancel, || {
                    let classifier = Arc::clone(&self.classifier);
                    let request = request.clone();
                    async move { classifier.classify(&request).await }
                })
                .await;

            match outcome {
                Ok(classification) => {
                    let result = classification.verdict(self.auto_archive_confidence);
                    debug!(
                        "'{}' classified as {:?} ({:.2}) -> {}",
                        record.message_id, classification.category, classification.confidence, result
                    );
                    report.verdicts.push(Verdict {
                        inbox_id: record.id,
                        message_id: record.message_id,
                        result,
                        notes: classification.notes,
                        transaction_id: classification.transaction_id,
                    });
                }
                Err(e) if e.is_unavailable() || e.is_aborted() || e.is_retryable() => {
                    debug!("Deferring '{}': {}", record.message_id, e);
                    self.set_status(&record, RecordStatus::Pending, None).await;
                    report.deferred += 1;
                }
                Err(e) => {
                    warn!("Classification of '{}' failed: {}", record.message_id, e);
                    self.set_status(&record, RecordStatus::Error, Some(&e.to_string()))
                        .await;
                    report.errored += 1;
                }
            }
        }

        info!(
            "Processed {} records: {} verdicts, {} deferred, {} errors",
            total,
            report.verdicts.len(),
            report.deferred,
            report.errored
        );
        report
    }
}
