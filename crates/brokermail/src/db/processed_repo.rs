//! Processed record repository: CRUD operations for the `processed_records` table.

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Row};

use crate::models::{ProcessedRecord, ProcessingResult};

use super::{decode_time, encode_time, placeholders, Database, DatabaseError};

const COLUMNS: &str = "id, user_id, message_id, thread_id, subject, from_address, to_address, \
                       raw_body, text_body, html_body, received_at, created_at, updated_at, \
                       original_inbox_id, processing_result, processed_at, processing_notes, \
                       transaction_id";

struct ProcessedRow {
    id: String,
    user_id: String,
    message_id: String,
    thread_id: Option<String>,
    subject: Option<String>,
    from_address: Option<String>,
    to_address: Option<String>,
    raw_body: Option<String>,
    text_body: Option<String>,
    html_body: Option<String>,
    received_at: String,
    created_at: String,
    updated_at: String,
    original_inbox_id: String,
    processing_result: String,
    processed_at: String,
    processing_notes: Option<String>,
    transaction_id: Option<String>,
}

impl ProcessedRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            message_id: row.get(2)?,
            thread_id: row.get(3)?,
            subject: row.get(4)?,
            from_address: row.get(5)?,
            to_address: row.get(6)?,
            raw_body: row.get(7)?,
            text_body: row.get(8)?,
            html_body: row.get(9)?,
            received_at: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            original_inbox_id: row.get(13)?,
            processing_result: row.get(14)?,
            processed_at: row.get(15)?,
            processing_notes: row.get(16)?,
            transaction_id: row.get(17)?,
        })
    }

    fn into_record(self) -> Result<ProcessedRecord, DatabaseError> {
        let processing_result = self
            .processing_result
            .parse::<ProcessingResult>()
            .map_err(|reason| DatabaseError::Decode {
                column: "processing_result",
                reason,
            })?;
        Ok(ProcessedRecord {
            received_at: decode_time("received_at", &self.received_at)?,
            created_at: decode_time("created_at", &self.created_at)?,
            updated_at: decode_time("updated_at", &self.updated_at)?,
            processed_at: decode_time("processed_at", &self.processed_at)?,
            id: self.id,
            user_id: self.user_id,
            message_id: self.message_id,
            thread_id: self.thread_id,
            subject: self.subject,
            from_address: self.from_address,
            to_address: self.to_address,
            raw_body: self.raw_body,
            text_body: self.text_body,
            html_body: self.html_body,
            original_inbox_id: self.original_inbox_id,
            processing_result,
            processing_notes: self.processing_notes,
            transaction_id: self.transaction_id,
        })
    }
}

/// Inserts a chunk of processed records in one transaction.
///
/// Rows whose `(user_id, message_id)` already exists are ignored, so replaying
/// a partially completed move is harmless. Returns the number of new rows.
pub fn insert_chunk(db: &Database, records: &[ProcessedRecord]) -> Result<usize, DatabaseError> {
    if records.is_empty() {
        return Ok(0);
    }

    db.with_transaction(|tx| {
        let mut stmt = tx.prepare(&format!(
            "INSERT OR IGNORE INTO processed_records ({}) VALUES
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            COLUMNS
        ))?;
        let mut inserted = 0;
        for record in records {
            inserted += stmt.execute(params![
                record.id,
                record.user_id,
                record.message_id,
                record.thread_id,
                record.subject,
                record.from_address,
                record.to_address,
                record.raw_body,
                record.text_body,
                record.html_body,
                encode_time(&record.received_at),
                encode_time(&record.created_at),
                encode_time(&record.updated_at),
                record.original_inbox_id,
                record.processing_result.as_str(),
                encode_time(&record.processed_at),
                record.processing_notes,
                record.transaction_id,
            ])?;
        }
        Ok(inserted)
    })
}

/// Returns the subset of `message_ids` already archived for a user.
pub fn find_existing_message_ids(
    db: &Database,
    user_id: &str,
    message_ids: &[String],
) -> Result<Vec<String>, DatabaseError> {
    if message_ids.is_empty() {
        return Ok(Vec::new());
    }

    db.with_conn(|conn| {
        let sql = format!(
            "SELECT message_id FROM processed_records WHERE user_id = ?1 AND message_id IN ({})",
            placeholders(2, message_ids.len())
        );
        let mut args: Vec<&dyn ToSql> = vec![&user_id];
        args.extend(message_ids.iter().map(|id| id as &dyn ToSql));

        let mut stmt = conn.prepare(&sql)?;
        let found = stmt
            .query_map(args.as_slice(), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(found)
    })
}

/// Loads processed records for a set of message ids.
pub fn find_by_message_ids(
    db: &Database,
    user_id: &str,
    message_ids: &[String],
) -> Result<Vec<ProcessedRecord>, DatabaseError> {
    if message_ids.is_empty() {
        return Ok(Vec::new());
    }

    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM processed_records WHERE user_id = ?1 AND message_id IN ({})
             ORDER BY processed_at ASC",
            COLUMNS,
            placeholders(2, message_ids.len())
        );
        let mut args: Vec<&dyn ToSql> = vec![&user_id];
        args.extend(message_ids.iter().map(|id| id as &dyn ToSql));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args.as_slice(), ProcessedRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ProcessedRow::into_record).collect()
    })
}

/// Applies a manual review: only the result and notes may change.
pub fn update_review(
    db: &Database,
    id: &str,
    result: ProcessingResult,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processed_records SET processing_result = ?1, processing_notes = ?2, updated_at = ?3
             WHERE id = ?4",
            params![result.as_str(), notes, encode_time(&now), id],
        )?;
        Ok(changed > 0)
    })
}

/// Counts processed records for a user.
pub fn count(db: &Database, user_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM processed_records WHERE user_id = ?1",
            params![user_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
