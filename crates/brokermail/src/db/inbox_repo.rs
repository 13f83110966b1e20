//! Inbox repository: CRUD operations for the `inbox_records` table.

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, Row};

use crate::models::{InboxRecord, RecordStatus};

use super::{decode_time, encode_time, placeholders, Database, DatabaseError};

const COLUMNS: &str = "id, user_id, message_id, thread_id, subject, from_address, to_address, \
                       raw_body, text_body, html_body, received_at, status, error_message, \
                       created_at, updated_at";

/// A raw inbox row as stored; timestamps and status are still text.
struct InboxRow {
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
    status: String,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl InboxRow {
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
            status: row.get(11)?,
            error_message: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_record(self) -> Result<InboxRecord, DatabaseError> {
        let status = self
            .status
            .parse::<RecordStatus>()
            .map_err(|reason| DatabaseError::Decode {
                column: "status",
                reason,
            })?;
        Ok(InboxRecord {
            received_at: decode_time("received_at", &self.received_at)?,
            created_at: decode_time("created_at", &self.created_at)?,
            updated_at: decode_time("updated_at", &self.updated_at)?,
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
            status,
            error_message: self.error_message,
        })
    }
}

fn query_records(
    conn: &Connection,
    sql: &str,
    args: &[&dyn ToSql],
) -> Result<Vec<InboxRecord>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, InboxRow::read)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(InboxRow::into_record).collect()
}

/// Inserts a chunk of records in one transaction. Any failure rolls back the
/// whole chunk. Returns the number of rows written.
pub fn insert_chunk(db: &Database, records: &[InboxRecord]) -> Result<usize, DatabaseError> {
    if records.is_empty() {
        return Ok(0);
    }

    db.with_transaction(|tx| {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO inbox_records ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            COLUMNS
        ))?;
        for record in records {
            stmt.execute(params![
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
                record.status.as_str(),
                record.error_message,
                encode_time(&record.created_at),
                encode_time(&record.updated_at),
            ])?;
        }
        Ok(records.len())
    })
}

/// Returns the subset of `message_ids` already present in the inbox for a user.
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
            "SELECT message_id FROM inbox_records WHERE user_id = ?1 AND message_id IN ({})",
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

/// Loads full inbox records for a set of message ids.
pub fn find_by_message_ids(
    db: &Database,
    user_id: &str,
    message_ids: &[String],
) -> Result<Vec<InboxRecord>, DatabaseError> {
    if message_ids.is_empty() {
        return Ok(Vec::new());
    }

    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM inbox_records WHERE user_id = ?1 AND message_id IN ({})
             ORDER BY received_at ASC",
            COLUMNS,
            placeholders(2, message_ids.len())
        );
        let mut args: Vec<&dyn ToSql> = vec![&user_id];
        args.extend(message_ids.iter().map(|id| id as &dyn ToSql));
        query_records(conn, &sql, &args)
    })
}

/// Lists inbox records for a user, optionally filtered by status, oldest first.
pub fn list(
    db: &Database,
    user_id: &str,
    status: Option<RecordStatus>,
) -> Result<Vec<InboxRecord>, DatabaseError> {
    db.with_conn(|conn| match status {
        Some(status) => query_records(
            conn,
            &format!(
                "SELECT {} FROM inbox_records WHERE user_id = ?1 AND status = ?2
                 ORDER BY received_at ASC",
                COLUMNS
            ),
            &[&user_id, &status.as_str()],
        ),
        None => query_records(
            conn,
            &format!(
                "SELECT {} FROM inbox_records WHERE user_id = ?1 ORDER BY received_at ASC",
                COLUMNS
            ),
            &[&user_id],
        ),
    })
}

/// Sets the status (and error message) of one record. Returns false if no
/// row matched.
pub fn update_status(
    db: &Database,
    id: &str,
    status: RecordStatus,
    error_message: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE inbox_records SET status = ?1, error_message = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), error_message, encode_time(&now), id],
        )?;
        Ok(changed > 0)
    })
}

/// Moves every `error` record of a user back to `pending`.
pub fn requeue_errored(
    db: &Database,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE inbox_records SET status = 'pending', error_message = NULL, updated_at = ?1
             WHERE user_id = ?2 AND status = 'error'",
            params![encode_time(&now), user_id],
        )?;
        Ok(changed)
    })
}

/// Deletes a chunk of inbox rows by id in one transaction.
pub fn delete_by_ids(db: &Database, ids: &[String]) -> Result<usize, DatabaseError> {
    if ids.is_empty() {
        return Ok(0);
    }

    db.with_transaction(|tx| {
        let sql = format!(
            "DELETE FROM inbox_records WHERE id IN ({})",
            placeholders(1, ids.len())
        );
        let args: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();
        Ok(tx.execute(&sql, args.as_slice())?)
    })
}

/// Returns ids of inbox rows whose dedup key already exists in the
/// processed table.
pub fn find_archived_duplicates(db: &Database, user_id: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT i.id FROM inbox_records i
             INNER JOIN processed_records p
                 ON p.user_id = i.user_id AND p.message_id = i.message_id
             WHERE i.user_id = ?1",
        )?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

/// Counts inbox records for a user.
pub fn count(db: &Database, user_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM inbox_records WHERE user_id = ?1",
            params![user_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
