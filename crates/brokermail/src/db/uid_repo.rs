//! Mailbox UID ledger: which `(folder, uidvalidity, uid)` positions have
//! already been ingested for a user.
//!
//! The fetch window is applied after these UIDs are filtered out, so a burst
//! larger than the window drains over several cycles instead of leaving the
//! older messages behind.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::params;
use rusqlite::types::ToSql;

use super::{encode_time, placeholders, Database, DatabaseError};

/// Returns the subset of `uids` already recorded for the folder.
pub fn find_known(
    db: &Database,
    user_id: &str,
    folder: &str,
    uid_validity: u32,
    uids: &[u32],
) -> Result<HashSet<u32>, DatabaseError> {
    if uids.is_empty() {
        return Ok(HashSet::new());
    }

    db.with_conn(|conn| {
        let mut known = HashSet::new();
        // Stay well below SQLite's bound-parameter limit.
        for chunk in uids.chunks(500) {
            let sql = format!(
                "SELECT uid FROM mailbox_uids
                 WHERE user_id = ?1 AND folder = ?2 AND uid_validity = ?3 AND uid IN ({})",
                placeholders(4, chunk.len())
            );
            let mut args: Vec<&dyn ToSql> = vec![&user_id, &folder, &uid_validity];
            args.extend(chunk.iter().map(|uid| uid as &dyn ToSql));

            let mut stmt = conn.prepare(&sql)?;
            for uid in stmt.query_map(args.as_slice(), |row| row.get::<_, u32>(0))? {
                known.insert(uid?);
            }
        }
        Ok(known)
    })
}

/// Records `(uid, message_id)` pairs. Already recorded UIDs are left as they
/// are. Returns the number of new rows.
pub fn mark_seen(
    db: &Database,
    user_id: &str,
    folder: &str,
    uid_validity: u32,
    entries: &[(u32, String)],
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    if entries.is_empty() {
        return Ok(0);
    }

    let seen_at = encode_time(&now);
    db.with_transaction(|tx| {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO mailbox_uids (user_id, folder, uid_validity, uid, message_id, seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        let mut written = 0;
        for (uid, message_id) in entries {
            written += stmt.execute(params![
                user_id,
                folder,
                uid_validity,
                uid,
                message_id,
                seen_at
            ])?;
        }
        Ok(written)
    })
}
