//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_inbox_records_table",
        sql: include_str!("sql/001_create_inbox_records.sql"),
    },
    Migration {
        version: 2,
        description: "create_processed_records_table",
        sql: include_str!("sql/002_create_processed_records.sql"),
    },
    Migration {
        version: 3,
        description: "create_status_indexes",
        sql: include_str!("sql/003_create_status_index.sql"),
    },
    Migration {
        version: 4,
        description: "create_mailbox_uids_table",
        sql: include_str!("sql/004_create_mailbox_uids.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    fn columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_inbox_has_error_message_column() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        assert!(columns(&conn, "inbox_records").contains(&"error_message".to_string()));
        assert!(!columns(&conn, "processed_records").contains(&"error_message".to_string()));
    }

    #[test]
    fn test_mailbox_uid_is_unique_per_folder_and_validity() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let insert = "INSERT INTO mailbox_uids (user_id, folder, uid_validity, uid, message_id, seen_at)
                      VALUES ('u', ?1, ?2, 7, 'm', 't')";
        conn.execute(insert, rusqlite::params!["INBOX", 1]).unwrap();
        conn.execute(insert, rusqlite::params!["INBOX", 2]).unwrap();
        conn.execute(insert, rusqlite::params!["Other", 1]).unwrap();
        assert!(conn.execute(insert, rusqlite::params!["INBOX", 1]).is_err());
    }

    #[test]
    fn test_dedup_key_is_unique_per_table() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let insert = "INSERT INTO inbox_records (id, user_id, message_id, received_at, created_at, updated_at)
                      VALUES (?1, 'u', 'm', 't', 't', 't')";
        conn.execute(insert, ["a"]).unwrap();
        assert!(conn.execute(insert, ["b"]).is_err());
    }
}
