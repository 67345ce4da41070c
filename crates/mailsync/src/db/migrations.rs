//! Schema versions of the mailbox mirror.
//!
//! Applied versions are recorded in `_migrations`; each pending version
//! runs in its own transaction together with its bookkeeping row.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// Ordered by version.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_items_table",
        sql: include_str!("sql/001_create_items.sql"),
    },
    Migration {
        version: 2,
        description: "create_attachments_table",
        sql: include_str!("sql/002_create_attachments.sql"),
    },
    Migration {
        version: 3,
        description: "create_folder_state_tables",
        sql: include_str!("sql/003_create_folder_state.sql"),
    },
    Migration {
        version: 4,
        description: "create_tombstones_table",
        sql: include_str!("sql/004_create_tombstones.sql"),
    },
    Migration {
        version: 5,
        description: "add_tombstone_draft_trace",
        sql: include_str!("sql/005_add_tombstone_draft_trace.sql"),
    },
];

/// Brings the schema up to the latest version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied = current_version(conn)?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        log::info!(
            "Applying schema v{} ({})",
            migration.version,
            migration.description
        );

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}

/// Returns the highest applied migration version.
pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = fresh();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
        assert_eq!(current_version(&conn).unwrap(), 5);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = fresh();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_attachments_cascade_with_item() {
        let conn = fresh();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO items (account, server_id, folder_id, received_at)
             VALUES ('a', '1:1', 'inbox', '2026-01-01T00:00:00+00:00')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO attachments (account, server_id, position, file_reference, name)
             VALUES ('a', '1:1', 0, 'ref', 'a.pdf')",
            [],
        )
        .unwrap();
        conn.execute("DELETE FROM items WHERE server_id = '1:1'", [])
            .unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM attachments", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
