//! Versioned schema history for the event log.
//!
//! The on-disk generation lives in `PRAGMA user_version`. Columns are only
//! ever appended as nullable, so rows written by older versions stay readable.

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::StoreError;

/// Schema generation produced by this build
pub const CURRENT_VERSION: u32 = 4;

/// Table shape at `CURRENT_VERSION`, used for freshly created databases.
const CREATE_CURRENT: &str = "
    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        observed_at TEXT NOT NULL,
        chat_id INTEGER,
        message_id INTEGER NOT NULL,
        user_id INTEGER,
        text TEXT,
        media_kind TEXT,
        media_filename TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_events_message
        ON events(chat_id, message_id, id);
";

struct Migration {
    version: u32,
    description: &'static str,
    apply: fn(&Connection) -> rusqlite::Result<()>,
}

/// Ordered steps; each one must be safe to run against a database that
/// already has its effect.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create events table",
        apply: create_events_table,
    },
    Migration {
        version: 2,
        description: "add media_kind column",
        apply: |conn| add_column_if_missing(conn, "events", "media_kind", "TEXT"),
    },
    Migration {
        version: 3,
        description: "add media_filename column",
        apply: |conn| add_column_if_missing(conn, "events", "media_filename", "TEXT"),
    },
    Migration {
        version: 4,
        description: "index events by message",
        apply: |conn| {
            conn.execute_batch(
                "CREATE INDEX IF NOT EXISTS idx_events_message
                    ON events(chat_id, message_id, id);",
            )
        },
    },
];

fn create_events_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            observed_at TEXT NOT NULL,
            chat_id INTEGER,
            message_id INTEGER NOT NULL,
            user_id INTEGER,
            text TEXT
        );
        ",
    )
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> rusqlite::Result<()> {
    if column_exists(conn, table, column)? {
        debug!("Column {}.{} already present, skipping", table, column);
        return Ok(());
    }
    conn.execute_batch(&format!(
        "ALTER TABLE {} ADD COLUMN {} {};",
        table, column, definition
    ))
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.iter().any(|name| name == column))
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

pub fn schema_version(conn: &Connection) -> Result<u32, StoreError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Bring the database to `CURRENT_VERSION` and return the resulting version.
///
/// An empty database is created directly at the current shape. An older one
/// gets every newer step applied in order, each in its own transaction
/// together with its version bump. A database from a newer build is refused.
pub fn migrate(conn: &mut Connection) -> Result<u32, StoreError> {
    let found = schema_version(conn)?;

    if found > CURRENT_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found,
            supported: CURRENT_VERSION,
        });
    }
    if found == CURRENT_VERSION {
        debug!("Schema already at v{}", found);
        return Ok(found);
    }

    if found == 0 && !table_exists(conn, "events")? {
        let tx = conn.transaction()?;
        tx.execute_batch(CREATE_CURRENT)
            .and_then(|_| tx.pragma_update(None, "user_version", CURRENT_VERSION))
            .map_err(|source| StoreError::Migration {
                version: CURRENT_VERSION,
                source,
            })?;
        tx.commit()?;
        info!("Created event log schema at v{}", CURRENT_VERSION);
        return Ok(CURRENT_VERSION);
    }

    for step in MIGRATIONS.iter().filter(|m| m.version > found) {
        apply_step(conn, step)?;
    }

    schema_version(conn)
}

fn apply_step(conn: &mut Connection, step: &Migration) -> Result<(), StoreError> {
    let to_err = |source: rusqlite::Error| StoreError::Migration {
        version: step.version,
        source,
    };

    let tx = conn.transaction().map_err(to_err)?;
    (step.apply)(&tx).map_err(to_err)?;
    tx.pragma_update(None, "user_version", step.version)
        .map_err(to_err)?;
    tx.commit().map_err(to_err)?;

    info!(
        "Applied schema migration v{}: {}",
        step.version, step.description
    );
    Ok(())
}
