pub mod events;
pub mod migrations;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub use events::{ChatScope, Decision};

/// Append-only SQLite log of every observed message state.
/// A single writer is assumed; the mutex serializes this process's access.
#[derive(Clone)]
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
}

impl EventStore {
    /// Open or create the event log at the given path and bring its schema
    /// up to date. Fails if the schema cannot be migrated.
    pub fn open(path: &Path) -> Result<Self> {
        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        // Migrate on the raw connection before wrapping it, so nothing can
        // observe a store of unknown shape.
        let version = migrations::migrate(&mut conn)
            .with_context(|| format!("Failed to migrate database: {}", path.display()))?;

        info!(
            "Event store initialized at: {} (schema v{})",
            path.display(),
            version
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrations::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run raw SQL against the log (for testing)
    #[cfg(test)]
    pub async fn execute_raw(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(sql)?;
        Ok(())
    }
}
