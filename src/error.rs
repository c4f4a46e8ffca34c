use thiserror::Error;

/// Failures of the event log. Migration variants are fatal at startup; all
/// others drop the event being processed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to apply schema migration {version}: {source}")]
    Migration {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("corrupt row {row_id}: {reason}")]
    CorruptRow { row_id: i64, reason: String },
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to resolve file {file_id}: {reason}")]
    Resolve { file_id: String, reason: String },

    #[error("failed to download file {file_id}: {reason}")]
    Download { file_id: String, reason: String },

    #[error("media i/o error: {0}")]
    Io(#[from] std::io::Error),
}
