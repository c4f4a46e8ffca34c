use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::EventStore;
use crate::error::StoreError;
use crate::model::{EventKind, EventRecord};

/// Which chat a point lookup is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatScope {
    Exact(i64),
    /// Any chat. Used when a deletion does not say which chat it came from;
    /// if message ids collide across chats the wrong row may be returned.
    Any,
}

impl From<Option<i64>> for ChatScope {
    fn from(chat_id: Option<i64>) -> Self {
        chat_id.map_or(ChatScope::Any, ChatScope::Exact)
    }
}

/// Outcome of the decision step inside [`EventStore::reconcile`]
pub enum Decision<T> {
    /// Append the new record, then hand back the value
    Append(T),
    /// Leave the log untouched
    Skip(T),
}

const SELECT_COLUMNS: &str = "SELECT id, kind, observed_at, chat_id, message_id, user_id,
                                     text, media_kind, media_filename
                              FROM events";

impl EventStore {
    /// Append one record and return its row id
    pub async fn append(&self, record: &EventRecord) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let row_id = insert_event(&tx, record)?;
        tx.commit()?;
        Ok(row_id)
    }

    /// The most recently inserted record for a message, if any. The event path
    /// reads priors through `reconcile` instead.
    #[cfg(test)]
    pub async fn latest(
        &self,
        scope: ChatScope,
        message_id: i64,
    ) -> Result<Option<EventRecord>, StoreError> {
        let conn = self.conn.lock().await;
        query_latest(&conn, scope, message_id)
    }

    /// Read the latest record for `record`'s message, let `decide` inspect it,
    /// and append `record` if it says so, all inside one transaction.
    ///
    /// `decide` runs while the store is locked and must not block.
    pub async fn reconcile<T>(
        &self,
        record: &EventRecord,
        scope: ChatScope,
        decide: impl FnOnce(Option<EventRecord>) -> Decision<T>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let prior = query_latest(&tx, scope, record.message_id)?;
        let value = match decide(prior) {
            Decision::Append(value) => {
                insert_event(&tx, record)?;
                value
            }
            Decision::Skip(value) => value,
        };

        tx.commit()?;
        Ok(value)
    }

    /// Total number of recorded events
    pub async fn count(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().await;
        let count = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn insert_event(conn: &Connection, record: &EventRecord) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO events
         (kind, observed_at, chat_id, message_id, user_id, text, media_kind, media_filename)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            record.kind.as_str(),
            format_timestamp(&record.observed_at),
            record.chat_id,
            record.message_id,
            record.user_id,
            record.text,
            record.media_kind,
            record.media_filename,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn query_latest(
    conn: &Connection,
    scope: ChatScope,
    message_id: i64,
) -> Result<Option<EventRecord>, StoreError> {
    let row = match scope {
        ChatScope::Exact(chat_id) => conn
            .query_row(
                &format!(
                    "{} WHERE chat_id = ?1 AND message_id = ?2 ORDER BY id DESC LIMIT 1",
                    SELECT_COLUMNS
                ),
                rusqlite::params![chat_id, message_id],
                read_row,
            )
            .optional()?,
        ChatScope::Any => conn
            .query_row(
                &format!(
                    "{} WHERE message_id = ?1 ORDER BY id DESC LIMIT 1",
                    SELECT_COLUMNS
                ),
                rusqlite::params![message_id],
                read_row,
            )
            .optional()?,
    };

    row.map(RawEvent::into_record).transpose()
}

/// Row as stored, before the text columns are parsed
struct RawEvent {
    id: i64,
    kind: String,
    observed_at: String,
    chat_id: Option<i64>,
    message_id: i64,
    user_id: Option<i64>,
    text: Option<String>,
    media_kind: Option<String>,
    media_filename: Option<String>,
}

fn read_row(row: &rusqlite::Row) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        id: row.get(0)?,
        kind: row.get(1)?,
        observed_at: row.get(2)?,
        chat_id: row.get(3)?,
        message_id: row.get(4)?,
        user_id: row.get(5)?,
        text: row.get(6)?,
        media_kind: row.get(7)?,
        media_filename: row.get(8)?,
    })
}

impl RawEvent {
    fn into_record(self) -> Result<EventRecord, StoreError> {
        let kind: EventKind = self.kind.parse().map_err(|e| StoreError::CorruptRow {
            row_id: self.id,
            reason: format!("{}", e),
        })?;
        let observed_at = DateTime::parse_from_rfc3339(&self.observed_at)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| StoreError::CorruptRow {
                row_id: self.id,
                reason: format!("bad observed_at {:?}: {}", self.observed_at, e),
            })?;

        Ok(EventRecord {
            kind,
            observed_at,
            chat_id: self.chat_id,
            message_id: self.message_id,
            user_id: self.user_id,
            text: self.text,
            media_kind: self.media_kind,
            media_filename: self.media_filename,
        })
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn created(chat_id: i64, message_id: i64, text: &str) -> EventRecord {
        EventRecord {
            kind: EventKind::MessageCreated,
            observed_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
            chat_id: Some(chat_id),
            message_id,
            user_id: Some(42),
            text: Some(text.to_string()),
            media_kind: Some("Document".to_string()),
            media_filename: Some("notes.txt".to_string()),
        }
    }

    #[tokio::test]
    async fn test_append_then_latest_round_trips() {
        let store = EventStore::open_in_memory().unwrap();
        let record = created(10, 1, "hello");

        store.append(&record).await.unwrap();

        let found = store.latest(ChatScope::Exact(10), 1).await.unwrap();
        assert_eq!(found, Some(record));
    }

    #[tokio::test]
    async fn test_latest_returns_most_recent_insertion() {
        let store = EventStore::open_in_memory().unwrap();
        store.append(&created(10, 1, "first")).await.unwrap();

        // Older timestamp but later insertion: row order wins.
        let mut edit = created(10, 1, "second");
        edit.kind = EventKind::MessageEdited;
        edit.observed_at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        store.append(&edit).await.unwrap();

        let found = store.latest(ChatScope::Exact(10), 1).await.unwrap().unwrap();
        assert_eq!(found.text.as_deref(), Some("second"));
        assert_eq!(found.kind, EventKind::MessageEdited);
    }

    #[tokio::test]
    async fn test_latest_missing_key_is_none() {
        let store = EventStore::open_in_memory().unwrap();
        store.append(&created(10, 1, "hello")).await.unwrap();

        assert!(store.latest(ChatScope::Exact(11), 1).await.unwrap().is_none());
        assert!(store.latest(ChatScope::Exact(10), 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wildcard_scope_matches_any_chat() {
        let store = EventStore::open_in_memory().unwrap();
        store.append(&created(10, 7, "in ten")).await.unwrap();
        store.append(&created(20, 7, "in twenty")).await.unwrap();

        // Colliding ids resolve to whichever row was inserted last.
        let found = store.latest(ChatScope::Any, 7).await.unwrap().unwrap();
        assert_eq!(found.chat_id, Some(20));
    }

    #[tokio::test]
    async fn test_chatless_rows_round_trip() {
        let store = EventStore::open_in_memory().unwrap();
        let mut deletion = EventRecord::deletion(None, 5);
        deletion.observed_at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        store.append(&deletion).await.unwrap();

        let found = store.latest(ChatScope::Any, 5).await.unwrap();
        assert_eq!(found, Some(deletion));
    }

    #[tokio::test]
    async fn test_reconcile_skip_leaves_log_untouched() {
        let store = EventStore::open_in_memory().unwrap();
        store.append(&created(10, 1, "hello")).await.unwrap();

        let prior_text = store
            .reconcile(&created(10, 1, "ignored"), ChatScope::Exact(10), |prior| {
                Decision::Skip(prior.and_then(|p| p.text))
            })
            .await
            .unwrap();

        assert_eq!(prior_text.as_deref(), Some("hello"));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_append_sees_prior_then_inserts() {
        let store = EventStore::open_in_memory().unwrap();

        let saw_prior = store
            .reconcile(&created(10, 1, "hello"), ChatScope::Exact(10), |prior| {
                Decision::Append(prior.is_some())
            })
            .await
            .unwrap();

        assert!(!saw_prior);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_kind_is_reported() {
        let store = EventStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock().await;
            conn.execute(
                "INSERT INTO events (kind, observed_at, chat_id, message_id)
                 VALUES ('pinned', '2024-01-01T00:00:00.000000Z', 10, 1)",
                [],
            )
            .unwrap();
        }

        let err = store.latest(ChatScope::Exact(10), 1).await.unwrap_err();
        assert!(matches!(err, StoreError::CorruptRow { .. }));
    }

    #[tokio::test]
    async fn test_open_on_disk_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");

        {
            let store = EventStore::open(&path).unwrap();
            store.append(&created(10, 1, "durable")).await.unwrap();
        }

        let reopened = EventStore::open(&path).unwrap();
        let found = reopened.latest(ChatScope::Exact(10), 1).await.unwrap();
        assert_eq!(found.and_then(|r| r.text).as_deref(), Some("durable"));
    }
}
