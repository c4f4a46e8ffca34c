//! Stable single-line rendering of logged events.
//!
//! Line layout, with absent segments left out:
//!
//! ```text
//! 2024-05-01 08:00:00 EDIT [rustaceans (10)] (1) <alice (42)> "hello" => "hello world"
//! ```
//!
//! Text is JSON-quoted so a line never spans more than one row of output.

use crate::diff::Diff;
use crate::model::{ChatIdentity, EventKind, EventRecord};

/// Fixed-width, lexically sortable UTC timestamp
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Resolved names for the chat and author of an event
#[derive(Debug, Default, Clone)]
pub struct Labels {
    pub chat: Option<ChatIdentity>,
    pub user: Option<ChatIdentity>,
}

/// Render `record` (the newly observed state) together with its diff
pub fn render(record: &EventRecord, diff: &Diff, labels: &Labels) -> String {
    let mut segments = vec![
        record.observed_at.format(TIMESTAMP_FORMAT).to_string(),
        diff.kind.tag().to_string(),
    ];

    if let Some(chat_id) = record.chat_id {
        let chat = labels.chat.as_ref().filter(|c| c.id == chat_id);
        segments.push(format!("[{}]", identity_label(chat_id, chat)));
    }

    segments.push(format!("({})", record.message_id));

    if let Some(user) = &labels.user {
        segments.push(format!("<{}>", identity_label(user.id, Some(user))));
    }

    if let Some(body) = body(diff) {
        segments.push(body);
    }

    segments.join(" ")
}

fn body(diff: &Diff) -> Option<String> {
    match diff.kind {
        EventKind::MessageCreated => diff.after.as_ref().and_then(content),
        EventKind::MessageEdited => {
            let after = diff.after.as_ref().and_then(content);
            match &diff.before {
                Some(before) => Some(format!(
                    "{} => {}",
                    content(before).unwrap_or_else(|| EMPTY.to_string()),
                    after.unwrap_or_else(|| EMPTY.to_string())
                )),
                None => after,
            }
        }
        EventKind::MessageDeleted => diff.before.as_ref().and_then(content),
    }
}

/// Placeholder for a side of an edit that carried neither text nor media
const EMPTY: &str = "(empty)";

fn content(record: &EventRecord) -> Option<String> {
    let mut parts = Vec::new();

    if let Some(media) = record.media() {
        match media.filename {
            Some(filename) => parts.push(format!("[{}: {}]", media.kind, filename)),
            None => parts.push(format!("[{}]", media.kind)),
        }
    }
    if let Some(text) = &record.text {
        parts.push(serde_json::to_string(text).unwrap_or_default());
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

fn identity_label(id: i64, identity: Option<&ChatIdentity>) -> String {
    match identity.and_then(|i| i.display_name()) {
        Some(name) => format!("{} ({})", name, id),
        None => format!("({})", id),
    }
}
