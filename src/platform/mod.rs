pub mod telegram;

use chrono::{DateTime, SubsecRound, Utc};

use crate::model::{EventKind, EventRecord, MediaAttachment};

/// A message as delivered by the platform, in created or edited form
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: i64,
    pub chat_id: i64,
    /// Absent for service messages and anonymous channel posts
    pub sender_id: Option<i64>,
    pub date: DateTime<Utc>,
    pub edit_date: Option<DateTime<Utc>>,
    /// Text body, or the caption of a media message
    pub text: Option<String>,
    pub media: Option<MediaAttachment>,
}

impl IncomingMessage {
    /// The observed state this message represents
    pub fn to_record(&self, kind: EventKind) -> EventRecord {
        let observed_at = match kind {
            EventKind::MessageEdited => self.edit_date.unwrap_or(self.date),
            _ => self.date,
        };
        let media = self.media.as_ref();

        EventRecord {
            kind,
            observed_at: observed_at.trunc_subsecs(6),
            chat_id: Some(self.chat_id),
            message_id: self.id,
            user_id: self.sender_id,
            text: self.text.clone(),
            media_kind: media.map(|m| m.kind.to_string()),
            media_filename: media.and_then(|m| m.filename.clone()),
        }
    }
}

/// Everything the transport can deliver
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Created(IncomingMessage),
    Edited(IncomingMessage),
    /// One or more messages removed. Some platforms do not say from which chat.
    Deleted {
        message_ids: Vec<i64>,
        chat_id: Option<i64>,
    },
}
