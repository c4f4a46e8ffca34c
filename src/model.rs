use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, SubsecRound, Utc};

/// A user, group or channel as reported by the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatIdentity {
    pub id: i64,
    pub handle: Option<String>,
    pub title: Option<String>,
}

impl ChatIdentity {
    /// Handle if the entity has one, otherwise its display title
    pub fn display_name(&self) -> Option<&str> {
        let non_empty = |name: &&str| !name.is_empty();
        self.handle
            .as_deref()
            .filter(non_empty)
            .or(self.title.as_deref().filter(non_empty))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageCreated,
    MessageEdited,
    MessageDeleted,
}

impl EventKind {
    /// Value stored in the `kind` column
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MessageCreated => "created",
            EventKind::MessageEdited => "edited",
            EventKind::MessageDeleted => "deleted",
        }
    }

    /// Short tag used in rendered lines
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::MessageCreated => "MSG",
            EventKind::MessageEdited => "EDIT",
            EventKind::MessageDeleted => "DEL",
        }
    }
}

impl FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "created" => Ok(EventKind::MessageCreated),
            "edited" => Ok(EventKind::MessageEdited),
            "deleted" => Ok(EventKind::MessageDeleted),
            other => bail!("unknown event kind: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Document,
    Video,
    Audio,
    Voice,
    Animation,
    Sticker,
    VideoNote,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaKind::Photo => "Photo",
            MediaKind::Document => "Document",
            MediaKind::Video => "Video",
            MediaKind::Audio => "Audio",
            MediaKind::Voice => "Voice",
            MediaKind::Animation => "Animation",
            MediaKind::Sticker => "Sticker",
            MediaKind::VideoNote => "VideoNote",
        };
        write!(f, "{}", name)
    }
}

/// Media attached to an inbound message, with what is needed to fetch it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    pub filename: Option<String>,
    /// Platform file handle used by the downloader
    pub file_id: String,
}

/// Structural identity of a piece of media: kind and filename, never bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub kind: String,
    pub filename: Option<String>,
}

/// One observed state of a message, exactly as persisted
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub kind: EventKind,
    pub observed_at: DateTime<Utc>,
    pub chat_id: Option<i64>,
    pub message_id: i64,
    pub user_id: Option<i64>,
    pub text: Option<String>,
    pub media_kind: Option<String>,
    pub media_filename: Option<String>,
}

impl EventRecord {
    /// A deletion observed now. The platform reports no content or author.
    pub fn deletion(chat_id: Option<i64>, message_id: i64) -> Self {
        Self {
            kind: EventKind::MessageDeleted,
            // Stored timestamps keep microseconds
            observed_at: Utc::now().trunc_subsecs(6),
            chat_id,
            message_id,
            user_id: None,
            text: None,
            media_kind: None,
            media_filename: None,
        }
    }

    pub fn media(&self) -> Option<MediaDescriptor> {
        self.media_kind.as_ref().map(|kind| MediaDescriptor {
            kind: kind.clone(),
            filename: self.media_filename.clone(),
        })
    }
}
