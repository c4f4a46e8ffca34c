use serde::Deserialize;

use crate::model::{EventKind, EventRecord};

/// What to do with an edit whose text and media match the prior record.
/// Such edits usually touch only metadata the log does not model.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnchangedEdits {
    /// Log and persist them like any other edit
    #[default]
    Record,
    /// Drop them, leaving a debug trace
    Skip,
}

/// Before/after view of one event
#[derive(Debug, Clone, PartialEq)]
pub struct Diff {
    pub kind: EventKind,
    /// Latest stored state for the message, where one is known
    pub before: Option<EventRecord>,
    /// Newly observed state; absent for deletions
    pub after: Option<EventRecord>,
}

impl Diff {
    /// False only for edits whose text and media descriptor both match the
    /// prior state.
    pub fn content_changed(&self) -> bool {
        match (&self.before, &self.after) {
            (Some(before), Some(after)) => {
                before.text != after.text || before.media() != after.media()
            }
            _ => true,
        }
    }
}

/// Combine a new record with the latest stored one for the same message
pub fn reconstruct(new_record: &EventRecord, prior: Option<EventRecord>) -> Diff {
    match new_record.kind {
        EventKind::MessageCreated => Diff {
            kind: EventKind::MessageCreated,
            before: None,
            after: Some(new_record.clone()),
        },
        // With no prior the create predates us; announce current content.
        EventKind::MessageEdited => Diff {
            kind: EventKind::MessageEdited,
            before: prior,
            after: Some(new_record.clone()),
        },
        EventKind::MessageDeleted => Diff {
            kind: EventKind::MessageDeleted,
            before: prior,
            after: None,
        },
    }
}
