use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::MediaError;
use crate::model::MediaAttachment;

/// Fetches the bytes behind a media attachment
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn download(&self, media: &MediaAttachment, dest: &Path) -> Result<(), MediaError>;
}

/// Where the media of `(chat_id, message_id)` is stored
pub fn media_path(root: &Path, chat_id: i64, message_id: i64, media: &MediaAttachment) -> PathBuf {
    let name = match &media.filename {
        Some(filename) => format!("{}_{}", message_id, sanitize(filename)),
        None => format!("{}_{}", message_id, media.kind.to_string().to_lowercase()),
    };
    root.join(chat_id.to_string()).join(name)
}

/// Keep platform-supplied filenames inside their directory
fn sanitize(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

/// Start a background download. Failures are logged and go no further.
pub fn spawn_download(
    fetcher: Arc<dyn MediaFetcher>,
    media: MediaAttachment,
    dest: PathBuf,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(parent) = dest.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(
                    "Failed to create media directory {}: {}",
                    parent.display(),
                    e
                );
                return;
            }
        }

        match fetcher.download(&media, &dest).await {
            Ok(()) => debug!("Saved {} to {}", media.kind, dest.display()),
            Err(e) => warn!("Media download to {} failed: {}", dest.display(), e),
        }
    })
}
