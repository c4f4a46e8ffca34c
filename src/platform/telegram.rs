use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{BusinessMessagesDeleted, Chat, FileId, FileMeta, User};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher as EventDispatcher;
use crate::error::MediaError;
use crate::identity::Directory;
use crate::media::MediaFetcher;
use crate::model::{ChatIdentity, MediaAttachment, MediaKind};
use crate::platform::{IncomingMessage, TransportEvent};

/// Membership endpoints the directory refreshes from
#[async_trait]
pub trait MemberSource: Send + Sync {
    async fn administrators(&self, chat_id: i64) -> Result<Vec<ChatIdentity>>;

    async fn member(&self, chat_id: i64, user_id: i64) -> Result<ChatIdentity>;
}

#[async_trait]
impl MemberSource for Bot {
    async fn administrators(&self, chat_id: i64) -> Result<Vec<ChatIdentity>> {
        let admins = self
            .get_chat_administrators(ChatId(chat_id))
            .await
            .with_context(|| format!("Failed to list administrators of {}", chat_id))?;
        Ok(admins.iter().map(|m| user_identity(&m.user)).collect())
    }

    async fn member(&self, chat_id: i64, user_id: i64) -> Result<ChatIdentity> {
        let member = self
            .get_chat_member(ChatId(chat_id), UserId(user_id as u64))
            .await
            .with_context(|| format!("Failed to fetch member {} of {}", user_id, chat_id))?;
        Ok(user_identity(&member.user))
    }
}

/// Identity cache fed by every observed update. The Bot API has no lookup by
/// bare id, so misses are recorded and asked about one by one on an
/// aggressive refresh.
pub struct TelegramDirectory {
    source: Arc<dyn MemberSource>,
    entities: RwLock<HashMap<i64, ChatIdentity>>,
    /// Ids looked up but not cached since the last aggressive refresh
    misses: RwLock<HashSet<i64>>,
}

impl TelegramDirectory {
    pub fn new(source: Arc<dyn MemberSource>) -> Self {
        Self {
            source,
            entities: RwLock::new(HashMap::new()),
            misses: RwLock::new(HashSet::new()),
        }
    }

    async fn remember(&self, identity: ChatIdentity) {
        self.misses.write().await.remove(&identity.id);
        self.entities.write().await.insert(identity.id, identity);
    }

    /// Cache the chat and sender of a message
    pub async fn observe(&self, msg: &Message) {
        self.remember(chat_identity(&msg.chat)).await;
        if let Some(user) = msg.from.as_ref() {
            self.remember(user_identity(user)).await;
        }
    }

    pub async fn observe_chat(&self, chat: &Chat) {
        self.remember(chat_identity(chat)).await;
    }
}

#[async_trait]
impl Directory for TelegramDirectory {
    async fn get_entity(&self, id: i64) -> Option<ChatIdentity> {
        let found = self.entities.read().await.get(&id).cloned();
        // Group and channel ids are negative and never chat members.
        if found.is_none() && id > 0 {
            self.misses.write().await.insert(id);
        }
        found
    }

    async fn refresh_members(&self, chat_id: i64, aggressive: bool) -> Result<()> {
        let listed = self.source.administrators(chat_id).await;
        match &listed {
            Ok(admins) => {
                for admin in admins {
                    self.remember(admin.clone()).await;
                }
                debug!("Refreshed {} administrators of {}", admins.len(), chat_id);
            }
            // Private chats have no administrators; member lookups still work.
            Err(e) if aggressive => warn!("{:#}", e),
            Err(_) => {}
        }

        if !aggressive {
            return listed.map(|_| ());
        }

        let pending: Vec<i64> = self.misses.write().await.drain().collect();
        for user_id in pending {
            match self.source.member(chat_id, user_id).await {
                Ok(identity) => self.remember(identity).await,
                Err(e) => debug!("{:#}", e),
            }
        }
        Ok(())
    }
}

/// Downloads attachments through the Bot API file endpoint
pub struct TelegramMediaFetcher {
    bot: Bot,
}

impl TelegramMediaFetcher {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MediaFetcher for TelegramMediaFetcher {
    async fn download(&self, media: &MediaAttachment, dest: &Path) -> Result<(), MediaError> {
        let file = self
            .bot
            .get_file(FileId(media.file_id.clone()))
            .await
            .map_err(|e| MediaError::Resolve {
                file_id: media.file_id.clone(),
                reason: e.to_string(),
            })?;

        let mut dst = tokio::fs::File::create(dest).await?;
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .map_err(|e| MediaError::Download {
                file_id: media.file_id.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

fn user_identity(user: &User) -> ChatIdentity {
    ChatIdentity {
        id: user.id.0 as i64,
        handle: user.username.clone(),
        title: Some(user.full_name()),
    }
}

fn chat_identity(chat: &Chat) -> ChatIdentity {
    let title = chat.title().map(str::to_string).or_else(|| {
        let first = chat.first_name()?;
        Some(match chat.last_name() {
            Some(last) => format!("{} {}", first, last),
            None => first.to_string(),
        })
    });

    ChatIdentity {
        id: chat.id.0,
        handle: chat.username().map(str::to_string),
        title,
    }
}

fn attachment(kind: MediaKind, file: &FileMeta, filename: Option<&String>) -> MediaAttachment {
    MediaAttachment {
        kind,
        filename: filename.cloned(),
        file_id: file.id.0.clone(),
    }
}

fn media_of(msg: &Message) -> Option<MediaAttachment> {
    // Animations also carry a document; check them first.
    if let Some(animation) = msg.animation() {
        return Some(attachment(
            MediaKind::Animation,
            &animation.file,
            animation.file_name.as_ref(),
        ));
    }
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        return Some(attachment(MediaKind::Photo, &photo.file, None));
    }
    if let Some(document) = msg.document() {
        return Some(attachment(
            MediaKind::Document,
            &document.file,
            document.file_name.as_ref(),
        ));
    }
    if let Some(video) = msg.video() {
        return Some(attachment(
            MediaKind::Video,
            &video.file,
            video.file_name.as_ref(),
        ));
    }
    if let Some(audio) = msg.audio() {
        return Some(attachment(
            MediaKind::Audio,
            &audio.file,
            audio.file_name.as_ref(),
        ));
    }
    if let Some(voice) = msg.voice() {
        return Some(attachment(MediaKind::Voice, &voice.file, None));
    }
    if let Some(sticker) = msg.sticker() {
        return Some(attachment(MediaKind::Sticker, &sticker.file, None));
    }
    if let Some(note) = msg.video_note() {
        return Some(attachment(MediaKind::VideoNote, &note.file, None));
    }
    None
}

fn incoming(msg: &Message) -> IncomingMessage {
    IncomingMessage {
        id: msg.id.0 as i64,
        chat_id: msg.chat.id.0,
        sender_id: msg.from.as_ref().map(|user| user.id.0 as i64),
        date: msg.date,
        edit_date: msg.edit_date().copied(),
        text: msg.text().or_else(|| msg.caption()).map(str::to_string),
        media: media_of(msg),
    }
}

/// Run the Telegram transport until the process is stopped
pub async fn run(
    bot: Bot,
    directory: Arc<TelegramDirectory>,
    dispatcher: Arc<EventDispatcher>,
) -> Result<()> {
    info!("Starting Telegram transport...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_created))
        .branch(Update::filter_channel_post().endpoint(on_created))
        .branch(Update::filter_business_message().endpoint(on_created))
        .branch(Update::filter_edited_message().endpoint(on_edited))
        .branch(Update::filter_edited_channel_post().endpoint(on_edited))
        .branch(Update::filter_edited_business_message().endpoint(on_edited))
        .branch(Update::filter_deleted_business_messages().endpoint(on_deleted));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![directory, dispatcher])
        // A single key: every update is handled in delivery order.
        .distribution_function(|_| Some(()))
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn on_created(
    msg: Message,
    directory: Arc<TelegramDirectory>,
    dispatcher: Arc<EventDispatcher>,
) -> ResponseResult<()> {
    directory.observe(&msg).await;
    dispatcher
        .handle(TransportEvent::Created(incoming(&msg)))
        .await;
    Ok(())
}

async fn on_edited(
    msg: Message,
    directory: Arc<TelegramDirectory>,
    dispatcher: Arc<EventDispatcher>,
) -> ResponseResult<()> {
    directory.observe(&msg).await;
    dispatcher
        .handle(TransportEvent::Edited(incoming(&msg)))
        .await;
    Ok(())
}

async fn on_deleted(
    deleted: BusinessMessagesDeleted,
    directory: Arc<TelegramDirectory>,
    dispatcher: Arc<EventDispatcher>,
) -> ResponseResult<()> {
    directory.observe_chat(&deleted.chat).await;
    dispatcher
        .handle(TransportEvent::Deleted {
            message_ids: deleted.message_ids.iter().map(|id| id.0 as i64).collect(),
            chat_id: Some(deleted.chat.id.0),
        })
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::tests::user;
    use crate::identity::Resolver;
    use tokio::sync::Mutex;

    /// Membership fake: a fixed member list per chat, optionally without
    /// an administrator listing.
    #[derive(Default)]
    struct FakeMembers {
        admins: Vec<ChatIdentity>,
        members: HashMap<i64, ChatIdentity>,
        no_admins: bool,
        asked: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl MemberSource for FakeMembers {
        async fn administrators(&self, chat_id: i64) -> Result<Vec<ChatIdentity>> {
            if self.no_admins {
                anyhow::bail!("chat {} has no administrators", chat_id);
            }
            Ok(self.admins.clone())
        }

        async fn member(&self, _chat_id: i64, user_id: i64) -> Result<ChatIdentity> {
            self.asked.lock().await.push(user_id);
            self.members
                .get(&user_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("user {} not found", user_id))
        }
    }

    fn directory(source: FakeMembers) -> (Arc<TelegramDirectory>, Arc<FakeMembers>) {
        let source = Arc::new(source);
        (Arc::new(TelegramDirectory::new(source.clone())), source)
    }

    #[tokio::test]
    async fn test_remembered_identity_is_returned() {
        let (directory, _) = directory(FakeMembers::default());
        let alice = ChatIdentity {
            id: 42,
            handle: Some("alice".to_string()),
            title: Some("Alice Liddell".to_string()),
        };

        directory.remember(alice.clone()).await;

        assert_eq!(directory.get_entity(42).await, Some(alice));
        assert!(directory.get_entity(43).await.is_none());
    }

    #[tokio::test]
    async fn test_later_observation_replaces_stale_profile() {
        let (directory, _) = directory(FakeMembers::default());
        let mut alice = ChatIdentity {
            id: 42,
            handle: None,
            title: Some("Alice".to_string()),
        };
        directory.remember(alice.clone()).await;

        alice.handle = Some("alice".to_string());
        directory.remember(alice.clone()).await;

        assert_eq!(directory.get_entity(42).await, Some(alice));
    }

    #[tokio::test]
    async fn test_scoped_refresh_caches_administrators() {
        let (directory, source) = directory(FakeMembers {
            admins: vec![user(7, "admin")],
            ..Default::default()
        });

        directory.refresh_members(10, false).await.unwrap();

        assert_eq!(directory.get_entity(7).await, Some(user(7, "admin")));
        assert!(source.asked.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_aggressive_tier_finds_uncached_member() {
        let (directory, source) = directory(FakeMembers {
            admins: vec![user(7, "admin")],
            members: HashMap::from([(77, user(77, "bob"))]),
            ..Default::default()
        });
        directory.remember(user(1, "known")).await;
        let resolver = Resolver::new(directory.clone());

        let found = resolver.resolve(Some(77), Some(10)).await;

        assert_eq!(found, Some(user(77, "bob")));
        // Only the missing id is asked about, never cached ones.
        assert_eq!(*source.asked.lock().await, vec![77]);
    }

    #[tokio::test]
    async fn test_member_lookup_runs_without_administrators() {
        let (directory, source) = directory(FakeMembers {
            members: HashMap::from([(77, user(77, "bob"))]),
            no_admins: true,
            ..Default::default()
        });
        assert!(directory.get_entity(77).await.is_none());

        assert!(directory.refresh_members(10, false).await.is_err());
        directory.refresh_members(10, true).await.unwrap();

        assert_eq!(directory.get_entity(77).await, Some(user(77, "bob")));
        assert_eq!(*source.asked.lock().await, vec![77]);
    }

    #[tokio::test]
    async fn test_unknown_member_is_not_retried_forever() {
        let (directory, source) = directory(FakeMembers::default());
        assert!(directory.get_entity(5).await.is_none());

        directory.refresh_members(10, true).await.unwrap();
        directory.refresh_members(10, true).await.unwrap();

        assert_eq!(*source.asked.lock().await, vec![5]);
    }
}
