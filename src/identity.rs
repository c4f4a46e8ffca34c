use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::model::ChatIdentity;

/// Source of entity metadata. Its cache fills lazily and may lag behind
/// membership changes, so a miss does not mean the entity does not exist.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Cached lookup by id
    async fn get_entity(&self, id: i64) -> Option<ChatIdentity>;

    /// Repopulate the cache with members of `chat_id`. The aggressive form is
    /// exhaustive and much more expensive.
    async fn refresh_members(&self, chat_id: i64, aggressive: bool) -> Result<()>;
}

/// Cache refresh performed before a lookup tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escalation {
    None,
    Refresh,
    AggressiveRefresh,
}

/// Walked in order; the first tier whose lookup hits wins.
const TIERS: [Escalation; 3] = [
    Escalation::None,
    Escalation::Refresh,
    Escalation::AggressiveRefresh,
];

#[derive(Clone)]
pub struct Resolver {
    directory: Arc<dyn Directory>,
}

impl Resolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Resolve a sender. `None` for system messages (no or zero id) and for
    /// entities still unknown after every tier. Escalation needs `chat_id`.
    pub async fn resolve(&self, user_id: Option<i64>, chat_id: Option<i64>) -> Option<ChatIdentity> {
        let user_id = user_id.filter(|id| *id != 0)?;

        for tier in TIERS {
            match tier {
                Escalation::None => {}
                Escalation::Refresh | Escalation::AggressiveRefresh => {
                    let chat_id = chat_id?;
                    let aggressive = tier == Escalation::AggressiveRefresh;
                    debug!(
                        "Identity {} not cached, refreshing members of {} (aggressive: {})",
                        user_id, chat_id, aggressive
                    );
                    if let Err(e) = self.directory.refresh_members(chat_id, aggressive).await {
                        warn!("Failed to refresh members of chat {}: {:#}", chat_id, e);
                    }
                }
            }

            if let Some(identity) = self.directory.get_entity(user_id).await {
                return Some(identity);
            }
        }

        debug!("Identity {} not found after all lookup tiers", user_id);
        None
    }

    /// Label for a chat; a single cached lookup with no escalation
    pub async fn resolve_chat(&self, chat_id: i64) -> Option<ChatIdentity> {
        self.directory.get_entity(chat_id).await
    }
}
