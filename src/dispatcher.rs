use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::config::LoggerConfig;
use crate::diff::{reconstruct, Diff, UnchangedEdits};
use crate::format::{render, Labels};
use crate::identity::Resolver;
use crate::media::{media_path, spawn_download, MediaFetcher};
use crate::model::{EventKind, EventRecord};
use crate::platform::{IncomingMessage, TransportEvent};
use crate::sink::Sink;
use crate::store::{ChatScope, Decision, EventStore};

/// Everything the dispatcher needs, built once at startup
pub struct Context {
    pub config: LoggerConfig,
    pub resolver: Resolver,
    pub store: EventStore,
    pub sink: Arc<dyn Sink>,
    /// Present when the transport can fetch media
    pub media: Option<Arc<dyn MediaFetcher>>,
}

/// What became of one event
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The chat is not logged
    Filtered,
    /// An edit that changed nothing, dropped by policy
    Unchanged,
    /// Persisted and written to the sink
    Logged(String),
}

/// Turns transport events into log lines and stored records.
/// Events are expected one at a time, in delivery order.
pub struct Dispatcher {
    ctx: Context,
}

impl Dispatcher {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Process one transport event. Failures are logged and contained to the
    /// message they concern.
    pub async fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::Created(msg) => {
                let result = self.process_message(EventKind::MessageCreated, &msg).await;
                report(EventKind::MessageCreated, Some(msg.chat_id), msg.id, result);
            }
            TransportEvent::Edited(msg) => {
                let result = self.process_message(EventKind::MessageEdited, &msg).await;
                report(EventKind::MessageEdited, Some(msg.chat_id), msg.id, result);
            }
            TransportEvent::Deleted {
                message_ids,
                chat_id,
            } => {
                for message_id in message_ids {
                    let result = self.process_deletion(chat_id, message_id).await;
                    report(EventKind::MessageDeleted, chat_id, message_id, result);
                }
            }
        }
    }

    /// Created or edited message
    pub async fn process_message(&self, kind: EventKind, msg: &IncomingMessage) -> Result<Outcome> {
        let config = &self.ctx.config;
        if !config.is_chat_enabled(msg.chat_id) {
            return Ok(Outcome::Filtered);
        }

        let record = msg.to_record(kind);

        // Identity lookups may hit the network; finish them before the store
        // transaction opens.
        let labels = Labels {
            chat: self.ctx.resolver.resolve_chat(msg.chat_id).await,
            user: self
                .ctx
                .resolver
                .resolve(msg.sender_id, Some(msg.chat_id))
                .await,
        };

        let diff = match kind {
            EventKind::MessageCreated => {
                self.ctx.store.append(&record).await?;
                reconstruct(&record, None)
            }
            _ => {
                let skip_unchanged = config.unchanged_edits == UnchangedEdits::Skip;
                let diff = self
                    .ctx
                    .store
                    .reconcile(&record, ChatScope::Exact(msg.chat_id), |prior| {
                        let diff = reconstruct(&record, prior);
                        if skip_unchanged && !diff.content_changed() {
                            Decision::Skip(None)
                        } else {
                            Decision::Append(Some(diff))
                        }
                    })
                    .await?;
                match diff {
                    Some(diff) => diff,
                    None => {
                        debug!(
                            "Edit of message {} in chat {} left content unchanged, skipping",
                            msg.id, msg.chat_id
                        );
                        return Ok(Outcome::Unchanged);
                    }
                }
            }
        };

        let line = self.emit(&record, &diff, &labels);

        if let (true, Some(fetcher), Some(media)) =
            (config.save_media, &self.ctx.media, &msg.media)
        {
            let dest = media_path(&config.media_directory, msg.chat_id, msg.id, media);
            spawn_download(fetcher.clone(), media.clone(), dest);
        }

        Ok(Outcome::Logged(line))
    }

    /// One id out of a deletion batch
    pub async fn process_deletion(&self, chat_id: Option<i64>, message_id: i64) -> Result<Outcome> {
        let config = &self.ctx.config;
        if let Some(chat_id) = chat_id {
            if !config.is_chat_enabled(chat_id) {
                return Ok(Outcome::Filtered);
            }
        }

        let record = EventRecord::deletion(chat_id, message_id);
        let chat_label = match chat_id {
            Some(id) => self.ctx.resolver.resolve_chat(id).await,
            None => None,
        };

        let diff = self
            .ctx
            .store
            .reconcile(&record, ChatScope::from(chat_id), |prior| {
                // Without chat context, the prior row is the only hint of
                // which chat this was, so the policy applies to that.
                let prior_chat = prior.as_ref().and_then(|p| p.chat_id);
                if let (None, Some(prior_chat)) = (chat_id, prior_chat) {
                    if !config.is_chat_enabled(prior_chat) {
                        return Decision::Skip(None);
                    }
                }
                Decision::Append(Some(reconstruct(&record, prior)))
            })
            .await?;

        let Some(diff) = diff else {
            return Ok(Outcome::Filtered);
        };

        // Deletions carry no author; take it from the prior state.
        let prior = diff.before.as_ref();
        let labels = Labels {
            chat: chat_label,
            user: self
                .ctx
                .resolver
                .resolve(
                    prior.and_then(|p| p.user_id),
                    chat_id.or(prior.and_then(|p| p.chat_id)),
                )
                .await,
        };

        let line = self.emit(&record, &diff, &labels);
        Ok(Outcome::Logged(line))
    }

    /// Render and write the line. Runs after the row is committed, so a sink
    /// failure is reported but does not undo the event.
    fn emit(&self, record: &EventRecord, diff: &Diff, labels: &Labels) -> String {
        let line = render(record, diff, labels);
        if let Err(e) = self.ctx.sink.write_line(record.chat_id, diff.kind, &line) {
            warn!(
                "{} event for message {} in chat {:?} persisted but not written to sink: {:#}",
                diff.kind.tag(),
                record.message_id,
                record.chat_id,
                e
            );
        }
        line
    }
}

fn report(kind: EventKind, chat_id: Option<i64>, message_id: i64, result: Result<Outcome>) {
    match result {
        Ok(Outcome::Filtered) => {
            debug!("Ignored {} event for chat {:?}", kind.tag(), chat_id)
        }
        Ok(_) => {}
        Err(e) => warn!(
            "Dropped {} event for message {} in chat {:?}: {:#}",
            kind.tag(),
            message_id,
            chat_id,
            e
        ),
    }
}
