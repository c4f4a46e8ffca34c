mod config;
mod diff;
mod dispatcher;
mod error;
mod format;
mod identity;
mod media;
mod model;
mod platform;
mod sink;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::identity::Resolver;
use crate::media::MediaFetcher;
use crate::platform::telegram::{self, TelegramDirectory, TelegramMediaFetcher};
use crate::sink::{ConsoleSink, FileSink, Sink};
use crate::store::EventStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics go to stderr so stdout carries only logged lines
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,telegram_logger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Database: {}", config.storage.database_path.display());
    info!("  Enabled chats: {:?}", config.logger.enabled_chats);
    info!("  Disabled chats: {:?}", config.logger.disabled_chats);
    info!("  Save media: {}", config.logger.save_media);
    info!("  Log to file: {}", config.logger.log_to_file);

    // Migration failure is fatal: never process events against an unknown schema
    let store = EventStore::open(&config.storage.database_path)?;
    info!("  Recorded events: {}", store.count().await?);

    let bot = Bot::new(&config.telegram.bot_token);
    let directory = Arc::new(TelegramDirectory::new(Arc::new(bot.clone())));

    let sink: Arc<dyn Sink> = if config.logger.log_to_file {
        Arc::new(FileSink::new(&config.logger.log_directory))
    } else {
        Arc::new(ConsoleSink::new(config.logger.color))
    };
    let media: Arc<dyn MediaFetcher> = Arc::new(TelegramMediaFetcher::new(bot.clone()));

    let dispatcher = Arc::new(Dispatcher::new(dispatcher::Context {
        config: config.logger.clone(),
        resolver: Resolver::new(directory.clone()),
        store,
        sink,
        media: Some(media),
    }));

    info!("Listening for messages");
    telegram::run(bot, directory, dispatcher).await?;

    Ok(())
}
