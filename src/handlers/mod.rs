pub mod download;
pub mod strategy;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::bot::Bot;
use crate::config::Config;
use crate::dispatch::{named, Consumer};
use crate::message::{Message, Platform};
use crate::storage::{JsonFileSink, Recorder};

use self::download::{DownloadLinkStrategy, DownloadRequest};
use self::strategy::{Strategy, StrategyChain};

/// Per-platform consumer: logs the message and runs that platform's
/// strategy chain.
pub struct PlatformHandler {
    platform: Platform,
    name: String,
    chain: StrategyChain,
}

impl PlatformHandler {
    pub fn new(platform: Platform, chain: StrategyChain) -> Self {
        Self {
            platform,
            name: format!("{}_handler", platform),
            chain,
        }
    }
}

impl Consumer for PlatformHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn consume(&self, message: &Message) -> Result<()> {
        info!("Handling {} message: {}", self.platform, message.preview(50));
        match self.chain.run(message) {
            Some(strategy) => debug!(strategy, id = %message.id, "message handled by strategy"),
            None if !self.chain.is_empty() => {
                debug!(id = %message.id, "no strategy handled message")
            }
            None => {}
        }
        Ok(())
    }
}

/// Global consumer logging a one-line summary of every message
pub fn message_logger() -> impl Consumer {
    named("message_logger", |message: &Message| {
        info!(
            "Message received: [{}] {}: {}",
            message.platform,
            message.author_name,
            message.preview(30)
        );
        Ok(())
    })
}

/// Register the default consumers: the message logger, the JSON recorder
/// when storage is enabled, and one handler per platform.
pub fn register_defaults(
    bot: &mut Bot,
    config: &Config,
    downloads: Option<mpsc::UnboundedSender<DownloadRequest>>,
) -> Result<()> {
    bot.register_global(message_logger())?;

    if config.storage.enabled {
        info!(
            "Recording messages under {}",
            config.storage.directory.display()
        );
        bot.register_global(Recorder::new(JsonFileSink::new(&config.storage.directory)))?;
    }

    for platform in Platform::ALL {
        let mut strategies: Vec<Box<dyn Strategy>> = Vec::new();
        if platform == Platform::Telegram {
            if let Some(queue) = downloads.clone() {
                strategies.push(Box::new(DownloadLinkStrategy::new(
                    config.strategies.download.trusted_author_ids.clone(),
                    queue,
                )));
            }
        }
        bot.register_platform(
            platform,
            PlatformHandler::new(platform, StrategyChain::new(strategies)),
        )?;
    }

    Ok(())
}
