use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, UpdateKind};
use teloxide::{ApiError, RequestError};
use tracing::{debug, info};

/// How a transport operation failed
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Transient: the session should be (re)established.
    #[error("reconnect needed: {0}")]
    ReconnectNeeded(String),
    /// The session can not continue with the current credentials.
    #[error("fatal transport error: {0}")]
    Fatal(String),
}

/// Session layer a concrete listener is built on.
#[async_trait]
pub trait Transport: Send {
    type Event: Send;

    /// Open a session with the configured credentials.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Wait for the next platform event. Must be cancel safe: dropping the
    /// future loses no events.
    async fn next_event(&mut self) -> Result<Self::Event, TransportError>;

    /// Release the session. Only called after a successful `connect`.
    async fn close(&mut self);
}

/// Strip whitespace and one pair of surrounding quotes from a token.
pub fn sanitize_token(token: &str) -> &str {
    let token = token.trim();
    token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token)
}

/// Long-polling session against the Telegram Bot API
pub struct TelegramTransport {
    bot: Bot,
    poll_timeout: u32,
    offset: i32,
    pending: VecDeque<teloxide::types::Message>,
}

impl TelegramTransport {
    pub fn new(token: &str, proxy: Option<&str>, poll_timeout: u32) -> anyhow::Result<Self> {
        // The HTTP timeout has to outlive the long-poll timeout, otherwise the
        // client gives up before Telegram answers.
        let mut builder = teloxide::net::default_reqwest_settings()
            .timeout(Duration::from_secs(u64::from(poll_timeout) + 15));
        if let Some(url) = proxy {
            let proxy =
                reqwest::Proxy::all(url).with_context(|| format!("Invalid proxy url: {}", url))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            bot: Bot::with_client(sanitize_token(token), client),
            poll_timeout,
            offset: 0,
            pending: VecDeque::new(),
        })
    }
}

fn classify(err: RequestError) -> TransportError {
    match &err {
        RequestError::Api(ApiError::InvalidToken)
        | RequestError::Api(ApiError::TerminatedByOtherGetUpdates) => {
            TransportError::Fatal(err.to_string())
        }
        _ => TransportError::ReconnectNeeded(err.to_string()),
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    type Event = teloxide::types::Message;

    async fn connect(&mut self) -> Result<(), TransportError> {
        let me = self.bot.get_me().await.map_err(classify)?;

        // Long polling does not work while a webhook is set.
        self.bot
            .delete_webhook()
            .send()
            .await
            .map_err(classify)?;

        info!(username = ?me.username, "Telegram session established");
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Self::Event, TransportError> {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return Ok(msg);
            }

            let updates = self
                .bot
                .get_updates()
                .offset(self.offset)
                .timeout(self.poll_timeout)
                .allowed_updates(vec![AllowedUpdate::Message])
                .await
                .map_err(classify)?;

            debug!(count = updates.len(), "got telegram updates");
            for update in updates {
                self.offset = update.id.as_offset();
                match update.kind {
                    UpdateKind::Message(msg) => self.pending.push_back(msg),
                    other => debug!("ignoring non-message update: {other:?}"),
                }
            }
        }
    }

    async fn close(&mut self) {
        if !self.pending.is_empty() {
            debug!(
                dropped = self.pending.len(),
                "discarding buffered telegram updates"
            );
        }
        self.pending.clear();
        info!("Telegram session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_token() {
        assert_eq!(sanitize_token("  123:abc \n"), "123:abc");
        assert_eq!(sanitize_token("\"123:abc\""), "123:abc");
        assert_eq!(sanitize_token("\"unbalanced"), "\"unbalanced");
    }

    #[test]
    fn test_invalid_token_is_fatal() {
        let err = classify(RequestError::Api(ApiError::InvalidToken));
        assert!(matches!(err, TransportError::Fatal(_)));
    }

    #[test]
    fn test_conflicting_poller_is_fatal() {
        let err = classify(RequestError::Api(ApiError::TerminatedByOtherGetUpdates));
        assert!(matches!(err, TransportError::Fatal(_)));
    }

    #[test]
    fn test_rate_limit_needs_reconnect() {
        let err = classify(RequestError::RetryAfter(
            teloxide::types::Seconds::from_seconds(3),
        ));
        assert!(matches!(err, TransportError::ReconnectNeeded(_)));
    }

    #[test]
    fn test_new_rejects_bad_proxy() {
        assert!(TelegramTransport::new("123:abc", Some("not a url"), 30).is_err());
    }
}
