pub mod reconnect;
pub mod telegram;
pub mod transport;
pub mod unimplemented;

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::warn;

use crate::config::Config;
use crate::message::{Message, Platform};

pub use reconnect::ReconnectPolicy;
pub use telegram::TelegramListener;
pub use unimplemented::UnimplementedListener;

/// Consumer a listener hands each normalized message to
pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// A platform-native event before normalization
#[derive(Debug)]
pub enum RawEvent {
    Telegram(Box<teloxide::types::Message>),
    /// Payload from a platform that has no native event type wired yet
    Other {
        platform: Platform,
        payload: serde_json::Value,
    },
}

/// Lifecycle of a listener.
///
/// `Created -> Connecting -> Ready -> Stopping -> Stopped`, with
/// `Connecting -> Failed` once the retry budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Connecting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// A required credential or setting is missing or invalid.
    #[error("{platform} listener misconfigured: {message}")]
    Configuration { platform: Platform, message: String },

    /// Session establishment kept failing until the retry budget ran out.
    #[error("{platform} listener start failed after {attempts} attempt(s): {source}")]
    Connection {
        platform: Platform,
        attempts: u32,
        #[source]
        source: transport::TransportError,
    },

    /// The platform is only an extension point so far.
    #[error("{platform} listener is not implemented")]
    NotImplemented { platform: Platform },

    /// The live session hit an unrecoverable error.
    #[error("{platform} session failed: {source}")]
    Session {
        platform: Platform,
        #[source]
        source: transport::TransportError,
    },
}

impl ListenerError {
    pub fn configuration(platform: Platform, message: impl std::fmt::Display) -> Self {
        Self::Configuration {
            platform,
            message: message.to_string(),
        }
    }

    /// Short error kind for structured log lines
    pub fn kind(&self) -> &'static str {
        match self {
            ListenerError::Configuration { .. } => "configuration",
            ListenerError::Connection { .. } => "connection",
            ListenerError::NotImplemented { .. } => "not_implemented",
            ListenerError::Session { .. } => "session",
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            ListenerError::Configuration { platform, .. }
            | ListenerError::Connection { platform, .. }
            | ListenerError::NotImplemented { platform }
            | ListenerError::Session { platform, .. } => *platform,
        }
    }
}

/// Why a raw event could not be turned into a message. Never leaves the
/// listener: the event is logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum NormalizationError {
    #[error("event has no sender")]
    MissingAuthor,
    #[error("{0} events are not handled by this listener")]
    WrongPlatform(Platform),
}

/// One platform's live connection plus raw-to-normalized translation.
#[async_trait]
pub trait Listener: Send + Sync {
    fn platform(&self) -> Platform;

    fn state(&self) -> ListenerState;

    /// Connect and deliver events until `stop` is called or the session
    /// fails for good.
    async fn start(&self) -> Result<(), ListenerError>;

    /// Idempotent; safe to call before or without `start`.
    async fn stop(&self) -> Result<(), ListenerError>;

    /// Filter and normalize one platform event. `None` means the event was
    /// ignored or could not be translated.
    fn process_event(&self, raw: RawEvent) -> Option<Message>;

    /// Replace the single consumer normalized messages are handed to.
    fn register_callback(&self, callback: MessageCallback);
}

/// Single-slot holder for a listener's callback
#[derive(Default)]
pub struct CallbackSlot {
    inner: RwLock<Option<MessageCallback>>,
}

impl CallbackSlot {
    pub fn set(&self, callback: MessageCallback) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub fn is_set(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Hand a message to the registered callback. Messages that arrive before
    /// a callback is registered are dropped.
    pub fn deliver(&self, platform: Platform, message: &Message) {
        let callback = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match callback {
            Some(callback) => callback(message),
            None => warn!(
                platform = %platform,
                id = %message.id,
                "no message callback registered, dropping message"
            ),
        }
    }
}

/// Build the listener for one enabled platform.
pub fn build_listener(
    platform: Platform,
    config: &Config,
) -> Result<Arc<dyn Listener>, ListenerError> {
    match platform {
        Platform::Telegram => {
            let listener = TelegramListener::from_config(config)?;
            Ok(Arc::new(listener))
        }
        Platform::Discord | Platform::Twitter => Ok(Arc::new(UnimplementedListener::new(platform))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_callback_slot_replaces_previous_callback() {
        let slot = CallbackSlot::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        slot.set(Arc::new(move |m: &Message| {
            first.lock().unwrap().push(format!("first:{}", m.id))
        }));
        let second = Arc::clone(&seen);
        slot.set(Arc::new(move |m: &Message| {
            second.lock().unwrap().push(format!("second:{}", m.id))
        }));

        let msg = Message::new("9", "hi", Platform::Telegram, "1", "a");
        slot.deliver(Platform::Telegram, &msg);

        assert_eq!(*seen.lock().unwrap(), vec!["second:9".to_string()]);
    }

    #[test]
    fn test_callback_slot_drops_messages_without_callback() {
        let slot = CallbackSlot::default();
        assert!(!slot.is_set());
        let msg = Message::new("9", "hi", Platform::Telegram, "1", "a");
        slot.deliver(Platform::Telegram, &msg);
    }

    #[test]
    fn test_error_kinds() {
        let err = ListenerError::NotImplemented {
            platform: Platform::Twitter,
        };
        assert_eq!(err.kind(), "not_implemented");
        assert_eq!(err.platform(), Platform::Twitter);
        assert_eq!(err.to_string(), "twitter listener is not implemented");

        let err = ListenerError::configuration(Platform::Telegram, "bot_token is empty");
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_build_listener_for_stub_platforms() {
        let config = Config::default();
        let listener = build_listener(Platform::Discord, &config).unwrap();
        assert_eq!(listener.platform(), Platform::Discord);
        assert_eq!(listener.state(), ListenerState::Created);
    }

    #[test]
    fn test_build_listener_requires_telegram_token() {
        let config = Config::default();
        let err = match build_listener(Platform::Telegram, &config) {
            Ok(_) => panic!("expected a configuration error"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), "configuration");
    }
}
