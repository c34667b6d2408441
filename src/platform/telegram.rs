use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::json;
use teloxide::types::{MediaKind, MessageKind, User};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::{Config, TelegramConfig};
use crate::message::{Message, Platform};
use crate::platform::transport::{sanitize_token, TelegramTransport, Transport, TransportError};
use crate::platform::{
    CallbackSlot, Listener, ListenerError, ListenerState, MessageCallback, NormalizationError,
    RawEvent, ReconnectPolicy,
};

type TgMessage = teloxide::types::Message;

const PLATFORM: Platform = Platform::Telegram;

/// Which chats and senders are let through to normalization.
/// Empty sets mean "everyone".
#[derive(Debug, Clone, Default)]
pub struct EventFilters {
    pub channel_ids: HashSet<i64>,
    pub author_ids: HashSet<u64>,
}

impl From<&TelegramConfig> for EventFilters {
    fn from(config: &TelegramConfig) -> Self {
        Self {
            channel_ids: config.channel_ids.iter().copied().collect(),
            author_ids: config.author_ids.iter().copied().collect(),
        }
    }
}

impl EventFilters {
    pub fn accepts(&self, msg: &TgMessage) -> bool {
        let chat_id = msg.chat.id.0;
        if !self.channel_ids.is_empty() && !self.channel_ids.contains(&chat_id) {
            debug!(chat_id, "chat not in allow-list, ignoring");
            return false;
        }

        let author = msg.from.as_ref();
        if !self.author_ids.is_empty()
            && !author.is_some_and(|u| self.author_ids.contains(&u.id.0))
        {
            debug!(chat_id, "author not in allow-list, ignoring");
            return false;
        }

        if author.is_some_and(|u| u.is_bot) {
            debug!(chat_id, "ignoring message from bot account");
            return false;
        }

        true
    }
}

enum SessionEnd {
    Stopped,
    Lost(TransportError),
    Failed(TransportError),
}

/// Telegram listener: owns the transport session and turns Bot API
/// messages into normalized [`Message`]s.
pub struct TelegramListener<T = TelegramTransport> {
    filters: EventFilters,
    policy: ReconnectPolicy,
    transport: Mutex<T>,
    state: watch::Sender<ListenerState>,
    callback: CallbackSlot,
}

impl TelegramListener<TelegramTransport> {
    pub fn from_config(config: &Config) -> Result<Self, ListenerError> {
        let tg = config
            .telegram
            .as_ref()
            .ok_or_else(|| ListenerError::configuration(PLATFORM, "missing [telegram] section"))?;

        if sanitize_token(&tg.bot_token).is_empty() {
            return Err(ListenerError::configuration(PLATFORM, "bot_token is empty"));
        }

        let transport =
            TelegramTransport::new(&tg.bot_token, config.proxy.url(), tg.poll_timeout_secs)
                .map_err(|e| ListenerError::configuration(PLATFORM, format!("{:#}", e)))?;

        info!(
            channels = tg.channel_ids.len(),
            authors = tg.author_ids.len(),
            proxy = config.proxy.url().is_some(),
            "Telegram listener configured"
        );

        Ok(Self::new(
            transport,
            EventFilters::from(tg),
            ReconnectPolicy::from(&config.reconnect),
        ))
    }
}

impl<T> TelegramListener<T>
where
    T: Transport<Event = TgMessage>,
{
    pub fn new(transport: T, filters: EventFilters, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ListenerState::Created);
        Self {
            filters,
            policy,
            transport: Mutex::new(transport),
            state,
            callback: CallbackSlot::default(),
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// Move to `next`. A pending stop can only be replaced by a terminal state.
    fn advance(&self, next: ListenerState) {
        self.state.send_if_modified(|state| {
            let terminal = matches!(next, ListenerState::Stopped | ListenerState::Failed);
            if *state == next || (*state == ListenerState::Stopping && !terminal) {
                return false;
            }
            *state = next;
            true
        });
    }

    /// Try to open a session within the retry budget. `Ok(false)` means a
    /// stop arrived first.
    async fn establish(
        &self,
        transport: &mut T,
        stop_rx: &mut watch::Receiver<ListenerState>,
    ) -> Result<bool, ListenerError> {
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;
            if stop_pending(stop_rx) {
                return Ok(false);
            }

            info!(platform = %PLATFORM, attempt, max_attempts, "connecting");
            let result = tokio::select! {
                result = transport.connect() => result,
                _ = stop_requested(stop_rx) => return Ok(false),
            };

            let err = match result {
                Ok(()) => return Ok(true),
                Err(err @ TransportError::Fatal(_)) => {
                    return Err(ListenerError::Session {
                        platform: PLATFORM,
                        source: err,
                    })
                }
                Err(err) => err,
            };

            if attempt >= max_attempts {
                return Err(ListenerError::Connection {
                    platform: PLATFORM,
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                platform = %PLATFORM,
                attempt,
                max_attempts,
                delay_secs = delay.as_secs(),
                error = %err,
                "connection failed, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_requested(stop_rx) => return Ok(false),
            }
        }
    }

    async fn receive(
        &self,
        transport: &mut T,
        stop_rx: &mut watch::Receiver<ListenerState>,
    ) -> SessionEnd {
        loop {
            let event = tokio::select! {
                event = transport.next_event() => event,
                _ = stop_requested(stop_rx) => return SessionEnd::Stopped,
            };

            match event {
                Ok(msg) => self.handle_event(RawEvent::Telegram(Box::new(msg))),
                Err(err @ TransportError::Fatal(_)) => return SessionEnd::Failed(err),
                Err(err) => return SessionEnd::Lost(err),
            }
        }
    }

    /// Normalize and deliver one event. Only done while the session is ready.
    fn handle_event(&self, raw: RawEvent) {
        if self.state() != ListenerState::Ready {
            debug!(platform = %PLATFORM, "listener not ready, ignoring event");
            return;
        }
        if let Some(message) = self.process_event(raw) {
            self.callback.deliver(PLATFORM, &message);
        }
    }
}

#[async_trait]
impl<T> Listener for TelegramListener<T>
where
    T: Transport<Event = TgMessage>,
{
    fn platform(&self) -> Platform {
        PLATFORM
    }

    fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    async fn start(&self) -> Result<(), ListenerError> {
        let mut transport = self.transport.lock().await;
        self.state.send_replace(ListenerState::Connecting);
        let mut stop_rx = self.state.subscribe();

        if !self.callback.is_set() {
            warn!(platform = %PLATFORM, "starting without a message callback");
        }

        loop {
            match self.establish(&mut *transport, &mut stop_rx).await {
                Ok(true) => {}
                Ok(false) => {
                    self.advance(ListenerState::Stopped);
                    info!(platform = %PLATFORM, "listener stopped before connecting");
                    return Ok(());
                }
                Err(err) => {
                    self.advance(ListenerState::Failed);
                    error!(platform = %PLATFORM, kind = err.kind(), error = %err, "listener failed");
                    return Err(err);
                }
            }

            self.advance(ListenerState::Ready);
            info!(platform = %PLATFORM, "listener ready");

            let end = self.receive(&mut *transport, &mut stop_rx).await;
            transport.close().await;

            match end {
                SessionEnd::Stopped => {
                    self.advance(ListenerState::Stopped);
                    info!(platform = %PLATFORM, "listener stopped");
                    return Ok(());
                }
                SessionEnd::Lost(err) => {
                    warn!(platform = %PLATFORM, error = %err, "session lost, reconnecting");
                    self.advance(ListenerState::Connecting);
                }
                SessionEnd::Failed(source) => {
                    self.advance(ListenerState::Failed);
                    let err = ListenerError::Session {
                        platform: PLATFORM,
                        source,
                    };
                    error!(platform = %PLATFORM, kind = err.kind(), error = %err, "listener failed");
                    return Err(err);
                }
            }
        }
    }

    async fn stop(&self) -> Result<(), ListenerError> {
        let mut running = false;
        self.state.send_if_modified(|state| match *state {
            ListenerState::Created => {
                *state = ListenerState::Stopped;
                true
            }
            ListenerState::Connecting | ListenerState::Ready => {
                *state = ListenerState::Stopping;
                running = true;
                true
            }
            ListenerState::Stopping => {
                running = true;
                false
            }
            ListenerState::Stopped | ListenerState::Failed => false,
        });

        if !running {
            debug!(platform = %PLATFORM, "listener not running, nothing to stop");
            return Ok(());
        }

        info!(platform = %PLATFORM, "stopping listener");
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|s| matches!(s, ListenerState::Stopped | ListenerState::Failed))
            .await;
        Ok(())
    }

    fn process_event(&self, raw: RawEvent) -> Option<Message> {
        let msg = match &raw {
            RawEvent::Telegram(msg) => msg,
            RawEvent::Other { platform, .. } => {
                let err = NormalizationError::WrongPlatform(*platform);
                warn!(platform = %PLATFORM, error = %err, "dropping event");
                return None;
            }
        };

        if !self.filters.accepts(msg) {
            return None;
        }

        let id = msg.id.0;
        match normalize(msg) {
            Ok(message) => Some(message.with_raw_event(raw)),
            Err(err) => {
                warn!(platform = %PLATFORM, id, error = %err, "dropping event");
                None
            }
        }
    }

    fn register_callback(&self, callback: MessageCallback) {
        self.callback.set(callback);
        info!(platform = %PLATFORM, "message callback registered");
    }
}

fn stop_pending(rx: &watch::Receiver<ListenerState>) -> bool {
    *rx.borrow() == ListenerState::Stopping
}

/// Resolves once a stop has been requested.
async fn stop_requested(rx: &mut watch::Receiver<ListenerState>) {
    let requested = rx
        .wait_for(|s| *s == ListenerState::Stopping)
        .await
        .is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}

fn normalize(msg: &TgMessage) -> Result<Message, NormalizationError> {
    let author = msg.from.as_ref().ok_or(NormalizationError::MissingAuthor)?;
    let content = msg.text().or_else(|| msg.caption()).unwrap_or_default();

    let chat_type = if msg.chat.is_private() {
        "private"
    } else if msg.chat.is_channel() {
        "channel"
    } else {
        "group"
    };

    Ok(Message::new(
        msg.id.0.to_string(),
        content,
        PLATFORM,
        author.id.0.to_string(),
        display_name(author),
    )
    .with_timestamp(Some(msg.date))
    .with_attachments(attachments(msg))
    .with_metadata("chat_id", json!(msg.chat.id.0))
    .with_metadata("chat_type", json!(chat_type))
    .with_metadata("chat_title", json!(msg.chat.title()))
    .with_metadata("username", json!(author.username)))
}

fn display_name(user: &User) -> String {
    let last = user.last_name.as_deref().unwrap_or("");
    let name = format!("{} {}", user.first_name, last).trim().to_string();
    if !name.is_empty() {
        return name;
    }
    match &user.username {
        Some(username) => format!("@{}", username),
        None => user.id.0.to_string(),
    }
}

/// File references for the media a message carries.
fn attachments(msg: &TgMessage) -> Vec<String> {
    let MessageKind::Common(common) = &msg.kind else {
        return Vec::new();
    };
    let file = match &common.media_kind {
        MediaKind::Photo(p) => p.photo.last().map(|ps| format!("tg://file/{}", ps.file.id)),
        MediaKind::Document(d) => Some(format!("tg://file/{}", d.document.file.id)),
        MediaKind::Audio(a) => Some(format!("tg://file/{}", a.audio.file.id)),
        MediaKind::Voice(v) => Some(format!("tg://file/{}", v.voice.file.id)),
        MediaKind::Video(v) => Some(format!("tg://file/{}", v.video.file.id)),
        MediaKind::Sticker(s) => Some(format!("tg://file/{}", s.sticker.file.id)),
        _ => None,
    };
    file.into_iter().collect()
}
