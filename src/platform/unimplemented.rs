use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use super::{CallbackSlot, Listener, ListenerError, ListenerState, MessageCallback, RawEvent};
use crate::message::{Message, Platform};

/// Placeholder for a platform with no transport yet. It takes part in the
/// lifecycle like any other listener but its `start` always fails.
pub struct UnimplementedListener {
    platform: Platform,
    state: watch::Sender<ListenerState>,
    callback: CallbackSlot,
}

impl UnimplementedListener {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            state: watch::Sender::new(ListenerState::Created),
            callback: CallbackSlot::default(),
        }
    }
}

#[async_trait]
impl Listener for UnimplementedListener {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    async fn start(&self) -> Result<(), ListenerError> {
        warn!(platform = %self.platform, "listener is not implemented yet");
        self.state.send_replace(ListenerState::Failed);
        Err(ListenerError::NotImplemented {
            platform: self.platform,
        })
    }

    async fn stop(&self) -> Result<(), ListenerError> {
        self.state.send_if_modified(|state| {
            if *state == ListenerState::Created {
                *state = ListenerState::Stopped;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    fn process_event(&self, raw: RawEvent) -> Option<Message> {
        info!(platform = %self.platform, ?raw, "ignoring event");
        None
    }

    fn register_callback(&self, callback: MessageCallback) {
        self.callback.set(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_start_reports_not_implemented() {
        let listener = UnimplementedListener::new(Platform::Discord);
        listener.register_callback(Arc::new(|_: &Message| {}));
        assert_eq!(listener.state(), ListenerState::Created);

        let err = listener.start().await.unwrap_err();
        assert_eq!(err.kind(), "not_implemented");
        assert_eq!(err.platform(), Platform::Discord);
        assert_eq!(listener.state(), ListenerState::Failed);

        // stop after a failed start leaves the terminal state alone
        listener.stop().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Failed);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let listener = UnimplementedListener::new(Platform::Twitter);
        listener.stop().await.unwrap();
        listener.stop().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[test]
    fn test_events_are_ignored() {
        let listener = UnimplementedListener::new(Platform::Twitter);
        let raw = RawEvent::Other {
            platform: Platform::Twitter,
            payload: json!({"text": "hi"}),
        };
        assert!(listener.process_event(raw).is_none());
    }
}
