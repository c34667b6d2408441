use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::dispatch::Consumer;
use crate::message::Message;

/// Durable record of received messages
pub trait MessageSink: Send + Sync {
    fn record(&self, message: &Message) -> Result<()>;
}

/// Writes one pretty-printed JSON file per message under
/// `<root>/<platform>/<timestamp>-<id>.json`.
pub struct JsonFileSink {
    root: PathBuf,
}

impl JsonFileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, message: &Message) -> PathBuf {
        let stamp = message.timestamp.format("%Y%m%d-%H%M%S");
        self.root
            .join(message.platform.as_str())
            .join(format!("{}-{}.json", stamp, file_safe(&message.id)))
    }
}

/// Keep ids usable as file names on every platform.
fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl MessageSink for JsonFileSink {
    fn record(&self, message: &Message) -> Result<()> {
        let path = self.path_for(message);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        let json = serde_json::to_string_pretty(&message.to_normalized_form())?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write message file: {}", path.display()))?;

        debug!("Message saved to {}", path.display());
        Ok(())
    }
}

/// Adapts a sink into a dispatcher consumer
pub struct Recorder<S> {
    sink: S,
}

impl<S: MessageSink> Recorder<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

impl<S: MessageSink> Consumer for Recorder<S> {
    fn name(&self) -> &str {
        "recorder"
    }

    fn consume(&self, message: &Message) -> Result<()> {
        self.sink.record(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Platform;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn message(id: &str) -> Message {
        Message::new(id, "hello", Platform::Telegram, "1001", "Alice")
            .with_timestamp(Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 9, 10).unwrap()))
            .with_metadata("chat_id", json!(42))
    }

    #[test]
    fn test_path_layout() {
        let sink = JsonFileSink::new("/data");
        assert_eq!(
            sink.path_for(&message("77")),
            PathBuf::from("/data/telegram/20240501-080910-77.json")
        );
        assert_eq!(
            sink.path_for(&message("../../etc")),
            PathBuf::from("/data/telegram/20240501-080910-______etc.json")
        );
    }

    #[test]
    fn test_record_writes_normalized_json() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path());
        let msg = message("77");

        Recorder::new(sink).consume(&msg).unwrap();

        let path = dir.path().join("telegram").join("20240501-080910-77.json");
        let saved: Message =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(saved.id, "77");
        assert_eq!(saved.content, "hello");
        assert_eq!(saved.metadata["chat_id"], json!(42));
    }

    #[test]
    fn test_record_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("telegram");
        std::fs::write(&blocker, "not a directory").unwrap();

        let sink = JsonFileSink::new(dir.path());
        assert!(sink.record(&message("77")).is_err());
    }
}
