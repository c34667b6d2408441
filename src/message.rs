use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::RawEvent;

/// Chat platform a message originated from
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    Discord,
    Twitter,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Telegram, Platform::Discord, Platform::Twitter];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Telegram => "telegram",
            Platform::Discord => "discord",
            Platform::Twitter => "twitter",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "telegram" => Ok(Platform::Telegram),
            "discord" => Ok(Platform::Discord),
            "twitter" => Ok(Platform::Twitter),
            other => anyhow::bail!("unknown platform: {other}"),
        }
    }
}

/// A message received from any platform, normalized into one shape.
///
/// Built once by a listener and handed to consumers by reference, so nothing
/// downstream can change it while it is being dispatched. Consumers that want
/// to annotate a message build a new value instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Platform-unique identifier of the source event
    pub id: String,
    pub content: String,
    pub platform: Platform,
    pub author_id: String,
    /// Best-effort display name of the sender
    pub author_name: String,
    pub timestamp: DateTime<Utc>,
    /// Attachment URLs, in the order the platform reported them
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Platform-specific extras (chat id, guild id, ...)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Untranslated platform event. Only lives as long as in-process handling
    /// and is never serialized.
    #[serde(skip)]
    pub raw_event: Option<Arc<RawEvent>>,
}

impl Message {
    /// Create a message stamped with the current time and no extras.
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        platform: Platform,
        author_id: impl Into<String>,
        author_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            platform,
            author_id: author_id.into(),
            author_name: author_name.into(),
            timestamp: Utc::now(),
            attachments: Vec::new(),
            metadata: HashMap::new(),
            raw_event: None,
        }
    }

    /// Use the source event's time; keep the ingestion time when it has none.
    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        if let Some(ts) = timestamp {
            self.timestamp = ts;
        }
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_raw_event(mut self, raw: RawEvent) -> Self {
        self.raw_event = Some(Arc::new(raw));
        self
    }

    /// Platform-agnostic JSON form, as written by persistence sinks.
    pub fn to_normalized_form(&self) -> serde_json::Value {
        // Every field is plain data with string keys, so this cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// The first `max_chars` characters of the content, for log lines.
    pub fn preview(&self, max_chars: usize) -> String {
        match self.content.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}...", &self.content[..idx]),
            None => self.content.clone(),
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.platform, self.author_name, self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample() -> Message {
        Message::new("42", "grab this one", Platform::Telegram, "1001", "Alice Smith")
            .with_timestamp(Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()))
            .with_attachments(vec![
                "tg://file/abc".to_string(),
                "tg://file/def".to_string(),
            ])
            .with_metadata("chat_id", json!(-100123))
            .with_metadata("chat_title", json!(null))
    }

    #[test]
    fn test_normalized_form_round_trips() {
        let msg = sample();
        let text = serde_json::to_string(&msg.to_normalized_form()).unwrap();
        let back: Message = serde_json::from_str(&text).unwrap();

        assert_eq!(back.id, msg.id);
        assert_eq!(back.content, msg.content);
        assert_eq!(back.platform, msg.platform);
        assert_eq!(back.author_id, msg.author_id);
        assert_eq!(back.author_name, msg.author_name);
        assert_eq!(back.timestamp, msg.timestamp);
        assert_eq!(back.attachments, msg.attachments);
        assert_eq!(back.metadata, msg.metadata);
        assert!(back.raw_event.is_none());
    }

    #[test]
    fn test_raw_event_is_never_serialized() {
        let msg = sample().with_raw_event(RawEvent::Other {
            platform: Platform::Discord,
            payload: json!({"secret": true}),
        });
        let form = msg.to_normalized_form();
        assert!(form.get("raw_event").is_none());
        assert_eq!(form["platform"], "telegram");
    }

    #[test]
    fn test_empty_content_and_attachments_are_kept() {
        let msg = Message::new("1", "", Platform::Discord, "7", "bob");
        let form = msg.to_normalized_form();
        assert_eq!(form["content"], "");
        assert_eq!(form["attachments"], json!([]));
    }

    #[test]
    fn test_missing_timestamp_defaults_to_ingestion_time() {
        let before = Utc::now();
        let msg = Message::new("1", "x", Platform::Twitter, "7", "bob").with_timestamp(None);
        assert!(msg.timestamp >= before);
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let msg = Message::new("1", "héllo wörld", Platform::Telegram, "7", "bob");
        assert_eq!(msg.preview(5), "héllo...");
        assert_eq!(msg.preview(50), "héllo wörld");
    }

    #[test]
    fn test_platform_parse_and_display() {
        assert_eq!(" Telegram ".parse::<Platform>().unwrap(), Platform::Telegram);
        assert_eq!(Platform::Discord.to_string(), "discord");
        assert!("myspace".parse::<Platform>().is_err());
    }
}
