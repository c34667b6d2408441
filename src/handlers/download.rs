use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::handlers::strategy::Strategy;
use crate::message::{Message, Platform};

/// File extensions worth forwarding when linked over plain http(s)
const DOWNLOAD_EXTENSIONS: &[&str] = &[
    ".torrent", ".zip", ".rar", ".7z", ".tar.gz", ".tgz", ".iso", ".mkv", ".mp4",
];

/// A link picked out of a message for the download queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub link: String,
    pub platform: Platform,
    pub message_id: String,
    pub author_id: String,
    pub queued_at: DateTime<Utc>,
}

/// Find download links in free text, in order of appearance.
pub fn extract_links(text: &str) -> Vec<String> {
    words(text)
        .filter(|word| is_download_link(word))
        .map(str::to_string)
        .collect()
}

/// Whitespace-separated words with surrounding brackets and quotes removed
fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split_whitespace()
        .map(|word| word.trim_matches(|c: char| matches!(c, '<' | '>' | '(' | ')' | '"' | '\'')))
}

fn is_download_link(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    if lower.starts_with("magnet:?") || lower.starts_with("thunder://") || lower.starts_with("ed2k://")
    {
        return true;
    }
    if lower.starts_with("http://") || lower.starts_with("https://") {
        let path = lower.split(['?', '#']).next().unwrap_or("");
        return DOWNLOAD_EXTENSIONS.iter().any(|ext| path.ends_with(ext));
    }
    false
}

/// Forwards download links from trusted authors to the download queue.
pub struct DownloadLinkStrategy {
    trusted_authors: HashSet<String>,
    queue: mpsc::UnboundedSender<DownloadRequest>,
}

impl DownloadLinkStrategy {
    /// An empty trust list trusts every author.
    pub fn new(
        trusted_authors: impl IntoIterator<Item = String>,
        queue: mpsc::UnboundedSender<DownloadRequest>,
    ) -> Self {
        Self {
            trusted_authors: trusted_authors.into_iter().collect(),
            queue,
        }
    }

    fn is_trusted(&self, author_id: &str) -> bool {
        self.trusted_authors.is_empty() || self.trusted_authors.contains(author_id)
    }
}

impl Strategy for DownloadLinkStrategy {
    fn name(&self) -> &str {
        "download_link"
    }

    fn can_handle(&self, message: &Message) -> bool {
        self.is_trusted(&message.author_id) && words(&message.content).any(is_download_link)
    }

    fn process(&self, message: &Message) -> Result<bool> {
        let links = extract_links(&message.content);
        if links.is_empty() {
            return Ok(false);
        }

        for link in links {
            info!(platform = %message.platform, id = %message.id, link = %link, "queueing download");
            self.queue
                .send(DownloadRequest {
                    link,
                    platform: message.platform,
                    message_id: message.id.clone(),
                    author_id: message.author_id.clone(),
                    queued_at: Utc::now(),
                })
                .context("Download queue is closed")?;
        }
        Ok(true)
    }
}

/// Drain the download queue, appending each request as a JSON line.
pub async fn run_queue(mut rx: mpsc::UnboundedReceiver<DownloadRequest>, path: PathBuf) {
    info!("Download queue writing to {}", path.display());
    while let Some(request) = rx.recv().await {
        if let Err(e) = append_request(&path, &request).await {
            error!(link = %request.link, error = %format!("{:#}", e), "failed to record download");
        }
    }
    info!("Download queue closed");
}

async fn append_request(path: &Path, request: &DownloadRequest) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    let mut line = serde_json::to_string(request)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open queue file: {}", path.display()))?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
