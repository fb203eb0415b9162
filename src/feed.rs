//! Message feed: a JSON-lines stream on stdin plus a spool file that
//! doubles as the backlog for rescans.
//!
//! Each stdin line is one message, e.g.
//! `{"sender":"+79990000001","body":"code 4242","received_at":1700000000000}`.
//! `received_at` may be omitted; receipt time is stamped in. Every line is
//! appended to the spool before capture, so a crash between receipt and
//! delivery is recovered by the next backlog scan.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use relay_core::Message;
use relay_delivery::{DeliveryError, MessageBacklog};
use serde::Deserialize;
use tokio::{
    fs::OpenOptions,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
};

#[derive(Debug, Deserialize)]
struct FeedLine {
    sender: String,
    body: String,
    received_at: Option<i64>,
}

/// Parses one feed line, stamping receipt time when absent.
///
/// Returns `None` for lines that are not valid feed records; the feed
/// skips them rather than stopping.
pub fn parse_line(line: &str) -> Option<Message> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let parsed: FeedLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("skipping malformed feed line: {}", e);
            return None;
        },
    };
    let received_at =
        parsed.received_at.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
    Some(Message::new(parsed.sender, parsed.body, received_at))
}

/// Appends a raw feed line to the spool file.
pub async fn append_to_spool(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("opening spool file {}", path.display()))?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    Ok(())
}

/// Backlog source backed by the JSON-lines spool file.
pub struct SpoolBacklog {
    path: PathBuf,
}

impl SpoolBacklog {
    /// Creates a backlog over the given spool file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MessageBacklog for SpoolBacklog {
    async fn recent(&self, window: usize) -> relay_delivery::Result<Vec<Message>> {
        // A missing spool just means nothing has been received yet.
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DeliveryError::storage(format!(
                    "reading spool {}: {e}",
                    self.path.display()
                )))
            },
        };

        let messages: Vec<Message> = contents.lines().filter_map(parse_line).collect();
        let start = messages.len().saturating_sub(window);
        Ok(messages[start..].to_vec())
    }
}

/// Reads feed lines from stdin until EOF or shutdown.
///
/// Each valid line is spooled and then submitted to `on_message`.
pub async fn run_stdin_feed<F, Fut>(
    spool_path: &Path,
    shutdown: tokio_util::sync::CancellationToken,
    mut on_message: F,
) -> Result<()>
where
    F: FnMut(Message) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            line = lines.next_line() => line.context("reading stdin")?,
        };
        let Some(line) = line else {
            tracing::info!("feed closed");
            return Ok(());
        };
        let Some(message) = parse_line(&line) else { continue };

        append_to_spool(spool_path, line.trim()).await?;
        on_message(message).await;
    }
}
