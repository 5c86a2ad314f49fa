//! Server-sent events source
//!
//! Opens `GET <live.url>` with `Accept: text/event-stream` and frames the
//! body into [`RawEvent`]s:
//!
//! - `event:` -- names the event kind
//! - `data:` -- payload; multiple lines are joined with `\n`
//! - `id:` -- remembered and sent back as `Last-Event-ID` on reconnect
//! - `retry:` and comment lines -- ignored (reconnect timing belongs to
//!   the channel's backoff policy)
//! - `event: ping` or `data: [PING]` -- dropped

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{EventSource, RawEvent};
use crate::config::LiveConfig;
use crate::error::{Result, ReviewSyncError};

/// Event source over an SSE endpoint.
#[derive(Debug, Clone)]
pub struct SseEventSource {
    client: reqwest::Client,
    url: url::Url,
    credential: Option<String>,
    last_event_id: Arc<RwLock<Option<String>>>,
}

impl SseEventSource {
    /// Source for `config.url`.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewSyncError::Config`] for an unparsable URL.
    pub fn new(config: &LiveConfig) -> Result<Self> {
        let url = url::Url::parse(&config.url)
            .map_err(|e| ReviewSyncError::Config(format!("Invalid live.url: {}", e)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            url,
            credential: None,
            last_event_id: Arc::new(RwLock::new(None)),
        })
    }

    /// Sends `credential` as a bearer token when opening.
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Id of the last event received, if any.
    pub async fn last_event_id(&self) -> Option<String> {
        self.last_event_id.read().await.clone()
    }
}

#[async_trait]
impl EventSource for SseEventSource {
    async fn open(&self) -> Result<BoxStream<'static, RawEvent>> {
        let mut req = self
            .client
            .get(self.url.as_str())
            .header("Accept", "text/event-stream");
        if let Some(id) = self.last_event_id.read().await.as_deref() {
            req = req.header("Last-Event-ID", id);
        }
        if let Some(credential) = &self.credential {
            req = req.bearer_auth(credential);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ReviewSyncError::Transport(format!("event stream request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReviewSyncError::Transport(format!(
                "event stream returned HTTP {}",
                status
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let last_event_id = Arc::clone(&self.last_event_id);
        tokio::spawn(parse_sse_stream(response.bytes_stream(), tx, last_event_id));

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// Frames an SSE byte stream into events and forwards them to `tx`.
///
/// Runs until the byte stream ends, errors, or the receiver is dropped.
pub async fn parse_sse_stream<E>(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, E>>,
    tx: mpsc::UnboundedSender<RawEvent>,
    last_event_id: Arc<RwLock<Option<String>>>,
) where
    E: std::fmt::Display,
{
    let mut buffer: Vec<u8> = Vec::new();

    tokio::pin!(byte_stream);

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "Event stream read failed");
                return;
            }
        };
        buffer.extend(chunk.iter().filter(|b| **b != b'\r'));

        while let Some(pos) = find_boundary(&buffer) {
            let block: Vec<u8> = buffer.drain(..pos + 2).collect();
            let text = String::from_utf8_lossy(&block[..pos]);
            if !forward(&text, &tx, &last_event_id).await {
                return;
            }
        }
    }

    if !buffer.is_empty() {
        let text = String::from_utf8_lossy(&buffer).into_owned();
        forward(&text, &tx, &last_event_id).await;
    }
}

fn find_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Returns `false` once the receiver is gone.
async fn forward(
    block: &str,
    tx: &mpsc::UnboundedSender<RawEvent>,
    last_event_id: &Arc<RwLock<Option<String>>>,
) -> bool {
    let Some(event) = parse_block(block) else {
        return true;
    };
    if let Some(id) = &event.id {
        *last_event_id.write().await = Some(id.clone());
    }
    if is_ping(&event) {
        return true;
    }
    tx.send(event).is_ok()
}

/// Parses one event block. Blocks without data yield `None`.
pub fn parse_block(block: &str) -> Option<RawEvent> {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event = None;
    let mut id = None;

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event = Some(value.to_string()),
            "id" => id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(RawEvent {
        event,
        data: data_lines.join("\n"),
        id,
    })
}

fn is_ping(event: &RawEvent) -> bool {
    event
        .event
        .as_deref()
        .is_some_and(|e| e.eq_ignore_ascii_case("ping"))
        || event.data.trim().eq_ignore_ascii_case("[ping]")
}
