//! Server-sent-event plumbing shared by both adapters.
//!
//! [`SseLines`] splits a byte stream into `data:` payloads. Bytes are
//! buffered until a full line is available, so multi-byte characters split
//! across network chunks decode correctly. [`pump`] drives a
//! [`StreamDecoder`] over an HTTP response and forwards what it produces.

use futures::StreamExt;
use localforge_core::error::ProviderError;
use localforge_core::event::AgentEvent;
use tokio::sync::mpsc;
use tracing::trace;

/// Incremental `data:` line extractor.
#[derive(Debug, Default)]
pub struct SseLines {
    buffer: Vec<u8>,
}

impl SseLines {
    /// Feed raw bytes; returns every complete `data:` payload.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    // Comments (":") and "event:" lines carry nothing the decoders need;
    // every payload repeats its type inside the JSON body.
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.trim().is_empty() {
        return None;
    }
    Some(data.to_string())
}

/// A protocol-specific state machine turning SSE payloads into events.
pub trait StreamDecoder {
    /// Decode one `data:` payload. A terminal event in the output ends the
    /// stream; anything after it is discarded.
    fn decode(&mut self, data: &str) -> Vec<AgentEvent>;

    /// The upstream closed the connection. Must return a terminal event.
    fn finish(&mut self) -> Vec<AgentEvent>;
}

/// Read `response` to completion through `decoder`, sending every event.
///
/// Guarantees exactly one terminal event unless the receiver goes away.
pub async fn pump<D: StreamDecoder>(
    response: reqwest::Response,
    mut decoder: D,
    tx: &mpsc::Sender<AgentEvent>,
) {
    let mut lines = SseLines::default();
    let mut bytes = response.bytes_stream();

    while let Some(chunk) = bytes.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let err = ProviderError::StreamInterrupted(e.to_string());
                let _ = tx.send(AgentEvent::error(err.to_string())).await;
                return;
            }
        };
        for data in lines.push(&chunk) {
            trace!(data = %data, "SSE payload");
            if forward(decoder.decode(&data), tx).await {
                return;
            }
        }
    }

    if let Some(data) = lines.finish()
        && forward(decoder.decode(&data), tx).await
    {
        return;
    }
    forward(decoder.finish(), tx).await;
}

/// Send events in order. Returns `true` once the stream must stop, either
/// because a terminal event went out or because the receiver is gone.
async fn forward(events: Vec<AgentEvent>, tx: &mpsc::Sender<AgentEvent>) -> bool {
    for event in events {
        let terminal = event.is_terminal();
        if tx.send(event).await.is_err() || terminal {
            return true;
        }
    }
    false
}
