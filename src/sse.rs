//! Server-sent event framing for OpenAI-style completion streams.

use crate::error::{BridgeError, BridgeResult};
use crate::io_struct::ChatCompletionChunk;
use crate::upstream::ByteStream;
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;

pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Chunk(ChatCompletionChunk),
    Done,
}

pub type EventStream = Pin<Box<dyn Stream<Item = BridgeResult<UpstreamEvent>> + Send>>;

/// Encodes one downstream frame: `data: <json>\n\n`.
pub fn encode_frame<T: Serialize>(event: &T) -> BridgeResult<Bytes> {
    let json = serde_json::to_string(event)?;
    Ok(Bytes::from(format!("data: {}\n\n", json)))
}

/// Incremental SSE decoder.
///
/// Works on raw bytes so that multi-byte characters split across network
/// reads are reassembled before decoding.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes and returns the events of every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<BridgeResult<UpstreamEvent>> {
        self.buffer.extend(bytes.iter().copied().filter(|&b| b != b'\r'));
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = decode_frame(&frame[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Decodes a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<BridgeResult<UpstreamEvent>> {
        let frame = std::mem::take(&mut self.buffer);
        decode_frame(&frame)
    }
}

fn decode_frame(frame: &[u8]) -> Option<BridgeResult<UpstreamEvent>> {
    let text = String::from_utf8_lossy(frame);
    let data = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect::<Vec<_>>()
        .join("\n");
    if data.trim().is_empty() {
        return None;
    }
    if data.trim() == "[DONE]" {
        return Some(Ok(UpstreamEvent::Done));
    }
    Some(parse_chunk(&data))
}

fn parse_chunk(data: &str) -> BridgeResult<UpstreamEvent> {
    let value: Value = serde_json::from_str(data)?;
    if let Some(error) = value.get("error") {
        return Err(BridgeError::UpstreamStream(error.to_string()));
    }
    Ok(UpstreamEvent::Chunk(serde_json::from_value(value)?))
}

struct DecodeState {
    input: ByteStream,
    decoder: SseDecoder,
    ready: VecDeque<BridgeResult<UpstreamEvent>>,
    exhausted: bool,
}

/// Turns an upstream byte stream into a stream of decoded events.
///
/// The stream ends after the first error.
pub fn decode_events(input: ByteStream) -> EventStream {
    let state = DecodeState {
        input,
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        exhausted: false,
    };
    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.ready.pop_front() {
                if event.is_err() {
                    st.ready.clear();
                    st.exhausted = true;
                }
                return Some((event, st));
            }
            if st.exhausted {
                return None;
            }
            match st.input.next().await {
                Some(Ok(bytes)) => {
                    let events = st.decoder.push(&bytes);
                    st.ready.extend(events);
                }
                Some(Err(e)) => {
                    st.exhausted = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.exhausted = true;
                    st.ready.extend(st.decoder.finish());
                }
            }
        }
    }))
}
