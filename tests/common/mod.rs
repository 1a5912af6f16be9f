#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use serde_json::{Value, json};
use std::sync::Mutex;
use toolbridge_rs::{BridgeError, BridgeResult, ByteStream, Upstream};

/// What the scripted upstream answers with.
pub enum Reply {
    Json(Value),
    /// Raw SSE body delivered in these exact pieces.
    Sse(Vec<Vec<u8>>),
    Status(u16),
}

/// In-memory upstream that records every payload it receives.
pub struct ScriptedUpstream {
    reply: Reply,
    seen: Mutex<Vec<Value>>,
}

impl ScriptedUpstream {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }

    fn record(&self, body: &Value) -> BridgeResult<()> {
        self.seen.lock().unwrap().push(body.clone());
        match self.reply {
            Reply::Status(status) => Err(BridgeError::UpstreamStatus {
                status,
                body: "scripted failure".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn complete(&self, body: &Value) -> BridgeResult<Bytes> {
        self.record(body)?;
        match &self.reply {
            Reply::Json(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
            _ => panic!("scripted upstream has no JSON reply"),
        }
    }

    async fn complete_stream(&self, body: &Value) -> BridgeResult<ByteStream> {
        self.record(body)?;
        match &self.reply {
            Reply::Sse(pieces) => {
                let items: Vec<BridgeResult<Bytes>> = pieces
                    .iter()
                    .map(|piece| Ok(Bytes::from(piece.clone())))
                    .collect();
                Ok(Box::pin(stream::iter(items)))
            }
            _ => panic!("scripted upstream has no SSE reply"),
        }
    }
}

pub fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-42",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "qwen2-72b",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop",
            "logprobs": null
        }]
    })
}

/// Encodes `fragments` as an upstream SSE body ending with `[DONE]`.
pub fn sse_body(fragments: &[&str]) -> Vec<u8> {
    let mut body = String::new();
    for (i, fragment) in fragments.iter().enumerate() {
        let chunk = json!({
            "id": "chatcmpl-42",
            "object": "chat.completion.chunk",
            "created": 1700000000 + i as u64,
            "model": "qwen2-72b",
            "choices": [{"index": 0, "delta": {"content": fragment}, "finish_reason": null}]
        });
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    let last = json!({
        "id": "chatcmpl-42",
        "object": "chat.completion.chunk",
        "created": 1700000099,
        "model": "qwen2-72b",
        "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
    });
    body.push_str(&format!("data: {}\n\ndata: [DONE]\n\n", last));
    body.into_bytes()
}

/// Splits `bytes` into pieces of `size` bytes, ignoring char boundaries.
pub fn split_bytes(bytes: &[u8], size: usize) -> Vec<Vec<u8>> {
    bytes.chunks(size).map(<[u8]>::to_vec).collect()
}

/// Parses a downstream SSE body into its JSON events, skipping `[DONE]`.
pub fn sse_events(body: &[u8]) -> Vec<Value> {
    let text = String::from_utf8_lossy(body);
    text.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .filter(|data| *data != "[DONE]")
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

pub fn weather_request(stream: bool) -> Value {
    json!({
        "model": "qwen2-72b",
        "stream": stream,
        "temperature": 0.1,
        "messages": [{"role": "user", "content": "What's the weather in Paris?"}],
        "tools": [{
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Get the current weather in a given city",
                "parameters": {
                    "type": "object",
                    "properties": {"city": {"type": "string"}},
                    "required": ["city"]
                }
            }
        }],
        "tool_choice": "auto"
    })
}
