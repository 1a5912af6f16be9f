//! Incremental reconciliation of a streamed upstream reply.
//!
//! The reconciler starts in plain mode and forwards upstream chunks untouched.
//! A [`TRIGGER`] holds back only as much text as could still become the start
//! marker; prose that merely contains the trigger is released right away.
//! Once the marker completes the reconciler is in tool mode: the text is fed
//! one character at a time through a small tag machine that emits OpenAI
//! `tool_calls` deltas, and a single terminal chunk is synthesized when the
//! upstream ends or the call cap is reached.

use crate::error::BridgeResult;
use crate::grammar::{
    ARGS_CLOSE, ARGS_OPEN, MAX_TOOL_CALLS, NAME_CLOSE, NAME_OPEN, START_MARKER, TRIGGER,
};
use crate::io_struct::{
    ChatCompletionChunk, ChunkChoice, Delta, FunctionDelta, ToolCallDelta, generate_call_id,
};
use crate::sse::{DONE_FRAME, EventStream, UpstreamEvent, encode_frame};
use crate::upstream::ByteStream;
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::collections::VecDeque;

/// Per-call parser state.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StreamParseState {
    pub in_tool_mode: bool,
    /// Text received in tool mode and not consumed yet.
    pub carry_buffer: String,
    /// Number of tool calls announced so far.
    pub call_index: usize,
    /// Whether the start marker has been consumed.
    pub mark_found: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenTag {
    Name,
    Arguments,
}

#[derive(Debug, Default)]
pub struct StreamReconciler {
    state: StreamParseState,
    open_tag: Option<OpenTag>,
    awaiting_arguments: bool,
    capped: bool,
    choice_index: u32,
    /// Metadata of the most recent upstream chunk.
    last_chunk: Option<ChatCompletionChunk>,
}

impl StreamReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &StreamParseState {
        &self.state
    }

    pub fn in_tool_mode(&self) -> bool {
        self.state.in_tool_mode
    }

    /// True once [`MAX_TOOL_CALLS`] calls are complete; further input is ignored.
    pub fn is_capped(&self) -> bool {
        self.capped
    }

    /// Consumes one upstream chunk and returns the chunks to send downstream.
    pub fn on_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<ChatCompletionChunk> {
        let mut out = Vec::new();
        self.last_chunk = Some(ChatCompletionChunk {
            choices: Vec::new(),
            ..chunk.clone()
        });
        if self.capped {
            return out;
        }

        if self.state.mark_found {
            if let Some(content) = chunk.content() {
                self.consume(content, &mut out);
            }
            return out;
        }

        let content = chunk.content().unwrap_or_default();
        if !self.state.in_tool_mode && !content.contains(TRIGGER) {
            out.push(chunk);
            return out;
        }
        if !self.state.in_tool_mode {
            self.choice_index = chunk.choices.first().map_or(0, |choice| choice.index);
        }

        let mut calls = Vec::new();
        let visible = self.watch(content, &mut calls);
        if !self.state.in_tool_mode {
            // the trigger was prose after all; forward the chunk as plain text
            let mut plain = chunk.clone();
            if let Some(choice) = plain.choices.first_mut() {
                choice.delta.content = Some(visible);
            }
            out.push(plain);
        } else if !visible.is_empty() {
            let mut head = chunk.clone();
            if let Some(choice) = head.choices.first_mut() {
                choice.delta.content = Some(visible);
                choice.finish_reason = None;
            }
            out.push(head);
        }
        out.extend(calls);
        out
    }

    /// Scans `text` while the start marker has not been seen and returns the
    /// part of it that is ordinary prose.
    ///
    /// Only a possible marker prefix is held back in `carry_buffer`. Once the
    /// marker completes, the rest of `text` goes to the tag machine.
    fn watch(&mut self, text: &str, out: &mut Vec<ChatCompletionChunk>) -> String {
        let mut visible = String::new();
        for (pos, ch) in text.char_indices() {
            if self.state.mark_found {
                self.consume(&text[pos..], out);
                break;
            }
            if !self.state.in_tool_mode {
                if ch != TRIGGER {
                    visible.push(ch);
                    continue;
                }
                self.state.in_tool_mode = true;
            }

            let buffer = &mut self.state.carry_buffer;
            buffer.push(ch);
            if buffer.ends_with(START_MARKER) {
                buffer.clear();
                self.state.mark_found = true;
                log::debug!("Stream switched to tool mode");
                continue;
            }
            let cut = buffer.len() - marker_prefix_len(buffer);
            visible.push_str(&buffer[..cut]);
            buffer.drain(..cut);
            if buffer.is_empty() {
                self.state.in_tool_mode = false;
            }
        }
        visible
    }

    /// Ends the stream. In tool mode this yields the terminal chunk, preceded
    /// by any buffered text that never turned into a marked block.
    pub fn finish(&mut self) -> Vec<ChatCompletionChunk> {
        let mut out = Vec::new();
        if !self.state.in_tool_mode {
            return out;
        }
        let Some(meta) = self.last_chunk.as_ref() else {
            return out;
        };

        if !self.state.mark_found && !self.state.carry_buffer.is_empty() {
            let text = std::mem::take(&mut self.state.carry_buffer);
            let delta = Delta {
                content: Some(text),
                ..Default::default()
            };
            out.push(meta.derive(ChunkChoice::new(self.choice_index, delta, None)));
        }

        let finish_reason = if self.state.call_index > 0 {
            "tool_calls"
        } else {
            "stop"
        };
        log::info!(
            "Stream {} finished with {} tool call(s)",
            meta.id,
            self.state.call_index
        );
        out.push(meta.derive(ChunkChoice::new(
            self.choice_index,
            Delta::default(),
            Some(finish_reason.to_string()),
        )));
        out
    }

    fn consume(&mut self, text: &str, out: &mut Vec<ChatCompletionChunk>) {
        for ch in text.chars() {
            if self.capped {
                break;
            }
            self.state.carry_buffer.push(ch);
            self.scan(out);
        }
    }

    fn scan(&mut self, out: &mut Vec<ChatCompletionChunk>) {
        let buffer = &mut self.state.carry_buffer;
        match self.open_tag {
            None => {
                if buffer.ends_with(NAME_OPEN) {
                    self.open_tag = Some(OpenTag::Name);
                    buffer.clear();
                } else if buffer.ends_with(ARGS_OPEN) {
                    self.open_tag = Some(OpenTag::Arguments);
                    buffer.clear();
                } else {
                    keep_tail(buffer, ARGS_OPEN.len());
                }
            }
            Some(OpenTag::Name) => {
                if let Some(value) = buffer.strip_suffix(NAME_CLOSE) {
                    let name = value.trim().to_string();
                    buffer.clear();
                    self.open_tag = None;
                    self.open_call(name, out);
                }
            }
            Some(OpenTag::Arguments) => {
                if let Some(value) = buffer.strip_suffix(ARGS_CLOSE) {
                    let arguments = value.trim().to_string();
                    buffer.clear();
                    self.open_tag = None;
                    self.close_call(arguments, out);
                }
            }
        }
    }

    fn open_call(&mut self, name: String, out: &mut Vec<ChatCompletionChunk>) {
        if self.state.call_index >= MAX_TOOL_CALLS {
            self.capped = true;
            return;
        }
        let call = ToolCallDelta {
            index: self.state.call_index,
            id: Some(generate_call_id()),
            r#type: Some("function".to_string()),
            function: FunctionDelta {
                name: Some(name),
                arguments: Some(String::new()),
            },
        };
        self.state.call_index += 1;
        self.awaiting_arguments = true;
        out.push(self.tool_call_chunk(call));
    }

    fn close_call(&mut self, arguments: String, out: &mut Vec<ChatCompletionChunk>) {
        if !self.awaiting_arguments {
            // arguments without a preceding name
            return;
        }
        let call = ToolCallDelta {
            index: self.state.call_index - 1,
            id: None,
            r#type: None,
            function: FunctionDelta {
                name: None,
                arguments: Some(arguments),
            },
        };
        self.awaiting_arguments = false;
        out.push(self.tool_call_chunk(call));
        if self.state.call_index >= MAX_TOOL_CALLS {
            self.capped = true;
        }
    }

    fn tool_call_chunk(&self, call: ToolCallDelta) -> ChatCompletionChunk {
        let delta = Delta {
            tool_calls: Some(vec![call]),
            ..Default::default()
        };
        let choice = ChunkChoice::new(self.choice_index, delta, None);
        match self.last_chunk.as_ref() {
            Some(meta) => meta.derive(choice),
            None => ChatCompletionChunk {
                id: String::new(),
                object: "chat.completion.chunk".to_string(),
                created: 0,
                model: String::new(),
                choices: vec![choice],
                other: Default::default(),
            },
        }
    }
}

/// Length of the longest suffix of `buffer` that could still grow into
/// [`START_MARKER`].
fn marker_prefix_len(buffer: &str) -> usize {
    (1..=buffer.len().min(START_MARKER.len()))
        .rev()
        .filter(|&n| buffer.is_char_boundary(buffer.len() - n))
        .find(|&n| START_MARKER.starts_with(&buffer[buffer.len() - n..]))
        .unwrap_or(0)
}

/// Drops all but roughly the last `max_bytes` bytes, respecting char boundaries.
fn keep_tail(buffer: &mut String, max_bytes: usize) {
    if buffer.len() <= max_bytes {
        return;
    }
    let mut cut = buffer.len() - max_bytes;
    while !buffer.is_char_boundary(cut) {
        cut += 1;
    }
    buffer.drain(..cut);
}

struct PumpState {
    events: EventStream,
    reconciler: StreamReconciler,
    ready: VecDeque<Bytes>,
    finished: bool,
}

impl PumpState {
    fn queue(&mut self, chunks: Vec<ChatCompletionChunk>) -> BridgeResult<()> {
        for chunk in chunks {
            self.ready.push_back(encode_frame(&chunk)?);
        }
        Ok(())
    }

    fn terminate(&mut self) -> BridgeResult<()> {
        self.finished = true;
        // release the upstream connection right away
        self.events = Box::pin(stream::empty());
        let tool_mode = self.reconciler.in_tool_mode();
        let terminal = self.reconciler.finish();
        self.queue(terminal)?;
        if tool_mode {
            self.ready.push_back(Bytes::from_static(DONE_FRAME));
        }
        Ok(())
    }
}

/// Runs upstream events through a [`StreamReconciler`] and encodes the result
/// as downstream SSE frames.
///
/// Pull-based: the upstream is only polled when the consumer asks for more.
/// An upstream error ends the stream without a synthesized terminator.
pub fn reconcile_stream(events: EventStream) -> ByteStream {
    let state = PumpState {
        events,
        reconciler: StreamReconciler::new(),
        ready: VecDeque::new(),
        finished: false,
    };
    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.ready.pop_front() {
                return Some((Ok(frame), st));
            }
            if st.finished {
                return None;
            }
            if st.reconciler.is_capped() {
                if let Err(e) = st.terminate() {
                    st.ready.clear();
                    return Some((Err(e), st));
                }
                continue;
            }

            let step = match st.events.next().await {
                Some(Ok(UpstreamEvent::Chunk(chunk))) => {
                    let chunks = st.reconciler.on_chunk(chunk);
                    st.queue(chunks)
                }
                Some(Ok(UpstreamEvent::Done)) => {
                    if !st.reconciler.in_tool_mode() {
                        st.ready.push_back(Bytes::from_static(DONE_FRAME));
                    }
                    Ok(())
                }
                Some(Err(e)) => Err(e),
                None => st.terminate(),
            };
            if let Err(e) = step {
                log::warn!("Stream aborted: {}", e);
                st.finished = true;
                st.ready.clear();
                st.events = Box::pin(stream::empty());
                return Some((Err(e), st));
            }
        }
    }))
}
