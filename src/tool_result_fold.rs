use crate::error::{BridgeError, BridgeResult};
use crate::io_struct::{ChatRequest, Message, MessageContent, Role};
use crate::request_transform::conversation_lang;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Serialize)]
struct ToolResult {
    name: String,
    content: String,
}

/// Folds the trailing run of `tool` messages into a single `user` turn.
///
/// Assistant turns lose their `tool_calls` and receive filler text when they
/// would otherwise be empty. Tool results must be contiguous at the tail.
pub fn fold_tool_results(req: &ChatRequest) -> BridgeResult<ChatRequest> {
    let tail_start = req
        .messages
        .iter()
        .rposition(|message| message.role != Role::Tool)
        .map_or(0, |index| index + 1);
    if tail_start == req.messages.len() {
        return Err(BridgeError::malformed("no trailing tool messages to fold"));
    }

    let (head, tail) = req.messages.split_at(tail_start);
    if head.iter().any(|message| message.role == Role::Tool) {
        return Err(BridgeError::malformed(
            "tool results must be contiguous at the end of the conversation",
        ));
    }

    let lang = conversation_lang(&req.messages);

    // tool messages may omit `name`; recover it from the call they answer
    let call_names: HashMap<&str, &str> = head
        .iter()
        .flat_map(|message| message.tool_calls.iter().flatten())
        .map(|call| (call.id.as_str(), call.function.name.as_str()))
        .collect();
    let results: Vec<ToolResult> = tail
        .iter()
        .map(|message| {
            let name = message
                .name
                .as_deref()
                .or_else(|| {
                    message
                        .tool_call_id
                        .as_deref()
                        .and_then(|id| call_names.get(id).copied())
                })
                .unwrap_or_default();
            ToolResult {
                name: name.to_string(),
                content: message.text().into_owned(),
            }
        })
        .collect();
    let payload = serde_json::to_string(&results)
        .map_err(|e| BridgeError::malformed(format!("unserializable tool results: {}", e)))?;

    let mut out = req.clone();
    out.messages.truncate(tail_start);
    for message in out.messages.iter_mut().filter(|m| m.role == Role::Assistant) {
        message.tool_calls = None;
        if message.has_blank_content() {
            message.content = Some(MessageContent::Text(lang.assistant_filler().to_string()));
        }
    }
    out.messages.push(Message::new(
        Role::User,
        format!(
            "{}\n{}\n\n{}",
            lang.tool_result_intro(),
            payload,
            lang.tool_result_outro()
        ),
    ));
    out.strip_tools();
    Ok(out)
}
