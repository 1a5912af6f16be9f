//! Reconciliation of a complete upstream reply into OpenAI `tool_calls`.

use crate::grammar::{
    ARGS_CLOSE, ARGS_OPEN, END_MARKER, MAX_TOOL_CALLS, NAME_CLOSE, NAME_OPEN, START_MARKER,
};
use crate::io_struct::{ChatChoice, ChatCompletionResponse, ToolCallRef};

/// A reply split around its marked invocation block.
#[derive(Debug, PartialEq)]
pub struct MarkedReply<'a> {
    /// Text before the start marker and after the end marker, trimmed.
    pub visible: String,
    pub block: &'a str,
}

/// Splits `content` at the start marker and the last end marker.
///
/// Returns `None` when the start marker is absent. Without an end marker the
/// block runs to the end of the text.
pub fn split_marked(content: &str) -> Option<MarkedReply<'_>> {
    let start = content.find(START_MARKER)?;
    let body = start + START_MARKER.len();
    let (block, after) = match content[body..].rfind(END_MARKER) {
        Some(end) => (
            &content[body..body + end],
            &content[body + end + END_MARKER.len()..],
        ),
        None => (&content[body..], ""),
    };
    let visible = format!("{}{}", &content[..start], after).trim().to_string();
    Some(MarkedReply { visible, block })
}

#[derive(Debug, Default)]
enum TagState {
    #[default]
    Idle,
    InName(String),
    InArguments(String),
}

/// Line-oriented state machine over `<name>` / `<arguments>` tags.
#[derive(Debug, Default)]
struct BlockParser {
    state: TagState,
    pending_name: Option<String>,
    /// Names closed so far, whether or not their arguments follow.
    names_seen: usize,
    calls: Vec<ToolCallRef>,
}

impl BlockParser {
    fn is_full(&self) -> bool {
        self.calls.len() >= MAX_TOOL_CALLS
    }

    fn feed_line(&mut self, line: &str) {
        let mut rest = line;
        while !self.is_full() {
            match std::mem::take(&mut self.state) {
                TagState::Idle => {
                    let name_at = rest.find(NAME_OPEN);
                    let args_at = rest.find(ARGS_OPEN);
                    match (name_at, args_at) {
                        (Some(n), a) if a.is_none_or(|a| n < a) => {
                            rest = &rest[n + NAME_OPEN.len()..];
                            self.state = TagState::InName(String::new());
                        }
                        (_, Some(a)) => {
                            rest = &rest[a + ARGS_OPEN.len()..];
                            self.state = TagState::InArguments(String::new());
                        }
                        _ => return,
                    }
                }
                TagState::InName(mut value) => match rest.find(NAME_CLOSE) {
                    Some(end) => {
                        value.push_str(&rest[..end]);
                        rest = &rest[end + NAME_CLOSE.len()..];
                        // a second name before any arguments replaces the first
                        self.pending_name = Some(value.trim().to_string());
                        self.names_seen += 1;
                    }
                    None => {
                        value.push_str(rest);
                        value.push('\n');
                        self.state = TagState::InName(value);
                        return;
                    }
                },
                TagState::InArguments(mut value) => match rest.find(ARGS_CLOSE) {
                    Some(end) => {
                        value.push_str(&rest[..end]);
                        rest = &rest[end + ARGS_CLOSE.len()..];
                        if let Some(name) = self.pending_name.take() {
                            self.calls.push(ToolCallRef::new(name, value.trim()));
                        }
                    }
                    None => {
                        value.push_str(rest);
                        value.push('\n');
                        self.state = TagState::InArguments(value);
                        return;
                    }
                },
            }
        }
    }
}

fn parse_block(block: &str) -> BlockParser {
    let mut parser = BlockParser::default();
    for line in block.lines() {
        if parser.is_full() {
            break;
        }
        parser.feed_line(line);
    }
    parser
}

/// Extracts up to [`MAX_TOOL_CALLS`] complete `(name, arguments)` pairs from an
/// invocation block. Unclosed tags and arguments without a name are dropped.
pub fn parse_tool_calls(block: &str) -> Vec<ToolCallRef> {
    parse_block(block).calls
}

/// Rewrites one choice in place. Returns the number of tool calls attached.
///
/// Once the start marker is present the markup never reaches `content`, even
/// when no pair completed. A closed `<name>` alone is enough to report
/// `finish_reason = "tool_calls"`, matching what the streaming path announces.
pub fn reconcile_choice(choice: &mut ChatChoice) -> usize {
    let Some(content) = choice.message.content.as_deref() else {
        return 0;
    };
    let Some(reply) = split_marked(content) else {
        return 0;
    };
    let parser = parse_block(reply.block);

    choice.message.content = (!reply.visible.is_empty()).then_some(reply.visible);
    if parser.names_seen > 0 {
        choice.finish_reason = Some("tool_calls".to_string());
    }
    let count = parser.calls.len();
    if count > 0 {
        choice.message.tool_calls = Some(parser.calls);
    }
    count
}

pub fn reconcile_response(mut resp: ChatCompletionResponse) -> ChatCompletionResponse {
    for choice in resp.choices.iter_mut() {
        let count = reconcile_choice(choice);
        if count > 0 {
            log::info!(
                "Response {} choice {}: {} tool call(s)",
                resp.id,
                choice.index,
                count
            );
        }
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(content: &str) -> ChatCompletionResponse {
        serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1,
            "model": "qwen2",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop",
                "logprobs": null
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
        }))
        .unwrap()
    }

    fn pair(name: &str, args: &str) -> String {
        format!("<name>{}</name>\n<arguments>{}</arguments>\n", name, args)
    }

    #[test]
    fn test_weather_example() {
        let content = "Sure.\n✿✿\n<name>get_weather</name>\n<arguments>{\"city\":\"Paris\"}</arguments>";
        let resp = reconcile_response(response(content));
        let choice = &resp.choices[0];

        assert_eq!(choice.message.content.as_deref(), Some("Sure."));
        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, r#"{"city":"Paris"}"#);
        assert_eq!(calls[0].r#type, "function");
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        assert!(resp.other.contains_key("usage"));
    }

    #[test]
    fn test_without_marker_is_untouched() {
        let original = response("Just text, <name>not</name> a call.");
        let resp = reconcile_response(original.clone());
        assert_eq!(resp, original);
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_round_trip_preserves_order() {
        for n in 1..=MAX_TOOL_CALLS {
            let mut content = String::from("✿✿\n");
            for i in 0..n {
                content.push_str(&pair(&format!("tool_{}", i), &format!("{{\"i\":{}}}", i)));
            }
            content.push_str("✿END✿");

            let calls = parse_tool_calls(split_marked(&content).unwrap().block);
            assert_eq!(calls.len(), n);
            for (i, call) in calls.iter().enumerate() {
                assert_eq!(call.function.name, format!("tool_{}", i));
                assert_eq!(call.function.arguments, format!("{{\"i\":{}}}", i));
            }
        }
    }

    #[test]
    fn test_cap_of_five() {
        let mut content = String::from("Working on it.\n✿✿\n");
        for i in 0..7 {
            content.push_str(&pair(&format!("t{}", i), "{}"));
        }
        let resp = reconcile_response(response(&content));
        let choice = &resp.choices[0];
        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[4].function.name, "t4");
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_text_after_end_marker_and_null_content() {
        let reply = split_marked("A ✿✿\n<name>x</name>\n✿END✿ B ✿END✿ C").unwrap();
        assert_eq!(reply.visible, "A  C");
        assert!(reply.block.contains("✿END✿ B"));

        let resp = reconcile_response(response(&format!("✿✿\n{}✿END✿\n", pair("x", "{}"))));
        assert_eq!(resp.choices[0].message.content, None);
    }

    #[test]
    fn test_dangling_and_orphan_tags_are_dropped() {
        let block = "\n<arguments>{\"orphan\":true}</arguments>\n<name>a</name>\n<arguments>{}</arguments>\n<name>b</name>\n<arguments>{\"open\":";
        let calls = parse_tool_calls(block);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "a");
    }

    #[test]
    fn test_multiline_and_malformed_arguments() {
        let block = "<name> search </name>\n<arguments>{\n  \"q\": \"rust\"\n}</arguments>\n<name>bad</name><arguments>{not json</arguments>";
        let calls = parse_tool_calls(block);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "search");
        assert_eq!(calls[0].function.arguments, "{\n  \"q\": \"rust\"\n}");
        assert_eq!(calls[1].function.arguments, "{not json");
    }

    #[test]
    fn test_marker_without_calls_hides_markup() {
        let resp = reconcile_response(response("I like flowers ✿✿ a lot"));
        let choice = &resp.choices[0];
        assert_eq!(choice.message.content.as_deref(), Some("I like flowers"));
        assert!(choice.message.tool_calls.is_none());
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_cut_off_arguments_hide_markup() {
        let mut resp = response("Sure.\n✿✿\n<name>get_weather</name>\n<arguments>{\"city\":");
        resp.choices[0].finish_reason = Some("length".to_string());
        let resp = reconcile_response(resp);
        let choice = &resp.choices[0];

        assert_eq!(choice.message.content.as_deref(), Some("Sure."));
        assert!(choice.message.tool_calls.is_none());
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_ids_are_unique_within_response() {
        let content = format!("✿✿\n{}{}", pair("a", "{}"), pair("b", "{}"));
        let calls = parse_tool_calls(split_marked(&content).unwrap().block);
        assert_ne!(calls[0].id, calls[1].id);
    }
}
