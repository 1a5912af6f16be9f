use crate::error::{BridgeError, BridgeResult};
use crate::grammar::{Lang, TOOL_CHOICE_LABEL, TOOLS_LABEL};
use crate::io_struct::{ChatRequest, FunctionSpec, Message, MessageContent, Role};

/// Language of the conversation, used to pick instruction and template wording.
pub(crate) fn conversation_lang(messages: &[Message]) -> Lang {
    let texts: Vec<_> = messages.iter().map(Message::text).collect();
    Lang::detect(texts.iter().map(|text| &**text))
}

/// Rewrites a tool-enabled request into one the upstream model understands.
///
/// The grammar instructions are prepended as an extra system message, and the
/// function catalogue plus the tool choice are appended to the last user
/// message. `tools` and `tool_choice` are removed from the returned request.
pub fn transform_tool_request(req: &ChatRequest) -> BridgeResult<ChatRequest> {
    let user_index = req
        .messages
        .iter()
        .rposition(|message| message.role == Role::User)
        .ok_or_else(|| BridgeError::malformed("tool request has no user message"))?;

    let lang = conversation_lang(&req.messages);
    let functions: Vec<&FunctionSpec> = req.function_tools().collect();
    let catalogue = serde_json::to_string_pretty(&functions)
        .map_err(|e| BridgeError::malformed(format!("unserializable tools: {}", e)))?;
    let tool_choice = req.tool_choice.clone().unwrap_or_default();
    let block = format!(
        "\n\n{}\n{}\n\n{}\n{}",
        TOOLS_LABEL, catalogue, TOOL_CHOICE_LABEL, tool_choice
    );

    let mut out = req.clone();
    let user = &mut out.messages[user_index];
    match user.content.as_mut() {
        Some(content) => content.append_text(&block),
        None => user.content = Some(MessageContent::Text(block.trim_start().to_string())),
    }
    out.messages
        .insert(0, Message::new(Role::System, lang.instructions()));
    out.strip_tools();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::START_MARKER;
    use serde_json::json;

    fn weather_request(messages: serde_json::Value) -> ChatRequest {
        serde_json::from_value(json!({
            "model": "qwen2",
            "messages": messages,
            "tools": [
                {"type": "retrieval"},
                {
                    "type": "function",
                    "function": {
                        "name": "get_weather",
                        "description": "Get the weather of a city",
                        "parameters": {"type": "object", "properties": {"city": {"type": "string"}}},
                        "required": ["city"]
                    }
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_prepends_instructions_even_with_system_message() {
        let req = weather_request(json!([
            {"role": "system", "content": "You are terse."},
            {"role": "user", "content": "Weather in Paris?"}
        ]));
        let out = transform_tool_request(&req).unwrap();

        assert_eq!(out.messages.len(), 3);
        assert_eq!(out.messages[0].role, Role::System);
        assert!(out.messages[0].text().contains(START_MARKER));
        assert_eq!(out.messages[1].text(), "You are terse.");
        assert!(out.tools.is_none());
        assert!(out.tool_choice.is_none());
        // caller's request is untouched
        assert_eq!(req.messages.len(), 2);
        assert!(req.tools.is_some());
    }

    #[test]
    fn test_annotates_last_user_message_only() {
        let req = weather_request(json!([
            {"role": "user", "content": "first"},
            {"role": "assistant", "content": "ok"},
            {"role": "user", "content": "Weather in Paris?"}
        ]));
        let out = transform_tool_request(&req).unwrap();

        assert_eq!(out.messages[1].text(), "first");
        let last = out.messages[3].text();
        assert!(last.starts_with("Weather in Paris?\n\n# Available tools\n"));
        assert!(last.contains("\"get_weather\""));
        assert!(!last.contains("retrieval"));
        assert!(last.ends_with("# Tool choice\nauto"));
    }

    #[test]
    fn test_catalogue_holds_function_objects() {
        let req = weather_request(json!([{"role": "user", "content": "hi"}]));
        let out = transform_tool_request(&req).unwrap();
        let text = out.messages[1].text().into_owned();
        let start = text.find('[').unwrap();
        let end = text.rfind(']').unwrap();
        let catalogue: serde_json::Value = serde_json::from_str(&text[start..=end]).unwrap();
        assert_eq!(catalogue.as_array().unwrap().len(), 1);
        assert_eq!(catalogue[0]["name"], "get_weather");
        assert_eq!(catalogue[0]["required"], json!(["city"]));
    }

    #[test]
    fn test_explicit_tool_choice_is_literal() {
        let mut req = weather_request(json!([{"role": "user", "content": "hi"}]));
        req.tool_choice = Some(serde_json::from_value(json!("required")).unwrap());
        let out = transform_tool_request(&req).unwrap();
        assert!(out.messages[1].text().ends_with("# Tool choice\nrequired"));
    }

    #[test]
    fn test_missing_user_message_is_malformed() {
        let req = weather_request(json!([{"role": "system", "content": "sys"}]));
        let err = transform_tool_request(&req).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedRequest(_)));
    }

    #[test]
    fn test_null_and_part_contents() {
        let req = weather_request(json!([
            {"role": "user", "content": [{"type": "text", "text": "look"}]},
            {"role": "user", "content": null}
        ]));
        let out = transform_tool_request(&req).unwrap();
        assert!(out.messages[2].text().starts_with(TOOLS_LABEL));

        let req = weather_request(json!([{"role": "user", "content": [{"type": "text", "text": "look"}]}]));
        let out = transform_tool_request(&req).unwrap();
        match out.messages[1].content.as_ref().unwrap() {
            MessageContent::Parts(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected parts, got {:?}", other),
        }
    }

    #[test]
    fn test_chinese_conversation_gets_chinese_instructions() {
        let req = weather_request(json!([{"role": "user", "content": "巴黎天气如何？"}]));
        let out = transform_tool_request(&req).unwrap();
        assert_eq!(out.messages[0].text(), Lang::Zh.instructions());
    }
}
