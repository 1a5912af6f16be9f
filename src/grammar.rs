//! Fixed markup the upstream model is taught to emit for tool calls.
//!
//! A tool invocation block looks like:
//!
//! ```text
//! ✿✿
//! <name>get_weather</name>
//! <arguments>{"city": "Paris"}</arguments>
//! ✿END✿
//! ```

/// First character of the start marker, used to switch the streaming parser into tool mode.
pub const TRIGGER: char = '✿';
pub const START_MARKER: &str = "✿✿";
pub const END_MARKER: &str = "✿END✿";

pub const NAME_OPEN: &str = "<name>";
pub const NAME_CLOSE: &str = "</name>";
pub const ARGS_OPEN: &str = "<arguments>";
pub const ARGS_CLOSE: &str = "</arguments>";

pub const TOOLS_LABEL: &str = "# Available tools";
pub const TOOL_CHOICE_LABEL: &str = "# Tool choice";

/// Maximum number of tool calls accepted from one model reply.
pub const MAX_TOOL_CALLS: usize = 5;

pub const CALL_ID_PREFIX: &str = "call_";
pub const CALL_ID_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    En,
    Zh,
}

impl Lang {
    /// Chinese when any of the given texts contains a CJK ideograph.
    pub fn detect<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        let has_cjk = texts
            .into_iter()
            .any(|text| text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c)));
        if has_cjk { Lang::Zh } else { Lang::En }
    }

    pub fn instructions(self) -> &'static str {
        match self {
            Lang::En => INSTRUCTIONS_EN,
            Lang::Zh => INSTRUCTIONS_ZH,
        }
    }

    pub fn tool_result_intro(self) -> &'static str {
        match self {
            Lang::En => "Results of the tools you called:",
            Lang::Zh => "你调用的工具返回了以下结果：",
        }
    }

    pub fn tool_result_outro(self) -> &'static str {
        match self {
            Lang::En => "Use these results to continue answering my previous request.",
            Lang::Zh => "请根据这些结果继续回答我之前的问题。",
        }
    }

    pub fn assistant_filler(self) -> &'static str {
        match self {
            Lang::En => "I called a tool to help with this request.",
            Lang::Zh => "我调用了工具来处理这个请求。",
        }
    }
}

const INSTRUCTIONS_EN: &str = "# Tools

You can call tools to help answer the user. The available tools and the tool choice policy are \
listed at the end of the latest user message.

To call tools, first write any reply you want the user to see, then output the calls in exactly \
this format:

✿✿
<name>tool name</name>
<arguments>JSON object with the tool arguments</arguments>
✿END✿

Rules:
- Repeat the <name> and <arguments> lines for every call, at most 5 calls per reply.
- The arguments must be one JSON object matching the tool parameters.
- Write nothing after ✿END✿.
- If the tool choice is \"none\", do not call any tool. If it is \"required\", call at least one tool.
- Tool results will be sent back to you in a later user message.";

const INSTRUCTIONS_ZH: &str = "# 工具

你可以调用工具来帮助回答用户的问题。可用的工具以及工具选择策略列在最新一条用户消息的末尾。

如需调用工具，请先写出希望用户看到的回复，然后严格按照以下格式输出调用：

✿✿
<name>工具名称</name>
<arguments>包含工具参数的 JSON 对象</arguments>
✿END✿

规则：
- 每次调用重复一组 <name> 与 <arguments>，每次回复最多调用 5 次。
- 参数必须是一个与工具参数定义相符的 JSON 对象。
- ✿END✿ 之后不要再输出任何内容。
- 如果工具选择为 \"none\"，不要调用任何工具；如果为 \"required\"，至少调用一个工具。
- 工具结果会在之后的用户消息中返回给你。";
