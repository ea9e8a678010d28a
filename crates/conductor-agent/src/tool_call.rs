//! Extraction of tool invocations from free-form model text.
//!
//! Models that lack native function calling are prompted to emit calls as
//! tagged JSON, in one of two conventions:
//!
//! ```text
//! <tool_call>{"name": "search", "arguments": {"q": "rust"}}</tool_call>
//! <|tool_call_start|>{"tool": "search", "args": {"q": "rust"}}<|tool_call_end|>
//! ```
//!
//! The JSON object is located by brace matching from the first `{` after the
//! opening tag, so prose around it and nested braces inside the arguments are
//! both tolerated. A call whose JSON does not parse, or that has no name, is
//! skipped and counted; it never aborts extraction of the calls after it.

use serde_json::Value;
use tracing::warn;

const TAG_PAIRS: [(&str, &str); 2] = [
    ("<tool_call>", "</tool_call>"),
    ("<|tool_call_start|>", "<|tool_call_end|>"),
];

const REASONING_TAGS: (&str, &str) = ("<reasoning>", "</reasoning>");
const TODOS_TAGS: (&str, &str) = ("<todos>", "</todos>");

/// A tool invocation recovered from model text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub args: Value,
}

/// All calls found in one piece of text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub calls: Vec<ParsedToolCall>,
    /// Tagged blocks that were skipped because they could not be parsed.
    pub malformed: usize,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Find the earliest opening tag at or after `from`. Returns (tag start, tag end).
fn next_open_tag(text: &str, from: usize) -> Option<(usize, usize)> {
    TAG_PAIRS
        .iter()
        .filter_map(|(open, _)| {
            text[from..]
                .find(open)
                .map(|offset| (from + offset, from + offset + open.len()))
        })
        .min_by_key(|(start, _)| *start)
}

/// Byte range of the balanced JSON object starting at `start` (which must be a `{`).
///
/// Braces inside string literals are ignored. `None` when the object never closes.
fn balanced_object(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Turn one JSON object into a call, accepting `name`/`tool` and `arguments`/`args`.
fn call_from_json(value: &Value) -> Option<ParsedToolCall> {
    let name = value
        .get("name")
        .or_else(|| value.get("tool"))
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())?;

    let args = match value.get("arguments").or_else(|| value.get("args")) {
        None | Some(Value::Null) => Value::Object(Default::default()),
        // Some models double-encode the arguments object.
        Some(Value::String(raw)) => serde_json::from_str(raw)
            .unwrap_or_else(|_| Value::Object(Default::default())),
        Some(other) => other.clone(),
    };

    Some(ParsedToolCall {
        name: name.trim().to_string(),
        args,
    })
}

/// Extract every tagged tool call from `text`, in order of appearance.
pub fn extract_tool_calls(text: &str) -> Extraction {
    let mut extraction = Extraction::default();
    let mut cursor = 0;

    while let Some((tag_start, tag_end)) = next_open_tag(text, cursor) {
        let next_tag = next_open_tag(text, tag_end).map(|(start, _)| start);
        let brace = text[tag_end..].find('{').map(|offset| tag_end + offset);

        let brace = match (brace, next_tag) {
            (Some(brace), Some(next)) if brace > next => None,
            (brace, _) => brace,
        };
        let Some(brace) = brace else {
            warn!(position = tag_start, "Skipping tool call tag without a JSON object");
            extraction.malformed += 1;
            cursor = tag_end;
            continue;
        };

        let Some(end) = balanced_object(text, brace) else {
            warn!(position = tag_start, "Skipping tool call with unbalanced braces");
            extraction.malformed += 1;
            cursor = tag_end;
            continue;
        };

        match serde_json::from_str::<Value>(&text[brace..end]) {
            Ok(value) => match call_from_json(&value) {
                Some(call) => extraction.calls.push(call),
                None => {
                    warn!(position = tag_start, "Skipping tool call without a name");
                    extraction.malformed += 1;
                }
            },
            Err(e) => {
                warn!(position = tag_start, error = %e, "Skipping malformed tool call JSON");
                extraction.malformed += 1;
            }
        }
        cursor = end;
    }

    extraction
}

/// The first balanced JSON object in `text` that parses, skipping any that do not.
pub fn first_json_object(text: &str) -> Option<Value> {
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find('{') {
        let start = cursor + offset;
        let end = balanced_object(text, start)?;
        if let Ok(value) = serde_json::from_str::<Value>(&text[start..end]) {
            return Some(value);
        }
        cursor = start + 1;
    }
    None
}

/// Remove every `open ... close` block. An unterminated block runs to the end of the text.
fn strip_blocks(text: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(open) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + open.len()..];
        match after_open.find(close) {
            Some(end) => rest = &after_open[end + close.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Text between the first `open`/`close` pair, trimmed. `None` when absent or empty.
pub fn tagged_block(text: &str, open: &str, close: &str) -> Option<String> {
    let start = text.find(open)? + open.len();
    let end = text[start..].find(close)? + start;
    let inner = text[start..end].trim();
    if inner.is_empty() {
        None
    } else {
        Some(inner.to_string())
    }
}

/// Inner text of the `<reasoning>` block, if any.
pub fn reasoning_block(text: &str) -> Option<String> {
    tagged_block(text, REASONING_TAGS.0, REASONING_TAGS.1)
}

/// Inner text of the `<todos>` block, if any.
pub fn todos_block(text: &str) -> Option<String> {
    tagged_block(text, TODOS_TAGS.0, TODOS_TAGS.1)
}

/// Remove tool-call, reasoning and todos blocks so only user-facing prose remains.
pub fn strip_structural_tags(text: &str) -> String {
    let mut out = text.to_string();
    for (open, close) in TAG_PAIRS.iter().chain([REASONING_TAGS, TODOS_TAGS].iter()) {
        out = strip_blocks(&out, open, close);
    }

    // Collapse the blank runs left behind by removed blocks.
    let mut collapsed = String::with_capacity(out.len());
    let mut blank_run = 0;
    for line in out.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        collapsed.push_str(line.trim_end());
        collapsed.push('\n');
    }
    collapsed.trim().to_string()
}
