//! Claude Code JSONL transcript parser.
//!
//! Extracts what the assistant said and did since the user last spoke (or
//! last rejected a tool call), ready to be summarized.

use serde_json::Value;

/// Default cap on extracted content, in characters.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 20_000;

/// Longest tool input value kept verbatim in a `[Tool: ...]` line.
const MAX_TOOL_VALUE_CHARS: usize = 150;

const TRUNCATION_MARKER: &str = "[Earlier content truncated...]\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTranscript {
    pub content: String,
    pub has_tool_calls: bool,
    /// Length of `content` in characters.
    pub length: usize,
    pub truncated: bool,
}

/// Parse transcript JSONL, returning `None` when nothing is worth saying.
pub fn parse_transcript(jsonl: &str, max_len: usize) -> Option<ParsedTranscript> {
    let entries: Vec<Value> = jsonl
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();

    let start = entries
        .iter()
        .rposition(is_turn_boundary)
        .map_or(0, |i| i + 1);

    let mut parts = Vec::new();
    let mut has_tool_calls = false;

    for entry in &entries[start..] {
        if entry.get("type").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        let Some(blocks) = message_content(entry).and_then(Value::as_array) else {
            continue;
        };

        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            parts.push(text.to_string());
                        }
                    }
                }
                Some("tool_use") => {
                    has_tool_calls = true;
                    parts.push(format_tool_use(block));
                }
                _ => {}
            }
        }
    }

    if parts.is_empty() {
        return None;
    }

    let mut content = parts.join("\n\n");
    let mut truncated = false;
    let total = content.chars().count();
    if total > max_len {
        let tail: String = content.chars().skip(total - max_len).collect();
        content = format!("{TRUNCATION_MARKER}{tail}");
        truncated = true;
    }

    Some(ParsedTranscript {
        length: content.chars().count(),
        content,
        has_tool_calls,
        truncated,
    })
}

fn message_content(entry: &Value) -> Option<&Value> {
    entry.get("message").and_then(|m| m.get("content"))
}

/// A real user message, or a tool result saying the user rejected the call.
fn is_turn_boundary(entry: &Value) -> bool {
    if entry.get("type").and_then(Value::as_str) != Some("user") {
        return false;
    }
    match message_content(entry) {
        // String content comes from context summarization.
        Some(Value::String(_)) => true,
        Some(Value::Array(blocks)) => {
            let tool_results: Vec<&Value> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_result"))
                .collect();
            tool_results.is_empty()
                || tool_results.iter().any(|r| {
                    r.get("content")
                        .and_then(Value::as_str)
                        .is_some_and(is_rejection)
                })
        }
        _ => false,
    }
}

fn is_rejection(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("tool use was rejected")
        || lower.contains("the user doesn't want to proceed")
        || lower.contains("the user doesn\u{2019}t want to proceed")
}

fn format_tool_use(block: &Value) -> String {
    let name = block.get("name").and_then(Value::as_str).unwrap_or("unknown");
    let params: Vec<String> = block
        .get("input")
        .and_then(Value::as_object)
        .map(|input| {
            input
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    format!("{k}: {}", cut(&value, MAX_TOOL_VALUE_CHARS))
                })
                .collect()
        })
        .unwrap_or_default();
    format!("[Tool: {name}] {}", params.join(", "))
}

fn cut(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn jsonl(entries: &[Value]) -> String {
        entries
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn user(text: &str) -> Value {
        json!({"type": "user", "message": {"content": [{"type": "text", "text": text}]}})
    }

    fn assistant(blocks: Value) -> Value {
        json!({"type": "assistant", "message": {"content": blocks}})
    }

    fn tool_result(content: &str) -> Value {
        json!({"type": "user", "message": {"content": [
            {"type": "tool_result", "tool_use_id": "t1", "content": content}
        ]}})
    }

    #[test]
    fn empty_and_invalid_input() {
        assert_eq!(parse_transcript("", DEFAULT_MAX_CONTENT_LENGTH), None);
        assert_eq!(parse_transcript("   ", DEFAULT_MAX_CONTENT_LENGTH), None);
        assert_eq!(parse_transcript("not valid json", DEFAULT_MAX_CONTENT_LENGTH), None);
    }

    #[test]
    fn collects_text_after_last_user_message() {
        let input = jsonl(&[
            user("first"),
            assistant(json!([{"type": "text", "text": "old answer"}])),
            user("second"),
            assistant(json!([{"type": "text", "text": "I'd be happy to help."}])),
        ]);
        let parsed = parse_transcript(&input, DEFAULT_MAX_CONTENT_LENGTH).unwrap();
        assert_eq!(parsed.content, "I'd be happy to help.");
        assert!(!parsed.has_tool_calls);
        assert!(!parsed.truncated);
        assert_eq!(parsed.length, parsed.content.chars().count());
    }

    #[test]
    fn tool_results_are_not_boundaries() {
        let input = jsonl(&[
            user("run the tests"),
            assistant(json!([
                {"type": "text", "text": "Running tests."},
                {"type": "tool_use", "name": "Bash", "input": {"command": "pytest"}}
            ])),
            tool_result("3 passed"),
            assistant(json!([{"type": "text", "text": "All green."}])),
        ]);
        let parsed = parse_transcript(&input, DEFAULT_MAX_CONTENT_LENGTH).unwrap();
        assert!(parsed.has_tool_calls);
        assert_eq!(
            parsed.content,
            "Running tests.\n\n[Tool: Bash] command: pytest\n\nAll green."
        );
    }

    #[test]
    fn rejected_tool_use_is_a_boundary() {
        let input = jsonl(&[
            user("clean up"),
            assistant(json!([
                {"type": "tool_use", "name": "Bash", "input": {"command": "rm -rf /"}}
            ])),
            tool_result("The user doesn't want to proceed with this tool use."),
            assistant(json!([{"type": "text", "text": "Okay, I won't proceed."}])),
        ]);
        let parsed = parse_transcript(&input, DEFAULT_MAX_CONTENT_LENGTH).unwrap();
        assert_eq!(parsed.content, "Okay, I won't proceed.");
        assert!(!parsed.content.contains("rm -rf"));
    }

    #[test]
    fn string_content_counts_as_user_message() {
        let input = jsonl(&[
            assistant(json!([{"type": "text", "text": "before"}])),
            json!({"type": "user", "message": {"content": "summary of earlier context"}}),
            assistant(json!([{"type": "text", "text": "after"}])),
        ]);
        let parsed = parse_transcript(&input, DEFAULT_MAX_CONTENT_LENGTH).unwrap();
        assert_eq!(parsed.content, "after");
    }

    #[test]
    fn long_tool_values_are_cut() {
        let input = jsonl(&[
            user("edit"),
            assistant(json!([
                {"type": "tool_use", "name": "Edit", "input": {"content": "x".repeat(200)}}
            ])),
        ]);
        let parsed = parse_transcript(&input, DEFAULT_MAX_CONTENT_LENGTH).unwrap();
        assert_eq!(
            parsed.content,
            format!("[Tool: Edit] content: {}...", "x".repeat(150))
        );
    }

    #[test]
    fn long_content_keeps_most_recent_tail() {
        let input = jsonl(&[
            user("go"),
            assistant(json!([{"type": "text", "text": format!("{}END", "a".repeat(100))}])),
        ]);
        let parsed = parse_transcript(&input, 10).unwrap();
        assert!(parsed.truncated);
        assert_eq!(parsed.content, format!("{TRUNCATION_MARKER}aaaaaaaEND"));
    }

    #[test]
    fn nothing_after_boundary() {
        let input = jsonl(&[
            assistant(json!([{"type": "text", "text": "answer"}])),
            user("thanks"),
        ]);
        assert_eq!(parse_transcript(&input, DEFAULT_MAX_CONTENT_LENGTH), None);
    }
}
