//! Turns raw streamed reply text into display segments.
//!
//! Replies may embed a reasoning span (`<think>...</think>`) and tool-call markers of the form
//! `[TOOL_CALL:<name>:<params>]`. Formatting never fails: anything it cannot interpret stays
//! in the output as text or as a raw parameter string.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::tools::ToolName;

const MODEL_NAME_MAX_CHARS: usize = 20;

static REASONING_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<think>(.*?)</think>")
        .expect("unreachable error: failed to compile reasoning pattern")
});
static TOOL_CALL_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[TOOL_CALL:([^:\]\n]+):")
        .expect("unreachable error: failed to compile tool call pattern")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    /// Primary answer text.
    Text { text: String },
    /// Collapsible reasoning shown apart from the answer.
    Reasoning { text: String },
    /// Inline tool-call block.
    ToolCall { name: String, label: String, params: Value },
}

/// Format raw reply text into segments.
///
/// Pure: the same input always yields the same output.
pub fn format_message(raw: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut cursor = 0;

    for captures in REASONING_SPAN.captures_iter(raw) {
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        push_answer(&mut segments, &raw[cursor..whole.start()]);
        segments.push(Segment::Reasoning {
            text: inner.as_str().to_string(),
        });
        cursor = whole.end();
    }
    push_answer(&mut segments, &raw[cursor..]);

    segments
}

/// Concatenated answer text, without reasoning or tool blocks.
pub fn answer_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .filter_map(|segment| match segment {
            Segment::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn push_answer(segments: &mut Vec<Segment>, text: &str) {
    let mut rest = text;

    while let Some(captures) = TOOL_CALL_HEAD.captures(rest) {
        let (Some(head), Some(name)) = (captures.get(0), captures.get(1)) else {
            break;
        };
        let Some(params_len) = marker_params_len(&rest[head.end()..]) else {
            // Unterminated marker: leave the remainder as text.
            break;
        };

        push_text(segments, &rest[..head.start()]);
        let params_raw = &rest[head.end()..head.end() + params_len];
        let name = name.as_str().trim();
        segments.push(Segment::ToolCall {
            name: name.to_string(),
            label: ToolName::parse(name).label(),
            params: parse_tool_params(params_raw),
        });

        // Skip the params and the closing bracket.
        rest = &rest[head.end() + params_len + 1..];
    }

    push_text(segments, rest);
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Text { text: previous }) = segments.last_mut() {
        previous.push_str(text);
    } else {
        segments.push(Segment::Text {
            text: text.to_string(),
        });
    }
}

/// Length of the parameter text up to the `]` that closes the marker.
///
/// Prefers the first `]` at bracket depth zero outside string literals, so JSON arrays inside
/// the parameters survive. Unbalanced parameters fall back to the first `]`.
fn marker_params_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
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
            '{' | '[' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ']' if depth == 0 => return Some(idx),
            ']' => depth -= 1,
            _ => {}
        }
    }

    text.find(']')
}

/// Parse tool-call parameters leniently.
///
/// Tries strict JSON first, then one repair pass (unescape quotes and backslashes, close
/// missing braces). Anything still unparsable comes back as `{"raw": <text>}`. Parameters must
/// be a JSON object.
pub fn parse_tool_params(raw: &str) -> Value {
    let trimmed = raw.trim();

    if let Some(params) = parse_object(trimmed) {
        return params;
    }
    if let Some(params) = parse_object(&repair_params(trimmed)) {
        return params;
    }

    json!({ "raw": trimmed })
}

fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(Value::is_object)
}

fn repair_params(text: &str) -> String {
    let mut repaired = text.replace("\\\"", "\"").replace("\\\\", "\\");
    if !repaired.starts_with('{') {
        repaired.insert(0, '{');
    }
    if !repaired.ends_with('}') {
        repaired.push('}');
    }
    repaired
}

/// Shorten a model identifier for display: drop any `:tag` suffix and cap the length.
pub fn short_model_name(model: &str) -> String {
    let base = model.split(':').next().unwrap_or(model);
    if base.chars().count() > MODEL_NAME_MAX_CHARS {
        let head: String = base.chars().take(MODEL_NAME_MAX_CHARS).collect();
        format!("{head}...")
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_one_segment() {
        assert_eq!(
            format_message("Hi there!"),
            vec![Segment::Text {
                text: "Hi there!".to_string()
            }]
        );
    }

    #[test]
    fn empty_input_has_no_segments() {
        assert!(format_message("").is_empty());
    }

    #[test]
    fn reasoning_span_is_extracted() {
        let segments = format_message("<think>user wants a cube</think>Creating one.");
        assert_eq!(
            segments,
            vec![
                Segment::Reasoning {
                    text: "user wants a cube".to_string()
                },
                Segment::Text {
                    text: "Creating one.".to_string()
                },
            ]
        );
    }

    #[test]
    fn unclosed_reasoning_stays_text() {
        let segments = format_message("<think>still streaming");
        assert_eq!(answer_text(&segments), "<think>still streaming");
    }

    #[test]
    fn tool_call_marker_is_extracted() {
        let segments = format_message(
            r#"Sure. [TOOL_CALL:create_shape:{"shape_type":"cube","size":1.0}] Done."#,
        );
        assert_eq!(segments.len(), 3);
        match &segments[1] {
            Segment::ToolCall { name, label, params } => {
                assert_eq!(name, "create_shape");
                assert_eq!(label, "Create shape");
                assert_eq!(params["shape_type"], "cube");
                assert_eq!(params["size"], 1.0);
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        assert_eq!(answer_text(&segments), "Sure.  Done.");
    }

    #[test]
    fn nested_brackets_stay_inside_params() {
        let segments =
            format_message(r#"[TOOL_CALL:run_simulation:{"initial_position":[0,10,0]}]"#);
        match &segments[0] {
            Segment::ToolCall { params, .. } => {
                assert_eq!(params["initial_position"], json!([0, 10, 0]));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn escaped_params_are_repaired() {
        let params = parse_tool_params(r#"{\"simulation_type\":\"gravity\"}"#);
        assert_eq!(params["simulation_type"], "gravity");
    }

    #[test]
    fn missing_braces_are_repaired() {
        let params = parse_tool_params(r#""shape_type": "sphere", "radius": 1.5"#);
        assert_eq!(params["shape_type"], "sphere");
        assert_eq!(params["radius"], 1.5);
    }

    #[test]
    fn hopeless_params_degrade_to_raw() {
        let params = parse_tool_params("make it big");
        assert_eq!(params, json!({"raw": "make it big"}));
    }

    #[test]
    fn non_object_params_degrade_to_raw() {
        assert_eq!(parse_tool_params("42"), json!({"raw": "42"}));
    }

    #[test]
    fn unknown_tool_label_is_verbatim() {
        let segments = format_message("[TOOL_CALL:summon_dragon:{}]");
        match &segments[0] {
            Segment::ToolCall { label, params, .. } => {
                assert_eq!(label, "summon_dragon");
                assert_eq!(params, &json!({}));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_marker_stays_text() {
        let raw = r#"[TOOL_CALL:create_shape:{"shape_type":"cube""#;
        assert_eq!(answer_text(&format_message(raw)), raw);
    }

    #[test]
    fn formatting_is_repeatable() {
        let raw = "<think>a</think>b[TOOL_CALL:get_status:{}]c";
        assert_eq!(format_message(raw), format_message(raw));
    }

    #[test]
    fn model_names_are_shortened() {
        assert_eq!(short_model_name("llama3:8b"), "llama3");
        assert_eq!(
            short_model_name("modelscope.cn/unsloth/DeepSeek-R1-0528-Qwen3-8B-GGUF:Q4_K_M"),
            "modelscope.cn/unslot..."
        );
    }
}
