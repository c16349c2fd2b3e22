//! 从 Agent 的自由文本中提取 Tool Call
//!
//! 优先解析 ```json 代码块；没有可解析的代码块时尝试把整段文本当作 JSON。
//! 接受的形状：`{"tool_calls": [...]}`、`{"tool": .., "parameters"|"args": ..}`、
//! `{"calls": [{"name"|"tool": .., "args"|"parameters": ..}]}`，统一成 ToolCall 列表。
//! 解析失败的文本视为没有调用，不是错误。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ValidationError;
use crate::tools::schema::{validate, ValidatedCall};

/// 统一后的原始调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// 解析结果：校验失败的调用保留下来并附带原因
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    pub call: ToolCall,
    pub validation: Result<ValidatedCall, ValidationError>,
}

static FENCED_JSON_RE: OnceLock<Regex> = OnceLock::new();

fn fenced_json_re() -> &'static Regex {
    FENCED_JSON_RE.get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)\s*(\{.*?\}|\[.*?\])\s*```").unwrap())
}

/// 提取文本中所有可解析的 JSON 值
pub fn extract_json_values(text: &str) -> Vec<Value> {
    let fenced: Vec<Value> = fenced_json_re()
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .filter_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .collect();
    if !fenced.is_empty() {
        return fenced;
    }
    serde_json::from_str::<Value>(text.trim())
        .map(|v| vec![v])
        .unwrap_or_default()
}

fn call_from_object(obj: &serde_json::Map<String, Value>) -> Option<ToolCall> {
    let name = obj
        .get("name")
        .or_else(|| obj.get("tool"))
        .and_then(|v| v.as_str())?
        .trim()
        .to_string();
    if name.is_empty() {
        return None;
    }
    let args = obj
        .get("args")
        .or_else(|| obj.get("parameters"))
        .or_else(|| obj.get("arguments"))
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));
    Some(ToolCall { name, args })
}

fn calls_from_array(items: &[Value]) -> Vec<ToolCall> {
    items
        .iter()
        .filter_map(|v| v.as_object())
        .filter_map(call_from_object)
        .collect()
}

/// 把一个 JSON 值规整为调用列表
///
/// 同一对象中的三种形式都会收集，顺序为 `tool_calls` 数组、对象自身的 `{tool, parameters}`、`calls` 数组。
pub fn normalize(value: &Value) -> Vec<ToolCall> {
    match value {
        Value::Object(obj) => {
            let mut calls = Vec::new();
            if let Some(Value::Array(items)) = obj.get("tool_calls") {
                calls.extend(calls_from_array(items));
            }
            calls.extend(call_from_object(obj));
            if let Some(Value::Array(items)) = obj.get("calls") {
                calls.extend(calls_from_array(items));
            }
            calls
        }
        Value::Array(items) => calls_from_array(items),
        _ => Vec::new(),
    }
}

/// 按出现顺序提取所有调用
pub fn extract_calls(text: &str) -> Vec<ToolCall> {
    extract_json_values(text)
        .iter()
        .flat_map(normalize)
        .collect()
}

/// 提取并逐个校验
pub fn parse_and_validate(text: &str) -> Vec<ParsedCall> {
    extract_calls(text)
        .into_iter()
        .map(|call| {
            let validation = validate(&call);
            ParsedCall { call, validation }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolKind;
    use serde_json::json;

    #[test]
    fn test_fenced_tool_calls_block() {
        let text = r#"I'll look around first.
```json
{"tool_calls": [{"name": "fs_list", "args": {"dir": "src"}}, {"name": "coord_status", "args": {}}]}
```
Decision: continue"#;
        let calls = extract_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "fs_list");
        assert_eq!(calls[0].args, json!({"dir": "src"}));
        assert_eq!(calls[1].name, "coord_status");
    }

    #[test]
    fn test_multiple_blocks_keep_order() {
        let text = "```json\n{\"tool\": \"ctx_get\", \"parameters\": {\"key\": \"plan\"}}\n```\nthen\n```json\n{\"calls\": [{\"tool\": \"fs_stat\", \"parameters\": {\"path\": \"a\"}}]}\n```";
        let names: Vec<_> = extract_calls(text).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["ctx_get", "fs_stat"]);
    }

    #[test]
    fn test_mixed_shapes_in_one_object_are_all_collected() {
        let v = json!({
            "calls": [{"tool": "fs_stat", "parameters": {"path": "b"}}],
            "tool": "ctx_get",
            "parameters": {"key": "plan"},
            "tool_calls": [{"name": "fs_list", "args": {"dir": "."}}]
        });
        let calls = normalize(&v);
        let names: Vec<_> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["fs_list", "ctx_get", "fs_stat"]);
        assert_eq!(calls[1].args, json!({"key": "plan"}));
    }

    #[test]
    fn test_whole_text_fallback() {
        let calls = extract_calls(r#"  {"tool": "health_check"}  "#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, json!({}));
    }

    #[test]
    fn test_unparseable_text_yields_nothing() {
        assert!(extract_calls("no structured content here").is_empty());
        assert!(extract_calls("```json\n{broken\n```").is_empty());
        assert!(extract_calls("```json\n{\"hello\": 1}\n```").is_empty());
    }

    #[test]
    fn test_invalid_calls_are_retained_with_reason() {
        let text = "```json\n{\"tool_calls\": [{\"name\": \"fs_read\", \"args\": {}}, {\"name\": \"launch\", \"args\": {}}, {\"name\": \"fs_read\", \"args\": {\"path\": \"README.md\"}}]}\n```";
        let parsed = parse_and_validate(text);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].validation.as_ref().unwrap_err().reason(), "missing:path");
        assert_eq!(parsed[1].validation.as_ref().unwrap_err().reason(), "unknown_tool:launch");
        assert_eq!(parsed[2].validation.as_ref().unwrap().kind, ToolKind::FsRead);
    }
}
