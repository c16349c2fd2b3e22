//! 能力表与 Tool Call 校验
//!
//! 固定的工具集合（ToolKind）及每个工具的必选 / 可选参数类型；validate 把原始调用转成 ValidatedCall。
//! 另外用 schemars 生成调用格式与写入决策格式的 JSON Schema，拼入 prompt 以减少格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::ValidationError;
use crate::tools::ToolCall;

/// 允许的工具
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    FsList,
    FsRead,
    SearchText,
    FsStat,
    FsWrite,
    HealthCheck,
    CtxPut,
    CtxGet,
    CtxKeys,
    CoordEnqueue,
    CoordNext,
    CoordClaim,
    CoordExtend,
    CoordComplete,
    CoordStatus,
}

impl ToolKind {
    pub const ALL: [ToolKind; 15] = [
        ToolKind::FsList,
        ToolKind::FsRead,
        ToolKind::SearchText,
        ToolKind::FsStat,
        ToolKind::FsWrite,
        ToolKind::HealthCheck,
        ToolKind::CtxPut,
        ToolKind::CtxGet,
        ToolKind::CtxKeys,
        ToolKind::CoordEnqueue,
        ToolKind::CoordNext,
        ToolKind::CoordClaim,
        ToolKind::CoordExtend,
        ToolKind::CoordComplete,
        ToolKind::CoordStatus,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::FsList => "fs_list",
            ToolKind::FsRead => "fs_read",
            ToolKind::SearchText => "search_text",
            ToolKind::FsStat => "fs_stat",
            ToolKind::FsWrite => "fs_write",
            ToolKind::HealthCheck => "health_check",
            ToolKind::CtxPut => "ctx_put",
            ToolKind::CtxGet => "ctx_get",
            ToolKind::CtxKeys => "ctx_keys",
            ToolKind::CoordEnqueue => "coord_enqueue",
            ToolKind::CoordNext => "coord_next",
            ToolKind::CoordClaim => "coord_claim",
            ToolKind::CoordExtend => "coord_extend",
            ToolKind::CoordComplete => "coord_complete",
            ToolKind::CoordStatus => "coord_status",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// 只读的沙箱操作：同一次运行中相同 tool+args 的结果可复用
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self,
            ToolKind::FsList
                | ToolKind::FsRead
                | ToolKind::SearchText
                | ToolKind::FsStat
                | ToolKind::HealthCheck
        )
    }

    pub fn args(&self) -> &'static [ArgSpec] {
        use ArgType::*;
        match self {
            ToolKind::FsList => const { &[
                ArgSpec::required("dir", Str),
                ArgSpec::optional("pattern", Str),
                ArgSpec::optional("max_results", Count),
            ] },
            ToolKind::FsRead => const { &[
                ArgSpec::required("path", Str),
                ArgSpec::optional("max_bytes", Count),
            ] },
            ToolKind::SearchText => const { &[
                ArgSpec::required("pattern", Str),
                ArgSpec::optional("dir", Str),
                ArgSpec::optional("max_matches", Count),
            ] },
            ToolKind::FsStat => const { &[ArgSpec::required("path", Str)] },
            ToolKind::FsWrite => const { &[
                ArgSpec::required("path", Str),
                ArgSpec::required("content", Str),
                ArgSpec::optional("create_dirs", Bool),
                ArgSpec::optional("allow_overwrite", Bool),
            ] },
            ToolKind::HealthCheck => const { &[] },
            ToolKind::CtxPut => const { &[
                ArgSpec::required("key", Str),
                ArgSpec::required("value", Any),
                ArgSpec::required("mode", Str),
                ArgSpec::optional("expected_version", Count),
            ] },
            ToolKind::CtxGet => const { &[ArgSpec::required("key", Str)] },
            ToolKind::CtxKeys => const { &[ArgSpec::optional("prefix", Str)] },
            ToolKind::CoordEnqueue => const { &[
                ArgSpec::required("kind", Str),
                ArgSpec::required("payload", Object),
            ] },
            ToolKind::CoordNext => const { &[ArgSpec::optional("lease_sec", Count)] },
            ToolKind::CoordClaim => const { &[
                ArgSpec::required("id", Str),
                ArgSpec::optional("lease_sec", Count),
            ] },
            ToolKind::CoordExtend => const { &[
                ArgSpec::required("id", Str),
                ArgSpec::optional("extend_sec", Count),
            ] },
            ToolKind::CoordComplete => const { &[
                ArgSpec::required("id", Str),
                ArgSpec::optional("result", Any),
            ] },
            ToolKind::CoordStatus => const { &[] },
        }
    }

    /// 形如 `fs_list(dir:string, pattern?:string, max_results?:int)` 的签名，供 prompt 使用
    pub fn signature(&self) -> String {
        let args: Vec<String> = self
            .args()
            .iter()
            .map(|a| {
                let opt = if a.required { "" } else { "?" };
                format!("{}{}:{}", a.name, opt, a.ty.label())
            })
            .collect();
        format!("{}({})", self.name(), args.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Str,
    /// 非负整数
    Count,
    Bool,
    Object,
    Any,
}

impl ArgType {
    fn label(&self) -> &'static str {
        match self {
            ArgType::Str => "string",
            ArgType::Count => "int",
            ArgType::Bool => "bool",
            ArgType::Object => "object",
            ArgType::Any => "any",
        }
    }

    fn accepts(&self, v: &Value) -> bool {
        match self {
            ArgType::Str => v.is_string(),
            ArgType::Count => v.is_u64(),
            ArgType::Bool => v.is_boolean(),
            ArgType::Object => v.is_object(),
            ArgType::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub ty: ArgType,
    pub required: bool,
}

impl ArgSpec {
    const fn required(name: &'static str, ty: ArgType) -> Self {
        Self { name, ty, required: true }
    }

    const fn optional(name: &'static str, ty: ArgType) -> Self {
        Self { name, ty, required: false }
    }
}

/// 通过校验的调用：工具种类 + 参数对象
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCall {
    pub kind: ToolKind,
    pub args: Map<String, Value>,
}

impl ValidatedCall {
    pub fn str_arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(|v| v.as_str())
    }

    pub fn u64_arg(&self, name: &str) -> Option<u64> {
        self.args.get(name).and_then(|v| v.as_u64())
    }

    pub fn bool_arg(&self, name: &str) -> Option<bool> {
        self.args.get(name).and_then(|v| v.as_bool())
    }

    pub fn value_arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name).filter(|v| !v.is_null())
    }
}

/// 按能力表校验；多余参数允许但忽略，可选参数为 null 视为缺省
pub fn validate(call: &ToolCall) -> Result<ValidatedCall, ValidationError> {
    let kind = ToolKind::from_name(&call.name)
        .ok_or_else(|| ValidationError::UnknownTool(call.name.clone()))?;
    let args = match &call.args {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    for spec in kind.args() {
        match args.get(spec.name) {
            None => {
                if spec.required {
                    return Err(ValidationError::MissingArg(spec.name.to_string()));
                }
            }
            Some(Value::Null) if !spec.required => {}
            Some(v) => {
                if !spec.ty.accepts(v) {
                    return Err(ValidationError::BadArgType(spec.name.to_string()));
                }
            }
        }
    }

    if kind == ToolKind::CtxPut {
        let mode = args.get("mode").and_then(|v| v.as_str()).unwrap_or_default();
        if mode.parse::<crate::core::PutMode>().is_err() {
            return Err(ValidationError::BadArgValue("mode".to_string()));
        }
    }

    Ok(ValidatedCall { kind, args })
}

/// 调用格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallsFormat {
    /// 本轮要执行的工具调用，按顺序执行
    tool_calls: Vec<CallFormat>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct CallFormat {
    /// 工具名，如 fs_list、ctx_put、coord_next
    name: String,
    /// 工具参数
    args: HashMap<String, serde_json::Value>,
}

/// 工具调用的 JSON Schema 字符串，可拼入 prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallsFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 所有工具签名，一行一个
pub fn capability_table() -> String {
    ToolKind::ALL
        .iter()
        .map(|k| format!("- {}", k.signature()))
        .collect::<Vec<_>>()
        .join("\n")
}
