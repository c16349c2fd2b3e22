//! 错误分类
//!
//! - ToolError：工具调用的可恢复结果（限流、路径逃逸、版本冲突、租约争用、超时等），
//!   以 `{"error": ..., "code": ...}` 形式写回 transcript，不会中断当前轮次
//! - ValidationError：Tool Call 与能力表不符（未知工具、缺参、类型错误）
//! - SwarmError：启动期致命错误（配置缺失、没有可用 Agent）

use serde_json::{json, Map, Value};
use thiserror::Error;

/// 工具调用失败的结构化原因，每种都对应一个 HTTP 风格的状态码
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Rate limited: {tool} for {scope}, reset in {reset_secs}s")]
    RateLimited {
        tool: String,
        scope: String,
        limit: usize,
        window_secs: u64,
        remaining: usize,
        reset_secs: u64,
    },

    #[error("Path escapes workspace: {0}")]
    PathEscape(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version mismatch on '{key}' (current {current})")]
    VersionMismatch { key: String, current: u64 },

    #[error("Work item in use: {0}")]
    LeaseConflict(String),

    #[error("Not the lease owner: {0}")]
    NotOwner(String),

    #[error("Lease expired: {0}")]
    Expired(String),

    #[error("Work item already done: {0}")]
    AlreadyDone(String),

    /// 扫描超过截止时间；partial 是截止前收集到的完整结果
    #[error("Tool timeout: {tool}")]
    Timeout { tool: String, partial: Value },

    #[error("Writes disabled: {0}")]
    WritesDisabled(String),

    #[error("File exists: {0}")]
    Exists(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl ToolError {
    pub fn code(&self) -> u16 {
        match self {
            ToolError::RateLimited { .. } => 429,
            ToolError::PathEscape(_) => 403,
            ToolError::NotFound(_) => 404,
            ToolError::VersionMismatch { .. } => 409,
            ToolError::LeaseConflict(_) => 423,
            ToolError::NotOwner(_) => 403,
            ToolError::Expired(_) => 409,
            ToolError::AlreadyDone(_) => 409,
            ToolError::Timeout { .. } => 408,
            ToolError::WritesDisabled(_) => 423,
            ToolError::Exists(_) => 409,
            ToolError::InvalidArgs(_) => 400,
            ToolError::Io(_) => 500,
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            ToolError::RateLimited { .. } => "rate_limited",
            ToolError::PathEscape(_) => "path_escape",
            ToolError::NotFound(_) => "not_found",
            ToolError::VersionMismatch { .. } => "version_mismatch",
            ToolError::LeaseConflict(_) => "in_use",
            ToolError::NotOwner(_) => "not_owner",
            ToolError::Expired(_) => "expired",
            ToolError::AlreadyDone(_) => "already_done",
            ToolError::Timeout { .. } => "timeout",
            ToolError::WritesDisabled(_) => "writes_disabled",
            ToolError::Exists(_) => "exists",
            ToolError::InvalidArgs(_) => "invalid_args",
            ToolError::Io(_) => "io_error",
        }
    }

    /// 渲染为写回 transcript 的 JSON；Timeout 会把部分结果平铺进同一个对象
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("error".into(), json!(self.slug()));
        obj.insert("code".into(), json!(self.code()));
        match self {
            ToolError::RateLimited {
                tool,
                scope,
                limit,
                window_secs,
                remaining,
                reset_secs,
            } => {
                obj.insert("tool".into(), json!(tool));
                obj.insert("scope".into(), json!(scope));
                obj.insert("limit".into(), json!(limit));
                obj.insert("window_sec".into(), json!(window_secs));
                obj.insert("remaining".into(), json!(remaining));
                obj.insert("reset_sec".into(), json!(reset_secs));
            }
            ToolError::PathEscape(path)
            | ToolError::WritesDisabled(path)
            | ToolError::Exists(path) => {
                obj.insert("path".into(), json!(path));
            }
            ToolError::NotFound(what) => {
                obj.insert("target".into(), json!(what));
            }
            ToolError::VersionMismatch { key, current } => {
                obj.insert("ok".into(), json!(false));
                obj.insert("key".into(), json!(key));
                obj.insert("version".into(), json!(current));
            }
            ToolError::LeaseConflict(id)
            | ToolError::NotOwner(id)
            | ToolError::Expired(id)
            | ToolError::AlreadyDone(id) => {
                obj.insert("id".into(), json!(id));
            }
            ToolError::Timeout { tool, partial } => {
                obj.insert("tool".into(), json!(tool));
                if let Value::Object(fields) = partial {
                    for (k, v) in fields {
                        obj.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
            }
            ToolError::InvalidArgs(msg) | ToolError::Io(msg) => {
                obj.insert("message".into(), json!(msg));
            }
        }
        Value::Object(obj)
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        ToolError::Io(e.to_string())
    }
}

/// Tool Call 校验失败；调用会被保留并附上 reason，而不是被丢弃
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing argument: {0}")]
    MissingArg(String),

    #[error("Bad argument type: {0}")]
    BadArgType(String),

    #[error("Bad argument value: {0}")]
    BadArgValue(String),
}

impl ValidationError {
    pub fn reason(&self) -> String {
        match self {
            ValidationError::UnknownTool(name) => format!("unknown_tool:{name}"),
            ValidationError::MissingArg(key) => format!("missing:{key}"),
            ValidationError::BadArgType(key) => format!("bad_type:{key}"),
            ValidationError::BadArgValue(key) => format!("bad_value:{key}"),
        }
    }

    pub fn code(&self) -> u16 {
        400
    }
}

/// 启动期致命错误
#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("No usable agents configured")]
    NoUsableAgents,

    #[error("Arbiter unavailable: {0}")]
    ArbiterUnavailable(String),
}

impl From<config::ConfigError> for SwarmError {
    fn from(e: config::ConfigError) -> Self {
        SwarmError::Config(e.to_string())
    }
}
