//! 工具处理函数
//!
//! 每个 ToolKind 对应一个 `fn(&mut CoordinationState, &ValidatedCall, &CallContext) -> Result<Value, ToolError>`，
//! 由 HandlerRegistry 按种类查表分发。参数已通过校验，这里只做缺省值填充与结果渲染。

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::core::{CoordinationState, PutMode, ToolError, WorkItem};
use crate::tools::ValidatedCall;

/// 调用未给出可选参数时使用的缺省值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolDefaults {
    pub lease_secs: u64,
    pub extend_secs: u64,
    pub max_results: usize,
    pub max_bytes: usize,
    pub max_matches: usize,
}

impl Default for ToolDefaults {
    fn default() -> Self {
        Self {
            lease_secs: 180,
            extend_secs: 120,
            max_results: 200,
            max_bytes: 50_000,
            max_matches: 100,
        }
    }
}

/// 单次调用的上下文：调用者、时间、缺省值
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub actor: &'a str,
    pub now: DateTime<Utc>,
    pub defaults: &'a ToolDefaults,
}

pub type Handler = fn(&mut CoordinationState, &ValidatedCall, &CallContext<'_>) -> Result<Value, ToolError>;

fn to_json<T: Serialize>(v: &T) -> Result<Value, ToolError> {
    serde_json::to_value(v).map_err(|e| ToolError::Io(e.to_string()))
}

fn required_str<'c>(call: &'c ValidatedCall, name: &str) -> Result<&'c str, ToolError> {
    call.str_arg(name)
        .ok_or_else(|| ToolError::InvalidArgs(format!("missing {name}")))
}

fn count_arg(call: &ValidatedCall, name: &str, default: usize) -> usize {
    call.u64_arg(name).map(|n| n as usize).unwrap_or(default)
}

fn lease_view(item: &WorkItem) -> Value {
    json!({
        "id": item.id,
        "kind": item.kind,
        "payload": item.payload,
        "lease_until": item.lease_until,
        "claimed_by": item.claimed_by,
    })
}

pub fn fs_list(state: &mut CoordinationState, call: &ValidatedCall, cx: &CallContext<'_>) -> Result<Value, ToolError> {
    let dir = required_str(call, "dir")?;
    let max = count_arg(call, "max_results", cx.defaults.max_results);
    let res = state.sandbox.list(dir, call.str_arg("pattern"), max, cx.actor)?;
    to_json(&res)
}

pub fn fs_read(state: &mut CoordinationState, call: &ValidatedCall, cx: &CallContext<'_>) -> Result<Value, ToolError> {
    let path = required_str(call, "path")?;
    let max = count_arg(call, "max_bytes", cx.defaults.max_bytes);
    let res = state.sandbox.read(path, max, cx.actor)?;
    to_json(&res)
}

pub fn search_text(state: &mut CoordinationState, call: &ValidatedCall, cx: &CallContext<'_>) -> Result<Value, ToolError> {
    let pattern = required_str(call, "pattern")?;
    let dir = call.str_arg("dir").unwrap_or(".");
    let max = count_arg(call, "max_matches", cx.defaults.max_matches);
    let res = state.sandbox.search(pattern, dir, max, cx.actor)?;
    to_json(&res)
}

pub fn fs_stat(state: &mut CoordinationState, call: &ValidatedCall, cx: &CallContext<'_>) -> Result<Value, ToolError> {
    let path = required_str(call, "path")?;
    let res = state.sandbox.stat(path, cx.actor)?;
    to_json(&res)
}

pub fn health_check(state: &mut CoordinationState, _call: &ValidatedCall, cx: &CallContext<'_>) -> Result<Value, ToolError> {
    let res = state.sandbox.health_check(cx.actor)?;
    to_json(&res)
}

/// 失败的条件写入渲染为 409 + 当前版本，不修改存储
pub fn ctx_put(state: &mut CoordinationState, call: &ValidatedCall, _cx: &CallContext<'_>) -> Result<Value, ToolError> {
    let key = required_str(call, "key")?;
    let mode: PutMode = required_str(call, "mode")?
        .parse()
        .map_err(ToolError::InvalidArgs)?;
    let value = call.args.get("value").cloned().unwrap_or(Value::Null);
    let outcome = state
        .context
        .put(key, value, mode, call.u64_arg("expected_version"));
    if outcome.ok {
        Ok(json!({ "ok": true, "key": key, "version": outcome.version }))
    } else {
        Err(ToolError::VersionMismatch {
            key: key.to_string(),
            current: outcome.version,
        })
    }
}

pub fn ctx_get(state: &mut CoordinationState, call: &ValidatedCall, _cx: &CallContext<'_>) -> Result<Value, ToolError> {
    let key = required_str(call, "key")?;
    let (value, version) = state.context.get(key);
    Ok(json!({ "key": key, "value": value, "version": version }))
}

pub fn ctx_keys(state: &mut CoordinationState, call: &ValidatedCall, _cx: &CallContext<'_>) -> Result<Value, ToolError> {
    let prefix = call.str_arg("prefix").filter(|p| !p.is_empty());
    Ok(json!({ "keys": state.context.keys(prefix) }))
}

pub fn coord_enqueue(state: &mut CoordinationState, call: &ValidatedCall, _cx: &CallContext<'_>) -> Result<Value, ToolError> {
    let kind = required_str(call, "kind")?;
    let payload = call.args.get("payload").cloned().unwrap_or(Value::Null);
    let id = state.queue.enqueue(kind, payload)?;
    Ok(json!({ "enqueued": true, "id": id, "kind": kind.trim() }))
}

pub fn coord_next(state: &mut CoordinationState, call: &ValidatedCall, cx: &CallContext<'_>) -> Result<Value, ToolError> {
    let lease = call.u64_arg("lease_sec").unwrap_or(cx.defaults.lease_secs);
    let item = state.queue.next(lease, cx.now, cx.actor)?;
    Ok(json!({ "item": item.as_ref().map(lease_view) }))
}

pub fn coord_claim(state: &mut CoordinationState, call: &ValidatedCall, cx: &CallContext<'_>) -> Result<Value, ToolError> {
    let id = required_str(call, "id")?;
    let lease = call.u64_arg("lease_sec").unwrap_or(cx.defaults.lease_secs);
    let item = state.queue.claim(id, lease, cx.now, cx.actor)?;
    Ok(lease_view(&item))
}

pub fn coord_extend(state: &mut CoordinationState, call: &ValidatedCall, cx: &CallContext<'_>) -> Result<Value, ToolError> {
    let id = required_str(call, "id")?;
    let extra = call.u64_arg("extend_sec").unwrap_or(cx.defaults.extend_secs);
    let item = state.queue.extend(id, extra, cx.now, cx.actor)?;
    Ok(json!({ "id": item.id, "lease_until": item.lease_until }))
}

pub fn coord_complete(state: &mut CoordinationState, call: &ValidatedCall, _cx: &CallContext<'_>) -> Result<Value, ToolError> {
    let id = required_str(call, "id")?;
    let item = state.queue.complete(id, call.value_arg("result").cloned())?;
    Ok(json!({ "id": item.id, "status": item.status }))
}

pub fn coord_status(state: &mut CoordinationState, _call: &ValidatedCall, _cx: &CallContext<'_>) -> Result<Value, ToolError> {
    let status = state.queue.status();
    Ok(json!({
        "length": status.length,
        "front": status.front,
        "phase": state.phase(),
        "counts": status.counts,
    }))
}
