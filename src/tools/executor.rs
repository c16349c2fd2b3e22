//! 工具执行器
//!
//! 持有 HandlerRegistry 与本次运行的只读结果缓存；execute 查表调用处理函数，
//! 相同 tool+args 的只读调用直接返回缓存。每次调用输出一条结构化审计日志（tool_audit）。

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};

use crate::core::{CoordinationState, ToolError};
use crate::tools::handlers::{CallContext, ToolDefaults};
use crate::tools::{HandlerRegistry, ValidatedCall};

/// 单次调用结果；失败时 value 为 ToolError::to_value()
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub value: Value,
    pub ok: bool,
    pub cached: bool,
    pub ms: u64,
    pub error: Option<ToolError>,
}

pub struct ToolExecutor {
    registry: HandlerRegistry,
    defaults: ToolDefaults,
    cache: HashMap<String, Value>,
}

impl ToolExecutor {
    pub fn new(registry: HandlerRegistry, defaults: ToolDefaults) -> Self {
        Self {
            registry,
            defaults,
            cache: HashMap::new(),
        }
    }

    pub fn defaults(&self) -> &ToolDefaults {
        &self.defaults
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// 缓存只在一次运行内有效
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// 缓存键：{"tool", "args"} 的规范序列化（对象键有序）
    fn cache_key(call: &ValidatedCall) -> String {
        json!({ "tool": call.kind.name(), "args": call.args }).to_string()
    }

    pub fn execute(&mut self, state: &mut CoordinationState, call: &ValidatedCall, actor: &str) -> ToolOutcome {
        let start = Instant::now();
        let tool = call.kind.name();
        let key = call.kind.is_cacheable().then(|| Self::cache_key(call));

        if let Some(hit) = key.as_ref().and_then(|k| self.cache.get(k)) {
            let outcome = ToolOutcome {
                value: hit.clone(),
                ok: true,
                cached: true,
                ms: start.elapsed().as_millis() as u64,
                error: None,
            };
            audit(tool, actor, &call.args, "cached", &outcome);
            return outcome;
        }

        let result = match self.registry.get(call.kind) {
            Some(handler) => {
                let cx = CallContext {
                    actor,
                    now: Utc::now(),
                    defaults: &self.defaults,
                };
                handler(state, call, &cx)
            }
            None => Err(ToolError::InvalidArgs(format!("no handler for {tool}"))),
        };
        let ms = start.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(value) => {
                if let Some(k) = key {
                    self.cache.insert(k, value.clone());
                }
                ToolOutcome {
                    value,
                    ok: true,
                    cached: false,
                    ms,
                    error: None,
                }
            }
            Err(e) => ToolOutcome {
                value: e.to_value(),
                ok: false,
                cached: false,
                ms,
                error: Some(e),
            },
        };
        let label = match &outcome.error {
            None => "ok",
            Some(e) => e.slug(),
        };
        audit(tool, actor, &call.args, label, &outcome);
        outcome
    }
}

fn audit(tool: &str, actor: &str, args: &serde_json::Map<String, Value>, outcome_label: &str, outcome: &ToolOutcome) {
    let audit = json!({
        "event": "tool_audit",
        "tool": tool,
        "actor": actor,
        "ok": outcome.ok,
        "outcome": outcome_label,
        "duration_ms": outcome.ms,
        "args_preview": args_preview(args),
    });
    tracing::info!(audit = %audit, "tool");
}

fn args_preview(args: &serde_json::Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
