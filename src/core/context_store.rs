//! 版本化共享上下文
//!
//! key -> (value, version)。版本从 0 开始，每次成功写入恰好 +1。
//! 写入模式：set（无条件）、if_absent（仅当 key 从未写入）、if_version（比较并交换）。
//! 失败的条件写入不修改状态，只返回当前版本；这是 Agent 之间避免丢失更新的唯一协调原语。

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 写入模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PutMode {
    Set,
    IfAbsent,
    IfVersion,
}

impl FromStr for PutMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "set" => Ok(PutMode::Set),
            "if_absent" => Ok(PutMode::IfAbsent),
            "if_version" => Ok(PutMode::IfVersion),
            other => Err(format!("unknown put mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    pub key: String,
    pub value: Value,
    pub version: u64,
}

/// put 的结果：ok=false 时 version 为调用时的当前版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PutOutcome {
    pub ok: bool,
    pub version: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    entries: BTreeMap<String, ContextEntry>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回 (value, version)；不存在的 key 版本为 0
    pub fn get(&self, key: &str) -> (Option<&Value>, u64) {
        match self.entries.get(key) {
            Some(e) => (Some(&e.value), e.version),
            None => (None, 0),
        }
    }

    pub fn version(&self, key: &str) -> u64 {
        self.entries.get(key).map(|e| e.version).unwrap_or(0)
    }

    /// 按字典序返回 key，可选前缀过滤
    pub fn keys(&self, prefix: Option<&str>) -> Vec<String> {
        self.entries
            .keys()
            .filter(|k| prefix.map_or(true, |p| k.starts_with(p)))
            .cloned()
            .collect()
    }

    pub fn put(&mut self, key: &str, value: Value, mode: PutMode, expected_version: Option<u64>) -> PutOutcome {
        let current = self.version(key);
        let apply = match mode {
            PutMode::Set => true,
            PutMode::IfAbsent => !self.entries.contains_key(key),
            PutMode::IfVersion => expected_version == Some(current),
        };
        if !apply {
            tracing::debug!(key = %key, ?mode, current, ?expected_version, "context put rejected");
            return PutOutcome {
                ok: false,
                version: current,
            };
        }

        let version = current + 1;
        self.entries.insert(
            key.to_string(),
            ContextEntry {
                key: key.to_string(),
                value,
                version,
            },
        );
        PutOutcome { ok: true, version }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
