//! 只追加的轮次记录
//!
//! 每条记录 = 发言者 + 文本 + 元数据；下一轮的 prompt 从最近一段（按字符数限定）构建。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 记录元数据：Agent / 后端 / 模型 / 时间 / 延迟 / 关联 ID / 工具名
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corr_id: Option<String>,
}

impl EntryMeta {
    pub fn now() -> Self {
        Self {
            agent: None,
            backend: None,
            model: None,
            tool: None,
            ts: Utc::now(),
            latency_ms: None,
            corr_id: None,
        }
    }

    pub fn agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    pub fn backend(mut self, backend: &str, model: &str) -> Self {
        self.backend = Some(backend.to_string());
        self.model = Some(model.to_string());
        self
    }

    pub fn tool(mut self, tool: &str) -> Self {
        self.tool = Some(tool.to_string());
        self
    }

    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }

    pub fn corr_id(mut self, corr_id: &str) -> Self {
        self.corr_id = Some(corr_id.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: String,
    pub content: String,
    pub meta: EntryMeta,
}

impl TranscriptEntry {
    pub fn new(speaker: impl Into<String>, content: impl Into<String>, meta: EntryMeta) -> Self {
        Self {
            speaker: speaker.into(),
            content: content.into(),
            meta,
        }
    }

    /// prompt 中的一行：`[speaker] content`
    pub fn render(&self) -> String {
        format!("[{}] {}\n", self.speaker, self.content.trim())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    /// 最近的一段记录，渲染后总长不超过 max_chars；最新一条总会包含（由调用方截断）
    pub fn recent_within(&self, max_chars: usize) -> &[TranscriptEntry] {
        let mut used = 0;
        let mut start = self.entries.len();
        for (idx, entry) in self.entries.iter().enumerate().rev() {
            let len = entry.render().chars().count();
            if used + len > max_chars && start < self.entries.len() {
                break;
            }
            used += len;
            start = idx;
        }
        &self.entries[start..]
    }

    pub fn into_entries(self) -> Vec<TranscriptEntry> {
        self.entries
    }
}
