//! 运行期计数：Agent 调用、工具调用、写入提议/应用；只增不减

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentCallRecord {
    pub round: u32,
    pub agent: String,
    pub backend: String,
    pub ok: bool,
    pub skipped: bool,
    pub ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub round: u32,
    pub tool: String,
    pub actor: String,
    pub ok: bool,
    pub cached: bool,
    pub ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteCounters {
    pub proposed: u64,
    pub applied: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Telemetry {
    pub rounds: u32,
    pub agent_calls: Vec<AgentCallRecord>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub writes: WriteCounters,
    /// 各后端累计 token：(prompt, completion, total)
    pub tokens: BTreeMap<String, (u64, u64, u64)>,
}

impl Telemetry {
    pub fn record_agent(&mut self, record: AgentCallRecord) {
        self.agent_calls.push(record);
    }

    pub fn record_tool(&mut self, record: ToolCallRecord) {
        self.tool_calls.push(record);
    }

    pub fn failed_tool_calls(&self) -> usize {
        self.tool_calls.iter().filter(|r| !r.ok).count()
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
