//! Prompt 构建：轮次 prompt、共识 prompt、写入审批 prompt

use serde_json::json;

use crate::core::arbiter::{decision_schema_json, WriteProposal};
use crate::core::Transcript;
use crate::tools::{capability_table, tool_call_schema_json};

pub const CONSENSUS_INSTRUCTION: &str = "Synthesize the agents' notes into a single, concise consensus.\n\
Output these sections:\n\
- Summary: one paragraph\n\
- Plan: 3-7 bullet steps\n\
- Suggestions: concrete improvements or changes\n\
- Risks: 2-4 brief bullets\n\
- Decision: continue or stop, with rationale";

/// 轮次 prompt：任务 + 可用工具 + 最近一段 transcript（按字符数限定）
pub fn round_prompt(task: &str, transcript: &Transcript, round: u32, history_chars: usize) -> String {
    let history: String = transcript
        .recent_within(history_chars)
        .iter()
        .map(|e| e.render())
        .collect();
    format!(
        "Task:\n{task}\n\n\
Round {round}. You are one of multiple cooperating agents. Read the recent transcript and provide:\n\
1) Brief analysis (2-4 bullets)\n\
2) Proposed next steps (3-5 bullets)\n\
3) Key risks or open questions (1-3)\n\
4) Decision: continue or stop, with 1-line rationale\n\n\
You may request tools by adding a ```json block with {{\"tool_calls\": [{{\"name\": ..., \"args\": {{...}}}}]}}.\n\
Available tools:\n{tools}\n\n\
Tool call schema:\n{schema}\n\n\
Recent transcript (latest last):\n{history}",
        tools = capability_table(),
        schema = tool_call_schema_json(),
    )
}

/// 共识 prompt：按调用顺序列出本轮各 Agent 的输出
pub fn consensus_prompt(task: &str, outputs: &[(String, String)]) -> String {
    let notes: String = outputs
        .iter()
        .map(|(name, text)| format!("- {name}:\n{}\n", text.trim()))
        .collect();
    format!("{CONSENSUS_INSTRUCTION}\n\nTask:\n{task}\n\nAgents' notes this round:\n{notes}")
}

/// 写入审批 prompt：提议列表 + 冲突路径 + 严格输出格式
pub fn approval_prompt(proposals: &[WriteProposal], conflicts: &[String]) -> String {
    let proposals_json = serde_json::to_string_pretty(proposals).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You are the arbiter. The agents have proposed write actions. Decide which to apply.\n\
Output STRICT JSON with this schema only:\n\
{{\n  \"decisions\": [\n    {{\"path\": \"string\", \"action\": \"approve\"|\"reject\", \"notes\": \"short reason\"}}\n  ]\n}}\n\n\
JSON Schema:\n{schema}\n\n\
Proposals:\n{proposals_json}\n\
Detected conflicts for paths: {conflicts}\n",
        schema = decision_schema_json(),
        conflicts = json!(conflicts),
    )
}
