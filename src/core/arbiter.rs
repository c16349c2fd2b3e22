//! 仲裁者
//!
//! 一个特殊的 AgentSession：每轮把各 Agent 输出综合成共识文本；有写入提议时，
//! 按严格格式 `{"decisions": [{"path", "action", "notes"}]}` 逐路径批准或拒绝。
//! 无法解析的审批输出视为没有决定，不是错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::core::prompt::{approval_prompt, consensus_prompt};
use crate::core::AgentSession;
use crate::llm::BackendError;
use crate::tools::parser::extract_json_values;

/// 一轮中收集的 fs_write 请求；轮末消费，不持久化
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteProposal {
    pub by: String,
    pub path: String,
    pub content: String,
    pub create_dirs: bool,
    pub allow_overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WriteDecision {
    /// 提议中的目标路径
    pub path: String,
    pub action: DecisionAction,
    /// 简短理由
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WriteDecisions {
    pub decisions: Vec<WriteDecision>,
}

impl WriteDecisions {
    pub fn approved(&self) -> impl Iterator<Item = &WriteDecision> {
        self.decisions
            .iter()
            .filter(|d| d.action == DecisionAction::Approve)
    }
}

pub fn decision_schema_json() -> String {
    let schema = schema_for!(WriteDecisions);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 取第一个符合严格格式的 JSON 值
pub fn parse_decisions(text: &str) -> Option<WriteDecisions> {
    extract_json_values(text)
        .into_iter()
        .find_map(|v| serde_json::from_value::<WriteDecisions>(v).ok())
}

/// 被两个及以上提议指向的路径，按首次出现顺序
pub fn detect_conflicts(proposals: &[WriteProposal]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order = Vec::new();
    for p in proposals.iter().filter(|p| !p.path.is_empty()) {
        let n = counts.entry(p.path.as_str()).or_insert(0);
        if *n == 0 {
            order.push(p.path.as_str());
        }
        *n += 1;
    }
    order
        .into_iter()
        .filter(|path| counts.get(path).copied().unwrap_or(0) > 1)
        .map(str::to_string)
        .collect()
}

/// 写入审批的原始回复与解析结果
#[derive(Debug, Clone)]
pub struct WriteReview {
    pub raw: String,
    pub decisions: Option<WriteDecisions>,
}

pub struct Arbiter {
    session: AgentSession,
}

impl Arbiter {
    pub fn new(session: AgentSession) -> Self {
        Self { session }
    }

    pub fn name(&self) -> &str {
        &self.session.name
    }

    pub fn session(&self) -> &AgentSession {
        &self.session
    }

    pub async fn synthesize(&self, task: &str, outputs: &[(String, String)]) -> Result<String, BackendError> {
        self.session.invoke(&consensus_prompt(task, outputs)).await
    }

    pub async fn review_writes(
        &self,
        proposals: &[WriteProposal],
        conflicts: &[String],
    ) -> Result<WriteReview, BackendError> {
        if !conflicts.is_empty() {
            tracing::info!(conflicts = ?conflicts, "conflicting write proposals");
        }
        let raw = self.session.invoke(&approval_prompt(proposals, conflicts)).await?;
        let decisions = parse_decisions(&raw);
        if decisions.is_none() {
            tracing::warn!(arbiter = %self.name(), "no valid write decision parsed");
        }
        Ok(WriteReview { raw, decisions })
    }
}
