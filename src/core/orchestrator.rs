//! 轮次编排
//!
//! 每轮：写入 phase → (第 1 轮) 队列种子 → 构建 prompt → 按配置顺序依次调用各 Agent
//! （经熔断器）→ 解析并分发 Tool Call（fs_write 只收集为提议）→ 仲裁者综合共识 →
//! 若有写入提议则检测冲突、请求审批、只落盘被批准的写入。
//! 共识中的 stop 只是建议，不会提前结束；R 轮后最后一次共识即结果。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::arbiter::{detect_conflicts, Arbiter, WriteProposal};
use crate::core::prompt::round_prompt;
use crate::core::telemetry::{AgentCallRecord, ToolCallRecord};
use crate::core::{
    AgentSession, CoordinationState, EntryMeta, SessionOutcome, Telemetry, Transcript, TranscriptEntry,
};
use crate::tools::{parse_and_validate, ToolExecutor, ToolKind, ToolOutcome, ValidatedCall};

/// 第 1 轮开始时（队列为空）入队的任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedItem {
    pub kind: String,
    #[serde(default = "empty_object")]
    pub payload: Value,
}

fn empty_object() -> Value {
    json!({})
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub rounds: u32,
    pub history_chars: usize,
    pub read_preview_chars: usize,
    pub seed: Vec<SeedItem>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            rounds: 2,
            history_chars: 2500,
            read_preview_chars: 500,
            seed: Vec::new(),
        }
    }
}

/// 一次运行的结果
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub task: String,
    pub corr_id: String,
    /// 最后一轮的共识
    pub consensus: Option<String>,
    /// 每轮的共识（仲裁失败的轮次为空）
    pub round_consensus: Vec<Option<String>>,
    pub transcript: Vec<TranscriptEntry>,
    pub telemetry: Telemetry,
}

pub struct RoundOrchestrator {
    agents: Vec<AgentSession>,
    arbiter: Arbiter,
    state: CoordinationState,
    executor: ToolExecutor,
    settings: RunSettings,
}

/// 单次运行内的可变记录
struct RunLog {
    corr_id: String,
    transcript: Transcript,
    telemetry: Telemetry,
}

impl RunLog {
    fn push(&mut self, speaker: impl Into<String>, content: impl Into<String>, meta: EntryMeta) {
        self.transcript
            .push(TranscriptEntry::new(speaker, content, meta.corr_id(&self.corr_id)));
    }
}

impl RoundOrchestrator {
    pub fn new(
        agents: Vec<AgentSession>,
        arbiter: Arbiter,
        state: CoordinationState,
        executor: ToolExecutor,
        settings: RunSettings,
    ) -> Self {
        Self {
            agents,
            arbiter,
            state,
            executor,
            settings,
        }
    }

    pub fn state(&self) -> &CoordinationState {
        &self.state
    }

    pub fn agents(&self) -> &[AgentSession] {
        &self.agents
    }

    pub async fn run(&mut self, task: &str) -> RunResult {
        let Self {
            agents,
            arbiter,
            state,
            executor,
            settings,
        } = self;
        executor.clear_cache();

        let corr_id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        let mut log = RunLog {
            corr_id: corr_id.clone(),
            transcript: Transcript::new(),
            telemetry: Telemetry::default(),
        };
        let mut round_consensus = Vec::new();
        tracing::info!(corr_id = %corr_id, rounds = settings.rounds, agents = agents.len(), "swarm run started");

        for round in 1..=settings.rounds {
            state.mark_phase(round);
            if round == 1 && state.queue.is_empty() {
                seed_queue(state, &settings.seed);
            }
            log.telemetry.rounds = round;
            tracing::info!(corr_id = %corr_id, round, "round started");

            let prompt = round_prompt(task, &log.transcript, round, settings.history_chars);
            let mut outputs: Vec<(String, String)> = Vec::new();
            let mut proposals: Vec<WriteProposal> = Vec::new();

            for agent in agents.iter() {
                let outcome = agent.run_round(&mut state.breaker, &prompt, Utc::now()).await;
                let meta = EntryMeta::now()
                    .agent(&agent.name)
                    .backend(agent.backend_id(), agent.model());
                match outcome {
                    SessionOutcome::Skipped { until } => {
                        let msg = format!("Circuit breaker open; skipping until {}", until.to_rfc3339());
                        log.push(agent.name.as_str(), msg.as_str(), meta);
                        log.telemetry.record_agent(AgentCallRecord {
                            round,
                            agent: agent.name.clone(),
                            backend: agent.backend_id().to_string(),
                            ok: false,
                            skipped: true,
                            ms: 0,
                            error: None,
                        });
                        outputs.push((agent.name.clone(), msg));
                    }
                    SessionOutcome::Failed { error, ms, .. } => {
                        let msg = format!("Agent error: {error}");
                        log.push(agent.name.as_str(), msg.as_str(), meta.latency_ms(ms));
                        log.telemetry.record_agent(AgentCallRecord {
                            round,
                            agent: agent.name.clone(),
                            backend: agent.backend_id().to_string(),
                            ok: false,
                            skipped: false,
                            ms,
                            error: Some(error.to_string()),
                        });
                        outputs.push((agent.name.clone(), msg));
                    }
                    SessionOutcome::Replied { text, ms } => {
                        log.push(agent.name.as_str(), text.as_str(), meta.latency_ms(ms));
                        log.telemetry.record_agent(AgentCallRecord {
                            round,
                            agent: agent.name.clone(),
                            backend: agent.backend_id().to_string(),
                            ok: true,
                            skipped: false,
                            ms,
                            error: None,
                        });
                        dispatch_calls(
                            state,
                            executor,
                            &mut log,
                            &mut proposals,
                            &agent.name,
                            &text,
                            round,
                            settings.read_preview_chars,
                        );
                        outputs.push((agent.name.clone(), text));
                    }
                }
            }

            match arbiter.synthesize(task, &outputs).await {
                Ok(consensus) => {
                    let meta = EntryMeta::now()
                        .agent(arbiter.name())
                        .backend(arbiter.session().backend_id(), arbiter.session().model());
                    log.push("Arbiter", consensus.as_str(), meta);
                    round_consensus.push(Some(consensus));
                }
                Err(e) => {
                    tracing::warn!(corr_id = %corr_id, round, error = %e, "arbiter synthesis failed");
                    log.push("System", format!("Arbiter error: {e}"), EntryMeta::now());
                    round_consensus.push(None);
                }
            }

            if !proposals.is_empty() {
                review_writes(arbiter, state, &mut log, &proposals, round).await;
            }
        }

        for agent in agents.iter() {
            log.telemetry
                .tokens
                .insert(agent.name.clone(), agent.token_usage());
        }
        let consensus = round_consensus.iter().rev().flatten().next().cloned();
        tracing::info!(
            corr_id = %corr_id,
            agent_calls = log.telemetry.agent_calls.len(),
            tool_calls = log.telemetry.tool_calls.len(),
            writes_applied = log.telemetry.writes.applied,
            "swarm run finished"
        );
        RunResult {
            task: task.to_string(),
            corr_id,
            consensus,
            round_consensus,
            transcript: log.transcript.into_entries(),
            telemetry: log.telemetry,
        }
    }
}

fn seed_queue(state: &mut CoordinationState, seed: &[SeedItem]) {
    for item in seed {
        match state.queue.enqueue(&item.kind, item.payload.clone()) {
            Ok(id) => tracing::debug!(id = %id, kind = %item.kind, "seeded work item"),
            Err(e) => tracing::warn!(kind = %item.kind, error = %e, "skipping invalid seed item"),
        }
    }
}

fn proposal_from(call: &ValidatedCall, by: &str) -> WriteProposal {
    WriteProposal {
        by: by.to_string(),
        path: call.str_arg("path").unwrap_or_default().to_string(),
        content: call.str_arg("content").unwrap_or_default().to_string(),
        create_dirs: call.bool_arg("create_dirs").unwrap_or(true),
        allow_overwrite: call.bool_arg("allow_overwrite").unwrap_or(true),
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch_calls(
    state: &mut CoordinationState,
    executor: &mut ToolExecutor,
    log: &mut RunLog,
    proposals: &mut Vec<WriteProposal>,
    agent: &str,
    text: &str,
    round: u32,
    preview_chars: usize,
) {
    for parsed in parse_and_validate(text) {
        let call = match parsed.validation {
            Ok(call) => call,
            Err(e) => {
                let err = json!({ "error": e.reason(), "code": e.code(), "tool": parsed.call.name });
                log.push(format!("ToolError({agent})"), err.to_string(), EntryMeta::now().agent(agent).tool(&parsed.call.name));
                log.telemetry.record_tool(ToolCallRecord {
                    round,
                    tool: parsed.call.name.clone(),
                    actor: agent.to_string(),
                    ok: false,
                    cached: false,
                    ms: 0,
                    error: Some(e.reason()),
                });
                continue;
            }
        };

        if call.kind == ToolKind::FsWrite {
            let proposal = proposal_from(&call, agent);
            tracing::info!(agent = %agent, path = %proposal.path, "write proposed");
            log.telemetry.writes.proposed += 1;
            log.push(
                format!("ToolProposal({agent})"),
                json!({ "fs_write": proposal }).to_string(),
                EntryMeta::now().agent(agent).tool("fs_write"),
            );
            proposals.push(proposal);
            continue;
        }

        let outcome = executor.execute(state, &call, agent);
        let speaker = if !outcome.ok {
            format!("ToolError({agent})")
        } else if outcome.cached {
            format!("ToolCache({agent})")
        } else {
            format!("Tool({agent})")
        };
        log.push(
            speaker,
            render_tool_result(call.kind, &outcome, preview_chars),
            EntryMeta::now().agent(agent).tool(call.kind.name()).latency_ms(outcome.ms),
        );
        log.telemetry.record_tool(ToolCallRecord {
            round,
            tool: call.kind.name().to_string(),
            actor: agent.to_string(),
            ok: outcome.ok,
            cached: outcome.cached,
            ms: outcome.ms,
            error: outcome.error.as_ref().map(|e| e.slug().to_string()),
        });
    }
}

/// 工具结果写回 transcript 的文本
fn render_tool_result(kind: ToolKind, outcome: &ToolOutcome, preview_chars: usize) -> String {
    let v = &outcome.value;
    if !outcome.ok {
        let mut err = v.clone();
        if let Value::Object(map) = &mut err {
            map.entry("tool").or_insert_with(|| json!(kind.name()));
        }
        return err.to_string();
    }
    match kind {
        ToolKind::FsList => format!(
            "Tool fs_list result: {} files\n{}",
            v.get("count").and_then(Value::as_u64).unwrap_or(0),
            v
        ),
        ToolKind::FsRead => {
            let content = v.get("content").and_then(Value::as_str).unwrap_or_default();
            let mut snippet: String = content.chars().take(preview_chars).collect();
            if content.chars().count() > preview_chars {
                snippet.push_str("\n...");
            }
            format!(
                "fs_read {}:\n{}",
                v.get("path").and_then(Value::as_str).unwrap_or_default(),
                snippet
            )
        }
        ToolKind::SearchText => format!("search_text results:\n{v}"),
        _ => v.to_string(),
    }
}

async fn review_writes(
    arbiter: &Arbiter,
    state: &mut CoordinationState,
    log: &mut RunLog,
    proposals: &[WriteProposal],
    round: u32,
) {
    let conflicts = detect_conflicts(proposals);
    let review = match arbiter.review_writes(proposals, &conflicts).await {
        Ok(review) => review,
        Err(e) => {
            tracing::warn!(error = %e, "write review failed");
            log.push("System", format!("Write review failed: {e}"), EntryMeta::now());
            return;
        }
    };
    let Some(decisions) = review.decisions else {
        log.push("System", "No valid write decision JSON parsed.", EntryMeta::now());
        return;
    };

    let mut applied: Vec<Value> = Vec::new();
    let mut seen: Vec<&str> = Vec::new();
    for decision in decisions.approved() {
        if seen.contains(&decision.path.as_str()) {
            continue;
        }
        // 同一路径只落盘第一个提议
        let Some(p) = proposals.iter().find(|p| p.path == decision.path) else {
            continue;
        };
        seen.push(decision.path.as_str());

        let start = std::time::Instant::now();
        let result = state
            .sandbox
            .write(&p.path, &p.content, p.create_dirs, p.allow_overwrite, &p.by);
        let ms = start.elapsed().as_millis() as u64;
        let (ok, value, error) = match result {
            Ok(w) => {
                if w.applied {
                    log.telemetry.writes.applied += 1;
                }
                (true, serde_json::to_value(&w).unwrap_or(Value::Null), None)
            }
            Err(e) => (false, e.to_value(), Some(e.slug().to_string())),
        };
        log.telemetry.record_tool(ToolCallRecord {
            round,
            tool: "fs_write".to_string(),
            actor: p.by.clone(),
            ok,
            cached: false,
            ms,
            error,
        });
        applied.push(json!({ "path": p.path, "by": p.by, "result": value, "notes": decision.notes }));
    }

    log.push(
        "Arbiter",
        format!("Write decisions:\n{}", json!(decisions)),
        EntryMeta::now().agent(arbiter.name()),
    );
    if !applied.is_empty() {
        tracing::info!(count = applied.len(), "approved writes processed");
        log.push("System", format!("Applied writes:\n{}", Value::Array(applied)), EntryMeta::now());
    }
}
