//! 轮次编排端到端测试：脚本化后端驱动完整的 Agent → 工具 → 仲裁 → 写入流程

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hive::config::{AgentConfig, AppConfig};
    use hive::core::{RoundOrchestrator, RunResult, SeedItem, SwarmBuilder, TranscriptEntry};
    use hive::llm::ScriptedBackend;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn with_calls(json: &str) -> String {
        format!("- looked at the task\n```json\n{json}\n```\nDecision: continue")
    }

    fn swarm(
        agents: &[(&str, Arc<ScriptedBackend>)],
        arbiter: Arc<ScriptedBackend>,
        tweak: impl FnOnce(&mut AppConfig),
    ) -> (RoundOrchestrator, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.swarm.rounds = 1;
        cfg.tools.root = dir.path().to_path_buf();
        cfg.agents = agents.iter().map(|(n, _)| AgentConfig::new(n, "mock")).collect();
        cfg.arbiter = AgentConfig::new("Judge", "mock");
        tweak(&mut cfg);

        let mut builder = SwarmBuilder::new(cfg).with_backend("Judge", arbiter);
        for (name, backend) in agents {
            builder = builder.with_backend(name, backend.clone());
        }
        (builder.build().unwrap(), dir)
    }

    fn entries_by<'a>(result: &'a RunResult, speaker: &str) -> Vec<&'a TranscriptEntry> {
        result
            .transcript
            .iter()
            .filter(|e| e.speaker == speaker)
            .collect()
    }

    fn json_of(entry: &TranscriptEntry) -> Value {
        serde_json::from_str(&entry.content).unwrap()
    }

    #[tokio::test]
    async fn test_next_after_three_enqueues_reports_counts() {
        let grok = Arc::new(ScriptedBackend::new("xai").reply(with_calls(
            r#"{"tool_calls": [{"name": "coord_next", "args": {"lease_sec": 60}}, {"name": "coord_status", "args": {}}]}"#,
        )));
        let (mut orch, _dir) = swarm(&[("Grok", grok)], Arc::new(ScriptedBackend::new("mock")), |cfg| {
            cfg.queue.seed = ["list_code_files", "scan_docs", "review_tools"]
                .iter()
                .map(|k| SeedItem {
                    kind: k.to_string(),
                    payload: json!({}),
                })
                .collect();
        });

        let result = orch.run("organise the repo").await;

        let status = orch.state().queue.status();
        assert_eq!(status.length, 3);
        assert_eq!(status.counts.get("queued"), Some(&2));
        assert_eq!(status.counts.get("claimed"), Some(&1));

        let tool_entries = entries_by(&result, "Tool(Grok)");
        assert_eq!(tool_entries.len(), 2);
        let next = json_of(tool_entries[0]);
        assert_eq!(next["item"]["kind"], "list_code_files");
        assert_eq!(next["item"]["claimed_by"], "Grok");
        let st = json_of(tool_entries[1]);
        assert_eq!(st["counts"], json!({"queued": 2, "claimed": 1}));
        assert_eq!(st["phase"], 1);
    }

    #[tokio::test]
    async fn test_out_of_range_lease_is_a_tool_error() {
        let grok = Arc::new(ScriptedBackend::new("xai").reply(with_calls(
            r#"{"tool_calls": [{"name": "coord_next", "args": {"lease_sec": 10000000000000}}, {"name": "coord_status", "args": {}}]}"#,
        )));
        let (mut orch, _dir) = swarm(&[("Grok", grok)], Arc::new(ScriptedBackend::new("mock")), |cfg| {
            cfg.queue.seed = vec![SeedItem {
                kind: "scan_docs".to_string(),
                payload: json!({}),
            }];
        });

        let result = orch.run("t").await;

        let errors = entries_by(&result, "ToolError(Grok)");
        assert_eq!(errors.len(), 1);
        let err = json_of(errors[0]);
        assert_eq!(err["code"], 400);
        assert_eq!(err["tool"], "coord_next");
        assert_eq!(json_of(entries_by(&result, "Tool(Grok)")[0])["counts"], json!({"queued": 1}));
        assert_eq!(result.round_consensus.len(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_write_proposals_reach_arbiter() {
        let grok = Arc::new(ScriptedBackend::new("xai").reply(with_calls(
            r#"{"tool_calls": [{"name": "fs_write", "args": {"path": "notes.md", "content": "from grok"}}]}"#,
        )));
        let claude = Arc::new(ScriptedBackend::new("anthropic").reply(with_calls(
            r#"{"tool": "fs_write", "parameters": {"path": "notes.md", "content": "from claude"}}"#,
        )));
        let arbiter = Arc::new(
            ScriptedBackend::new("mock")
                .reply("Summary: write the notes\nDecision: stop")
                .reply("```json\n{\"decisions\": [{\"path\": \"notes.md\", \"action\": \"approve\", \"notes\": \"first\"}]}\n```"),
        );
        let (mut orch, dir) = swarm(
            &[("Grok", grok), ("Claude", claude)],
            arbiter.clone(),
            |cfg| cfg.tools.allow_write = true,
        );

        let result = orch.run("write notes").await;

        let prompts = arbiter.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("Detected conflicts for paths: [\"notes.md\"]"));
        assert!(prompts[1].contains("from claude"));

        // 同一路径只落盘第一个提议
        let written = std::fs::read_to_string(dir.path().join("notes.md")).unwrap();
        assert_eq!(written, "from grok");
        assert_eq!(result.telemetry.writes.proposed, 2);
        assert_eq!(result.telemetry.writes.applied, 1);
        assert_eq!(entries_by(&result, "ToolProposal(Grok)").len(), 1);
        assert!(entries_by(&result, "System")
            .iter()
            .any(|e| e.content.starts_with("Applied writes:")));
        // stop 只是建议
        assert_eq!(result.consensus.as_deref(), Some("Summary: write the notes\nDecision: stop"));
    }

    #[tokio::test]
    async fn test_stale_if_version_put_reports_current_version() {
        let grok = Arc::new(ScriptedBackend::new("xai").reply(with_calls(
            r#"{"tool_calls": [
                {"name": "ctx_put", "args": {"key": "plan", "value": "v1", "mode": "set"}},
                {"name": "ctx_put", "args": {"key": "plan", "value": "v2", "mode": "set"}},
                {"name": "ctx_put", "args": {"key": "plan", "value": "v3", "mode": "set"}},
                {"name": "ctx_put", "args": {"key": "plan", "value": "stale", "mode": "if_version", "expected_version": 5}}
            ]}"#,
        )));
        let (mut orch, _dir) = swarm(&[("Grok", grok)], Arc::new(ScriptedBackend::new("mock")), |_| {});

        let result = orch.run("plan").await;

        let errors = entries_by(&result, "ToolError(Grok)");
        assert_eq!(errors.len(), 1);
        let err = json_of(errors[0]);
        assert_eq!(err["ok"], false);
        assert_eq!(err["version"], 3);
        assert_eq!(err["code"], 409);
        assert_eq!(orch.state().context.get("plan"), (Some(&json!("v3")), 3));
    }

    #[tokio::test]
    async fn test_traversal_read_is_rejected() {
        let grok = Arc::new(ScriptedBackend::new("xai").reply(with_calls(
            r#"{"tool_calls": [{"name": "fs_read", "args": {"path": "../../etc/passwd"}}]}"#,
        )));
        let (mut orch, _dir) = swarm(&[("Grok", grok)], Arc::new(ScriptedBackend::new("mock")), |cfg| {
            cfg.tools.root = "/workspace".into();
        });

        let result = orch.run("read secrets").await;

        let errors = entries_by(&result, "ToolError(Grok)");
        assert_eq!(errors.len(), 1);
        let err = json_of(errors[0]);
        assert_eq!(err["error"], "path_escape");
        assert_eq!(err["code"], 403);
        assert_eq!(err["tool"], "fs_read");
        assert!(!errors[0].content.contains("root:"));
    }

    #[tokio::test]
    async fn test_failing_agent_is_skipped_after_threshold() {
        let grok = Arc::new(ScriptedBackend::new("xai"));
        let gemini = Arc::new(ScriptedBackend::new("google").fail("quota").fail("quota"));
        let (mut orch, _dir) = swarm(
            &[("Grok", grok.clone()), ("Gemini", gemini.clone())],
            Arc::new(ScriptedBackend::new("mock")),
            |cfg| cfg.swarm.rounds = 3,
        );

        let result = orch.run("keep going").await;

        assert_eq!(gemini.call_count(), 2);
        assert_eq!(grok.call_count(), 3);
        let gemini_entries = entries_by(&result, "Gemini");
        assert_eq!(gemini_entries.len(), 3);
        assert!(gemini_entries[0].content.starts_with("Agent error:"));
        assert!(gemini_entries[2].content.starts_with("Circuit breaker open"));
        assert_eq!(result.telemetry.rounds, 3);
        assert_eq!(
            result.telemetry.agent_calls.iter().filter(|c| c.skipped).count(),
            1
        );
        assert_eq!(result.round_consensus.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_calls_surface_as_tool_errors() {
        let grok = Arc::new(ScriptedBackend::new("xai").reply(with_calls(
            r#"{"calls": [{"name": "format_disk", "args": {}}, {"tool": "fs_list", "args": {"max_results": "all"}}]}"#,
        )));
        let (mut orch, _dir) = swarm(&[("Grok", grok)], Arc::new(ScriptedBackend::new("mock")), |_| {});

        let result = orch.run("t").await;

        let errors: Vec<Value> = entries_by(&result, "ToolError(Grok)").into_iter().map(json_of).collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0]["error"], "unknown_tool:format_disk");
        assert_eq!(errors[1]["error"], "missing:dir");
        assert!(errors.iter().all(|e| e["code"] == 400));
        assert_eq!(result.telemetry.failed_tool_calls(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_read_only_calls_hit_cache() {
        let list = r#"{"tool_calls": [{"name": "fs_list", "args": {"dir": "."}}]}"#;
        let grok = Arc::new(ScriptedBackend::new("xai").reply(with_calls(list)));
        let claude = Arc::new(ScriptedBackend::new("anthropic").reply(with_calls(list)));
        let (mut orch, dir) = swarm(
            &[("Grok", grok), ("Claude", claude)],
            Arc::new(ScriptedBackend::new("mock")),
            |_| {},
        );
        std::fs::write(dir.path().join("a.rs"), "fn main() {}").unwrap();

        let result = orch.run("t").await;

        let fresh = entries_by(&result, "Tool(Grok)");
        assert_eq!(fresh.len(), 1);
        assert!(fresh[0].content.starts_with("Tool fs_list result: 1 files"));
        let cached = entries_by(&result, "ToolCache(Claude)");
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].content, fresh[0].content);
        assert!(result.telemetry.tool_calls.iter().any(|c| c.cached));
    }

    #[tokio::test]
    async fn test_writes_disabled_and_unparseable_decisions() {
        let proposal = r#"{"tool_calls": [{"name": "fs_write", "args": {"path": "out.txt", "content": "x"}}]}"#;
        let grok = Arc::new(
            ScriptedBackend::new("xai")
                .reply(with_calls(proposal))
                .reply(with_calls(proposal)),
        );
        let arbiter = Arc::new(
            ScriptedBackend::new("mock")
                .reply("consensus 1")
                .reply(r#"{"decisions": [{"path": "out.txt", "action": "approve", "notes": "ok"}]}"#)
                .reply("consensus 2")
                .reply("I approve everything"),
        );
        let (mut orch, dir) = swarm(&[("Grok", grok)], arbiter, |cfg| cfg.swarm.rounds = 2);

        let result = orch.run("t").await;

        assert!(!dir.path().join("out.txt").exists());
        let system: Vec<&str> = entries_by(&result, "System")
            .into_iter()
            .map(|e| e.content.as_str())
            .collect();
        assert!(system[0].contains("writes_disabled"));
        assert_eq!(system[1], "No valid write decision JSON parsed.");
        assert_eq!(result.telemetry.writes.proposed, 2);
        assert_eq!(result.telemetry.writes.applied, 0);
        assert_eq!(result.consensus.as_deref(), Some("consensus 2"));
    }

    #[tokio::test]
    async fn test_arbiter_failure_does_not_abort_run() {
        let grok = Arc::new(ScriptedBackend::new("xai"));
        let arbiter = Arc::new(ScriptedBackend::new("mock").fail("down").reply("back"));
        let (mut orch, _dir) = swarm(&[("Grok", grok)], arbiter, |cfg| cfg.swarm.rounds = 2);

        let result = orch.run("t").await;

        assert_eq!(result.round_consensus, vec![None, Some("back".to_string())]);
        assert_eq!(result.consensus.as_deref(), Some("back"));
        assert!(entries_by(&result, "System")[0].content.starts_with("Arbiter error"));
        assert_eq!(result.corr_id.len(), 12);
        assert!(result
            .transcript
            .iter()
            .all(|e| e.meta.corr_id.as_deref() == Some(result.corr_id.as_str())));
    }

    #[tokio::test]
    async fn test_rate_limit_applies_per_actor() {
        let grok = Arc::new(ScriptedBackend::new("xai").reply(with_calls(
            r#"{"tool_calls": [{"name": "fs_stat", "args": {"path": "."}}, {"name": "fs_stat", "args": {"path": "./"}}]}"#,
        )));
        let (mut orch, _dir) = swarm(&[("Grok", grok)], Arc::new(ScriptedBackend::new("mock")), |cfg| {
            cfg.limits.tool_max_per_window = 1;
        });

        let result = orch.run("t").await;

        let errors = entries_by(&result, "ToolError(Grok)");
        assert_eq!(errors.len(), 1);
        let err = json_of(errors[0]);
        assert_eq!(err["code"], 429);
        assert_eq!(err["scope"], "Grok");
        assert_eq!(err["limit"], 1);
    }

    #[tokio::test]
    async fn test_later_round_prompt_carries_transcript() {
        let grok = Arc::new(ScriptedBackend::new("xai").reply("first thoughts").reply("second thoughts"));
        let arbiter = Arc::new(ScriptedBackend::new("mock").reply("agreed plan"));
        let (mut orch, _dir) = swarm(&[("Grok", grok.clone())], arbiter, |cfg| cfg.swarm.rounds = 2);

        orch.run("t").await;

        let prompts = grok.prompts();
        assert!(!prompts[0].contains("[Grok]"));
        assert!(prompts[1].contains("[Grok] first thoughts"));
        assert!(prompts[1].contains("[Arbiter] agreed plan"));
        assert!(prompts[1].contains("Round 2."));
    }
}
