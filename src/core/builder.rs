//! Swarm 构建器：从 AppConfig 组装 Agent、仲裁者、协调状态与工具执行器
//!
//! Agent 过滤顺序：only（按名字或 provider 匹配）→ disable → 缺少 API Key 的跳过并告警。
//! 过滤后没有可用 Agent 是启动期致命错误。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AgentConfig, AppConfig};
use crate::core::{
    default_persona, AgentSession, Arbiter, BreakerPolicy, CircuitBreaker, CoordinationState,
    RateLimiter, RoundOrchestrator, RunSettings, SwarmError, ARBITER_PERSONA,
};
use crate::llm::{
    lookup_api_key, provider_defaults, ModelBackend, OpenAiBackend, RetryConfig, RetryingBackend,
    ScriptedBackend,
};
use crate::tools::{HandlerRegistry, ToolDefaults, ToolExecutor, ToolSandbox};

pub struct SwarmBuilder {
    config: AppConfig,
    overrides: HashMap<String, Arc<dyn ModelBackend>>,
}

impl SwarmBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            overrides: HashMap::new(),
        }
    }

    /// 用给定后端替换同名 Agent（或仲裁者）的后端，跳过 API Key 检查
    pub fn with_backend(mut self, name: &str, backend: Arc<dyn ModelBackend>) -> Self {
        self.overrides.insert(name.to_string(), backend);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn matches(agent: &AgentConfig, filter: &[String]) -> bool {
        filter.iter().any(|f| {
            f.eq_ignore_ascii_case(&agent.name) || f.eq_ignore_ascii_case(&agent.provider)
        })
    }

    fn retry(&self) -> RetryConfig {
        RetryConfig {
            attempts: self.config.retry.attempts,
            base_delay: Duration::from_millis(self.config.retry.base_delay_ms),
        }
    }

    /// 为一个 Agent 构建后端；失败返回原因
    fn build_backend(&self, agent: &AgentConfig) -> Result<Arc<dyn ModelBackend>, String> {
        if let Some(b) = self.overrides.get(&agent.name) {
            return Ok(b.clone());
        }
        if agent.provider.eq_ignore_ascii_case("mock") {
            return Ok(Arc::new(ScriptedBackend::replies(
                "mock",
                agent.mock_replies.iter().cloned(),
            )));
        }

        let defaults = provider_defaults(&agent.provider);
        let api_key = match &agent.api_key_env {
            Some(env) => lookup_api_key(&[env.as_str()]),
            None => defaults.and_then(|d| lookup_api_key(d.key_envs)),
        }
        .ok_or_else(|| format!("missing API key for {} ({})", agent.name, agent.provider))?;
        let model = agent
            .model
            .clone()
            .or_else(|| defaults.map(|d| d.model.to_string()))
            .ok_or_else(|| format!("no model configured for {} ({})", agent.name, agent.provider))?;
        let base_url = agent
            .base_url
            .clone()
            .or_else(|| defaults.and_then(|d| d.base_url.map(str::to_string)));

        let inner: Arc<dyn ModelBackend> = Arc::new(OpenAiBackend::new(
            &agent.provider.to_lowercase(),
            base_url.as_deref(),
            &model,
            &api_key,
        ));
        Ok(Arc::new(RetryingBackend::new(inner, self.retry())))
    }

    fn session(&self, agent: &AgentConfig, backend: Arc<dyn ModelBackend>) -> AgentSession {
        let mut session = AgentSession::new(agent.name.clone(), backend)
            .with_temperature(agent.temperature.unwrap_or(self.config.swarm.temperature));
        if let Some(system) = agent
            .system
            .as_deref()
            .or_else(|| default_persona(&agent.provider))
        {
            session = session.with_system(system);
        }
        session
    }

    /// 按配置顺序构建可用 Agent
    pub fn build_agents(&self) -> Result<Vec<AgentSession>, SwarmError> {
        let swarm = &self.config.swarm;
        let mut sessions = Vec::new();
        for agent in &self.config.agents {
            if !swarm.only.is_empty() && !Self::matches(agent, &swarm.only) {
                continue;
            }
            if Self::matches(agent, &swarm.disable) {
                tracing::info!(agent = %agent.name, "agent disabled by config");
                continue;
            }
            match self.build_backend(agent) {
                Ok(backend) => sessions.push(self.session(agent, backend)),
                Err(reason) => tracing::warn!(agent = %agent.name, reason = %reason, "skipping agent"),
            }
        }
        if sessions.is_empty() {
            return Err(SwarmError::NoUsableAgents);
        }
        Ok(sessions)
    }

    /// 仲裁者的 persona 固定为综合共识的角色，除非配置中显式给出 system
    pub fn build_arbiter(&self) -> Result<Arbiter, SwarmError> {
        let cfg = &self.config.arbiter;
        let backend = self
            .build_backend(cfg)
            .map_err(SwarmError::ArbiterUnavailable)?;
        let system = cfg.system.as_deref().unwrap_or(ARBITER_PERSONA);
        let session = AgentSession::new(cfg.name.clone(), backend)
            .with_system(system)
            .with_temperature(cfg.temperature.unwrap_or(self.config.swarm.temperature));
        Ok(Arbiter::new(session))
    }

    pub fn build_state(&self) -> CoordinationState {
        let limits = &self.config.limits;
        let tools = &self.config.tools;
        let sandbox = ToolSandbox::new(
            &tools.root,
            tools.allow_write,
            Duration::from_millis(limits.tool_timeout_ms),
            RateLimiter::new(limits.tool_max_per_window, limits.tool_window_secs),
        );
        let breaker = CircuitBreaker::new(BreakerPolicy::new(limits.cb_threshold, limits.cb_cooldown_secs));
        CoordinationState::new(sandbox, breaker)
    }

    pub fn build_executor(&self) -> ToolExecutor {
        let tools = &self.config.tools;
        ToolExecutor::new(
            HandlerRegistry::standard(),
            ToolDefaults {
                lease_secs: tools.default_lease_secs,
                extend_secs: tools.default_extend_secs,
                max_results: tools.default_max_results,
                max_bytes: tools.default_max_bytes,
                max_matches: tools.default_max_matches,
            },
        )
    }

    pub fn build(self) -> Result<RoundOrchestrator, SwarmError> {
        let agents = self.build_agents()?;
        let arbiter = self.build_arbiter()?;
        tracing::info!(
            agents = ?agents.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
            arbiter = %arbiter.name(),
            "swarm assembled"
        );
        let settings = RunSettings {
            rounds: self.config.swarm.rounds,
            history_chars: self.config.swarm.history_chars,
            read_preview_chars: self.config.tools.read_preview_chars,
            seed: self.config.queue.seed.clone(),
        };
        Ok(RoundOrchestrator::new(
            agents,
            arbiter,
            self.build_state(),
            self.build_executor(),
            settings,
        ))
    }
}
