//! Agent 会话
//!
//! 把一个模型后端绑定到 persona（system prompt），每轮调用一次；调用前后经过熔断器：
//! 熔断打开时直接跳过，成功清零，失败累计并可能打开熔断。

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::core::CircuitBreaker;
use crate::llm::{BackendError, ModelBackend};

/// 内置 persona（按后端标识）
pub fn default_persona(provider: &str) -> Option<&'static str> {
    match provider.to_lowercase().as_str() {
        "xai" => Some("You are Grok, a pragmatic senior engineer. Prioritize actionable steps, minimalism, and working code. When unclear, state assumptions and propose a quick experiment."),
        "google" => Some("You are Gemini, a fast researcher. Bring up relevant docs, alternatives, and risks. Prefer concise bullet points and references (no links required)."),
        "anthropic" => Some("You are Claude Opus, a careful reviewer. Identify edge cases, safety, and testability. Suggest improvements and point out ambiguities politely."),
        _ => None,
    }
}

pub const ARBITER_PERSONA: &str =
    "You are the arbiter. Synthesize short, decisive, practical consensus across agents.";

/// 单轮调用结果
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// 熔断打开，未调用后端
    Skipped { until: DateTime<Utc> },
    Replied { text: String, ms: u64 },
    Failed { error: BackendError, ms: u64, opened: bool },
}

pub struct AgentSession {
    pub name: String,
    pub system: Option<String>,
    pub temperature: f32,
    backend: Arc<dyn ModelBackend>,
}

impl fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSession")
            .field("name", &self.name)
            .field("backend", &self.backend_id())
            .field("model", &self.model())
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl AgentSession {
    pub fn new(name: impl Into<String>, backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            name: name.into(),
            system: None,
            temperature: 0.2,
            backend,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn backend_id(&self) -> &str {
        self.backend.backend_id()
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.backend.token_usage()
    }

    /// 直接调用后端，不经过熔断器（仲裁者使用）
    pub async fn invoke(&self, prompt: &str) -> Result<String, BackendError> {
        self.backend
            .invoke(prompt, self.system.as_deref(), self.temperature)
            .await
    }

    /// 本轮调用：熔断打开则跳过，否则调用并更新熔断状态
    pub async fn run_round(&self, breaker: &mut CircuitBreaker, prompt: &str, now: DateTime<Utc>) -> SessionOutcome {
        if let Some(until) = breaker.open_until(&self.name).filter(|until| now < *until) {
            tracing::info!(agent = %self.name, until = %until, "circuit open, skipping agent");
            return SessionOutcome::Skipped { until };
        }

        let start = Instant::now();
        let result = self.invoke(prompt).await;
        let ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(text) => {
                breaker.on_success(&self.name);
                tracing::info!(agent = %self.name, backend = %self.backend_id(), latency_ms = ms, "agent replied");
                SessionOutcome::Replied { text, ms }
            }
            Err(error) => {
                let opened = breaker.on_failure(&self.name, Utc::now());
                tracing::warn!(agent = %self.name, error = %error, latency_ms = ms, "agent call failed");
                SessionOutcome::Failed { error, ms, opened }
            }
        }
    }
}
