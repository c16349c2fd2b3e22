//! 按 Agent 熔断
//!
//! 连续失败达到阈值后打开熔断，在 cooldown 内跳过该 Agent；一次成功即清零。
//! 没有显式的半开状态：冷却结束后的下一轮直接重试，其结果决定下一次转换。

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// 单个 Agent 的熔断状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CircuitState {
    pub failures: u32,
    pub open_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerPolicy {
    pub threshold: u32,
    pub cooldown: Duration,
}

impl BreakerPolicy {
    pub fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown: Duration::seconds(cooldown_secs as i64),
        }
    }
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self::new(2, 60)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    states: HashMap<String, CircuitState>,
}

impl CircuitBreaker {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            states: HashMap::new(),
        }
    }

    pub fn should_skip(&self, agent: &str, now: DateTime<Utc>) -> bool {
        self.open_until(agent).map_or(false, |until| now < until)
    }

    pub fn open_until(&self, agent: &str) -> Option<DateTime<Utc>> {
        self.states.get(agent).and_then(|s| s.open_until)
    }

    pub fn on_success(&mut self, agent: &str) {
        self.states.insert(agent.to_string(), CircuitState::default());
    }

    /// 记录一次失败；若本次使熔断打开则返回 true
    pub fn on_failure(&mut self, agent: &str, now: DateTime<Utc>) -> bool {
        let st = self.states.entry(agent.to_string()).or_default();
        st.failures += 1;
        if st.failures >= self.policy.threshold {
            st.open_until = Some(now + self.policy.cooldown);
            tracing::warn!(
                agent = %agent,
                failures = st.failures,
                cooldown_secs = self.policy.cooldown.num_seconds(),
                "circuit breaker opened"
            );
            true
        } else {
            false
        }
    }

    pub fn state(&self, agent: &str) -> CircuitState {
        self.states.get(agent).cloned().unwrap_or_default()
    }
}
