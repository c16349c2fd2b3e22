//! 滑动窗口限流
//!
//! 按 (tool, actor) 维护最近 window 秒内的事件时间戳；每次 check 先清理过期事件，
//! 未达上限则记录本次事件并放行，否则拒绝并给出最早事件过期所需秒数。被拒绝的检查不记录事件。

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::core::ToolError;

/// 单次限流判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// 当前窗口内剩余可用次数（已计入本次）
    pub remaining: usize,
    /// 距离最早事件移出窗口的秒数；放行时为 0
    pub reset_secs: u64,
}

/// 按 tool + actor 分桶的滑动窗口限流器
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max: usize,
    window: Duration,
    events: HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(max: usize, window_secs: u64) -> Self {
        Self {
            max,
            window: Duration::seconds(window_secs as i64),
            events: HashMap::new(),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn window_secs(&self) -> u64 {
        self.window.num_seconds().max(0) as u64
    }

    fn key(tool: &str, actor: &str) -> String {
        let actor = if actor.is_empty() { "-" } else { actor };
        format!("{tool}:{actor}")
    }

    pub fn check(&mut self, tool: &str, actor: &str, now: DateTime<Utc>) -> RateDecision {
        let window = self.window;
        let q = self.events.entry(Self::key(tool, actor)).or_default();
        q.retain(|t| now.signed_duration_since(*t) < window);

        if q.len() >= self.max {
            let reset_secs = q
                .iter()
                .min()
                .map(|oldest| {
                    let left = window - now.signed_duration_since(*oldest);
                    left.num_seconds().max(0) as u64
                })
                .unwrap_or(0);
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_secs,
            };
        }

        q.push_back(now);
        RateDecision {
            allowed: true,
            remaining: self.max - q.len(),
            reset_secs: 0,
        }
    }

    /// check 的便捷形式：拒绝时转为 ToolError::RateLimited
    pub fn admit(&mut self, tool: &str, actor: &str, now: DateTime<Utc>) -> Result<RateDecision, ToolError> {
        let decision = self.check(tool, actor, now);
        if decision.allowed {
            Ok(decision)
        } else {
            tracing::warn!(tool = %tool, actor = %actor, reset_secs = decision.reset_secs, "rate limited");
            Err(ToolError::RateLimited {
                tool: tool.to_string(),
                scope: if actor.is_empty() { "-".to_string() } else { actor.to_string() },
                limit: self.max,
                window_secs: self.window_secs(),
                remaining: decision.remaining,
                reset_secs: decision.reset_secs,
            })
        }
    }

    /// 当前窗口内记录的事件数（不清理过期项）
    pub fn recorded(&self, tool: &str, actor: &str) -> usize {
        self.events
            .get(&Self::key(tool, actor))
            .map(|q| q.len())
            .unwrap_or(0)
    }
}
