//! 协调状态聚合
//!
//! 一次运行内的全部共享可变状态：上下文、任务队列、熔断器、沙箱（含限流器）。
//! 由 RoundOrchestrator 独占持有，工具处理函数通过 &mut 借用访问；没有全局/静态状态。

use serde_json::{json, Value};

use crate::core::{CircuitBreaker, ContextStore, PutMode, WorkQueue};
use crate::tools::ToolSandbox;

/// 记录当前轮次的上下文 key
pub const PHASE_KEY: &str = "phase";

pub struct CoordinationState {
    pub context: ContextStore,
    pub queue: WorkQueue,
    pub breaker: CircuitBreaker,
    pub sandbox: ToolSandbox,
}

impl CoordinationState {
    pub fn new(sandbox: ToolSandbox, breaker: CircuitBreaker) -> Self {
        Self {
            context: ContextStore::new(),
            queue: WorkQueue::new(),
            breaker,
            sandbox,
        }
    }

    /// 每轮开始时无条件写入 phase = round
    pub fn mark_phase(&mut self, round: u32) {
        self.context.put(PHASE_KEY, json!(round), PutMode::Set, None);
    }

    pub fn phase(&self) -> Value {
        self.context.get(PHASE_KEY).0.cloned().unwrap_or(Value::Null)
    }
}
