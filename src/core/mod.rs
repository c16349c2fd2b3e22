//! 核心编排层：错误分类、限流与熔断、共享上下文与任务队列、Agent 会话、仲裁与轮次编排

pub mod arbiter;
pub mod breaker;
pub mod builder;
pub mod context_store;
pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod rate_limit;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod transcript;
pub mod work_queue;

pub use arbiter::{Arbiter, DecisionAction, WriteDecision, WriteDecisions, WriteProposal};
pub use breaker::{BreakerPolicy, CircuitBreaker, CircuitState};
pub use builder::SwarmBuilder;
pub use context_store::{ContextEntry, ContextStore, PutMode, PutOutcome};
pub use error::{SwarmError, ToolError, ValidationError};
pub use orchestrator::{RoundOrchestrator, RunResult, RunSettings, SeedItem};
pub use rate_limit::{RateDecision, RateLimiter};
pub use session::{default_persona, AgentSession, SessionOutcome, ARBITER_PERSONA};
pub use state::CoordinationState;
pub use telemetry::Telemetry;
pub use transcript::{EntryMeta, Transcript, TranscriptEntry};
pub use work_queue::{QueueStatus, WorkItem, WorkQueue, WorkStatus};
