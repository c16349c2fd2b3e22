//! 模型后端层：抽象、OpenAI 兼容实现、脚本化 Mock、重试包装

pub mod mock;
pub mod openai;
pub mod providers;
pub mod traits;

pub use mock::ScriptedBackend;
pub use openai::{OpenAiBackend, TokenUsage};
pub use providers::{lookup_api_key, provider_defaults, ProviderDefaults, PROVIDERS};
pub use traits::{BackendError, ModelBackend, RetryConfig, RetryingBackend};
