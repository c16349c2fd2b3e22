//! Hive - 多 Agent 共识协调引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 限流、熔断、版本化上下文、租约队列、Agent 会话、仲裁与轮次编排
//! - **llm**: 模型后端抽象与实现（OpenAI 兼容 / 脚本化 Mock / 重试包装）
//! - **observability**: tracing 订阅器初始化
//! - **tools**: Tool Call 解析与校验、沙箱文件操作、处理函数表与执行器

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod tools;

pub use crate::core::{RoundOrchestrator, RunResult, SwarmBuilder, SwarmError};
