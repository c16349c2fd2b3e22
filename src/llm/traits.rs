//! 模型后端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 ModelBackend：invoke(prompt, system, temperature) -> 文本。
//! 瞬时失败的退避重试由 RetryingBackend 包装完成，编排层只观察成功 / 失败。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// 后端调用失败；对编排层是不透明的，只驱动熔断并写入 transcript
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("empty response")]
    EmptyResponse,

    #[error("missing API key for {0}")]
    MissingApiKey(String),

    #[error("scripted failure: {0}")]
    Scripted(String),
}

impl BackendError {
    /// 是否值得重试（网络 / 服务端错误）
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Request(_))
    }
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// 后端标识（如 xai、anthropic、mock）
    fn backend_id(&self) -> &str;

    fn model(&self) -> &str;

    async fn invoke(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: f32,
    ) -> Result<String, BackendError>;

    /// 累计 token 使用：(prompt_tokens, completion_tokens, total_tokens)；默认 (0, 0, 0)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 重试配置：第 i 次失败后等待 base_delay * 2^i
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// 对瞬时失败做指数退避重试的包装
pub struct RetryingBackend {
    inner: Arc<dyn ModelBackend>,
    retry: RetryConfig,
}

impl RetryingBackend {
    pub fn new(inner: Arc<dyn ModelBackend>, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }
}

#[async_trait]
impl ModelBackend for RetryingBackend {
    fn backend_id(&self) -> &str {
        self.inner.backend_id()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }

    async fn invoke(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: f32,
    ) -> Result<String, BackendError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.inner.invoke(prompt, system, temperature).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.retry.base_delay * 2u32.pow(attempt);
                    tracing::warn!(
                        backend = %self.inner.backend_id(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "backend call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
