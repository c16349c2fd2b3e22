//! 脚本化 Mock 后端（用于测试与无 API Key 的本地运行）
//!
//! 按顺序回放预设的回复或失败；脚本耗尽后返回默认回复。记录收到的每个 prompt 供断言。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{BackendError, ModelBackend};

#[derive(Debug, Clone)]
enum Step {
    Reply(String),
    Fail(BackendError),
}

#[derive(Debug)]
pub struct ScriptedBackend {
    id: String,
    model: String,
    steps: Mutex<VecDeque<Step>>,
    default_reply: String,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            model: "scripted".to_string(),
            steps: Mutex::new(VecDeque::new()),
            default_reply: "Decision: continue".to_string(),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn replies<I, S>(id: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        replies.into_iter().fold(Self::new(id), |b, r| b.reply(r))
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Step::Reply(text.into()))
    }

    /// 不可重试的失败
    pub fn fail(self, msg: impl Into<String>) -> Self {
        self.push(Step::Fail(BackendError::Scripted(msg.into())))
    }

    /// 可重试的请求失败
    pub fn fail_request(self, msg: impl Into<String>) -> Self {
        self.push(Step::Fail(BackendError::Request(msg.into())))
    }

    pub fn with_default_reply(mut self, text: impl Into<String>) -> Self {
        self.default_reply = text.into();
        self
    }

    fn push(self, step: Step) -> Self {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(step);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn backend_id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(
        &self,
        prompt: &str,
        _system: Option<&str>,
        _temperature: f32,
    ) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        let step = self
            .steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match step {
            Some(Step::Reply(text)) => Ok(text),
            Some(Step::Fail(e)) => Err(e),
            None => Ok(self.default_reply.clone()),
        }
    }
}
