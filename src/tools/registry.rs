//! 处理函数注册表
//!
//! ToolKind -> Handler 的查找表，编排器按种类分发，不做按名字的条件链。
//! fs_write 不在标准表中：写入先成为提议，经仲裁批准后由编排器直接落盘。

use std::collections::HashMap;

use crate::tools::handlers::{self, Handler};
use crate::tools::ToolKind;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ToolKind, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 除 fs_write 外的全部工具
    pub fn standard() -> Self {
        let mut reg = Self::new();
        reg.register(ToolKind::FsList, handlers::fs_list);
        reg.register(ToolKind::FsRead, handlers::fs_read);
        reg.register(ToolKind::SearchText, handlers::search_text);
        reg.register(ToolKind::FsStat, handlers::fs_stat);
        reg.register(ToolKind::HealthCheck, handlers::health_check);
        reg.register(ToolKind::CtxPut, handlers::ctx_put);
        reg.register(ToolKind::CtxGet, handlers::ctx_get);
        reg.register(ToolKind::CtxKeys, handlers::ctx_keys);
        reg.register(ToolKind::CoordEnqueue, handlers::coord_enqueue);
        reg.register(ToolKind::CoordNext, handlers::coord_next);
        reg.register(ToolKind::CoordClaim, handlers::coord_claim);
        reg.register(ToolKind::CoordExtend, handlers::coord_extend);
        reg.register(ToolKind::CoordComplete, handlers::coord_complete);
        reg.register(ToolKind::CoordStatus, handlers::coord_status);
        reg
    }

    pub fn register(&mut self, kind: ToolKind, handler: Handler) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: ToolKind) -> Option<Handler> {
        self.handlers.get(&kind).copied()
    }

    pub fn contains(&self, kind: ToolKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// 已注册的工具，按能力表顺序
    pub fn kinds(&self) -> Vec<ToolKind> {
        ToolKind::ALL
            .into_iter()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }
}
