//! 可观测性：tracing 订阅器初始化
//!
//! 日志写到 stderr，stdout 留给共识与结果输出。默认级别 info，可用 RUST_LOG 覆盖；
//! json = true 时输出逐行 JSON（event / message 与结构化字段）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
