//! 工具层：调用解析与校验、处理函数表、沙箱文件操作、执行与审计

pub mod executor;
pub mod handlers;
pub mod parser;
pub mod registry;
pub mod sandbox;
pub mod schema;

pub use executor::{ToolExecutor, ToolOutcome};
pub use handlers::{CallContext, Handler, ToolDefaults};
pub use parser::{extract_calls, parse_and_validate, ParsedCall, ToolCall};
pub use registry::HandlerRegistry;
pub use sandbox::ToolSandbox;
pub use schema::{capability_table, tool_call_schema_json, validate, ToolKind, ValidatedCall};
