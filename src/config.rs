//! 应用配置：从 config/default.toml、--config 文件与环境变量加载
//!
//! 加载顺序：先读默认 TOML，再叠加显式指定的文件，最后用环境变量 `HIVE__*` 覆盖
//! （双下划线表示嵌套，如 `HIVE__LIMITS__CB_THRESHOLD=3`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::SeedItem;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub swarm: SwarmSection,
    pub limits: LimitsSection,
    pub tools: ToolsSection,
    pub retry: RetrySection,
    pub agents: Vec<AgentConfig>,
    pub arbiter: AgentConfig,
    pub queue: QueueSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            swarm: SwarmSection::default(),
            limits: LimitsSection::default(),
            tools: ToolsSection::default(),
            retry: RetrySection::default(),
            agents: default_agents(),
            arbiter: default_arbiter(),
            queue: QueueSection::default(),
        }
    }
}

/// [swarm] 段：轮数、温度、Agent 过滤、prompt 历史长度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SwarmSection {
    pub rounds: u32,
    pub temperature: f32,
    /// 只启用这些 Agent（按名字或后端标识匹配）；空表示全部
    pub only: Vec<String>,
    pub disable: Vec<String>,
    /// prompt 中 transcript 历史的字符上限
    pub history_chars: usize,
    pub json_logs: bool,
}

impl Default for SwarmSection {
    fn default() -> Self {
        Self {
            rounds: 2,
            temperature: 0.2,
            only: Vec::new(),
            disable: Vec::new(),
            history_chars: 2500,
            json_logs: false,
        }
    }
}

/// [limits] 段：熔断与工具限流
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub cb_threshold: u32,
    pub cb_cooldown_secs: u64,
    pub tool_max_per_window: usize,
    pub tool_window_secs: u64,
    /// 扫描类工具（fs_list / search_text）的截止时间
    pub tool_timeout_ms: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            cb_threshold: 2,
            cb_cooldown_secs: 60,
            tool_max_per_window: 20,
            tool_window_secs: 60,
            tool_timeout_ms: 8000,
        }
    }
}

/// [tools] 段：沙箱根目录、写入开关、参数缺省值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub root: PathBuf,
    pub allow_write: bool,
    pub default_lease_secs: u64,
    pub default_extend_secs: u64,
    pub default_max_results: usize,
    pub default_max_bytes: usize,
    pub default_max_matches: usize,
    /// fs_read 结果写入 transcript 时的预览长度
    pub read_preview_chars: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            allow_write: false,
            default_lease_secs: 180,
            default_extend_secs: 120,
            default_max_results: 200,
            default_max_bytes: 50_000,
            default_max_matches: 100,
            read_preview_chars: 500,
        }
    }
}

/// [retry] 段：后端瞬时失败的退避重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 500,
        }
    }
}

/// [[agents]] / [arbiter]：一个后端 + persona
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgentConfig {
    pub name: String,
    /// xai / google / anthropic / openai（OpenAI 兼容端点）或 mock
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量；未设置时按 provider 的默认变量查找
    pub api_key_env: Option<String>,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    /// provider = mock 时按顺序回放的回复
    #[serde(default)]
    pub mock_replies: Vec<String>,
}

impl AgentConfig {
    pub fn new(name: &str, provider: &str) -> Self {
        Self {
            name: name.to_string(),
            provider: provider.to_string(),
            ..Default::default()
        }
    }
}

fn default_agents() -> Vec<AgentConfig> {
    vec![
        AgentConfig::new("Grok", "xai"),
        AgentConfig::new("Gemini", "google"),
        AgentConfig::new("Claude", "anthropic"),
    ]
}

fn default_arbiter() -> AgentConfig {
    AgentConfig::new("Arbiter-anthropic", "anthropic")
}

/// [queue] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct QueueSection {
    /// 第 1 轮开始时（队列为空）入队
    pub seed: Vec<SeedItem>,
}

/// 加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键；swarm.only / swarm.disable 以逗号分隔）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    load_config_with(&["config/default", "../config/default"], config_path)
}

fn load_config_with(default_names: &[&str], config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for &name in default_names {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("swarm.only")
            .with_list_parse_key("swarm.disable")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
