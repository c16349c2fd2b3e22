//! 已知后端的默认值：OpenAI 兼容端点、默认模型、API Key 环境变量

/// 单个后端的默认配置
#[derive(Debug, Clone, Copy)]
pub struct ProviderDefaults {
    pub id: &'static str,
    pub base_url: Option<&'static str>,
    pub model: &'static str,
    /// 依次查找的 API Key 环境变量
    pub key_envs: &'static [&'static str],
}

pub const PROVIDERS: &[ProviderDefaults] = &[
    ProviderDefaults {
        id: "xai",
        base_url: Some("https://api.x.ai/v1"),
        model: "grok-code-fast-1",
        key_envs: &["GROK_API_KEY", "XAI_API_KEY"],
    },
    ProviderDefaults {
        id: "google",
        base_url: Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        model: "gemini-1.5-pro-latest",
        key_envs: &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
    },
    ProviderDefaults {
        id: "anthropic",
        base_url: Some("https://api.anthropic.com/v1"),
        model: "claude-opus-4-1-20250805",
        key_envs: &["ANTHROPIC_API_KEY"],
    },
    ProviderDefaults {
        id: "openai",
        base_url: None,
        model: "gpt-4o-mini",
        key_envs: &["OPENAI_API_KEY"],
    },
];

pub fn provider_defaults(id: &str) -> Option<&'static ProviderDefaults> {
    let id = id.to_lowercase();
    PROVIDERS.iter().find(|p| p.id == id)
}

/// 按顺序读取第一个非空的环境变量
pub fn lookup_api_key(envs: &[&str]) -> Option<String> {
    envs.iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_lookup_is_case_insensitive() {
        assert_eq!(provider_defaults("XAI").unwrap().model, "grok-code-fast-1");
        assert!(provider_defaults("mock").is_none());
    }
}
