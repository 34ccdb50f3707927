//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `STEWARD__*` 覆盖（双下划线表示嵌套，如 `STEWARD__APP__MAX_TURNS=20`）。
//! 旧的环境变量（GOOGLE_API_KEY、GOOGLE_SEARCH_CX、EMAIL_*）在对应配置项为空时补位。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::AgentError;
use crate::tools::DEFAULT_SEARCH_ENDPOINT;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub tools: ToolsSection,
}

/// [app] 段：Agent 名称、基础指令文件、最大轮数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 基础指令文本文件，未设置或不存在时使用内置指令
    pub instructions_path: Option<PathBuf>,
    pub max_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "DevAssistant".to_string(),
            instructions_path: None,
            max_turns: crate::run::DEFAULT_MAX_TURNS,
        }
    }
}

/// [tools] 段：工具超时、相对路径基准目录、搜索与邮件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒），message_ask_user 不受限
    pub tool_timeout_secs: u64,
    /// 文件工具相对路径的基准目录，未设置时用当前目录
    pub base_dir: Option<PathBuf>,
    pub search: SearchSection,
    pub email: EmailSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            base_dir: None,
            search: SearchSection::default(),
            email: EmailSection::default(),
        }
    }
}

/// [tools.search] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    /// 关闭后不注册 info_search_web，也不要求 API Key
    pub enabled: bool,
    pub api_key: Option<String>,
    pub cx: Option<String>,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_result_chars: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            cx: None,
            endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            timeout_secs: 15,
            max_result_chars: 8000,
        }
    }
}

/// [tools.email] 段：SMTP relay；未设置的项可由旧环境变量补位，最后退回默认值
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmailSection {
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub from: Option<String>,
}

impl EmailSection {
    pub fn host(&self) -> &str {
        self.smtp_host.as_deref().unwrap_or("localhost")
    }

    pub fn port(&self) -> u16 {
        self.smtp_port.unwrap_or(25)
    }

    pub fn from(&self) -> &str {
        self.from.as_deref().unwrap_or("noreply@example.com")
    }
}

impl AppConfig {
    /// 用旧环境变量补齐未设置的项
    pub fn apply_legacy_env(self) -> Self {
        self.fill_unset(env_nonempty)
    }

    /// 只填补为空的项，已配置的值（文件或 STEWARD__*）保持不变
    pub fn fill_unset(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let search = &mut self.tools.search;
        if is_blank(&search.api_key) {
            search.api_key = lookup("GOOGLE_API_KEY");
        }
        if is_blank(&search.cx) {
            search.cx = lookup("GOOGLE_SEARCH_CX");
        }
        let email = &mut self.tools.email;
        if is_blank(&email.from) {
            email.from = lookup("EMAIL_FROM");
        }
        if is_blank(&email.smtp_host) {
            email.smtp_host = lookup("EMAIL_SMTP_HOST");
        }
        if email.smtp_port.is_none() {
            email.smtp_port = lookup("EMAIL_SMTP_PORT").and_then(|p| p.trim().parse().ok());
        }
        self
    }

    /// 启动前校验：启用搜索却没有 API Key（或为空白）视为致命错误
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.tools.search.enabled && is_blank(&self.tools.search.api_key) {
            return Err(AgentError::MissingCredential(
                "search is enabled but no API key is set (tools.search.api_key or GOOGLE_API_KEY)"
                    .to_string(),
            ));
        }
        if self.app.max_turns == 0 {
            return Err(AgentError::Config("app.max_turns must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// 从 config 目录加载配置，环境变量 STEWARD__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 STEWARD__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("STEWARD")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
