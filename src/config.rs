/*!
 * 聊天组件配置
 *
 * 管理组件运行所需的配置，包括：
 * - REST 接口地址、WebSocket 地址、认证令牌
 * - AI 等待轮询间隔、思考占位延迟
 * - 请求超时
 * - WebSocket 断线重连策略（有限次数 + 指数退避）
 *
 * 配置以 JSON 保存，读取失败时回退默认配置；
 * 环境变量 `WEBCHAT_API_BASE_URL` / `WEBCHAT_WS_BASE_URL` / `WEBCHAT_AUTH_TOKEN` 可覆盖文件中的值。
 */

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// 配置目录名
const CONFIG_DIR_NAME: &str = "pos-webchat";

/// 配置文件名
const CONFIG_FILE_NAME: &str = "config.json";

// ============================================================================
// 错误类型
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置文件读取失败: {0}")]
    ReadFailed(String),
    #[error("配置文件解析失败: {0}")]
    ParseFailed(String),
    #[error("配置文件写入失败: {0}")]
    WriteFailed(String),
    #[error("目录创建失败: {0}")]
    DirectoryCreationFailed(String),
    #[error("无效的地址 {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
    #[error("无效的配置项 {0}: 必须大于 0")]
    InvalidValue(&'static str),
}

// ============================================================================
// 配置结构
// ============================================================================

/// 聊天组件配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebchatConfig {
    /// REST 接口根地址
    pub api_base_url: String,
    /// WebSocket 根地址
    pub ws_base_url: String,
    /// 认证令牌
    pub auth_token: Option<String>,
    /// AI 等待期间的轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 发送后插入思考占位的延迟（毫秒）
    pub thinking_delay_ms: u64,
    /// REST 请求超时（秒）
    pub request_timeout_secs: u64,
    /// 断线重连策略
    pub reconnect: ReconnectPolicy,
    /// 配置版本
    pub version: String,
}

/// WebSocket 断线重连策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    /// 是否自动重连
    pub enabled: bool,
    /// 连续重连的最大次数，用尽后只依赖轮询兜底
    pub max_attempts: u32,
    /// 首次重连等待（毫秒）
    pub initial_backoff_ms: u64,
    /// 最大等待（毫秒）
    pub max_backoff_ms: u64,
}

impl Default for WebchatConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api/".to_string(),
            ws_base_url: "ws://localhost:8000".to_string(),
            auth_token: None,
            poll_interval_ms: 3000,
            thinking_delay_ms: 300,
            request_timeout_secs: 30,
            reconnect: ReconnectPolicy::default(),
            version: "1.0".to_string(),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    /// 第 `attempt` 次重连前的等待时间（从 1 开始，指数增长，封顶 `max_backoff_ms`）
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }

    /// 是否还能继续重连
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && attempt < self.max_attempts
    }

    /// 连接保持多久才算稳定（稳定断开后重连计数清零）
    ///
    /// 握手成功后立即被关闭的连接（例如令牌无效）仍计入重连次数
    pub fn stable_after(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl WebchatConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn thinking_delay(&self) -> Duration {
        Duration::from_millis(self.thinking_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 从文件加载配置
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// 加载配置或使用默认值
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    info!(path = %path.display(), "配置已加载");
                    return config;
                }
                Err(e) => warn!(error = %e, "配置加载失败，使用默认配置"),
            }
        }
        info!("使用默认配置");
        Self::default()
    }

    /// 保存配置
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        // 确保父目录存在
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ConfigError::DirectoryCreationFailed(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::WriteFailed(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::WriteFailed(e.to_string()))?;

        info!(path = %path.display(), "配置已保存");
        Ok(())
    }

    /// 用环境变量覆盖地址和令牌
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("WEBCHAT_API_BASE_URL").filter(|v| !v.is_empty()) {
            self.api_base_url = v;
        }
        if let Some(v) = lookup("WEBCHAT_WS_BASE_URL").filter(|v| !v.is_empty()) {
            self.ws_base_url = v;
        }
        if let Some(v) = lookup("WEBCHAT_AUTH_TOKEN").filter(|v| !v.is_empty()) {
            self.auth_token = Some(v);
        }
    }

    /// 校验地址格式与时间配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, raw) in [
            ("apiBaseUrl", &self.api_base_url),
            ("wsBaseUrl", &self.ws_base_url),
        ] {
            Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
                field,
                reason: e.to_string(),
            })?;
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("pollIntervalMs"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("requestTimeoutSecs"));
        }
        Ok(())
    }
}

/// 默认配置文件路径
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}
