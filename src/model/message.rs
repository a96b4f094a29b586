//! 消息类型定义
//!
//! ## 消息 ID 命名空间
//!
//! 三种 ID 并存，通过前缀区分：
//! - `temp-<ts>`: 本地乐观消息，服务器尚未确认
//! - `thinking-<ts>`: 本地“AI 思考中”占位，永不发送到服务器
//! - 其他：服务器分配的 ID，持久化后稳定不变
//!
//! `createdAt` 仅用于展示，消息顺序以列表位置（到达顺序）为准。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 乐观消息 ID 前缀
pub const TEMP_PREFIX: &str = "temp-";

/// 思考占位 ID 前缀
pub const THINKING_PREFIX: &str = "thinking-";

// ============================================================================
// 消息 ID
// ============================================================================

/// 消息 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageId {
    /// 本地乐观消息
    Temp(i64),
    /// 本地思考占位
    Thinking(i64),
    /// 服务器 ID
    Server(String),
}

impl MessageId {
    /// 解析 ID 字符串，无法识别的前缀一律视为服务器 ID
    pub fn parse(raw: &str) -> Self {
        if let Some(ts) = raw.strip_prefix(TEMP_PREFIX).and_then(|s| s.parse().ok()) {
            return MessageId::Temp(ts);
        }
        if let Some(ts) = raw.strip_prefix(THINKING_PREFIX).and_then(|s| s.parse().ok()) {
            return MessageId::Thinking(ts);
        }
        MessageId::Server(raw.to_string())
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, MessageId::Temp(_))
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self, MessageId::Thinking(_))
    }

    pub fn is_server(&self) -> bool {
        matches!(self, MessageId::Server(_))
    }

    /// 服务器 ID 原文（本地 ID 返回 None）
    pub fn server_id(&self) -> Option<&str> {
        match self {
            MessageId::Server(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Temp(ts) => write!(f, "{TEMP_PREFIX}{ts}"),
            MessageId::Thinking(ts) => write!(f, "{THINKING_PREFIX}{ts}"),
            MessageId::Server(id) => f.write_str(id),
        }
    }
}

impl From<String> for MessageId {
    fn from(raw: String) -> Self {
        MessageId::parse(&raw)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.to_string()
    }
}

/// 本地 ID 时钟
///
/// 以毫秒时间戳生成 `temp-*` / `thinking-*` 的序号，保证严格递增，
/// 同一毫秒内连续发送也不会产生重复 ID。
#[derive(Debug, Default)]
pub struct LocalIdClock {
    last: i64,
}

impl LocalIdClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last = now.max(self.last + 1);
        self.last
    }
}

// ============================================================================
// 发送方类型
// ============================================================================

/// 发送方类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    /// 客户（当前用户）
    Client,
    /// 人工客服
    Agent,
    /// 机器人
    Bot,
    /// AI 助手
    Ai,
    /// 系统消息
    System,
}

impl SenderType {
    /// 解析传输层的发送方类型，未知值按系统消息处理
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "client" | "customer" | "user" => SenderType::Client,
            "agent" | "staff" => SenderType::Agent,
            "bot" => SenderType::Bot,
            "ai" | "assistant" => SenderType::Ai,
            _ => SenderType::System,
        }
    }

    /// bot 与 ai 在合并逻辑中等价，都视为 AI 回复
    pub fn is_ai_response(self) -> bool {
        matches!(self, SenderType::Bot | SenderType::Ai)
    }
}

// ============================================================================
// 附件与 AI 附加数据
// ============================================================================

/// 附件描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    /// 文件分类（image / video / document ...）
    pub file_type: Option<String>,
    /// 文件大小（字节）
    pub size: Option<u64>,
    pub url: String,
    pub mime: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl Attachment {
    /// 本地占位附件（上传完成前使用本地 URL 展示）
    pub fn is_placeholder(&self) -> bool {
        self.url.is_empty() || self.url.starts_with("blob:") || self.url.starts_with("file:")
    }
}

/// 两组附件是否不同（按顺序比较 ID 与 URL）
pub fn attachments_differ(a: &[Attachment], b: &[Attachment]) -> bool {
    a.len() != b.len()
        || a.iter()
            .zip(b)
            .any(|(x, y)| x.id != y.id || x.url != y.url)
}

/// AI 回复的结构化附加数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiData {
    /// 生成的查询语句
    pub query: Option<String>,
    /// 查询结果预览 / 摘要
    pub results: Option<serde_json::Value>,
    /// 导出链接
    pub export_url: Option<String>,
    /// 错误信息
    pub error: Option<String>,
}

impl AiData {
    pub fn is_empty(&self) -> bool {
        self.query.is_none()
            && self.results.is_none()
            && self.export_url.is_none()
            && self.error.is_none()
    }
}

// ============================================================================
// 消息
// ============================================================================

/// 消息列表中的一条消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: String,
    pub sender_type: SenderType,
    pub sender_name: Option<String>,
    pub content: String,
    pub message_type: String,
    /// 仅用于展示，不参与排序
    pub created_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub attachments: Vec<Attachment>,
    pub ai_data: Option<AiData>,
}

impl Message {
    /// 构造本地消息（乐观消息、思考占位）
    pub fn local(
        id: MessageId,
        conversation_id: &str,
        sender_type: SenderType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            conversation_id: conversation_id.to_string(),
            sender_type,
            sender_name: None,
            content: content.into(),
            message_type: "text".to_string(),
            created_at: Some(Utc::now()),
            is_read: true,
            attachments: Vec::new(),
            ai_data: None,
        }
    }
}
