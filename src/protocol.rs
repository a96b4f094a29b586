/*!
 * 聊天传输协议定义
 *
 * 定义 WebSocket 帧与 REST 接口使用的数据结构（仅包含组件依赖的字段）
 *
 * 协议概述：
 * 1. 入站帧：`{ "type": "chat_message", "message": { ... } }`，其他类型忽略
 * 2. 出站帧（仅 AI 会话）：`{ "type": "chat_message", "content", "message_type" }`
 * 3. 历史记录：与推送消息逻辑结构相同，但 AI 附加数据放在通用的 `metadata` 中，
 *    推送消息则使用 `ai_data`
 *
 * 服务器对部分字段使用了多种命名（`file_url`/`url`、`results`/`results_summary`），
 * 此处全部接收，由 `normalize` 统一成内部结构。
 */

use serde::{Deserialize, Serialize};

// ============================================================================
// 常量定义
// ============================================================================

/// 聊天消息帧类型
pub const FRAME_CHAT_MESSAGE: &str = "chat_message";

/// 默认消息类型
pub const MESSAGE_TYPE_TEXT: &str = "text";

// ============================================================================
// 通用字段
// ============================================================================

/// 服务器 ID（可能是字符串或数字）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Text(String),
    Number(i64),
}

impl WireId {
    pub fn into_string(self) -> String {
        match self {
            WireId::Text(s) => s,
            WireId::Number(n) => n.to_string(),
        }
    }
}

/// 关联对象引用：纯 ID 或带 `id` 的对象
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireRef {
    Id(WireId),
    Object { id: WireId },
}

impl WireRef {
    pub fn into_id(self) -> String {
        match self {
            WireRef::Id(id) | WireRef::Object { id } => id.into_string(),
        }
    }
}

/// 发送方：纯 ID 或发送方对象
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireSender {
    Id(WireId),
    Object {
        #[serde(default)]
        id: Option<WireId>,
        #[serde(default, rename = "type")]
        sender_type: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
}

/// 列表响应：裸数组或分页对象 `{ "results": [...] }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Listing<T> {
    Plain(Vec<T>),
    Paged { results: Vec<T> },
}

impl<T> Listing<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Plain(items) | Listing::Paged { results: items } => items,
        }
    }
}

// ============================================================================
// 消息
// ============================================================================

/// 传输层消息（WebSocket 推送与历史记录共用）
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub id: WireId,
    /// 会话引用（对象或 ID）
    #[serde(default)]
    pub conversation: Option<WireRef>,
    #[serde(default)]
    pub conversation_id: Option<WireId>,
    #[serde(default)]
    pub sender: Option<WireSender>,
    #[serde(default)]
    pub sender_type: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub is_read: Option<bool>,
    #[serde(default)]
    pub attachments: Option<Vec<WireAttachment>>,
    /// 推送路径的 AI 附加数据
    #[serde(default)]
    pub ai_data: Option<serde_json::Value>,
    /// 历史记录路径的通用元数据
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// 传输层附件
///
/// 同一含义的两种字段名分别接收，同时出现也不会导致整条消息解析失败
#[derive(Debug, Clone, Deserialize)]
pub struct WireAttachment {
    pub id: WireId,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub uploaded_at: Option<String>,
}

/// AI 附加数据（`ai_data` 与 `metadata` 的字段并集）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireAiData {
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub results: Option<serde_json::Value>,
    #[serde(default)]
    pub results_summary: Option<serde_json::Value>,
    #[serde(default)]
    pub export_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// WebSocket 帧
// ============================================================================

/// 入站帧
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub message: Option<WireMessage>,
}

/// 出站帧（AI 会话发送消息）
#[derive(Debug, Clone, Serialize)]
pub struct OutboundChatFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub content: String,
    pub message_type: String,
}

impl OutboundChatFrame {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            frame_type: FRAME_CHAT_MESSAGE,
            content: content.into(),
            message_type: MESSAGE_TYPE_TEXT.to_string(),
        }
    }
}

// ============================================================================
// REST 请求 / 响应
// ============================================================================

/// 传输层会话
#[derive(Debug, Clone, Deserialize)]
pub struct WireConversation {
    pub id: WireId,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conversation_type: Option<String>,
    #[serde(default)]
    pub message_count: Option<u32>,
}

/// 创建会话请求
#[derive(Debug, Clone, Serialize)]
pub struct CreateConversationRequest<'a> {
    pub subject: &'a str,
    pub conversation_type: &'a str,
}

/// 发送消息请求（人工客服会话走 REST）
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest<'a> {
    pub content: &'a str,
    pub message_type: &'a str,
}
