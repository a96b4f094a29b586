//! 传输层消息规范化
//!
//! 推送与历史记录两条路径以不同字段名暴露同样的信息：
//! - 推送：AI 附加数据在 `ai_data`
//! - 历史记录：AI 附加数据在通用 `metadata`
//!
//! 这里是唯一把 `protocol` 结构转换为 `model::Message` 的地方，
//! 合并逻辑只处理规范化后的消息，不再关心传输格式。

use chrono::{DateTime, Utc};

use crate::model::{
    AiData, Attachment, Conversation, ConversationType, Message, MessageId, SenderType,
};
use crate::protocol::{
    WireAiData, WireAttachment, WireConversation, WireMessage, WireSender, MESSAGE_TYPE_TEXT,
};

/// 消息来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// WebSocket 推送
    Socket,
    /// REST 历史记录 / 发送响应
    History,
}

/// 规范化 WebSocket 推送的消息
pub fn from_socket(wire: WireMessage, fallback_conversation: &str) -> Message {
    normalize(wire, Source::Socket, fallback_conversation)
}

/// 规范化历史记录中的消息
pub fn from_history(wire: WireMessage, fallback_conversation: &str) -> Message {
    normalize(wire, Source::History, fallback_conversation)
}

/// 规范化整份历史记录
pub fn history_snapshot(wires: Vec<WireMessage>, conversation_id: &str) -> Vec<Message> {
    wires
        .into_iter()
        .map(|wire| from_history(wire, conversation_id))
        .collect()
}

fn normalize(wire: WireMessage, source: Source, fallback_conversation: &str) -> Message {
    let conversation_id = wire
        .conversation
        .map(|r| r.into_id())
        .or_else(|| wire.conversation_id.map(|id| id.into_string()))
        .unwrap_or_else(|| fallback_conversation.to_string());

    let (nested_type, nested_name) = match wire.sender {
        Some(WireSender::Object {
            sender_type, name, ..
        }) => (sender_type, name),
        _ => (None, None),
    };
    let sender_type = wire
        .sender_type
        .or(nested_type)
        .map(|raw| SenderType::parse(&raw))
        .unwrap_or(SenderType::System);

    // 推送优先 ai_data，历史记录优先 metadata；另一个字段作为兜底
    let (primary, secondary) = match source {
        Source::Socket => (wire.ai_data, wire.metadata),
        Source::History => (wire.metadata, wire.ai_data),
    };
    let ai_data = primary
        .and_then(parse_ai_data)
        .or_else(|| secondary.and_then(parse_ai_data));

    Message {
        id: MessageId::Server(wire.id.into_string()),
        conversation_id,
        sender_type,
        sender_name: wire.sender_name.or(nested_name),
        content: wire.content.unwrap_or_default(),
        message_type: wire
            .message_type
            .unwrap_or_else(|| MESSAGE_TYPE_TEXT.to_string()),
        created_at: wire.created_at.as_deref().and_then(parse_timestamp),
        is_read: wire.is_read.unwrap_or(false),
        attachments: wire
            .attachments
            .unwrap_or_default()
            .into_iter()
            .map(attachment)
            .collect(),
        ai_data,
    }
}

fn parse_ai_data(value: serde_json::Value) -> Option<AiData> {
    if !value.is_object() {
        return None;
    }
    let wire: WireAiData = serde_json::from_value(value).ok()?;
    let data = AiData {
        query: wire.sql.or(wire.query),
        results: wire.results.or(wire.results_summary),
        export_url: wire.export_url,
        error: wire.error,
    };
    (!data.is_empty()).then_some(data)
}

fn attachment(wire: WireAttachment) -> Attachment {
    let id = wire.id.into_string();
    Attachment {
        filename: wire
            .filename
            .or(wire.file_name)
            .unwrap_or_else(|| id.clone()),
        id,
        file_type: wire.file_type.or(wire.kind),
        size: wire.file_size.or(wire.size),
        url: wire.file_url.or(wire.url).unwrap_or_default(),
        mime: wire.mime_type.or(wire.mime),
        uploaded_at: wire.uploaded_at.as_deref().and_then(parse_timestamp),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// 规范化会话（未知类型按人工客服处理）
pub fn conversation(wire: WireConversation) -> Conversation {
    let conversation_type = match wire.conversation_type.as_deref() {
        Some("ai") => ConversationType::Ai,
        _ => ConversationType::Support,
    };
    Conversation {
        id: wire.id.into_string(),
        subject: wire.subject.unwrap_or_default(),
        status: wire.status.unwrap_or_default(),
        conversation_type,
        message_count: wire.message_count.unwrap_or(0),
    }
}
