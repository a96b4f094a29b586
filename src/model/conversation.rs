//! 会话类型定义

use serde::{Deserialize, Serialize};

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    /// 人工客服
    Support,
    /// AI 助手
    Ai,
}

impl ConversationType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationType::Support => "support",
            ConversationType::Ai => "ai",
        }
    }
}

/// 会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub subject: String,
    /// 会话状态（open / closed ...），组件不解释其含义
    pub status: String,
    pub conversation_type: ConversationType,
    pub message_count: u32,
}

impl Conversation {
    pub fn is_ai(&self) -> bool {
        self.conversation_type == ConversationType::Ai
    }
}
