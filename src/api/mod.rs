/*!
 * 聊天 REST 接口
 *
 * 组件只依赖以下操作，具体实现可替换（测试中使用内存实现）：
 * - 会话列表 / 创建会话 / 切换人工客服
 * - 获取历史记录（完整有序的消息列表）
 * - 发送消息（人工客服会话）
 * - 上传附件（关联到已创建的消息）
 *
 * 返回值均已规范化为 `model` 中的类型，传输格式的差异不会泄露到合并逻辑中。
 */

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::chat::composer::PendingAttachment;
use crate::model::{Conversation, ConversationType, Message};

pub use http::HttpChatApi;

// ============================================================================
// 错误类型
// ============================================================================

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("请求失败: {0}")]
    Request(#[from] reqwest::Error),
    #[error("服务器返回错误 HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("无效的接口地址: {0}")]
    InvalidUrl(String),
    #[error("附件读取失败: {0}")]
    AttachmentRead(#[from] std::io::Error),
}

// ============================================================================
// 接口定义
// ============================================================================

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// 获取会话列表
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    /// 创建会话
    async fn create_conversation(
        &self,
        subject: &str,
        conversation_type: ConversationType,
    ) -> Result<Conversation, ApiError>;

    /// AI 会话切换到人工客服
    async fn switch_agent(&self, conversation_id: &str) -> Result<Conversation, ApiError>;

    /// 获取会话的完整历史记录（按服务器顺序）
    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError>;

    /// 发送消息，返回服务器创建的消息
    async fn send_message(&self, conversation_id: &str, content: &str)
        -> Result<Message, ApiError>;

    /// 上传附件并关联到消息
    async fn upload_attachment(
        &self,
        message_id: &str,
        attachment: &PendingAttachment,
    ) -> Result<(), ApiError>;
}
