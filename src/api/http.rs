//! 基于 reqwest 的 REST 接口实现
//!
//! ## 接口列表
//!
//! | 操作 | 方法 | 路径 |
//! |---|---|---|
//! | 会话列表 | GET | `chat/conversations/` |
//! | 创建会话 | POST | `chat/conversations/` |
//! | 切换人工客服 | POST | `chat/conversations/{id}/switch_agent/` |
//! | 历史记录 | GET | `chat/conversations/{id}/messages/` |
//! | 发送消息 | POST | `chat/conversations/{id}/messages/` |
//! | 上传附件 | POST | `chat/attachments/`（multipart: `file`, `message_id`） |
//!
//! 列表接口同时兼容裸数组与分页对象 `{ "results": [...] }`。
//! 所有请求使用配置中的超时时间，超时按请求失败处理。

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use super::{ApiError, ChatApi};
use crate::chat::composer::PendingAttachment;
use crate::config::WebchatConfig;
use crate::model::{Conversation, ConversationType, Message};
use crate::normalize;
use crate::protocol::{
    CreateConversationRequest, Listing, SendMessageRequest, WireConversation, WireMessage,
    MESSAGE_TYPE_TEXT,
};

/// REST 客户端
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpChatApi {
    pub fn new(config: &WebchatConfig) -> Result<Self, ApiError> {
        // 根地址统一以 "/" 结尾
        let mut raw = config.api_base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url,
            auth_token: config.auth_token.clone(),
        })
    }

    /// 按路径段拼接接口地址（每段单独转义，结尾保留 "/"）
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments)
            .push("");
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.header("Authorization", format!("Token {token}")),
            None => builder,
        }
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let url = self.endpoint(segments)?;
        debug!(%url, "GET");
        let response = self.authorized(self.client.get(url)).send().await?;
        decode(response).await
    }

    async fn post<B, T>(&self, segments: &[&str], body: &B) -> Result<T, ApiError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments)?;
        debug!(%url, "POST");
        let response = self
            .authorized(self.client.post(url).json(body))
            .send()
            .await?;
        decode(response).await
    }
}

/// 检查状态码并解析 JSON
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let response = ensure_success(response).await?;
    Ok(response.json::<T>().await?)
}

async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let listing: Listing<WireConversation> = self.get(&["chat", "conversations"]).await?;
        Ok(listing
            .into_vec()
            .into_iter()
            .map(normalize::conversation)
            .collect())
    }

    async fn create_conversation(
        &self,
        subject: &str,
        conversation_type: ConversationType,
    ) -> Result<Conversation, ApiError> {
        let request = CreateConversationRequest {
            subject,
            conversation_type: conversation_type.as_str(),
        };
        let wire: WireConversation = self.post(&["chat", "conversations"], &request).await?;
        let conversation = normalize::conversation(wire);
        info!(conversation_id = %conversation.id, "会话已创建");
        Ok(conversation)
    }

    async fn switch_agent(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        let segments = ["chat", "conversations", conversation_id, "switch_agent"];
        let wire: WireConversation = self.post(&segments, &serde_json::json!({})).await?;
        Ok(normalize::conversation(wire))
    }

    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let segments = ["chat", "conversations", conversation_id, "messages"];
        let listing: Listing<WireMessage> = self.get(&segments).await?;
        Ok(normalize::history_snapshot(
            listing.into_vec(),
            conversation_id,
        ))
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message, ApiError> {
        let segments = ["chat", "conversations", conversation_id, "messages"];
        let request = SendMessageRequest {
            content,
            message_type: MESSAGE_TYPE_TEXT,
        };
        let wire: WireMessage = self.post(&segments, &request).await?;
        Ok(normalize::from_history(wire, conversation_id))
    }

    async fn upload_attachment(
        &self,
        message_id: &str,
        attachment: &PendingAttachment,
    ) -> Result<(), ApiError> {
        let bytes = tokio::fs::read(&attachment.path).await?;
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(attachment.filename.clone())
            .mime_str(&attachment.mime)?;
        let form = Form::new()
            .text("message_id", message_id.to_string())
            .part("file", part);

        let url = self.endpoint(&["chat", "attachments"])?;
        let response = self
            .authorized(self.client.post(url).multipart(form))
            .send()
            .await?;
        ensure_success(response).await?;

        info!(message_id, filename = %attachment.filename, size, "附件上传完成");
        Ok(())
    }
}
