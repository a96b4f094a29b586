//! POS Webchat 聊天组件核心
//!
//! 零售助手中的聊天组件：客户与人工客服或 AI 助手对话。
//! 本 crate 只包含与界面无关的部分。
//!
//! ## 功能模块
//! - 消息合并：乐观消息、历史记录快照、WebSocket 推送合并为单一消息列表
//! - AI 等待：推送不可靠时定时轮询历史记录兜底
//! - 发送流程：输入框立即清空，人工客服会话走 REST，AI 会话走 WebSocket
//! - REST 客户端：会话列表、创建、转人工、历史记录、发送、附件上传
//! - WebSocket 客户端：按会话连接，断线指数退避重连
//!
//! ## 使用
//! ```no_run
//! # async fn demo() -> Result<(), pos_webchat::WebchatError> {
//! let config = pos_webchat::WebchatConfig::load_or_default(
//!     &pos_webchat::config::default_config_path(),
//! );
//! let (widget, events) = pos_webchat::build(config)?;
//! let conversations = widget.open_widget().await?;
//! if let Some(first) = conversations.into_iter().next() {
//!     widget.open_conversation(first).await?;
//! }
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## 更新日志
//! - 2026-10-16: 从桌面端聊天后端拆分出聊天组件核心

// ============================================
// 模块
// ============================================
pub mod api;
pub mod chat;
pub mod config;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod protocol;
pub mod socket;

use std::sync::Arc;

use thiserror::Error;

pub use api::{ApiError, ChatApi, HttpChatApi};
pub use chat::{ChatWidget, Notice, PollOutcome, WaitState, WidgetError, WidgetEvent};
pub use config::{ConfigError, ReconnectPolicy, WebchatConfig};
pub use model::{Attachment, Conversation, ConversationType, Message, MessageId, SenderType};
pub use socket::{SocketConnector, SocketEvent, TransportError, WsConnector};

// ============================================
// 组装
// ============================================

#[derive(Error, Debug)]
pub enum WebchatError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Widget(#[from] WidgetError),
}

/// 按配置创建组件（REST 使用 reqwest，WebSocket 使用 tokio-tungstenite）
pub fn build(
    config: WebchatConfig,
) -> Result<(ChatWidget, async_channel::Receiver<WidgetEvent>), WebchatError> {
    config.validate()?;
    let api = HttpChatApi::new(&config)?;
    let connector = WsConnector::new(&config)?;
    tracing::info!(
        api = %config.api_base_url,
        ws = %config.ws_base_url,
        "聊天组件已创建"
    );
    Ok(ChatWidget::new(config, Arc::new(api), Arc::new(connector)))
}
