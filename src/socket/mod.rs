/*!
 * WebSocket 连接抽象
 *
 * 每个会话一条连接，连接事件通过 `async_channel` 送回组件：
 * - `Opened` / `Closed` 用于更新连接状态
 * - `Frame` 为原始文本帧，由合并器解析
 *
 * 具体实现可替换，测试中使用内存连接。
 */

pub mod ws;

use thiserror::Error;

pub use ws::WsConnector;

// ============================================================================
// 错误与事件
// ============================================================================

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket 未连接")]
    NotOpen,
    #[error("WebSocket 连接失败: {0}")]
    Connect(String),
    #[error("无效的 WebSocket 地址: {0}")]
    InvalidUrl(String),
    #[error("帧编码失败: {0}")]
    Encode(#[from] serde_json::Error),
}

/// 连接事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    /// 文本帧原文
    Frame(String),
    Closed { reason: Option<String> },
    Error(String),
}

// ============================================================================
// 连接接口
// ============================================================================

/// 已建立（或正在建立）的连接句柄
pub trait ChatSocket: Send + Sync {
    fn is_open(&self) -> bool;

    /// 发送文本帧，未连接时返回 `TransportError::NotOpen`
    fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// 关闭连接，之后不再产生事件
    fn close(&self);
}

/// 连接工厂
pub trait SocketConnector: Send + Sync {
    /// 为会话建立连接，事件写入 `events`
    fn connect(
        &self,
        conversation_id: &str,
        events: async_channel::Sender<SocketEvent>,
    ) -> Result<Box<dyn ChatSocket>, TransportError>;
}
