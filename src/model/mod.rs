//! 聊天数据模型
//!
//! 组件内部统一使用的数据结构，与传输层字段命名无关：
//! - `message`: 消息、消息 ID、发送方类型、附件、AI 附加数据
//! - `conversation`: 会话（仅作为消息列表的键使用）
//!
//! 传输层结构（WebSocket 帧、REST 响应）定义在 `protocol`，
//! 由 `normalize` 统一转换为本模块的类型。

pub mod conversation;
pub mod message;

pub use conversation::*;
pub use message::*;
