//! 聊天组件核心
//!
//! - `transcript`: 有序消息列表
//! - `reconciler`: 乐观消息 / 历史记录 / 推送的合并
//! - `wait_monitor`: AI 等待状态机
//! - `composer`: 输入框
//! - `widget`: 组件协调（发送流程、轮询、连接事件）

pub mod composer;
pub mod reconciler;
pub mod transcript;
pub mod wait_monitor;
pub mod widget;

#[cfg(test)]
mod testing;

pub use composer::{Composer, Outgoing, PendingAttachment};
pub use reconciler::{PushKind, PushOutcome, Reconciler};
pub use transcript::Transcript;
pub use wait_monitor::{AiWaitMonitor, WaitState};
pub use widget::{ChatWidget, Notice, PollOutcome, WidgetError, WidgetEvent};
