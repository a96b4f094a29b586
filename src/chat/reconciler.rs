//! 消息合并
//!
//! 三个互不协调的输入合并为同一个消息列表：
//! - 本地乐观插入：发送时立即追加 `temp-*`，AI 会话稍后追加 `thinking-*`
//! - 历史记录快照：冷加载与轮询兜底，整体替换，但只接受仍处于选中状态的会话
//! - WebSocket 推送：单条新增 / 更新
//!
//! ## 推送合并顺序
//!
//! 1. 发送方为 bot / ai 时，先移除全部 `thinking-*`
//! 2. 存在内容相同的客户 `temp-*`：原地替换；新消息无附件而临时消息有附件时，
//!    保留临时消息的附件（附件一旦展示就不能消失）
//! 3. 存在同一服务器 ID：附件有变化（或原附件仍是本地占位）时替换，否则不动
//! 4. 否则追加到末尾
//!
//! 不变量：任一逻辑消息最多展示一份，顺序为到达顺序，不按时间戳重排。

use tracing::{debug, warn};

use super::transcript::Transcript;
use crate::model::{
    attachments_differ, Attachment, LocalIdClock, Message, MessageId, SenderType,
};
use crate::normalize;
use crate::protocol::{InboundFrame, FRAME_CHAT_MESSAGE};

/// 推送合并的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    /// 替换了乐观消息
    ReplacedTemp { index: usize },
    /// 更新了已有消息（附件变化）
    Updated { index: usize },
    /// 已存在且无变化
    Unchanged,
    /// 追加为新消息
    Appended,
    /// 不属于当前会话，忽略
    Ignored,
}

/// 推送合并结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOutcome {
    pub kind: PushKind,
    /// 推送的是 AI / bot 回复
    pub ai_arrived: bool,
    /// 移除的思考占位数量
    pub thinking_cleared: usize,
}

impl PushOutcome {
    /// 消息列表是否发生变化
    pub fn changed(&self) -> bool {
        self.thinking_cleared > 0
            || !matches!(self.kind, PushKind::Unchanged | PushKind::Ignored)
    }
}

/// 消息合并器，独占当前会话的消息列表
#[derive(Debug, Default)]
pub struct Reconciler {
    active_conversation: Option<String>,
    transcript: Transcript,
    clock: LocalIdClock,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_conversation(&self) -> Option<&str> {
        self.active_conversation.as_deref()
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.active_conversation.as_deref() == Some(conversation_id)
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// 切换当前会话，清空消息列表
    pub fn set_active(&mut self, conversation_id: Option<String>) {
        self.active_conversation = conversation_id;
        self.transcript.clear();
    }

    /// 插入乐观消息，未选中会话时返回 None
    pub fn insert_optimistic(
        &mut self,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Option<MessageId> {
        let conversation_id = self.active_conversation.clone()?;
        let id = MessageId::Temp(self.clock.next());
        let mut message = Message::local(id.clone(), &conversation_id, SenderType::Client, content);
        message.attachments = attachments;
        self.transcript.append(message);
        debug!(conversation_id = %conversation_id, message_id = %id, "插入乐观消息");
        Some(id)
    }

    /// 插入思考占位
    pub fn insert_thinking(&mut self) -> Option<MessageId> {
        let conversation_id = self.active_conversation.clone()?;
        let id = MessageId::Thinking(self.clock.next());
        self.transcript
            .append(Message::local(id.clone(), &conversation_id, SenderType::Ai, ""));
        debug!(conversation_id = %conversation_id, message_id = %id, "插入思考占位");
        Some(id)
    }

    /// 移除指定条目
    pub fn remove(&mut self, id: &MessageId) -> bool {
        self.transcript.remove_matching(|m| &m.id == id) > 0
    }

    /// 移除全部思考占位
    pub fn remove_thinking(&mut self) -> usize {
        self.transcript.remove_matching(|m| m.id.is_thinking())
    }

    /// 应用历史记录快照
    ///
    /// 只有快照所属会话仍是当前会话时才整体替换，迟到的旧会话响应直接丢弃
    pub fn apply_snapshot(&mut self, conversation_id: &str, messages: Vec<Message>) -> bool {
        if !self.is_active(conversation_id) {
            debug!(
                conversation_id,
                active = ?self.active_conversation,
                "丢弃非当前会话的历史记录"
            );
            return false;
        }
        self.transcript.replace_all(messages);
        debug!(conversation_id, count = self.transcript.len(), "已应用历史记录快照");
        true
    }

    /// 快照中是否有当前列表尚未出现的 AI / bot 消息
    pub fn has_unseen_ai_message(&self, snapshot: &[Message]) -> bool {
        snapshot
            .iter()
            .any(|m| m.sender_type.is_ai_response() && !self.transcript.contains_id(&m.id))
    }

    /// 解析并合并一条 WebSocket 帧
    ///
    /// 无法解析的帧记录日志后丢弃，不修改消息列表
    pub fn apply_frame(&mut self, text: &str) -> Option<PushOutcome> {
        let frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "WebSocket 帧解析失败，已丢弃");
                return None;
            }
        };
        if frame.frame_type != FRAME_CHAT_MESSAGE {
            debug!(frame_type = %frame.frame_type, "忽略非聊天消息帧");
            return None;
        }
        let Some(wire) = frame.message else {
            warn!("聊天消息帧缺少 message 字段，已丢弃");
            return None;
        };
        let fallback = self.active_conversation.clone().unwrap_or_default();
        Some(self.apply_push(normalize::from_socket(wire, &fallback)))
    }

    /// 合并一条推送消息
    pub fn apply_push(&mut self, message: Message) -> PushOutcome {
        if !self.is_active(&message.conversation_id) {
            debug!(
                conversation_id = %message.conversation_id,
                message_id = %message.id,
                "忽略非当前会话的推送"
            );
            return PushOutcome {
                kind: PushKind::Ignored,
                ai_arrived: false,
                thinking_cleared: 0,
            };
        }

        let ai_arrived = message.sender_type.is_ai_response();
        let thinking_cleared = if ai_arrived {
            self.remove_thinking()
        } else {
            0
        };

        let kind = self.merge(message);
        PushOutcome {
            kind,
            ai_arrived,
            thinking_cleared,
        }
    }

    /// 用 REST 返回的服务器消息确认指定乐观消息
    ///
    /// 临时消息已被推送替换时退化为普通推送合并
    pub fn confirm_optimistic(&mut self, temp_id: &MessageId, mut message: Message) -> PushOutcome {
        let Some(index) = self.transcript.position_of(temp_id) else {
            return self.apply_push(message);
        };
        if !self.is_active(&message.conversation_id) {
            return self.apply_push(message);
        }
        if message.attachments.is_empty()
            && let Some(temp) = self.transcript.get(index)
        {
            message.attachments = temp.attachments.clone();
        }
        debug!(temp_id = %temp_id, message_id = %message.id, index, "服务器确认乐观消息");
        self.transcript.replace_at(index, message);
        PushOutcome {
            kind: PushKind::ReplacedTemp { index },
            ai_arrived: false,
            thinking_cleared: 0,
        }
    }

    fn merge(&mut self, mut message: Message) -> PushKind {
        // 同 ID 已在列表中时不再匹配临时消息，否则会出现两份
        let already_present = self.transcript.contains_id(&message.id);

        if !already_present && message.sender_type == SenderType::Client {
            let temp_index = self.transcript.position(|m| {
                m.id.is_temp()
                    && m.sender_type == SenderType::Client
                    && m.content == message.content
            });
            if let Some(index) = temp_index {
                if message.attachments.is_empty()
                    && let Some(temp) = self.transcript.get(index)
                    && !temp.attachments.is_empty()
                {
                    // 附件仍在上传，沿用临时消息的附件
                    message.attachments = temp.attachments.clone();
                }
                debug!(message_id = %message.id, index, "推送替换乐观消息");
                self.transcript.replace_at(index, message);
                return PushKind::ReplacedTemp { index };
            }
        }

        if let Some(index) = self.transcript.position_of(&message.id) {
            let needs_update = !message.attachments.is_empty()
                && self.transcript.get(index).is_some_and(|existing| {
                    existing.attachments.iter().any(Attachment::is_placeholder)
                        || attachments_differ(&existing.attachments, &message.attachments)
                });
            if needs_update {
                debug!(message_id = %message.id, index, "推送更新附件");
                self.transcript.replace_at(index, message);
                return PushKind::Updated { index };
            }
            return PushKind::Unchanged;
        }

        self.transcript.append(message);
        PushKind::Appended
    }
}
