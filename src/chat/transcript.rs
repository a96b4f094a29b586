//! 消息列表
//!
//! 有序、按消息 ID 唯一的消息序列。顺序即插入顺序，不按时间戳重排。
//! 所有修改都通过具名操作完成，便于检查合并逻辑的不变量。

use crate::model::{Message, MessageId};

/// 当前会话正在展示的消息列表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    entries: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.entries.get(index)
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.entries.clone()
    }

    /// 第一个满足条件的位置
    pub fn position(&self, predicate: impl Fn(&Message) -> bool) -> Option<usize> {
        self.entries.iter().position(predicate)
    }

    pub fn position_of(&self, id: &MessageId) -> Option<usize> {
        self.position(|m| &m.id == id)
    }

    pub fn contains_id(&self, id: &MessageId) -> bool {
        self.position_of(id).is_some()
    }

    pub fn thinking_count(&self) -> usize {
        self.entries.iter().filter(|m| m.id.is_thinking()).count()
    }

    /// 追加到末尾；已存在同 ID 的条目时原地替换，保证 ID 唯一
    pub fn append(&mut self, message: Message) {
        match self.position_of(&message.id) {
            Some(index) => self.entries[index] = message,
            None => self.entries.push(message),
        }
    }

    /// 原地替换，位置不变
    ///
    /// 新消息的 ID 如果已被其他条目占用，则移除那个条目，避免重复展示
    pub fn replace_at(&mut self, index: usize, message: Message) {
        if index >= self.entries.len() {
            return;
        }
        if let Some(dup) = self.position_of(&message.id)
            && dup != index
        {
            self.entries.remove(dup);
            let index = if dup < index { index - 1 } else { index };
            self.entries[index] = message;
            return;
        }
        self.entries[index] = message;
    }

    /// 移除所有满足条件的条目，返回移除数量
    pub fn remove_matching(&mut self, predicate: impl Fn(&Message) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|m| !predicate(m));
        before - self.entries.len()
    }

    /// 整体替换（历史记录快照），同 ID 只保留第一条
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.entries.clear();
        for message in messages {
            if !self.contains_id(&message.id) {
                self.entries.push(message);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
