//! 测试用的内存 REST 接口与 WebSocket 连接

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::composer::PendingAttachment;
use crate::api::{ApiError, ChatApi};
use crate::model::{Conversation, ConversationType, Message, MessageId, SenderType};
use crate::socket::{ChatSocket, SocketConnector, SocketEvent, TransportError};

pub fn conversation(id: &str, conversation_type: ConversationType) -> Conversation {
    Conversation {
        id: id.to_string(),
        subject: format!("会话 {id}"),
        status: "open".to_string(),
        conversation_type,
        message_count: 0,
    }
}

pub fn server_message(id: &str, conversation_id: &str, sender: SenderType, content: &str) -> Message {
    Message::local(MessageId::Server(id.into()), conversation_id, sender, content)
}

/// 推送帧原文
pub fn chat_frame(id: u64, conversation_id: &str, sender_type: &str, content: &str) -> String {
    serde_json::json!({
        "type": "chat_message",
        "message": {
            "id": id,
            "conversation": conversation_id,
            "sender_type": sender_type,
            "content": content,
        }
    })
    .to_string()
}

// ============================================================================
// REST
// ============================================================================

#[derive(Default)]
struct FakeApiState {
    conversations: Vec<Conversation>,
    histories: HashMap<String, Vec<Message>>,
    history_delays: HashMap<String, Duration>,
    history_calls: Vec<String>,
    list_calls: usize,
    fail_send: bool,
    next_id: u64,
    sent: Vec<(String, String)>,
    uploads: Vec<(String, String)>,
    failing_uploads: HashSet<String>,
}

#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeApiState>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        let api = Self::default();
        api.state.lock().next_id = 900;
        Arc::new(api)
    }

    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        self.state.lock().conversations = conversations;
    }

    pub fn set_history(&self, conversation_id: &str, messages: Vec<Message>) {
        self.state
            .lock()
            .histories
            .insert(conversation_id.to_string(), messages);
    }

    pub fn delay_history(&self, conversation_id: &str, delay: Duration) {
        self.state
            .lock()
            .history_delays
            .insert(conversation_id.to_string(), delay);
    }

    pub fn fail_send(&self) {
        self.state.lock().fail_send = true;
    }

    pub fn fail_upload(&self, filename: &str) {
        self.state.lock().failing_uploads.insert(filename.to_string());
    }

    pub fn history_calls(&self, conversation_id: &str) -> usize {
        self.state
            .lock()
            .history_calls
            .iter()
            .filter(|id| id.as_str() == conversation_id)
            .count()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.lock().sent.clone()
    }

    pub fn uploads(&self) -> Vec<(String, String)> {
        self.state.lock().uploads.clone()
    }
}

fn rejected(status: u16) -> ApiError {
    ApiError::Status {
        status,
        body: "rejected".to_string(),
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        Ok(state.conversations.clone())
    }

    async fn create_conversation(
        &self,
        subject: &str,
        conversation_type: ConversationType,
    ) -> Result<Conversation, ApiError> {
        let mut state = self.state.lock();
        if subject.is_empty() {
            return Err(rejected(400));
        }
        state.next_id += 1;
        let mut created = conversation(&format!("new-{}", state.next_id), conversation_type);
        created.subject = subject.to_string();
        state.conversations.insert(0, created.clone());
        Ok(created)
    }

    async fn switch_agent(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        let state = self.state.lock();
        state
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .map(|c| Conversation {
                conversation_type: ConversationType::Support,
                ..c.clone()
            })
            .ok_or_else(|| rejected(404))
    }

    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let delay = {
            let mut state = self.state.lock();
            state.history_calls.push(conversation_id.to_string());
            state.history_delays.get(conversation_id).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .state
            .lock()
            .histories
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message, ApiError> {
        let mut state = self.state.lock();
        if state.fail_send {
            return Err(rejected(500));
        }
        state.next_id += 1;
        state
            .sent
            .push((conversation_id.to_string(), content.to_string()));
        Ok(server_message(
            &state.next_id.to_string(),
            conversation_id,
            SenderType::Client,
            content,
        ))
    }

    async fn upload_attachment(
        &self,
        message_id: &str,
        attachment: &PendingAttachment,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        state
            .uploads
            .push((message_id.to_string(), attachment.filename.clone()));
        if state.failing_uploads.contains(&attachment.filename) {
            return Err(rejected(413));
        }
        Ok(())
    }
}

// ============================================================================
// WebSocket
// ============================================================================

/// 内存连接工厂：记录发出的帧，保留事件发送端供测试注入推送
pub struct FakeConnector {
    open: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<String>>>,
    connections: Mutex<Vec<(String, async_channel::Sender<SocketEvent>)>>,
}

impl FakeConnector {
    pub fn new(open: bool) -> Arc<Self> {
        Arc::new(Self {
            open: Arc::new(AtomicBool::new(open)),
            sent: Arc::new(Mutex::new(Vec::new())),
            connections: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn connected_to(&self) -> Vec<String> {
        self.connections
            .lock()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// 最近一次连接的事件发送端
    pub fn latest(&self) -> async_channel::Sender<SocketEvent> {
        self.connections
            .lock()
            .last()
            .map(|(_, tx)| tx.clone())
            .expect("no connection was made")
    }

    /// 第 `index` 次连接的事件发送端
    pub fn nth(&self, index: usize) -> async_channel::Sender<SocketEvent> {
        self.connections.lock()[index].1.clone()
    }
}

impl SocketConnector for FakeConnector {
    fn connect(
        &self,
        conversation_id: &str,
        events: async_channel::Sender<SocketEvent>,
    ) -> Result<Box<dyn ChatSocket>, TransportError> {
        self.connections
            .lock()
            .push((conversation_id.to_string(), events));
        Ok(Box::new(FakeSocket {
            open: self.open.clone(),
            closed: AtomicBool::new(false),
            sent: self.sent.clone(),
        }))
    }
}

struct FakeSocket {
    open: Arc<AtomicBool>,
    closed: AtomicBool,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ChatSocket for FakeSocket {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
