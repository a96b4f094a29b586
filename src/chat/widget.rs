/*!
 * 聊天组件
 *
 * 协调消息合并、AI 等待监视与发送流程，对外提供会话操作与事件通知。
 *
 * 功能：
 * - 打开组件时加载会话列表（唯一的自动刷新时机）
 * - 打开会话：关闭旧连接与轮询任务，建立新连接，冷加载历史记录
 * - 发送消息：乐观插入，人工客服会话走 REST，AI 会话走 WebSocket
 * - AI 等待：推送与轮询竞争，任一方先看到 AI 回复即结束等待
 *
 * 并发约定：
 * - 所有状态在同一把 `parking_lot::Mutex` 下修改，每个事件是一次完整的状态变换
 * - 锁从不跨越 await；事件在释放锁后通过 `async-channel` 发出
 * - 后台任务（推送处理、轮询）只持有弱引用，组件全部句柄释放后自动退出
 */

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::composer::{Composer, PendingAttachment};
use super::reconciler::Reconciler;
use super::wait_monitor::{AiWaitMonitor, WaitState};
use crate::api::{ApiError, ChatApi};
use crate::config::WebchatConfig;
use crate::model::{Conversation, ConversationType, Message, MessageId};
use crate::protocol::OutboundChatFrame;
use crate::socket::{ChatSocket, SocketConnector, SocketEvent, TransportError};

// ============================================================================
// 错误与事件
// ============================================================================

#[derive(Error, Debug)]
pub enum WidgetError {
    #[error("未选择会话")]
    NoActiveConversation,
    #[error("连接未就绪，消息未发送")]
    SocketNotOpen,
    #[error("消息发送失败: {0}")]
    SendFailed(#[source] ApiError),
    #[error("AI 会话不支持附件")]
    AttachmentsUnsupported,
    #[error("发送过程中会话已切换")]
    ConversationChanged,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// 需要用户确认的提示
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub message: String,
}

/// 组件事件
#[derive(Debug, Clone)]
pub enum WidgetEvent {
    /// 消息列表变化，界面重新读取 `transcript()`
    TranscriptChanged,
    ConnectionChanged(bool),
    AiWaitChanged(bool),
    ConversationsLoaded(Vec<Conversation>),
    /// 附件上传失败（不阻断发送）
    AttachmentUploadFailed {
        message_id: String,
        filename: String,
        reason: String,
    },
    Notice(Notice),
}

/// 单次轮询的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// 未在等待，没有请求
    NotWaiting,
    /// 快照中没有新的 AI 回复（或已过期），列表保持不变
    Pending,
    /// 已应用快照并结束等待
    Resolved,
}

// ============================================================================
// 组件状态
// ============================================================================

struct WidgetState {
    conversations: Vec<Conversation>,
    active: Option<Conversation>,
    reconciler: Reconciler,
    monitor: AiWaitMonitor,
    composer: Composer,
    socket: Option<Box<dyn ChatSocket>>,
    /// 每次建立连接递增，旧连接的迟到事件据此丢弃
    socket_generation: u64,
    connected: bool,
    pump_guard: Option<DropGuard>,
}

impl WidgetState {
    fn new() -> Self {
        Self {
            conversations: Vec::new(),
            active: None,
            reconciler: Reconciler::new(),
            monitor: AiWaitMonitor::new(),
            composer: Composer::new(),
            socket: None,
            socket_generation: 0,
            connected: false,
            pump_guard: None,
        }
    }

    /// 停止轮询、关闭连接，返回需要发出的事件
    fn teardown(&mut self) -> Vec<WidgetEvent> {
        let mut events = Vec::new();
        if self.monitor.cancel() {
            events.push(WidgetEvent::AiWaitChanged(false));
        }
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
        self.pump_guard = None;
        self.socket_generation += 1;
        if self.connected {
            self.connected = false;
            events.push(WidgetEvent::ConnectionChanged(false));
        }
        events
    }
}

struct Shared {
    config: WebchatConfig,
    api: Arc<dyn ChatApi>,
    connector: Arc<dyn SocketConnector>,
    state: Mutex<WidgetState>,
    events: async_channel::Sender<WidgetEvent>,
}

/// 聊天组件句柄，可在任务间克隆
#[derive(Clone)]
pub struct ChatWidget {
    shared: Arc<Shared>,
}

impl ChatWidget {
    pub fn new(
        config: WebchatConfig,
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn SocketConnector>,
    ) -> (Self, async_channel::Receiver<WidgetEvent>) {
        let (events, receiver) = async_channel::unbounded();
        let shared = Arc::new(Shared {
            config,
            api,
            connector,
            state: Mutex::new(WidgetState::new()),
            events,
        });
        (Self { shared }, receiver)
    }

    fn from_weak(weak: &Weak<Shared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    fn emit(&self, event: WidgetEvent) {
        // 接收端已释放时静默丢弃
        let _ = self.shared.events.try_send(event);
    }

    fn emit_all(&self, events: Vec<WidgetEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    fn notice(&self, title: &str, message: impl Into<String>) {
        self.emit(WidgetEvent::Notice(Notice {
            title: title.to_string(),
            message: message.into(),
        }));
    }

    // ========================================================================
    // 状态读取
    // ========================================================================

    pub fn transcript(&self) -> Vec<Message> {
        self.shared.state.lock().reconciler.transcript().to_vec()
    }

    pub fn wait_state(&self) -> WaitState {
        self.shared.state.lock().monitor.state().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        self.shared.state.lock().active.clone()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.shared.state.lock().conversations.clone()
    }

    pub fn draft(&self) -> String {
        self.shared.state.lock().composer.draft().to_string()
    }

    pub fn pending_attachments(&self) -> Vec<PendingAttachment> {
        self.shared.state.lock().composer.attachments().to_vec()
    }

    // ========================================================================
    // 输入框
    // ========================================================================

    pub fn set_draft(&self, text: impl Into<String>) {
        self.shared.state.lock().composer.set_draft(text);
    }

    pub fn attach(&self, attachment: PendingAttachment) {
        self.shared.state.lock().composer.attach(attachment);
    }

    pub fn detach(&self, local_id: &str) -> bool {
        self.shared.state.lock().composer.detach(local_id)
    }

    // ========================================================================
    // 会话
    // ========================================================================

    /// 打开组件：加载会话列表
    pub async fn open_widget(&self) -> Result<Vec<Conversation>, WidgetError> {
        let conversations = match self.shared.api.list_conversations().await {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!(error = %e, "加载会话列表失败");
                return Err(e.into());
            }
        };
        info!(count = conversations.len(), "会话列表已加载");
        self.shared.state.lock().conversations = conversations.clone();
        self.emit(WidgetEvent::ConversationsLoaded(conversations.clone()));
        Ok(conversations)
    }

    /// 打开会话
    ///
    /// 旧连接与轮询任务先关闭，同一时刻最多一条连接。
    /// 历史记录返回时会话已切换则丢弃。
    pub async fn open_conversation(&self, conversation: Conversation) -> Result<(), WidgetError> {
        let conversation_id = conversation.id.clone();
        let (generation, events) = {
            let mut state = self.shared.state.lock();
            let mut events = state.teardown();
            state.active = Some(conversation);
            state.reconciler.set_active(Some(conversation_id.clone()));
            events.push(WidgetEvent::TranscriptChanged);
            (state.socket_generation, events)
        };
        info!(conversation_id = %conversation_id, "打开会话");

        let (tx, rx) = async_channel::unbounded();
        match self.shared.connector.connect(&conversation_id, tx) {
            Ok(socket) => {
                let mut state = self.shared.state.lock();
                if state.socket_generation == generation {
                    state.socket = Some(socket);
                    state.pump_guard = Some(self.spawn_socket_pump(generation, rx));
                } else {
                    socket.close();
                }
            }
            Err(e) => {
                // 连接失败不影响历史记录加载，轮询仍可兜底
                warn!(conversation_id = %conversation_id, error = %e, "WebSocket 连接失败");
            }
        }
        self.emit_all(events);

        let history = match self.shared.api.fetch_history(&conversation_id).await {
            Ok(history) => history,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "加载历史记录失败");
                return Err(e.into());
            }
        };
        let applied = self
            .shared
            .state
            .lock()
            .reconciler
            .apply_snapshot(&conversation_id, history);
        if applied {
            self.emit(WidgetEvent::TranscriptChanged);
        }
        Ok(())
    }

    /// 创建会话并打开
    pub async fn create_conversation(
        &self,
        subject: &str,
        conversation_type: ConversationType,
    ) -> Result<Conversation, WidgetError> {
        let created = match self
            .shared
            .api
            .create_conversation(subject, conversation_type)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                warn!(error = %e, "创建会话失败");
                self.notice("创建会话失败", e.to_string());
                return Err(e.into());
            }
        };

        let conversations = {
            let mut state = self.shared.state.lock();
            state.conversations.retain(|c| c.id != created.id);
            state.conversations.insert(0, created.clone());
            state.conversations.clone()
        };
        self.emit(WidgetEvent::ConversationsLoaded(conversations));
        self.open_conversation(created.clone()).await?;
        Ok(created)
    }

    /// AI 会话转人工客服
    pub async fn switch_agent(&self, conversation_id: &str) -> Result<Conversation, WidgetError> {
        let updated = match self.shared.api.switch_agent(conversation_id).await {
            Ok(updated) => updated,
            Err(e) => {
                warn!(conversation_id, error = %e, "转人工客服失败");
                self.notice("转人工客服失败", e.to_string());
                return Err(e.into());
            }
        };
        info!(conversation_id, "已转人工客服");

        let (conversations, mut events) = {
            let mut state = self.shared.state.lock();
            let mut events = Vec::new();
            if let Some(existing) = state.conversations.iter_mut().find(|c| c.id == updated.id) {
                *existing = updated.clone();
            }
            if state.active.as_ref().is_some_and(|c| c.id == updated.id) {
                state.active = Some(updated.clone());
                // 转人工后不再等待 AI 回复
                if !updated.is_ai() && state.monitor.cancel() {
                    state.reconciler.remove_thinking();
                    events.push(WidgetEvent::TranscriptChanged);
                    events.push(WidgetEvent::AiWaitChanged(false));
                }
            }
            (state.conversations.clone(), events)
        };
        events.insert(0, WidgetEvent::ConversationsLoaded(conversations));
        self.emit_all(events);
        Ok(updated)
    }

    /// 卸载组件
    pub fn close(&self) {
        let events = {
            let mut state = self.shared.state.lock();
            let mut events = state.teardown();
            state.active = None;
            state.reconciler.set_active(None);
            events.push(WidgetEvent::TranscriptChanged);
            events
        };
        info!("聊天组件已关闭");
        self.emit_all(events);
    }

    // ========================================================================
    // 发送
    // ========================================================================

    /// 发送输入框中的内容
    ///
    /// 没有可发送内容时直接返回。输入框在任何网络请求之前清空。
    pub async fn send(&self) -> Result<(), WidgetError> {
        let (conversation, content, attachments, temp_id, sent_at) = {
            let mut state = self.shared.state.lock();
            let Some(conversation) = state.active.clone() else {
                return Err(WidgetError::NoActiveConversation);
            };
            if conversation.is_ai() && !state.composer.attachments().is_empty() {
                return Err(WidgetError::AttachmentsUnsupported);
            }
            let Some(outgoing) = state.composer.take() else {
                return Ok(());
            };
            let placeholders = outgoing.placeholders();
            let Some(temp_id) = state
                .reconciler
                .insert_optimistic(&outgoing.content, placeholders)
            else {
                return Err(WidgetError::NoActiveConversation);
            };
            (
                conversation,
                outgoing.content,
                outgoing.attachments,
                temp_id,
                Instant::now(),
            )
        };
        self.emit(WidgetEvent::TranscriptChanged);

        match conversation.conversation_type {
            ConversationType::Support => {
                self.send_support(&conversation.id, &content, attachments, temp_id)
                    .await
            }
            ConversationType::Ai => {
                self.send_ai(&conversation.id, content, temp_id, sent_at)
                    .await
            }
        }
    }

    async fn send_support(
        &self,
        conversation_id: &str,
        content: &str,
        attachments: Vec<PendingAttachment>,
        temp_id: MessageId,
    ) -> Result<(), WidgetError> {
        let confirmed = match self.shared.api.send_message(conversation_id, content).await {
            Ok(message) => message,
            Err(e) => {
                warn!(conversation_id, error = %e, "消息发送失败");
                let removed = self.shared.state.lock().reconciler.remove(&temp_id);
                if removed {
                    self.emit(WidgetEvent::TranscriptChanged);
                }
                self.notice("发送失败", e.to_string());
                return Err(WidgetError::SendFailed(e));
            }
        };

        let message_id = confirmed.id.clone();
        let outcome = self
            .shared
            .state
            .lock()
            .reconciler
            .confirm_optimistic(&temp_id, confirmed);
        if outcome.changed() {
            self.emit(WidgetEvent::TranscriptChanged);
        }
        debug!(conversation_id, message_id = %message_id, "消息已发送");

        if attachments.is_empty() {
            return Ok(());
        }
        let Some(server_id) = message_id.server_id() else {
            warn!(message_id = %message_id, "服务器未返回消息 ID，跳过附件上传");
            return Ok(());
        };

        // 逐个上传，单个失败不影响其余附件
        let mut failed = 0usize;
        for attachment in &attachments {
            if let Err(e) = self
                .shared
                .api
                .upload_attachment(server_id, attachment)
                .await
            {
                failed += 1;
                warn!(
                    message_id = server_id,
                    filename = %attachment.filename,
                    error = %e,
                    "附件上传失败"
                );
                self.emit(WidgetEvent::AttachmentUploadFailed {
                    message_id: server_id.to_string(),
                    filename: attachment.filename.clone(),
                    reason: e.to_string(),
                });
            }
        }
        if failed > 0 {
            warn!(message_id = server_id, failed, total = attachments.len(), "部分附件上传失败");
        }
        Ok(())
    }

    /// AI 会话发送：延迟插入思考占位，再经 WebSocket 发出
    ///
    /// 轮询节拍从乐观插入时刻起算，不受思考延迟影响。
    async fn send_ai(
        &self,
        conversation_id: &str,
        content: String,
        temp_id: MessageId,
        sent_at: Instant,
    ) -> Result<(), WidgetError> {
        tokio::time::sleep(self.shared.config.thinking_delay()).await;

        let result = {
            let mut state = self.shared.state.lock();
            if !state.reconciler.is_active(conversation_id) {
                debug!(conversation_id, "等待期间会话已切换，放弃发送");
                return Err(WidgetError::ConversationChanged);
            }
            let thinking_id = state.reconciler.insert_thinking();
            let token = state.monitor.begin(conversation_id);

            let frame = OutboundChatFrame::text(content);
            let transmitted = match state.socket.as_ref() {
                Some(socket) if socket.is_open() => serde_json::to_string(&frame)
                    .map_err(TransportError::from)
                    .and_then(|text| socket.send_text(text)),
                _ => Err(TransportError::NotOpen),
            };

            match transmitted {
                Ok(()) => Ok(token),
                Err(e) => {
                    state.reconciler.remove(&temp_id);
                    if let Some(id) = &thinking_id {
                        state.reconciler.remove(id);
                    }
                    state.monitor.cancel();
                    Err(e)
                }
            }
        };

        match result {
            Ok(token) => {
                debug!(conversation_id, "消息已通过 WebSocket 发送，等待 AI 回复");
                self.emit(WidgetEvent::TranscriptChanged);
                self.emit(WidgetEvent::AiWaitChanged(true));
                self.spawn_poll_loop(token, sent_at);
                Ok(())
            }
            Err(e) => {
                warn!(conversation_id, error = %e, "AI 消息发送失败");
                self.emit(WidgetEvent::TranscriptChanged);
                self.notice("发送失败", "连接未就绪，请稍后重试");
                match e {
                    TransportError::NotOpen => Err(WidgetError::SocketNotOpen),
                    other => Err(other.into()),
                }
            }
        }
    }

    // ========================================================================
    // AI 等待轮询
    // ========================================================================

    /// 每 `poll_interval` 轮询一次，第一次在 `sent_at + poll_interval`
    fn spawn_poll_loop(&self, token: CancellationToken, sent_at: Instant) {
        let weak = Arc::downgrade(&self.shared);
        let period = self.shared.config.poll_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(sent_at + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(widget) = ChatWidget::from_weak(&weak) else { break };
                        match widget.poll_tick().await {
                            Ok(PollOutcome::Pending) => {}
                            Ok(_) => break,
                            Err(e) => warn!(error = %e, "轮询历史记录失败"),
                        }
                    }
                }
            }
            debug!("轮询任务结束");
        });
    }

    /// 执行一次轮询
    ///
    /// 只有快照中出现列表里没有的 AI 回复、且会话仍处于选中状态时才应用快照。
    /// 推送已先到达时这里是空操作。
    pub async fn poll_tick(&self) -> Result<PollOutcome, WidgetError> {
        let conversation_id = match self.shared.state.lock().monitor.state() {
            WaitState::Waiting {
                conversation_id, ..
            } => conversation_id.clone(),
            WaitState::Idle => return Ok(PollOutcome::NotWaiting),
        };

        let snapshot = self.shared.api.fetch_history(&conversation_id).await?;

        {
            let mut state = self.shared.state.lock();
            if !state.monitor.is_waiting_for(&conversation_id) {
                debug!(conversation_id = %conversation_id, "轮询返回时已不在等待，丢弃");
                return Ok(PollOutcome::NotWaiting);
            }
            if !state.reconciler.has_unseen_ai_message(&snapshot) {
                debug!(conversation_id = %conversation_id, "轮询未发现新的 AI 回复");
                return Ok(PollOutcome::Pending);
            }
            if !state.reconciler.apply_snapshot(&conversation_id, snapshot) {
                return Ok(PollOutcome::Pending);
            }
            state.monitor.resolve();
        }

        info!(conversation_id = %conversation_id, "轮询获得 AI 回复");
        self.emit(WidgetEvent::TranscriptChanged);
        self.emit(WidgetEvent::AiWaitChanged(false));
        Ok(PollOutcome::Resolved)
    }

    // ========================================================================
    // WebSocket 事件
    // ========================================================================

    fn spawn_socket_pump(
        &self,
        generation: u64,
        events: async_channel::Receiver<SocketEvent>,
    ) -> DropGuard {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let weak = Arc::downgrade(&self.shared);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    event = events.recv() => {
                        let Ok(event) = event else { break };
                        let Some(widget) = ChatWidget::from_weak(&weak) else { break };
                        widget.apply_socket_event(Some(generation), event);
                    }
                }
            }
        });

        token.drop_guard()
    }

    /// 处理当前连接的事件
    pub fn handle_socket_event(&self, event: SocketEvent) {
        self.apply_socket_event(None, event);
    }

    fn apply_socket_event(&self, generation: Option<u64>, event: SocketEvent) {
        let events = {
            let mut state = self.shared.state.lock();
            if let Some(generation) = generation
                && generation != state.socket_generation
            {
                debug!(generation, "丢弃旧连接的事件");
                return;
            }

            let mut events = Vec::new();
            match event {
                SocketEvent::Opened => {
                    if !state.connected {
                        state.connected = true;
                        events.push(WidgetEvent::ConnectionChanged(true));
                    }
                }
                SocketEvent::Closed { reason } => {
                    info!(reason = ?reason, "WebSocket 已断开");
                    if state.connected {
                        state.connected = false;
                        events.push(WidgetEvent::ConnectionChanged(false));
                    }
                }
                SocketEvent::Error(error) => {
                    warn!(error = %error, "WebSocket 错误");
                    if state.connected {
                        state.connected = false;
                        events.push(WidgetEvent::ConnectionChanged(false));
                    }
                }
                SocketEvent::Frame(text) => {
                    if let Some(outcome) = state.reconciler.apply_frame(&text) {
                        if outcome.changed() {
                            events.push(WidgetEvent::TranscriptChanged);
                        }
                        if outcome.ai_arrived && state.monitor.resolve() {
                            debug!("推送获得 AI 回复，停止轮询");
                            events.push(WidgetEvent::AiWaitChanged(false));
                        }
                    }
                }
            }
            events
        };
        self.emit_all(events);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::chat::testing::{
        chat_frame, conversation, server_message, FakeApi, FakeConnector,
    };
    use crate::model::SenderType;

    fn widget(
        api: &Arc<FakeApi>,
        connector: &Arc<FakeConnector>,
    ) -> (ChatWidget, async_channel::Receiver<WidgetEvent>) {
        ChatWidget::new(WebchatConfig::default(), api.clone(), connector.clone())
    }

    fn drain(events: &async_channel::Receiver<WidgetEvent>) -> Vec<WidgetEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    fn ids(widget: &ChatWidget) -> Vec<String> {
        widget.transcript().iter().map(|m| m.id.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ai_conversation_end_to_end() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(true);
        let (widget, events) = widget(&api, &connector);
        widget
            .open_conversation(conversation("ai-1", ConversationType::Ai))
            .await
            .unwrap();

        let start = Instant::now();
        widget.set_draft("show today's sales");
        let sending = tokio::spawn({
            let widget = widget.clone();
            async move { widget.send().await }
        });

        // 乐观消息立即出现，思考占位尚未插入
        tokio::time::sleep(Duration::from_millis(1)).await;
        let transcript = widget.transcript();
        assert_eq!(transcript.len(), 1);
        assert!(transcript[0].id.is_temp());
        assert_eq!(transcript[0].sender_type, SenderType::Client);
        assert!(widget.draft().is_empty());
        assert_eq!(widget.wait_state(), WaitState::Idle);

        // 300ms 后：客户消息 + 思考占位
        sending.await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
        let transcript = widget.transcript();
        assert_eq!(transcript.len(), 2);
        assert!(transcript[0].id.is_temp());
        assert!(transcript[1].id.is_thinking());
        assert!(matches!(widget.wait_state(), WaitState::Waiting { .. }));

        let frames = connector.sent();
        assert_eq!(frames.len(), 1);
        let frame: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["type"], "chat_message");
        assert_eq!(frame["content"], "show today's sales");

        // 3 秒轮询：服务器还没有 AI 回复
        tokio::time::sleep_until(start + Duration::from_millis(3_050)).await;
        assert_eq!(api.history_calls("ai-1"), 2);
        let transcript = widget.transcript();
        assert_eq!(transcript.len(), 2);
        assert!(transcript[1].id.is_thinking());

        // 6 秒推送到达
        tokio::time::sleep_until(start + Duration::from_millis(5_950)).await;
        widget.handle_socket_event(SocketEvent::Frame(chat_frame(
            501,
            "ai-1",
            "ai",
            "Today's sales were $1,245",
        )));

        let transcript = widget.transcript();
        assert_eq!(transcript.len(), 2);
        assert!(!transcript.iter().any(|m| m.id.is_thinking()));
        assert_eq!(transcript[0].sender_type, SenderType::Client);
        assert_eq!(transcript[1].id, MessageId::Server("501".into()));
        assert_eq!(transcript[1].content, "Today's sales were $1,245");
        assert_eq!(widget.wait_state(), WaitState::Idle);

        // 推送先到，之后不再轮询
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.history_calls("ai-1"), 2);
        assert_eq!(widget.transcript(), transcript);

        let events = drain(&events);
        assert!(events.iter().any(|e| matches!(e, WidgetEvent::AiWaitChanged(true))));
        assert!(events.iter().any(|e| matches!(e, WidgetEvent::AiWaitChanged(false))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_during_inflight_poll_keeps_transcript() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(true);
        let (widget, _events) = widget(&api, &connector);
        widget
            .open_conversation(conversation("ai-1", ConversationType::Ai))
            .await
            .unwrap();

        let start = Instant::now();
        widget.set_draft("q");
        widget.send().await.unwrap();

        // 3 秒的轮询请求耗时 1 秒，返回的快照里已有 AI 回复
        api.delay_history("ai-1", Duration::from_secs(1));
        api.set_history(
            "ai-1",
            vec![
                server_message("9", "ai-1", SenderType::Client, "q"),
                server_message("10", "ai-1", SenderType::Ai, "a"),
            ],
        );
        tokio::time::sleep_until(start + Duration::from_millis(3_400)).await;
        assert_eq!(api.history_calls("ai-1"), 2);
        assert!(matches!(widget.wait_state(), WaitState::Waiting { .. }));

        // 请求在途时推送到达
        widget.handle_socket_event(SocketEvent::Frame(chat_frame(10, "ai-1", "ai", "a")));
        assert_eq!(widget.wait_state(), WaitState::Idle);
        let before = widget.transcript();
        assert_eq!(before.len(), 2);
        assert!(before[0].id.is_temp());
        assert_eq!(before[1].id, MessageId::Server("10".into()));

        // 在途请求返回后不改动消息列表，也不再发起新的轮询
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.history_calls("ai-1"), 2);
        assert_eq!(widget.transcript(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_resolves_when_push_never_arrives() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(true);
        let (widget, _events) = widget(&api, &connector);
        widget
            .open_conversation(conversation("ai-1", ConversationType::Ai))
            .await
            .unwrap();
        widget.set_draft("top products");
        widget.send().await.unwrap();

        api.set_history(
            "ai-1",
            vec![
                server_message("600", "ai-1", SenderType::Client, "top products"),
                server_message("601", "ai-1", SenderType::Bot, "1. Coffee"),
            ],
        );
        tokio::time::sleep(Duration::from_millis(3_100)).await;

        assert_eq!(ids(&widget), vec!["600", "601"]);
        assert_eq!(widget.wait_state(), WaitState::Idle);

        // 迟到的推送不会产生重复
        widget.handle_socket_event(SocketEvent::Frame(chat_frame(601, "ai-1", "bot", "1. Coffee")));
        assert_eq!(ids(&widget), vec!["600", "601"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_tick_after_push_is_noop() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(true);
        let (widget, _events) = widget(&api, &connector);
        widget
            .open_conversation(conversation("ai-1", ConversationType::Ai))
            .await
            .unwrap();
        widget.set_draft("q");
        widget.send().await.unwrap();

        widget.handle_socket_event(SocketEvent::Frame(chat_frame(10, "ai-1", "ai", "a")));
        let before = widget.transcript();
        api.set_history(
            "ai-1",
            vec![server_message("10", "ai-1", SenderType::Ai, "a")],
        );
        assert_eq!(widget.poll_tick().await.unwrap(), PollOutcome::NotWaiting);
        assert_eq!(widget.transcript(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ai_send_without_socket_is_hard_failure() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(false);
        let (widget, events) = widget(&api, &connector);
        widget
            .open_conversation(conversation("ai-1", ConversationType::Ai))
            .await
            .unwrap();
        drain(&events);

        widget.set_draft("hello?");
        let result = widget.send().await;
        assert!(matches!(result, Err(WidgetError::SocketNotOpen)));
        assert!(widget.transcript().is_empty());
        assert_eq!(widget.wait_state(), WaitState::Idle);
        assert!(connector.sent().is_empty());

        let events = drain(&events);
        assert!(events.iter().any(|e| matches!(e, WidgetEvent::Notice(_))));
        assert!(!events.iter().any(|e| matches!(e, WidgetEvent::AiWaitChanged(true))));

        // 没有遗留轮询任务
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.history_calls("ai-1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversation_switch_during_thinking_delay() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(true);
        let (widget, _events) = widget(&api, &connector);
        widget
            .open_conversation(conversation("ai-1", ConversationType::Ai))
            .await
            .unwrap();

        widget.set_draft("q");
        let sending = tokio::spawn({
            let widget = widget.clone();
            async move { widget.send().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        widget
            .open_conversation(conversation("ai-2", ConversationType::Ai))
            .await
            .unwrap();

        let result = sending.await.unwrap();
        assert!(matches!(result, Err(WidgetError::ConversationChanged)));
        assert!(connector.sent().is_empty());
        assert!(widget.transcript().is_empty());
        assert_eq!(widget.wait_state(), WaitState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_history_is_discarded() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(true);
        api.set_history(
            "a",
            vec![server_message("1", "a", SenderType::Agent, "from a")],
        );
        api.set_history(
            "b",
            vec![server_message("2", "b", SenderType::Agent, "from b")],
        );
        api.delay_history("a", Duration::from_secs(1));
        let (widget, _events) = widget(&api, &connector);

        let opening_a = tokio::spawn({
            let widget = widget.clone();
            async move {
                widget
                    .open_conversation(conversation("a", ConversationType::Support))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        widget
            .open_conversation(conversation("b", ConversationType::Support))
            .await
            .unwrap();
        assert_eq!(ids(&widget), vec!["2"]);

        opening_a.await.unwrap().unwrap();
        assert_eq!(ids(&widget), vec!["2"]);
        assert_eq!(widget.active_conversation().unwrap().id, "b");
        assert_eq!(connector.connected_to(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_support_send_with_partial_upload_failure() {
        let api = FakeApi::new();
        api.fail_upload("broken.png");
        let connector = FakeConnector::new(true);
        let (widget, events) = widget(&api, &connector);
        widget
            .open_conversation(conversation("s-1", ConversationType::Support))
            .await
            .unwrap();

        widget.set_draft("photos of the shelf");
        widget.attach(PendingAttachment::from_path("/tmp/does-not-exist/broken.png"));
        widget.attach(PendingAttachment::from_path("/tmp/does-not-exist/shelf.jpg"));
        widget.send().await.unwrap();

        let uploads = api.uploads();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].1, "broken.png");
        assert_eq!(uploads[1].1, "shelf.jpg");
        assert!(uploads.iter().all(|(id, _)| id == "901"));

        // 消息保留，附件仍展示
        let transcript = widget.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].id, MessageId::Server("901".into()));
        assert_eq!(transcript[0].attachments.len(), 2);

        let failures: Vec<_> = drain(&events)
            .into_iter()
            .filter_map(|e| match e {
                WidgetEvent::AttachmentUploadFailed { filename, .. } => Some(filename),
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec!["broken.png".to_string()]);
    }

    #[tokio::test]
    async fn test_support_send_failure_removes_temp() {
        let api = FakeApi::new();
        api.fail_send();
        let connector = FakeConnector::new(true);
        let (widget, events) = widget(&api, &connector);
        widget
            .open_conversation(conversation("s-1", ConversationType::Support))
            .await
            .unwrap();

        widget.set_draft("anyone there?");
        let result = widget.send().await;
        assert!(matches!(result, Err(WidgetError::SendFailed(_))));
        assert!(widget.transcript().is_empty());
        assert!(widget.draft().is_empty());
        assert!(drain(&events)
            .iter()
            .any(|e| matches!(e, WidgetEvent::Notice(n) if n.title == "发送失败")));
    }

    #[tokio::test]
    async fn test_support_echo_and_confirmation_show_one_entry() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(true);
        let (widget, _events) = widget(&api, &connector);
        widget
            .open_conversation(conversation("s-1", ConversationType::Support))
            .await
            .unwrap();

        widget.set_draft("refund for order 77");
        widget.send().await.unwrap();
        widget.handle_socket_event(SocketEvent::Frame(chat_frame(
            901,
            "s-1",
            "client",
            "refund for order 77",
        )));
        assert_eq!(ids(&widget), vec!["901"]);
    }

    #[tokio::test]
    async fn test_send_does_not_reload() {
        let api = FakeApi::new();
        api.set_conversations(vec![conversation("s-1", ConversationType::Support)]);
        let connector = FakeConnector::new(true);
        let (widget, _events) = widget(&api, &connector);

        let conversations = widget.open_widget().await.unwrap();
        widget
            .open_conversation(conversations[0].clone())
            .await
            .unwrap();
        widget.set_draft("hi");
        widget.send().await.unwrap();

        assert_eq!(api.list_calls(), 1);
        assert_eq!(api.history_calls("s-1"), 1);
        assert_eq!(api.sent(), vec![("s-1".to_string(), "hi".to_string())]);
    }

    #[tokio::test]
    async fn test_empty_send_is_noop() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(true);
        let (widget, _events) = widget(&api, &connector);
        widget
            .open_conversation(conversation("s-1", ConversationType::Support))
            .await
            .unwrap();

        widget.set_draft("   ");
        widget.send().await.unwrap();
        assert!(widget.transcript().is_empty());
        assert!(api.sent().is_empty());
    }

    #[tokio::test]
    async fn test_ai_conversation_rejects_attachments() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(true);
        let (widget, _events) = widget(&api, &connector);
        widget
            .open_conversation(conversation("ai-1", ConversationType::Ai))
            .await
            .unwrap();

        widget.set_draft("what is this?");
        widget.attach(PendingAttachment::from_path("/tmp/does-not-exist/x.png"));
        let result = widget.send().await;
        assert!(matches!(result, Err(WidgetError::AttachmentsUnsupported)));
        // 输入框保持原样
        assert_eq!(widget.draft(), "what is this?");
        assert_eq!(widget.pending_attachments().len(), 1);
    }

    #[tokio::test]
    async fn test_send_without_conversation() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(true);
        let (widget, _events) = widget(&api, &connector);
        widget.set_draft("hi");
        assert!(matches!(
            widget.send().await,
            Err(WidgetError::NoActiveConversation)
        ));
    }

    #[tokio::test]
    async fn test_socket_events_flow_through_connection() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(true);
        let (widget, events) = widget(&api, &connector);
        widget
            .open_conversation(conversation("s-1", ConversationType::Support))
            .await
            .unwrap();

        let tx = connector.latest();
        tx.send(SocketEvent::Opened).await.unwrap();
        tx.send(SocketEvent::Frame(chat_frame(5, "s-1", "agent", "hello")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(widget.is_connected());
        assert_eq!(ids(&widget), vec!["5"]);
        assert!(drain(&events)
            .iter()
            .any(|e| matches!(e, WidgetEvent::ConnectionChanged(true))));

        tx.send(SocketEvent::Closed { reason: None }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!widget.is_connected());
        // 断开不影响消息列表
        assert_eq!(ids(&widget), vec!["5"]);
    }

    #[tokio::test]
    async fn test_events_from_previous_connection_are_ignored() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(true);
        let (widget, _events) = widget(&api, &connector);
        widget
            .open_conversation(conversation("a", ConversationType::Support))
            .await
            .unwrap();
        let old = connector.nth(0);
        widget
            .open_conversation(conversation("b", ConversationType::Support))
            .await
            .unwrap();

        // 旧连接的处理任务已退出，事件无人接收
        let _ = old.send(SocketEvent::Frame(chat_frame(9, "b", "agent", "late"))).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(widget.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_create_and_switch_agent() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(true);
        let (widget, events) = widget(&api, &connector);

        let created = widget
            .create_conversation("Inventory question", ConversationType::Ai)
            .await
            .unwrap();
        assert_eq!(widget.active_conversation().unwrap().id, created.id);
        assert_eq!(widget.conversations().len(), 1);

        let switched = widget.switch_agent(&created.id).await.unwrap();
        assert_eq!(switched.conversation_type, ConversationType::Support);
        assert!(!widget.active_conversation().unwrap().is_ai());

        // 创建失败给出提示
        drain(&events);
        assert!(widget
            .create_conversation("", ConversationType::Support)
            .await
            .is_err());
        assert!(drain(&events)
            .iter()
            .any(|e| matches!(e, WidgetEvent::Notice(n) if n.title == "创建会话失败")));
    }

    #[tokio::test]
    async fn test_close_tears_down() {
        let api = FakeApi::new();
        let connector = FakeConnector::new(true);
        let (widget, _events) = widget(&api, &connector);
        widget
            .open_conversation(conversation("s-1", ConversationType::Support))
            .await
            .unwrap();
        widget.handle_socket_event(SocketEvent::Opened);
        assert!(widget.is_connected());

        widget.close();
        assert!(!widget.is_connected());
        assert!(widget.active_conversation().is_none());
        assert!(widget.transcript().is_empty());
    }
}
