//! AI 等待监视
//!
//! AI 回复可能耗时数分钟，推送又不可靠，因此等待期间定时轮询历史记录兜底。
//!
//! 状态机：`Idle → Waiting → Idle`
//! - AI 会话发送消息后进入 `Waiting`，同时启动轮询任务
//! - 推送或轮询任一方先看到 AI 回复即回到 `Idle`，另一方随后成为空操作
//! - 卸载、切换会话、回到 `Idle` 时取消轮询任务；同一时刻最多一个轮询任务

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// 等待状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitState {
    Idle,
    Waiting {
        conversation_id: String,
        since: DateTime<Utc>,
    },
}

/// AI 等待监视器
#[derive(Debug)]
pub struct AiWaitMonitor {
    state: WaitState,
    /// 当前轮询任务的取消令牌
    poll_token: Option<CancellationToken>,
}

impl Default for AiWaitMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl AiWaitMonitor {
    pub fn new() -> Self {
        Self {
            state: WaitState::Idle,
            poll_token: None,
        }
    }

    pub fn state(&self) -> &WaitState {
        &self.state
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self.state, WaitState::Waiting { .. })
    }

    pub fn is_waiting_for(&self, conversation_id: &str) -> bool {
        matches!(&self.state, WaitState::Waiting { conversation_id: id, .. } if id == conversation_id)
    }

    /// 进入等待状态，返回新轮询任务的取消令牌（旧任务会被取消）
    pub fn begin(&mut self, conversation_id: &str) -> CancellationToken {
        self.cancel_poll();
        let token = CancellationToken::new();
        self.poll_token = Some(token.clone());
        self.state = WaitState::Waiting {
            conversation_id: conversation_id.to_string(),
            since: Utc::now(),
        };
        token
    }

    /// AI 回复已到达：回到 `Idle` 并停止轮询，返回之前是否在等待
    pub fn resolve(&mut self) -> bool {
        let was_waiting = self.is_waiting();
        self.cancel_poll();
        self.state = WaitState::Idle;
        was_waiting
    }

    /// 卸载 / 切换会话 / 发送失败时取消等待，返回之前是否在等待
    pub fn cancel(&mut self) -> bool {
        self.resolve()
    }

    fn cancel_poll(&mut self) {
        if let Some(token) = self.poll_token.take() {
            token.cancel();
        }
    }
}

impl Drop for AiWaitMonitor {
    fn drop(&mut self) {
        self.cancel_poll();
    }
}
