//! 基于 tokio-tungstenite 的 WebSocket 连接
//!
//! 地址：`{ws_base_url}/ws/chat/{conversation_id}/?token=...`
//!
//! 连接任务在后台运行，直到 `close()` 或句柄被丢弃：
//! - 断线后按 `ReconnectPolicy` 指数退避重连，次数用尽后停止（由轮询兜底）
//! - 只有保持了 `stable_after()` 的连接断开后才清零重连计数，
//!   握手后立即被服务器关闭的连接照常计数
//! - 重连前丢弃未发出的帧，避免断线期间的旧消息被补发

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{ChatSocket, SocketConnector, SocketEvent, TransportError};
use crate::config::{ReconnectPolicy, WebchatConfig};

// ============================================================================
// 连接工厂
// ============================================================================

/// WebSocket 连接工厂
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: Url,
    auth_token: Option<String>,
    reconnect: ReconnectPolicy,
}

impl WsConnector {
    pub fn new(config: &WebchatConfig) -> Result<Self, TransportError> {
        let mut raw = config.ws_base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if !matches!(base_url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!(
                "不支持的协议: {}",
                base_url.scheme()
            )));
        }
        Ok(Self {
            base_url,
            auth_token: config.auth_token.clone(),
            reconnect: config.reconnect.clone(),
        })
    }

    /// 会话的连接地址（会话 ID 作为单独一段路径转义）
    pub fn conversation_url(&self, conversation_id: &str) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["ws", "chat", conversation_id])
            .push("");
        if let Some(token) = &self.auth_token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

impl SocketConnector for WsConnector {
    fn connect(
        &self,
        conversation_id: &str,
        events: async_channel::Sender<SocketEvent>,
    ) -> Result<Box<dyn ChatSocket>, TransportError> {
        let url = self.conversation_url(conversation_id)?;
        let open = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        info!(conversation_id, "建立 WebSocket 连接");
        tokio::spawn(run_connection(
            url,
            self.reconnect.clone(),
            open.clone(),
            cancel.clone(),
            outgoing_rx,
            events,
        ));

        Ok(Box::new(WsSocket {
            open,
            cancel,
            outgoing: outgoing_tx,
        }))
    }
}

// ============================================================================
// 连接句柄
// ============================================================================

/// WebSocket 连接句柄
#[derive(Debug)]
pub struct WsSocket {
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
    outgoing: mpsc::UnboundedSender<String>,
}

impl ChatSocket for WsSocket {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::NotOpen)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

impl Drop for WsSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// 连接任务
// ============================================================================

/// 单次连接的结束方式
enum PumpExit {
    /// 主动关闭
    Cancelled,
    /// 服务器关闭或出错
    Closed(Option<String>),
}

/// 丢弃断线前未发出的帧，返回丢弃数量
fn discard_queued(outgoing: &mut mpsc::UnboundedReceiver<String>) -> usize {
    let mut dropped = 0;
    while outgoing.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}

async fn run_connection(
    url: Url,
    policy: ReconnectPolicy,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    events: async_channel::Sender<SocketEvent>,
) {
    // 连续失败次数：连接失败和短命连接都计数
    let mut attempt = 0u32;

    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((stream, _response)) => {
                let dropped = discard_queued(&mut outgoing);
                if dropped > 0 {
                    debug!(dropped, "丢弃断线前未发出的帧");
                }
                open.store(true, Ordering::SeqCst);
                let opened_at = Instant::now();
                debug!(path = url.path(), attempt, "WebSocket 已连接");
                if events.send(SocketEvent::Opened).await.is_err() {
                    break;
                }

                let (mut sink, mut source) = stream.split();
                let exit = loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = sink.send(Message::Close(None)).await;
                            break PumpExit::Cancelled;
                        }
                        Some(text) = outgoing.recv() => {
                            if let Err(e) = sink.send(Message::text(text)).await {
                                break PumpExit::Closed(Some(e.to_string()));
                            }
                        }
                        incoming = source.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                let frame = SocketEvent::Frame(text.as_str().to_owned());
                                if events.send(frame).await.is_err() {
                                    break PumpExit::Cancelled;
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                break PumpExit::Closed(frame.map(|f| f.reason.as_str().to_owned()));
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => break PumpExit::Closed(Some(e.to_string())),
                            None => break PumpExit::Closed(None),
                        }
                    }
                };

                open.store(false, Ordering::SeqCst);
                match exit {
                    PumpExit::Cancelled => break,
                    PumpExit::Closed(reason) => {
                        let lived = opened_at.elapsed();
                        if lived >= policy.stable_after() {
                            attempt = 0;
                        }
                        warn!(
                            path = url.path(),
                            reason = ?reason,
                            lived_ms = lived.as_millis() as u64,
                            "WebSocket 连接断开"
                        );
                        if events.send(SocketEvent::Closed { reason }).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(path = url.path(), error = %e, "WebSocket 连接失败");
                if events.send(SocketEvent::Error(e.to_string())).await.is_err() {
                    break;
                }
            }
        }

        if !policy.allows(attempt) {
            warn!(path = url.path(), attempt, "WebSocket 重连次数用尽，依赖轮询兜底");
            break;
        }
        attempt += 1;
        let delay = policy.backoff(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "等待重连");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    open.store(false, Ordering::SeqCst);
    debug!(path = url.path(), "WebSocket 连接任务结束");
}
