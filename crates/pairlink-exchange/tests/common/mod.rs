//! 통합 테스트용 메모리 전송 계층.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as pipe;
use futures::{SinkExt, StreamExt};
use pairlink_core::{ReconnectConfig, StreamConfig};
use pairlink_exchange::{
    ChannelHandler, ChannelMessage, Connector, ExchangeError, ExchangeResult, Link, StreamEvent,
    WireMessage,
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// 서버 쪽에서 본 연결 하나.
pub struct MockSession {
    outbound: pipe::UnboundedReceiver<WireMessage>,
    inbound: Option<pipe::UnboundedSender<ExchangeResult<WireMessage>>>,
}

impl MockSession {
    /// 클라이언트가 보낸 다음 텍스트 프레임 (ping/pong 제외).
    pub async fn next_frame(&mut self) -> Value {
        loop {
            let message = timeout(WAIT, self.outbound.next())
                .await
                .expect("timed out waiting for client frame")
                .expect("client closed the transport");
            if let WireMessage::Text(text) = message {
                return serde_json::from_str(&text).expect("client sent invalid JSON");
            }
        }
    }

    /// 클라이언트가 보낸 다음 메시지 원본.
    pub async fn next_message(&mut self) -> WireMessage {
        timeout(WAIT, self.outbound.next())
            .await
            .expect("timed out waiting for client message")
            .expect("client closed the transport")
    }

    /// 이미 도착한 텍스트 프레임이 있으면 반환합니다.
    pub fn try_frame(&mut self) -> Option<Value> {
        while let Ok(Some(message)) = self.outbound.try_next() {
            if let WireMessage::Text(text) = message {
                return serde_json::from_str(&text).ok();
            }
        }
        None
    }

    pub fn push_raw(&self, message: WireMessage) {
        if let Some(inbound) = &self.inbound {
            inbound
                .unbounded_send(Ok(message))
                .expect("client dropped the transport");
        }
    }

    pub fn push(&self, value: Value) {
        self.push_raw(WireMessage::Text(value.to_string()));
    }

    /// 제어 프레임을 그대로 돌려보내 확인합니다.
    pub fn ack(&self, frame: &Value) {
        self.push(frame.clone());
    }

    /// 제어 프레임을 에러로 거부합니다.
    pub fn reject(&self, frame: &Value, reason: &str) {
        let mut value = frame.clone();
        value["error"] = Value::String(reason.to_string());
        self.push(value);
    }

    /// 채널 데이터 프레임을 보냅니다.
    pub fn data(&self, channel: &str, params: Value, data: Value) {
        self.push(serde_json::json!({
            "channel": channel,
            "params": params,
            "data": data,
        }));
    }

    /// 수신은 열어둔 채 클라이언트의 송신만 막습니다.
    pub fn close_outbound(&mut self) {
        self.outbound.close();
    }

    /// 서버 쪽에서 연결을 끊습니다.
    pub fn disconnect(&mut self) {
        self.inbound.take();
    }
}

/// 연결 요청마다 [`MockSession`]을 만들어 테스트로 넘기는 커넥터.
pub struct MockConnector {
    sessions: mpsc::UnboundedSender<MockSession>,
    refusing: AtomicBool,
}

impl MockConnector {
    /// 이후 연결 시도를 모두 거부합니다.
    pub fn refuse(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> ExchangeResult<Link> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(ExchangeError::NetworkError("connection refused".into()));
        }

        let (out_tx, out_rx) = pipe::unbounded();
        let (in_tx, in_rx) = pipe::unbounded();
        self.sessions
            .send(MockSession {
                outbound: out_rx,
                inbound: Some(in_tx),
            })
            .map_err(|_| ExchangeError::NetworkError("mock server gone".into()))?;

        let sink = out_tx.sink_map_err(|e| ExchangeError::WebSocket(e.to_string()));
        Ok(Link::new(Box::pin(sink), Box::pin(in_rx)))
    }
}

/// 테스트가 새 연결을 받는 쪽.
pub struct MockServer {
    sessions: mpsc::UnboundedReceiver<MockSession>,
}

impl MockServer {
    pub async fn accept(&mut self) -> MockSession {
        timeout(WAIT, self.sessions.recv())
            .await
            .expect("timed out waiting for connection")
            .expect("connector dropped")
    }
}

pub fn mock_transport() -> (Arc<MockConnector>, MockServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector {
        sessions: tx,
        refusing: AtomicBool::new(false),
    });
    (connector, MockServer { sessions: rx })
}

/// 빠른 타이머를 가진 테스트 설정.
pub fn stream_config() -> StreamConfig {
    StreamConfig {
        ack_timeout_ms: 1_000,
        connect_timeout_ms: 1_000,
        heartbeat_interval_secs: 0,
        event_capacity: 64,
        reconnect: ReconnectConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
        },
    }
}

/// 받은 메시지를 채널로 넘기는 핸들러.
pub fn collector() -> (ChannelHandler, mpsc::UnboundedReceiver<ChannelMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = ChannelHandler::new(move |message| {
        let _ = tx.send(message.clone());
    });
    (handler, rx)
}

pub async fn next_message(rx: &mut mpsc::UnboundedReceiver<ChannelMessage>) -> ChannelMessage {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for channel message")
        .expect("handler dropped")
}

pub async fn next_event(rx: &mut broadcast::Receiver<StreamEvent>) -> StreamEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for stream event")
        .expect("event channel closed")
}
