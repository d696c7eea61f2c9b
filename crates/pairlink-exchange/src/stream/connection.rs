//! 실시간 전송 연결 관리.
//!
//! 연결 상태 전이:
//! ```text
//! Disconnected -> Connecting -> Open -> (끊김) -> Reconnecting -> Open
//!                                          \-> (재시도 소진) -> Disconnected
//! 어느 상태든 close() -> Closed (종료 상태)
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use pairlink_core::ReconnectConfig;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::{Connector, ExchangeError, ExchangeResult, Link, WireMessage};

/// API 키 헤더 이름.
pub const API_KEY_HEADER: &str = "x-api-key";

/// 연결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// 연결이 끊긴 뒤의 다음 동작.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// `delay` 후 `attempt`번째 재연결 시도
    Retry { attempt: u32, delay: Duration },
    /// 재시도 횟수 소진
    Exhausted,
    /// 이미 종료됨
    Closed,
}

/// 단일 전송 연결의 수명을 관리합니다.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: ReconnectConfig,
    connect_timeout: Duration,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    link: Option<Link>,
    attempts: u32,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        policy: ReconnectConfig,
        connect_timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            policy,
            connect_timeout,
            state: ConnectionState::Disconnected,
            state_tx,
            link: None,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 상태 변경을 구독합니다.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Connection state changed");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    async fn connect(&mut self) -> ExchangeResult<()> {
        let link = tokio::time::timeout(self.connect_timeout, self.connector.connect())
            .await
            .map_err(|_| {
                ExchangeError::Timeout(format!(
                    "connect timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })??;
        self.link = Some(link);
        self.attempts = 0;
        self.set_state(ConnectionState::Open);
        Ok(())
    }

    /// 연결을 엽니다. 한 번만 시도합니다.
    pub async fn open(&mut self) -> ExchangeResult<()> {
        match self.state {
            ConnectionState::Closed => return Err(ExchangeError::Closed),
            ConnectionState::Open => return Ok(()),
            _ => {}
        }

        self.set_state(ConnectionState::Connecting);
        match self.connect().await {
            Ok(()) => {
                info!("Stream connection opened");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Stream connection failed");
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// 예약된 재연결을 시도합니다.
    pub async fn reconnect(&mut self) -> ExchangeResult<()> {
        if self.state == ConnectionState::Closed {
            return Err(ExchangeError::Closed);
        }
        self.set_state(ConnectionState::Reconnecting);
        match self.connect().await {
            Ok(()) => {
                info!("Stream connection re-established");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, attempt = self.attempts, "Reconnect attempt failed");
                Err(e)
            }
        }
    }

    /// 연결 끊김을 처리하고 다음 동작을 결정합니다.
    pub fn connection_lost(&mut self) -> Recovery {
        self.link = None;
        if self.state == ConnectionState::Closed {
            return Recovery::Closed;
        }

        self.attempts += 1;
        if self.attempts > self.policy.max_attempts {
            error!(
                attempts = self.policy.max_attempts,
                "Reconnect attempts exhausted"
            );
            self.attempts = 0;
            self.set_state(ConnectionState::Disconnected);
            return Recovery::Exhausted;
        }

        let delay = self.policy.delay_for(self.attempts);
        info!(
            attempt = self.attempts,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.set_state(ConnectionState::Reconnecting);
        Recovery::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// 프레임을 전송합니다.
    pub async fn send(&mut self, message: WireMessage) -> ExchangeResult<()> {
        match self.state {
            ConnectionState::Closed => Err(ExchangeError::Closed),
            ConnectionState::Open => match self.link.as_mut() {
                Some(link) => link.sink.send(message).await,
                None => Err(ExchangeError::NotConnected),
            },
            _ => Err(ExchangeError::NotConnected),
        }
    }

    /// 다음 수신 프레임을 기다립니다.
    ///
    /// 연결이 없으면 영원히 대기합니다. `None`은 연결이 끊겼음을 의미합니다.
    pub async fn next_message(&mut self) -> Option<ExchangeResult<WireMessage>> {
        match self.link.as_mut() {
            Some(link) => link.stream.next().await,
            None => future::pending().await,
        }
    }

    /// 연결을 닫습니다. 이후 모든 작업은 `Closed`로 실패합니다.
    pub async fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.sink.close().await {
                debug!(error = %e, "Error while closing stream transport");
            }
        }
        self.set_state(ConnectionState::Closed);
        info!("Stream connection closed");
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// tokio-tungstenite 커넥터
// ============================================================================

/// WebSocket 커넥터.
///
/// API 키가 있으면 핸드셰이크 요청에 [`API_KEY_HEADER`] (`x-api-key`) 헤더를 추가합니다.
#[derive(Clone)]
pub struct TungsteniteConnector {
    url: String,
    api_key: Option<String>,
}

impl TungsteniteConnector {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: url.into(),
            api_key,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Debug for TungsteniteConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TungsteniteConnector")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***REDACTED***"))
            .finish()
    }
}

impl From<WireMessage> for Message {
    fn from(message: WireMessage) -> Self {
        match message {
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Ping(data) => Message::Ping(data),
            WireMessage::Pong(data) => Message::Pong(data),
        }
    }
}

fn into_wire(message: Message) -> Option<WireMessage> {
    match message {
        Message::Text(text) => Some(WireMessage::Text(text)),
        Message::Binary(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Some(WireMessage::Text(text)),
            Err(_) => {
                debug!("Dropping non UTF-8 binary frame");
                None
            }
        },
        Message::Ping(data) => Some(WireMessage::Ping(data)),
        Message::Pong(data) => Some(WireMessage::Pong(data)),
        Message::Close(frame) => {
            debug!(?frame, "Received close frame");
            None
        }
        Message::Frame(_) => None,
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self) -> ExchangeResult<Link> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(api_key) = &self.api_key {
            let value = HeaderValue::from_str(api_key)
                .map_err(|e| ExchangeError::InvalidParameter(format!("api key: {}", e)))?;
            request.headers_mut().insert(API_KEY_HEADER, value);
        }

        debug!(url = %self.url, "Connecting to stream endpoint");
        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(ExchangeError::from)
            .with(|message: WireMessage| future::ready(Ok::<_, ExchangeError>(Message::from(message))));
        let stream = read.filter_map(|item| {
            future::ready(match item {
                Ok(message) => into_wire(message).map(Ok),
                Err(e) => Some(Err(ExchangeError::from(e))),
            })
        });

        Ok(Link::new(Box::pin(sink), Box::pin(stream)))
    }
}
