//! 실시간 스트림 클라이언트 핸들.

use std::sync::Arc;
use std::time::Duration;

use pairlink_core::{ChannelKey, StreamConfig};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::actor::{Command, StreamActor};
use super::connection::{ConnectionManager, ConnectionState, TungsteniteConnector};
use super::driver::SubscriptionDriver;
use super::registry::{ChannelHandler, SubscriptionInfo};
use crate::{Connector, ExchangeError, ExchangeResult};

/// 연결 수명 이벤트.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// 연결 열림 (재연결 포함)
    Open,
    /// 연결 닫힘 또는 끊김
    Close,
    /// 재연결 예약
    Reconnecting { attempt: u32, delay: Duration },
    /// 연결/프로토콜 에러
    Error(String),
    /// 자동 재구독 실패. 콜백은 유지되며 다시 구독하면 재시도합니다.
    SubscriptionFailed { key: ChannelKey, reason: String },
}

/// 실시간 스트림 핸들.
///
/// clone해도 같은 연결과 레지스트리를 공유합니다. 모든 핸들이 drop되거나
/// [`close`](Self::close)가 호출되면 이벤트 루프가 종료됩니다.
#[derive(Clone)]
pub struct StreamClient {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<StreamEvent>,
    state: watch::Receiver<ConnectionState>,
}

impl StreamClient {
    /// WebSocket URL로 클라이언트를 생성합니다. 연결은 [`open`](Self::open)에서 시작됩니다.
    ///
    /// tokio 런타임 안에서 호출해야 합니다.
    pub fn new(url: impl Into<String>, api_key: Option<String>, config: &StreamConfig) -> Self {
        Self::with_connector(Arc::new(TungsteniteConnector::new(url, api_key)), config)
    }

    /// 임의의 커넥터로 클라이언트를 생성합니다.
    pub fn with_connector(connector: Arc<dyn Connector>, config: &StreamConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let connection = ConnectionManager::new(
            connector,
            config.reconnect.clone(),
            config.connect_timeout(),
        );
        let state = connection.watch_state();
        let actor = StreamActor::new(
            command_rx,
            connection,
            SubscriptionDriver::new(config.ack_timeout()),
            events.clone(),
            config.heartbeat_interval(),
        );
        tokio::spawn(actor.run());

        Self {
            commands,
            events,
            state,
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> ExchangeResult<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| ExchangeError::Closed)?;
        rx.await.map_err(|_| ExchangeError::Closed)
    }

    /// 연결을 엽니다. 한 번만 시도하며, 성공하면 `Open` 이벤트가 발생합니다.
    pub async fn open(&self) -> ExchangeResult<()> {
        self.request(|reply| Command::Open { reply }).await?
    }

    /// 채널에 핸들러를 등록합니다.
    ///
    /// 채널의 첫 핸들러이면 구독 프레임을 보내고 서버 응답을 기다립니다.
    /// 이미 확인된 채널이면 프레임 없이 바로 성공합니다.
    pub async fn subscribe(&self, key: ChannelKey, handler: &ChannelHandler) -> ExchangeResult<()> {
        let handler = handler.clone();
        self.request(|reply| Command::Subscribe {
            key,
            handler,
            reply,
        })
        .await?
    }

    /// 채널에서 핸들러를 제거합니다.
    ///
    /// 마지막 핸들러가 제거되면 구독 해제 프레임을 보냅니다. 등록되지 않은
    /// 핸들러면 아무 일도 하지 않습니다.
    pub async fn unsubscribe(&self, key: ChannelKey, handler: &ChannelHandler) -> ExchangeResult<()> {
        let handler = handler.clone();
        self.request(|reply| Command::Unsubscribe {
            key,
            handler,
            reply,
        })
        .await?
    }

    /// 현재 구독 목록.
    pub async fn subscriptions(&self) -> ExchangeResult<Vec<SubscriptionInfo>> {
        self.request(|reply| Command::Subscriptions { reply }).await
    }

    /// 연결을 닫습니다. 이후 모든 요청은 `Closed`로 실패합니다.
    pub async fn close(&self) {
        // 이미 종료된 경우 무시
        let _ = self.request(|reply| Command::Close { reply }).await;
    }

    /// 연결 이벤트를 구독합니다.
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// 현재 연결 상태.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// 연결 상태 변경을 관찰합니다.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("state", &self.connection_state())
            .finish_non_exhaustive()
    }
}
