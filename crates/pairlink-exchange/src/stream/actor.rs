//! 스트림 이벤트 루프.
//!
//! 하나의 태스크가 연결, 레지스트리, 요청 드라이버를 모두 소유합니다.
//! 호출자 명령, 수신 프레임, 응답 타임아웃, 재연결 타이머, heartbeat가
//! 모두 같은 `select!` 루프에서 처리되므로 상태 변경은 순차적입니다.

use std::time::Duration;

use futures::future;
use pairlink_core::ChannelKey;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::client::StreamEvent;
use super::connection::{ConnectionManager, ConnectionState, Recovery};
use super::dispatcher;
use super::driver::{Admission, PendingRequest, SubscriptionDriver, Waiter};
use super::protocol::{self, ControlFrame, ControlOp, InboundFrame};
use super::registry::{ChannelHandler, ChannelRegistry, SubscriptionInfo, SubscriptionState};
use crate::{ExchangeError, ExchangeResult, WireMessage};

/// 핸들에서 이벤트 루프로 보내는 명령.
pub(crate) enum Command {
    Open {
        reply: oneshot::Sender<ExchangeResult<()>>,
    },
    Subscribe {
        key: ChannelKey,
        handler: ChannelHandler,
        reply: Waiter,
    },
    Unsubscribe {
        key: ChannelKey,
        handler: ChannelHandler,
        reply: Waiter,
    },
    Subscriptions {
        reply: oneshot::Sender<Vec<SubscriptionInfo>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

enum Wake {
    Command(Option<Command>),
    Inbound(Option<ExchangeResult<WireMessage>>),
    AckDeadline,
    Reconnect,
    Heartbeat,
}

pub(crate) struct StreamActor {
    commands: mpsc::UnboundedReceiver<Command>,
    connection: ConnectionManager,
    registry: ChannelRegistry,
    driver: SubscriptionDriver,
    events: broadcast::Sender<StreamEvent>,
    heartbeat: Option<Duration>,
    reconnect_at: Option<Instant>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn tick_opt(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

impl StreamActor {
    pub(crate) fn new(
        commands: mpsc::UnboundedReceiver<Command>,
        connection: ConnectionManager,
        driver: SubscriptionDriver,
        events: broadcast::Sender<StreamEvent>,
        heartbeat: Option<Duration>,
    ) -> Self {
        Self {
            commands,
            connection,
            registry: ChannelRegistry::new(),
            driver,
            events,
            heartbeat,
            reconnect_at: None,
        }
    }

    /// 루프를 실행합니다. `close()` 또는 모든 핸들이 drop되면 끝납니다.
    pub(crate) async fn run(mut self) {
        let mut heartbeat = self.heartbeat.map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let ack_deadline = self.driver.next_deadline();
            let reconnect_at = self.reconnect_at;

            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                message = self.connection.next_message() => Wake::Inbound(message),
                _ = sleep_until_opt(ack_deadline) => Wake::AckDeadline,
                _ = sleep_until_opt(reconnect_at) => Wake::Reconnect,
                _ = tick_opt(heartbeat.as_mut()) => Wake::Heartbeat,
            };

            match wake {
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Command(None) => {
                    debug!("All stream handles dropped, shutting down");
                    self.shutdown().await;
                }
                Wake::Inbound(Some(Ok(message))) => self.handle_message(message).await,
                Wake::Inbound(Some(Err(e))) => self.handle_disconnect(&e.to_string()),
                Wake::Inbound(None) => self.handle_disconnect("transport stream ended"),
                Wake::AckDeadline => self.expire_requests().await,
                Wake::Reconnect => {
                    self.reconnect_at = None;
                    // 실패 시 다음 시도는 이미 예약됨
                    let _ = self.reconnect().await;
                }
                Wake::Heartbeat => self.send_ping().await,
            }

            if self.connection.state() == ConnectionState::Closed {
                break;
            }
        }

        debug!("Stream event loop stopped");
    }

    fn emit(&self, event: StreamEvent) {
        // 수신자가 없으면 버림
        let _ = self.events.send(event);
    }

    // ========================================================================
    // 명령 처리
    // ========================================================================

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open { reply } => {
                let result = self.open().await;
                let _ = reply.send(result);
            }
            Command::Subscribe {
                key,
                handler,
                reply,
            } => self.subscribe(key, handler, reply).await,
            Command::Unsubscribe {
                key,
                handler,
                reply,
            } => self.unsubscribe(key, handler, reply).await,
            Command::Subscriptions { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::Close { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    async fn open(&mut self) -> ExchangeResult<()> {
        let state = self.connection.state();
        match state {
            ConnectionState::Open => Ok(()),
            ConnectionState::Closed => Err(ExchangeError::Closed),
            ConnectionState::Reconnecting => {
                self.reconnect_at = None;
                self.reconnect().await
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                match self.connection.open().await {
                    Ok(()) => {
                        self.on_open().await;
                        Ok(())
                    }
                    Err(e) => {
                        self.emit(StreamEvent::Error(e.to_string()));
                        Err(e)
                    }
                }
            }
        }
    }

    async fn subscribe(&mut self, key: ChannelKey, handler: ChannelHandler, reply: Waiter) {
        let state = self.connection.state();
        match state {
            ConnectionState::Closed => {
                let _ = reply.send(Err(ExchangeError::Closed));
                return;
            }
            ConnectionState::Disconnected => {
                let _ = reply.send(Err(ExchangeError::NotConnected));
                return;
            }
            _ => {}
        }

        let registration = self.registry.register(key.clone(), handler);
        debug!(
            channel = %key,
            is_new = registration.is_new,
            added = registration.added,
            "Registered channel handler"
        );

        let busy = self.driver.is_busy(&key);
        match self.registry.state(&key) {
            Some(SubscriptionState::Active) if !busy => {
                let _ = reply.send(Ok(()));
                return;
            }
            Some(SubscriptionState::Failed) if !busy => {
                self.registry.set_state(&key, SubscriptionState::Pending);
            }
            _ => {}
        }

        if let Admission::Start(frame) =
            self.driver.submit(key.clone(), ControlOp::Subscribe, Some(reply))
        {
            self.send_control(&key, frame).await;
        }
    }

    async fn unsubscribe(&mut self, key: ChannelKey, handler: ChannelHandler, reply: Waiter) {
        if self.connection.state() == ConnectionState::Closed {
            let _ = reply.send(Err(ExchangeError::Closed));
            return;
        }

        let outcome = self.registry.unregister(&key, &handler);
        if !outcome.removed || !outcome.is_empty {
            let _ = reply.send(Ok(()));
            return;
        }

        if self.driver.is_busy(&key) {
            self.driver.submit(key, ControlOp::Unsubscribe, Some(reply));
            return;
        }

        let state = self.registry.state(&key);
        if state == Some(SubscriptionState::Active) {
            if let Admission::Start(frame) =
                self.driver.submit(key.clone(), ControlOp::Unsubscribe, Some(reply))
            {
                self.send_control(&key, frame).await;
            }
        } else {
            // 서버에 구독되어 있지 않으므로 프레임 없이 정리
            self.registry.remove(&key);
            let _ = reply.send(Ok(()));
        }
    }

    async fn shutdown(&mut self) {
        self.reconnect_at = None;
        self.connection.close().await;
        self.driver.fail_all(Err(ExchangeError::Closed));
        self.registry.clear();
        self.emit(StreamEvent::Close);
    }

    // ========================================================================
    // 제어 프레임
    // ========================================================================

    async fn send_control(&mut self, key: &ChannelKey, frame: ControlFrame) {
        match self
            .connection
            .send(WireMessage::Text(frame.to_text()))
            .await
        {
            Ok(()) => {
                debug!(channel = %key, op = %frame.op, id = frame.id, "Sent control frame");
                self.driver.mark_sent(key, Instant::now());
            }
            Err(ExchangeError::NotConnected) => {
                debug!(channel = %key, op = %frame.op, "Connection not open, control frame deferred");
            }
            Err(e) => {
                // 송신이 막힌 연결은 끊긴 것으로 보고 재연결 후 다시 보냄
                warn!(channel = %key, op = %frame.op, error = %e, "Failed to send control frame");
                self.handle_disconnect(&e.to_string());
            }
        }
    }

    /// 요청을 끝내고 레지스트리 상태를 갱신한 뒤 대기 중인 다음 요청을 진행합니다.
    async fn complete(&mut self, request: PendingRequest, result: ExchangeResult<()>) {
        let key = request.key.clone();
        match request.op {
            ControlOp::Subscribe => match &result {
                Ok(()) => {
                    debug!(channel = %key, replay = request.replay, "Subscription active");
                    self.registry.set_state(&key, SubscriptionState::Active);
                }
                Err(e) => {
                    warn!(channel = %key, replay = request.replay, error = %e, "Subscription failed");
                    self.registry.set_state(&key, SubscriptionState::Failed);
                    if request.replay {
                        self.emit(StreamEvent::SubscriptionFailed {
                            key: key.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            },
            ControlOp::Unsubscribe => {
                if let Err(e) = &result {
                    warn!(channel = %key, error = %e, "Unsubscribe not confirmed, dropping channel");
                }
                let empty = self.registry.get(&key).map_or(true, |entry| entry.is_empty());
                if empty {
                    self.registry.remove(&key);
                } else {
                    self.registry.set_state(&key, SubscriptionState::Pending);
                }
            }
        }

        request.settle(result);
        self.advance_queue(&key).await;
    }

    async fn advance_queue(&mut self, key: &ChannelKey) {
        while let Some(queued) = self.driver.next_queued(key) {
            let entry = self.registry.get(key);
            let empty = entry.map_or(true, |entry| entry.is_empty());
            let active = entry.is_some_and(|entry| entry.state() == SubscriptionState::Active);

            let needed = match queued.op {
                ControlOp::Subscribe => entry.is_some() && !empty && !active,
                ControlOp::Unsubscribe => entry.is_some() && empty && active,
            };

            if !needed {
                if queued.op == ControlOp::Unsubscribe && entry.is_some() && empty {
                    self.registry.remove(key);
                }
                queued.settle(Ok(()));
                continue;
            }

            if queued.op == ControlOp::Subscribe {
                self.registry.set_state(key, SubscriptionState::Pending);
            }
            let frame = self.driver.start_queued(key.clone(), queued);
            self.send_control(key, frame).await;
            break;
        }
    }

    async fn expire_requests(&mut self) {
        for request in self.driver.take_expired(Instant::now()) {
            warn!(
                channel = %request.key,
                op = %request.op,
                id = request.id,
                timeout_ms = self.driver.ack_timeout().as_millis() as u64,
                "No acknowledgement before timeout"
            );
            let err = ExchangeError::SubscriptionTimeout(request.key.to_string());
            self.complete(request, Err(err)).await;
        }
    }

    // ========================================================================
    // 수신 프레임
    // ========================================================================

    async fn handle_message(&mut self, message: WireMessage) {
        match message {
            WireMessage::Text(text) => match protocol::parse_inbound(&text) {
                Ok(frame) => self.handle_frame(frame).await,
                Err(e) => warn!(error = %e, "Failed to parse stream frame"),
            },
            WireMessage::Ping(data) => {
                if let Err(e) = self.connection.send(WireMessage::Pong(data)).await {
                    debug!(error = %e, "Failed to answer ping");
                }
            }
            WireMessage::Pong(_) => debug!("Received pong"),
        }
    }

    async fn handle_frame(&mut self, frame: InboundFrame) {
        match frame {
            InboundFrame::Data { key, data } => {
                dispatcher::dispatch(&self.registry, &key, data);
            }
            InboundFrame::Ack { op, key, id } => match self.driver.resolve(op, &key, id) {
                Some(request) => self.complete(request, Ok(())).await,
                None => debug!(channel = %key, op = %op, ?id, "Ignoring stale acknowledgement"),
            },
            InboundFrame::Error {
                key, id, reason, ..
            } => match self.driver.reject(key.as_ref(), id) {
                Some(request) => {
                    let err = ExchangeError::SubscriptionRejected(reason);
                    self.complete(request, Err(err)).await;
                }
                None => {
                    warn!(%reason, "Unmatched stream error frame");
                    self.emit(StreamEvent::Error(reason));
                }
            },
            InboundFrame::Unknown => debug!("Ignoring unrecognized frame"),
        }
    }

    async fn send_ping(&mut self) {
        if self.connection.state() != ConnectionState::Open {
            return;
        }
        if let Err(e) = self.connection.send(WireMessage::Ping(Vec::new())).await {
            debug!(error = %e, "Failed to send ping");
        }
    }

    // ========================================================================
    // 연결 수명
    // ========================================================================

    fn handle_disconnect(&mut self, reason: &str) {
        if self.connection.state() != ConnectionState::Open {
            return;
        }
        warn!(reason, "Stream connection lost");
        self.driver.mark_all_unsent();
        self.emit(StreamEvent::Close);
        self.schedule_recovery();
    }

    fn schedule_recovery(&mut self) {
        match self.connection.connection_lost() {
            Recovery::Retry { attempt, delay } => {
                self.reconnect_at = Some(Instant::now() + delay);
                self.emit(StreamEvent::Reconnecting { attempt, delay });
            }
            Recovery::Exhausted => {
                self.reconnect_at = None;
                let failed: Vec<ChannelKey> = self
                    .registry
                    .snapshot()
                    .into_iter()
                    .filter(|info| info.handler_count > 0)
                    .map(|info| info.key)
                    .collect();

                self.registry.fail_all();
                self.registry.remove_empty();
                self.driver.fail_all(Err(ExchangeError::NotConnected));

                self.emit(StreamEvent::Error(
                    "reconnect attempts exhausted".to_string(),
                ));
                for key in failed {
                    self.emit(StreamEvent::SubscriptionFailed {
                        key,
                        reason: "reconnect attempts exhausted".to_string(),
                    });
                }
            }
            Recovery::Closed => {}
        }
    }

    async fn reconnect(&mut self) -> ExchangeResult<()> {
        match self.connection.reconnect().await {
            Ok(()) => {
                self.on_open().await;
                Ok(())
            }
            Err(ExchangeError::Closed) => Err(ExchangeError::Closed),
            Err(e) => {
                self.schedule_recovery();
                Err(e)
            }
        }
    }

    /// 연결이 열린 직후 처리.
    ///
    /// 새 세션에는 서버 측 구독이 없으므로 진행 중이던 구독 해제는 성공으로
    /// 끝내고, 진행 중이던 구독은 다시 보내며, 확인된 채널은 삽입 순서대로
    /// 다시 구독합니다.
    async fn on_open(&mut self) {
        self.emit(StreamEvent::Open);

        for key in self.driver.pending_keys() {
            if self.connection.state() != ConnectionState::Open {
                return;
            }
            let op = match self.driver.pending(&key) {
                Some(request) => request.op,
                None => continue,
            };
            match op {
                ControlOp::Unsubscribe => {
                    if let Some(request) = self.driver.take(&key) {
                        self.complete(request, Ok(())).await;
                    }
                }
                ControlOp::Subscribe => {
                    let frame = self.driver.pending(&key).map(PendingRequest::frame);
                    if let Some(frame) = frame {
                        self.send_control(&key, frame).await;
                    }
                }
            }
        }

        let replay: Vec<ChannelKey> = self
            .registry
            .active_keys()
            .into_iter()
            .filter(|key| !self.driver.is_busy(key))
            .collect();
        if !replay.is_empty() {
            info!(count = replay.len(), "Restoring subscriptions");
        }
        for key in replay {
            // 재구독 중 다시 끊기면 나머지는 다음 연결에서 처리
            if self.connection.state() != ConnectionState::Open {
                break;
            }
            let frame = self
                .driver
                .start(key.clone(), ControlOp::Subscribe, true, Vec::new());
            self.send_control(&key, frame).await;
        }
    }
}
