//! 구독 요청 추적.
//!
//! 채널 키마다 응답을 기다리는 요청은 최대 하나입니다. 같은 종류의 요청이
//! 겹치면 대기자만 합류하고, 다른 종류의 요청은 키별 큐에 쌓였다가 앞선
//! 요청이 끝난 뒤 순서대로 처리됩니다.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use pairlink_core::ChannelKey;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::protocol::{ControlFrame, ControlOp};
use crate::ExchangeResult;

/// 요청 결과를 기다리는 호출자.
pub type Waiter = oneshot::Sender<ExchangeResult<()>>;

fn settle_all(waiters: Vec<Waiter>, result: &ExchangeResult<()>) {
    for waiter in waiters {
        // 호출자가 이미 포기한 경우 무시
        let _ = waiter.send(result.clone());
    }
}

/// 응답을 기다리는 제어 요청.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: u64,
    pub key: ChannelKey,
    pub op: ControlOp,
    /// 재연결 후 자동 재구독 요청인지
    pub replay: bool,
    waiters: Vec<Waiter>,
    sent_at: Option<Instant>,
}

impl PendingRequest {
    /// 이 요청의 제어 프레임.
    pub fn frame(&self) -> ControlFrame {
        ControlFrame::new(self.op, &self.key, self.id)
    }

    /// 실제로 전송되었는지 (타임아웃 타이머가 동작 중인지).
    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// 모든 대기자에게 결과를 전달합니다.
    pub fn settle(self, result: ExchangeResult<()>) {
        settle_all(self.waiters, &result);
    }
}

/// 앞선 요청이 끝나기를 기다리는 요청.
#[derive(Debug)]
pub struct QueuedRequest {
    pub op: ControlOp,
    waiters: Vec<Waiter>,
}

impl QueuedRequest {
    pub fn settle(self, result: ExchangeResult<()>) {
        settle_all(self.waiters, &result);
    }

    fn into_waiters(self) -> Vec<Waiter> {
        self.waiters
    }
}

/// [`SubscriptionDriver::submit`] 결과.
#[derive(Debug)]
pub enum Admission {
    /// 새 요청이 시작됨. 프레임을 전송해야 합니다.
    Start(ControlFrame),
    /// 진행 중인 같은 종류 요청에 합류함
    Joined,
    /// 앞선 요청 뒤에 대기함
    Queued,
}

/// 제어 요청 상태 머신.
#[derive(Debug)]
pub struct SubscriptionDriver {
    pending: HashMap<ChannelKey, PendingRequest>,
    queued: HashMap<ChannelKey, VecDeque<QueuedRequest>>,
    next_id: u64,
    ack_timeout: Duration,
}

impl SubscriptionDriver {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            queued: HashMap::new(),
            next_id: 1,
            ack_timeout,
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// 키에 진행 중인 요청이 있는지 확인합니다.
    pub fn is_busy(&self, key: &ChannelKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending(&self, key: &ChannelKey) -> Option<&PendingRequest> {
        self.pending.get(key)
    }

    /// 요청을 접수합니다.
    pub fn submit(&mut self, key: ChannelKey, op: ControlOp, waiter: Option<Waiter>) -> Admission {
        if let Some(pending) = self.pending.get_mut(&key) {
            let queue = self.queued.entry(key).or_default();
            match queue.back_mut() {
                Some(last) if last.op == op => {
                    last.waiters.extend(waiter);
                    return Admission::Joined;
                }
                None if pending.op == op => {
                    pending.waiters.extend(waiter);
                    return Admission::Joined;
                }
                _ => {}
            }
            queue.push_back(QueuedRequest {
                op,
                waiters: waiter.into_iter().collect(),
            });
            return Admission::Queued;
        }

        Admission::Start(self.start(key, op, false, waiter.into_iter().collect()))
    }

    /// 새 요청을 진행 중으로 등록하고 프레임을 반환합니다.
    ///
    /// 키에 진행 중인 요청이 없어야 합니다.
    pub fn start(
        &mut self,
        key: ChannelKey,
        op: ControlOp,
        replay: bool,
        waiters: Vec<Waiter>,
    ) -> ControlFrame {
        let id = self.next_id;
        self.next_id += 1;

        let request = PendingRequest {
            id,
            key: key.clone(),
            op,
            replay,
            waiters,
            sent_at: None,
        };
        let frame = request.frame();
        self.pending.insert(key, request);
        frame
    }

    /// 큐에서 꺼낸 요청을 시작합니다.
    pub fn start_queued(&mut self, key: ChannelKey, queued: QueuedRequest) -> ControlFrame {
        let op = queued.op;
        self.start(key, op, false, queued.into_waiters())
    }

    /// 프레임 전송을 기록하고 타임아웃 타이머를 시작합니다.
    pub fn mark_sent(&mut self, key: &ChannelKey, now: Instant) {
        if let Some(request) = self.pending.get_mut(key) {
            request.sent_at = Some(now);
        }
    }

    /// 연결이 끊긴 경우 전송 기록을 지웁니다. 재연결 후 다시 전송됩니다.
    pub fn mark_all_unsent(&mut self) {
        for request in self.pending.values_mut() {
            request.sent_at = None;
        }
    }

    /// 응답과 일치하는 요청을 꺼냅니다.
    ///
    /// 응답에 `id`가 있으면 진행 중인 요청의 id와 같아야 합니다.
    /// 일치하지 않는 응답(이전 요청에 대한 늦은 응답)은 `None`입니다.
    pub fn resolve(
        &mut self,
        op: ControlOp,
        key: &ChannelKey,
        id: Option<u64>,
    ) -> Option<PendingRequest> {
        let matches = self
            .pending
            .get(key)
            .is_some_and(|request| request.op == op && id.map_or(true, |id| id == request.id));
        if matches {
            self.pending.remove(key)
        } else {
            None
        }
    }

    /// 에러 응답과 일치하는 요청을 꺼냅니다. 키로 먼저 찾고, 없으면 id로 찾습니다.
    pub fn reject(&mut self, key: Option<&ChannelKey>, id: Option<u64>) -> Option<PendingRequest> {
        if let Some(key) = key {
            let matches = self
                .pending
                .get(key)
                .is_some_and(|request| id.map_or(true, |id| id == request.id));
            if matches {
                return self.pending.remove(key);
            }
        }

        let id = id?;
        let key = self
            .pending
            .iter()
            .find(|(_, request)| request.id == id)
            .map(|(key, _)| key.clone())?;
        self.pending.remove(&key)
    }

    /// 진행 중인 요청을 꺼냅니다.
    pub fn take(&mut self, key: &ChannelKey) -> Option<PendingRequest> {
        self.pending.remove(key)
    }

    /// 키의 다음 대기 요청을 꺼냅니다.
    pub fn next_queued(&mut self, key: &ChannelKey) -> Option<QueuedRequest> {
        let queue = self.queued.get_mut(key)?;
        let next = queue.pop_front();
        if queue.is_empty() {
            self.queued.remove(key);
        }
        next
    }

    /// 가장 빠른 타임아웃 시각.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .filter_map(|request| request.sent_at)
            .min()
            .map(|sent_at| sent_at + self.ack_timeout)
    }

    /// 타임아웃된 요청을 꺼냅니다.
    pub fn take_expired(&mut self, now: Instant) -> Vec<PendingRequest> {
        let timeout = self.ack_timeout;
        let mut expired: Vec<ChannelKey> = self
            .pending
            .iter()
            .filter(|(_, request)| request.sent_at.is_some_and(|sent_at| sent_at + timeout <= now))
            .map(|(key, _)| key.clone())
            .collect();
        expired.sort_by_key(|key| self.pending.get(key).map(|request| request.id));

        expired
            .into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .collect()
    }

    /// 진행 중인 요청의 키를 요청 순서대로 반환합니다.
    pub fn pending_keys(&self) -> Vec<ChannelKey> {
        let mut requests: Vec<&PendingRequest> = self.pending.values().collect();
        requests.sort_by_key(|request| request.id);
        requests.into_iter().map(|request| request.key.clone()).collect()
    }

    /// 모든 요청을 비우고 대기자를 반환합니다.
    pub fn drain(&mut self) -> Vec<Waiter> {
        let mut waiters: Vec<Waiter> = self
            .pending
            .drain()
            .flat_map(|(_, request)| request.waiters)
            .collect();
        for (_, queue) in self.queued.drain() {
            waiters.extend(queue.into_iter().flat_map(QueuedRequest::into_waiters));
        }
        waiters
    }

    /// 모든 요청을 주어진 결과로 끝냅니다.
    pub fn fail_all(&mut self, result: ExchangeResult<()>) {
        settle_all(self.drain(), &result);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
