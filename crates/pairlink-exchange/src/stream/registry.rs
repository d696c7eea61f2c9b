//! 채널 구독 레지스트리.
//!
//! 채널 키마다 콜백 집합과 서버 측 구독 상태를 보관합니다. 레지스트리는
//! 프레임을 보내지 않으며, 언제 구독/해제 프레임이 필요한지는 반환값을
//! 보고 호출자(이벤트 루프)가 결정합니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use pairlink_core::ChannelKey;
use serde_json::Value;

/// 채널로 전달되는 메시지.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    /// 메시지가 속한 채널
    pub key: ChannelKey,
    /// 프레임의 `data` 필드 원문
    pub data: Value,
}

type HandlerFn = dyn Fn(&ChannelMessage) + Send + Sync;

/// 채널 콜백.
///
/// 동일성은 포인터로 판단합니다. 같은 핸들러를 두 번 등록해도 한 번만
/// 호출되며, 해제할 때는 등록에 사용한 핸들러(또는 그 clone)를 넘겨야
/// 합니다.
#[derive(Clone)]
pub struct ChannelHandler(Arc<HandlerFn>);

impl ChannelHandler {
    /// 클로저로 핸들러를 생성합니다.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// 핸들러를 호출합니다.
    pub fn call(&self, message: &ChannelMessage) {
        (self.0)(message)
    }
}

impl PartialEq for ChannelHandler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ChannelHandler {}

impl fmt::Debug for ChannelHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelHandler({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// 서버 측 구독 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// 구독 요청을 보냈거나 보낼 예정
    Pending,
    /// 서버가 구독을 확인함
    Active,
    /// 구독 실패 (거부, 타임아웃, 재연결 실패)
    Failed,
}

/// 채널 하나의 구독.
#[derive(Debug, Clone)]
pub struct Subscription {
    handlers: Vec<ChannelHandler>,
    state: SubscriptionState,
}

impl Subscription {
    fn new() -> Self {
        Self {
            handlers: Vec::new(),
            state: SubscriptionState::Pending,
        }
    }

    pub fn handlers(&self) -> &[ChannelHandler] {
        &self.handlers
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}

/// [`ChannelRegistry::register`] 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// 이 호출로 구독 항목이 새로 만들어졌는지
    pub is_new: bool,
    /// 핸들러가 실제로 추가되었는지 (이미 있으면 false)
    pub added: bool,
}

/// [`ChannelRegistry::unregister`] 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unregistration {
    /// 핸들러가 실제로 제거되었는지
    pub removed: bool,
    /// 제거 후 콜백 집합이 비었는지
    pub is_empty: bool,
}

/// 외부에 노출하는 구독 요약.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub key: ChannelKey,
    pub state: SubscriptionState,
    pub handler_count: usize,
}

/// 채널 키별 구독 저장소.
///
/// 항목은 삽입 순서대로 유지되며 재연결 시 같은 순서로 다시 구독합니다.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    entries: HashMap<ChannelKey, Subscription>,
    order: Vec<ChannelKey>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 핸들러를 등록합니다.
    pub fn register(&mut self, key: ChannelKey, handler: ChannelHandler) -> Registration {
        let is_new = !self.entries.contains_key(&key);
        if is_new {
            self.order.push(key.clone());
        }

        let entry = self.entries.entry(key).or_insert_with(Subscription::new);
        let added = !entry.handlers.contains(&handler);
        if added {
            entry.handlers.push(handler);
        }

        Registration { is_new, added }
    }

    /// 핸들러를 제거합니다.
    ///
    /// 콜백 집합이 비어도 항목은 남겨 둡니다. 서버 쪽 구독 해제가 끝난 뒤
    /// [`remove`](Self::remove)로 정리합니다.
    pub fn unregister(&mut self, key: &ChannelKey, handler: &ChannelHandler) -> Unregistration {
        match self.entries.get_mut(key) {
            Some(entry) => {
                let before = entry.handlers.len();
                entry.handlers.retain(|h| h != handler);
                Unregistration {
                    removed: entry.handlers.len() != before,
                    is_empty: entry.handlers.is_empty(),
                }
            }
            None => Unregistration {
                removed: false,
                is_empty: true,
            },
        }
    }

    pub fn get(&self, key: &ChannelKey) -> Option<&Subscription> {
        self.entries.get(key)
    }

    pub fn state(&self, key: &ChannelKey) -> Option<SubscriptionState> {
        self.entries.get(key).map(Subscription::state)
    }

    pub fn set_state(&mut self, key: &ChannelKey, state: SubscriptionState) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.state = state;
        }
    }

    /// 항목을 삭제합니다.
    pub fn remove(&mut self, key: &ChannelKey) -> Option<Subscription> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    /// 서버가 확인한 채널 목록을 삽입 순서로 반환합니다.
    pub fn active_keys(&self) -> Vec<ChannelKey> {
        self.keys_in_state(SubscriptionState::Active)
    }

    pub fn keys_in_state(&self, state: SubscriptionState) -> Vec<ChannelKey> {
        self.order
            .iter()
            .filter(|key| self.state(key) == Some(state))
            .cloned()
            .collect()
    }

    /// 모든 항목을 `Failed`로 표시합니다. 콜백은 유지됩니다.
    pub fn fail_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.state = SubscriptionState::Failed;
        }
    }

    /// 콜백이 없는 항목을 삭제하고 그 키를 반환합니다.
    pub fn remove_empty(&mut self) -> Vec<ChannelKey> {
        let empty: Vec<ChannelKey> = self
            .order
            .iter()
            .filter(|key| self.entries.get(*key).is_some_and(Subscription::is_empty))
            .cloned()
            .collect();
        for key in &empty {
            self.remove(key);
        }
        empty
    }

    /// 구독 요약을 삽입 순서로 반환합니다.
    pub fn snapshot(&self) -> Vec<SubscriptionInfo> {
        self.order
            .iter()
            .filter_map(|key| {
                self.entries.get(key).map(|entry| SubscriptionInfo {
                    key: key.clone(),
                    state: entry.state,
                    handler_count: entry.handlers.len(),
                })
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
