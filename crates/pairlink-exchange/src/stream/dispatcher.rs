//! 채널 데이터 전달.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use pairlink_core::ChannelKey;
use serde_json::Value;
use tracing::{debug, error};

use super::registry::{ChannelMessage, ChannelRegistry};

/// 데이터 프레임을 채널의 모든 핸들러에 전달합니다.
///
/// 호출된 핸들러 수를 반환합니다. 핸들러가 panic하면 로그를 남기고
/// 나머지 핸들러에는 계속 전달합니다. 구독이 없는 채널이면 0입니다.
pub fn dispatch(registry: &ChannelRegistry, key: &ChannelKey, data: Value) -> usize {
    let Some(subscription) = registry.get(key) else {
        debug!(channel = %key, "No subscription for data frame, dropping");
        return 0;
    };

    let message = ChannelMessage {
        key: key.clone(),
        data,
    };

    let mut delivered = 0;
    for handler in subscription.handlers() {
        match panic::catch_unwind(AssertUnwindSafe(|| handler.call(&message))) {
            Ok(()) => delivered += 1,
            Err(payload) => {
                error!(
                    channel = %key,
                    "Channel handler panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }
    delivered
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
