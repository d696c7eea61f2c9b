//! 실시간 채널 감시.
//!
//! 연결을 열고 채널 하나를 구독한 뒤, Ctrl-C가 들어올 때까지 받은
//! 프레임을 한 줄짜리 JSON으로 출력합니다.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use pairlink_core::{ChannelKey, Precision, Timeframe};
use pairlink_exchange::{ChannelHandler, ExchangeClient, StreamEvent};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// 감시할 채널.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchTarget {
    Orderbook { pair: String, precision: Precision },
    Ticker { pair: String },
    Candles { pair: String, timeframe: Timeframe },
}

impl WatchTarget {
    pub fn channel_key(&self) -> ChannelKey {
        match self {
            WatchTarget::Orderbook { pair, precision } => {
                ChannelKey::orderbook(pair, precision.clone())
            }
            WatchTarget::Ticker { pair } => ChannelKey::ticker(pair),
            WatchTarget::Candles { pair, timeframe } => ChannelKey::candle(pair, *timeframe),
        }
    }
}

/// 메시지를 출력하고 개수를 세는 핸들러.
pub fn printing_handler(counter: Arc<AtomicUsize>) -> ChannelHandler {
    ChannelHandler::new(move |message| {
        counter.fetch_add(1, Ordering::Relaxed);
        let line = json!({
            "channel": message.key.kind().as_str(),
            "params": message.key.params_json(),
            "data": message.data,
        });
        println!("{}", line);
    })
}

/// 채널을 감시합니다. 종료 시 받은 메시지 개수를 반환합니다.
pub async fn watch(client: &ExchangeClient, target: WatchTarget) -> Result<usize> {
    let key = target.channel_key();
    let mut events = client
        .events()
        .context("realtime stream is disabled in configuration")?;

    client.open().await.context("failed to open stream")?;

    let received = Arc::new(AtomicUsize::new(0));
    let handler = printing_handler(received.clone());
    client
        .subscribe(key.clone(), &handler)
        .await
        .with_context(|| format!("failed to subscribe to {}", key))?;
    info!(channel = %key, "Watching channel, press Ctrl-C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Ok(StreamEvent::Reconnecting { attempt, delay }) => {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "Connection lost, reconnecting");
                }
                Ok(StreamEvent::SubscriptionFailed { key, reason }) => {
                    warn!(channel = %key, %reason, "Subscription lost");
                }
                Ok(StreamEvent::Error(reason)) => warn!(%reason, "Stream error"),
                Ok(event) => info!(?event, "Stream event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped stream events"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    if let Err(e) = client.unsubscribe(key.clone(), &handler).await {
        warn!(channel = %key, error = %e, "Unsubscribe failed");
    }
    client.close().await;

    let count = received.load(Ordering::Relaxed);
    info!(channel = %key, count, "Stopped watching");
    Ok(count)
}
