//! 거래소 클라이언트 퍼사드.
//!
//! REST 요청 계층과 실시간 스트림을 하나의 명시적인 인스턴스로 묶습니다.
//! `disable_ws`이면 스트림 없이 생성되며, 모든 구독 API는
//! [`ExchangeError::NoTransport`]로 실패합니다.
//!
//! # 예제
//!
//! ```no_run
//! use pairlink_core::ExchangeConfig;
//! use pairlink_exchange::{ChannelHandler, ExchangeClient};
//!
//! # async fn run() -> pairlink_exchange::ExchangeResult<()> {
//! let client = ExchangeClient::new(&ExchangeConfig::default(), &Default::default())?;
//! client.open().await?;
//!
//! let handler = ChannelHandler::new(|msg| println!("{}", msg.data));
//! client.subscribe_orderbook("BTC-USDT", "1E-1", &handler).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pairlink_core::{ChannelKey, ExchangeConfig, Precision, Side, StreamConfig, Timeframe};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::rest::{PlaceOrder, RestClient};
use crate::stream::{
    ChannelHandler, ConnectionState, StreamClient, StreamEvent, SubscriptionInfo,
};
use crate::{Connector, ExchangeError, ExchangeResult};

/// 거래소 클라이언트.
#[derive(Debug, Clone)]
pub struct ExchangeClient {
    rest: RestClient,
    stream: Option<StreamClient>,
    has_api_key: bool,
}

impl ExchangeClient {
    /// 설정으로 클라이언트를 생성합니다.
    ///
    /// 스트림을 사용하면 tokio 런타임 안에서 호출해야 합니다.
    pub fn new(config: &ExchangeConfig, stream_config: &StreamConfig) -> ExchangeResult<Self> {
        let rest = RestClient::new(config)?;
        let stream = if config.disable_ws {
            info!("Realtime stream disabled, running in REST-only mode");
            None
        } else {
            Some(StreamClient::new(
                config.ws_url.clone(),
                config.api_key.clone(),
                stream_config,
            ))
        };

        Ok(Self {
            rest,
            stream,
            has_api_key: config.api_key.is_some(),
        })
    }

    /// 임의의 커넥터로 스트림을 구성합니다.
    pub fn with_connector(
        config: &ExchangeConfig,
        stream_config: &StreamConfig,
        connector: Arc<dyn Connector>,
    ) -> ExchangeResult<Self> {
        Ok(Self {
            rest: RestClient::new(config)?,
            stream: Some(StreamClient::with_connector(connector, stream_config)),
            has_api_key: config.api_key.is_some(),
        })
    }

    /// REST 클라이언트.
    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// 실시간 스트림 핸들. REST 전용 모드면 `None`.
    pub fn stream(&self) -> Option<&StreamClient> {
        self.stream.as_ref()
    }

    fn transport(&self) -> ExchangeResult<&StreamClient> {
        self.stream.as_ref().ok_or(ExchangeError::NoTransport)
    }

    // ========================================================================
    // 연결 수명
    // ========================================================================

    /// 실시간 연결을 엽니다.
    pub async fn open(&self) -> ExchangeResult<()> {
        self.transport()?.open().await
    }

    /// 실시간 연결을 닫습니다. REST 전용 모드에서는 아무 일도 하지 않습니다.
    pub async fn close(&self) {
        if let Some(stream) = &self.stream {
            stream.close().await;
        }
    }

    /// 연결 이벤트 수신기. REST 전용 모드면 `None`.
    pub fn events(&self) -> Option<broadcast::Receiver<StreamEvent>> {
        self.stream.as_ref().map(StreamClient::events)
    }

    /// 현재 연결 상태. REST 전용 모드면 `Disconnected`.
    pub fn connection_state(&self) -> ConnectionState {
        self.stream
            .as_ref()
            .map_or(ConnectionState::Disconnected, StreamClient::connection_state)
    }

    /// 현재 구독 목록.
    pub async fn subscriptions(&self) -> ExchangeResult<Vec<SubscriptionInfo>> {
        self.transport()?.subscriptions().await
    }

    // ========================================================================
    // 채널 구독
    // ========================================================================

    /// 임의의 채널 키로 구독합니다.
    pub async fn subscribe(&self, key: ChannelKey, handler: &ChannelHandler) -> ExchangeResult<()> {
        let stream = self.transport()?;
        if key.kind().requires_auth() && !self.has_api_key {
            warn!(channel = %key, "Subscribing to an authenticated channel without an API key");
        }
        stream.subscribe(key, handler).await
    }

    /// 임의의 채널 키로 구독을 해제합니다.
    pub async fn unsubscribe(&self, key: ChannelKey, handler: &ChannelHandler) -> ExchangeResult<()> {
        self.transport()?.unsubscribe(key, handler).await
    }

    pub async fn subscribe_order(&self, handler: &ChannelHandler) -> ExchangeResult<()> {
        self.subscribe(ChannelKey::order(), handler).await
    }

    pub async fn unsubscribe_order(&self, handler: &ChannelHandler) -> ExchangeResult<()> {
        self.unsubscribe(ChannelKey::order(), handler).await
    }

    pub async fn subscribe_ticker(&self, pair: &str, handler: &ChannelHandler) -> ExchangeResult<()> {
        self.subscribe(ChannelKey::ticker(pair), handler).await
    }

    pub async fn unsubscribe_ticker(&self, pair: &str, handler: &ChannelHandler) -> ExchangeResult<()> {
        self.unsubscribe(ChannelKey::ticker(pair), handler).await
    }

    pub async fn subscribe_candle(
        &self,
        pair: &str,
        timeframe: Timeframe,
        handler: &ChannelHandler,
    ) -> ExchangeResult<()> {
        self.subscribe(ChannelKey::candle(pair, timeframe), handler)
            .await
    }

    pub async fn unsubscribe_candle(
        &self,
        pair: &str,
        timeframe: Timeframe,
        handler: &ChannelHandler,
    ) -> ExchangeResult<()> {
        self.unsubscribe(ChannelKey::candle(pair, timeframe), handler)
            .await
    }

    pub async fn subscribe_public_trade(
        &self,
        pair: &str,
        handler: &ChannelHandler,
    ) -> ExchangeResult<()> {
        self.subscribe(ChannelKey::public_trade(pair), handler).await
    }

    pub async fn unsubscribe_public_trade(
        &self,
        pair: &str,
        handler: &ChannelHandler,
    ) -> ExchangeResult<()> {
        self.unsubscribe(ChannelKey::public_trade(pair), handler)
            .await
    }

    /// 호가창 구독. 정밀도는 `Decimal`이나 문자열 모두 받으며 같은 값이면 같은 채널입니다.
    pub async fn subscribe_orderbook(
        &self,
        pair: &str,
        precision: impl Into<Precision>,
        handler: &ChannelHandler,
    ) -> ExchangeResult<()> {
        self.subscribe(ChannelKey::orderbook(pair, precision), handler)
            .await
    }

    pub async fn unsubscribe_orderbook(
        &self,
        pair: &str,
        precision: impl Into<Precision>,
        handler: &ChannelHandler,
    ) -> ExchangeResult<()> {
        self.unsubscribe(ChannelKey::orderbook(pair, precision), handler)
            .await
    }

    pub async fn subscribe_fundingbook(
        &self,
        currency: &str,
        precision: impl Into<Precision>,
        handler: &ChannelHandler,
    ) -> ExchangeResult<()> {
        self.subscribe(ChannelKey::fundingbook(currency, precision), handler)
            .await
    }

    pub async fn unsubscribe_fundingbook(
        &self,
        currency: &str,
        precision: impl Into<Precision>,
        handler: &ChannelHandler,
    ) -> ExchangeResult<()> {
        self.unsubscribe(ChannelKey::fundingbook(currency, precision), handler)
            .await
    }

    pub async fn subscribe_loan_ticker(
        &self,
        currency: &str,
        handler: &ChannelHandler,
    ) -> ExchangeResult<()> {
        self.subscribe(ChannelKey::loan_ticker(currency), handler)
            .await
    }

    pub async fn unsubscribe_loan_ticker(
        &self,
        currency: &str,
        handler: &ChannelHandler,
    ) -> ExchangeResult<()> {
        self.unsubscribe(ChannelKey::loan_ticker(currency), handler)
            .await
    }

    pub async fn subscribe_public_loan(
        &self,
        currency: &str,
        handler: &ChannelHandler,
    ) -> ExchangeResult<()> {
        self.subscribe(ChannelKey::public_loan(currency), handler)
            .await
    }

    pub async fn unsubscribe_public_loan(
        &self,
        currency: &str,
        handler: &ChannelHandler,
    ) -> ExchangeResult<()> {
        self.unsubscribe(ChannelKey::public_loan(currency), handler)
            .await
    }

    pub async fn subscribe_auth_loan(
        &self,
        currency: &str,
        handler: &ChannelHandler,
    ) -> ExchangeResult<()> {
        self.subscribe(ChannelKey::auth_loan(currency), handler).await
    }

    pub async fn unsubscribe_auth_loan(
        &self,
        currency: &str,
        handler: &ChannelHandler,
    ) -> ExchangeResult<()> {
        self.unsubscribe(ChannelKey::auth_loan(currency), handler)
            .await
    }

    pub async fn subscribe_funding(&self, handler: &ChannelHandler) -> ExchangeResult<()> {
        self.subscribe(ChannelKey::funding(), handler).await
    }

    pub async fn unsubscribe_funding(&self, handler: &ChannelHandler) -> ExchangeResult<()> {
        self.unsubscribe(ChannelKey::funding(), handler).await
    }

    // ========================================================================
    // REST
    // ========================================================================

    pub async fn get_ticker(&self, pair: &str) -> ExchangeResult<Value> {
        self.rest.get_ticker(pair).await
    }

    pub async fn get_candles(
        &self,
        pair: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> ExchangeResult<Value> {
        self.rest.get_candles(pair, start, end, timeframe).await
    }

    pub async fn list_orders(&self) -> ExchangeResult<Value> {
        self.rest.list_orders().await
    }

    pub async fn list_trading_pairs(&self) -> ExchangeResult<Value> {
        self.rest.list_trading_pairs().await
    }

    pub async fn list_currencies(&self) -> ExchangeResult<Value> {
        self.rest.list_currencies().await
    }

    pub async fn list_orderbook_precisions(&self, pair: &str) -> ExchangeResult<Value> {
        self.rest.list_orderbook_precisions(pair).await
    }

    pub async fn list_fundingbook_precisions(&self, currency: &str) -> ExchangeResult<Value> {
        self.rest.list_fundingbook_precisions(currency).await
    }

    pub async fn place_order(&self, order: &PlaceOrder) -> ExchangeResult<Value> {
        self.rest.place_order(order).await
    }

    pub async fn place_limit_order(
        &self,
        pair: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        source: Option<&str>,
    ) -> ExchangeResult<Value> {
        self.rest
            .place_limit_order(pair, side, price, size, source)
            .await
    }

    pub async fn place_market_order(
        &self,
        pair: &str,
        side: Side,
        size: Decimal,
        source: Option<&str>,
    ) -> ExchangeResult<Value> {
        self.rest.place_market_order(pair, side, size, source).await
    }

    pub async fn place_limit_stop_order(
        &self,
        pair: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        stop_price: Decimal,
    ) -> ExchangeResult<Value> {
        self.rest
            .place_limit_stop_order(pair, side, price, size, stop_price)
            .await
    }

    pub async fn place_market_stop_order(
        &self,
        pair: &str,
        side: Side,
        size: Decimal,
        stop_price: Decimal,
    ) -> ExchangeResult<Value> {
        self.rest
            .place_market_stop_order(pair, side, size, stop_price)
            .await
    }

    pub async fn cancel_order(&self, id: &str) -> ExchangeResult<Value> {
        self.rest.cancel_order(id).await
    }

    pub async fn get_order(&self, id: &str) -> ExchangeResult<Value> {
        self.rest.get_order(id).await
    }

    pub async fn modify_order(
        &self,
        id: &str,
        pair: &str,
        price: Decimal,
        size: Decimal,
    ) -> ExchangeResult<Value> {
        self.rest.modify_order(id, pair, price, size).await
    }

    pub async fn list_positions(&self) -> ExchangeResult<Value> {
        self.rest.list_positions().await
    }

    pub async fn get_position(&self, pair: &str) -> ExchangeResult<Value> {
        self.rest.get_position(pair).await
    }

    pub async fn close_position(&self, pair: &str) -> ExchangeResult<Value> {
        self.rest.close_position(pair).await
    }

    pub async fn claim_position(&self, pair: &str, size: Decimal) -> ExchangeResult<Value> {
        self.rest.claim_position(pair, size).await
    }

    pub async fn get_balance(&self) -> ExchangeResult<Value> {
        self.rest.get_balance().await
    }

    pub async fn transfer_balance(
        &self,
        currency: &str,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> ExchangeResult<Value> {
        self.rest.transfer_balance(currency, from, to, amount).await
    }

    pub async fn get_orderbook(
        &self,
        pair: &str,
        precision: impl Into<Precision>,
        limit: u32,
    ) -> ExchangeResult<Value> {
        self.rest.get_orderbook(pair, precision, limit).await
    }

    pub async fn get_trades_history(
        &self,
        pair: &str,
        limit: u32,
        page: u32,
    ) -> ExchangeResult<Value> {
        self.rest.get_trades_history(pair, limit, page).await
    }

    pub async fn get_trades_of_order(&self, id: &str) -> ExchangeResult<Value> {
        self.rest.get_trades_of_order(id).await
    }

    pub async fn list_trades(&self, pair: &str) -> ExchangeResult<Value> {
        self.rest.list_trades(pair).await
    }

    pub async fn get_fundingbook(
        &self,
        currency: &str,
        precision: impl Into<Precision>,
        limit: u32,
    ) -> ExchangeResult<Value> {
        self.rest.get_fundingbook(currency, precision, limit).await
    }

    pub async fn get_loan_ticker(&self, currency: &str) -> ExchangeResult<Value> {
        self.rest.get_loan_ticker(currency).await
    }

    pub async fn list_fundings(&self) -> ExchangeResult<Value> {
        self.rest.list_fundings().await
    }

    pub async fn get_funding(&self, id: &str) -> ExchangeResult<Value> {
        self.rest.get_funding(id).await
    }

    pub async fn place_limit_funding(
        &self,
        currency: &str,
        side: Side,
        interest_rate: Decimal,
        period: u32,
        size: Decimal,
    ) -> ExchangeResult<Value> {
        self.rest
            .place_limit_funding(currency, side, interest_rate, period, size)
            .await
    }

    pub async fn cancel_funding(&self, id: &str) -> ExchangeResult<Value> {
        self.rest.cancel_funding(id).await
    }

    pub async fn list_loans(&self) -> ExchangeResult<Value> {
        self.rest.list_loans().await
    }

    pub async fn get_loan(&self, id: &str) -> ExchangeResult<Value> {
        self.rest.get_loan(id).await
    }

    pub async fn close_loan(&self, id: &str) -> ExchangeResult<Value> {
        self.rest.close_loan(id).await
    }
}
