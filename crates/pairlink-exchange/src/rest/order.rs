//! 주문 요청 본문.

use pairlink_core::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// 지정가
    Limit,
    /// 시장가
    Market,
    /// 스톱 지정가
    LimitStop,
    /// 스톱 시장가
    MarketStop,
}

/// `POST /orders` 요청 본문.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceOrder {
    /// 거래쌍 (예: "BTC-USDT")
    pub trading_pair_id: String,
    /// 주문 방향
    pub side: Side,
    /// 주문 유형
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// 주문 수량
    pub size: Decimal,
    /// 지정가 (지정가 주문에 필수)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// 스톱 가격 (스톱 주문용)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    /// 주문 출처 태그
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl PlaceOrder {
    fn base(pair: &str, side: Side, order_type: OrderType, size: Decimal) -> Self {
        Self {
            trading_pair_id: pair.to_string(),
            side,
            order_type,
            size,
            price: None,
            stop_price: None,
            source: None,
        }
    }

    /// 지정가 주문을 생성합니다.
    pub fn limit(pair: &str, side: Side, price: Decimal, size: Decimal) -> Self {
        Self {
            price: Some(price),
            ..Self::base(pair, side, OrderType::Limit, size)
        }
    }

    /// 시장가 주문을 생성합니다.
    pub fn market(pair: &str, side: Side, size: Decimal) -> Self {
        Self::base(pair, side, OrderType::Market, size)
    }

    /// 스톱 지정가 주문을 생성합니다.
    pub fn limit_stop(pair: &str, side: Side, price: Decimal, size: Decimal, stop_price: Decimal) -> Self {
        Self {
            price: Some(price),
            stop_price: Some(stop_price),
            ..Self::base(pair, side, OrderType::LimitStop, size)
        }
    }

    /// 스톱 시장가 주문을 생성합니다.
    pub fn market_stop(pair: &str, side: Side, size: Decimal, stop_price: Decimal) -> Self {
        Self {
            stop_price: Some(stop_price),
            ..Self::base(pair, side, OrderType::MarketStop, size)
        }
    }

    /// 주문 출처 태그를 설정합니다.
    pub fn with_source(mut self, source: Option<&str>) -> Self {
        self.source = source.map(str::to_string);
        self
    }
}
