//! 실시간 채널 식별자.
//!
//! 채널은 메시지 유형과 정규화된 파라미터 집합으로 식별됩니다.
//! 같은 유형과 의미상 같은 파라미터를 가진 구독 요청은 항상 같은
//! [`ChannelKey`]가 되며, 수신 프레임도 같은 규칙으로 키를 계산합니다.

use super::{Precision, Timeframe};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// 거래쌍 파라미터 이름.
pub const TRADING_PAIR_ID: &str = "trading_pair_id";
/// 통화 파라미터 이름.
pub const CURRENCY_ID: &str = "currency_id";
/// 타임프레임 파라미터 이름.
pub const TIMEFRAME: &str = "timeframe";
/// 정밀도 파라미터 이름.
pub const PRECISION: &str = "precision";

/// 실시간 채널 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// 내 주문 업데이트 (인증)
    Order,
    /// 시세
    Ticker,
    /// 캔들스틱
    Candle,
    /// 공개 체결
    PublicTrade,
    /// 호가창
    Orderbook,
    /// 펀딩북
    Fundingbook,
    /// 대출 시세
    LoanTicker,
    /// 공개 대출
    PublicLoan,
    /// 내 대출 (인증)
    AuthLoan,
    /// 내 펀딩 (인증)
    Funding,
}

impl ChannelKind {
    /// 모든 채널 유형.
    pub const ALL: [ChannelKind; 10] = [
        ChannelKind::Order,
        ChannelKind::Ticker,
        ChannelKind::Candle,
        ChannelKind::PublicTrade,
        ChannelKind::Orderbook,
        ChannelKind::Fundingbook,
        ChannelKind::LoanTicker,
        ChannelKind::PublicLoan,
        ChannelKind::AuthLoan,
        ChannelKind::Funding,
    ];

    /// 와이어 채널 이름을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Order => "order",
            ChannelKind::Ticker => "ticker",
            ChannelKind::Candle => "candle",
            ChannelKind::PublicTrade => "public_trade",
            ChannelKind::Orderbook => "orderbook",
            ChannelKind::Fundingbook => "fundingbook",
            ChannelKind::LoanTicker => "loan_ticker",
            ChannelKind::PublicLoan => "public_loan",
            ChannelKind::AuthLoan => "auth_loan",
            ChannelKind::Funding => "funding",
        }
    }

    /// 와이어 채널 이름에서 파싱합니다.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }

    /// API 키가 필요한 채널인지 확인합니다.
    pub fn requires_auth(&self) -> bool {
        matches!(
            self,
            ChannelKind::Order | ChannelKind::AuthLoan | ChannelKind::Funding
        )
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 채널의 정규화된 식별자.
///
/// 파라미터는 이름순으로 정렬된 맵에 보관되므로 삽입 순서와 무관하게
/// 같은 키가 만들어집니다. `precision` 값은 삽입 시점에 지수 표기로
/// 정규화됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    kind: ChannelKind,
    params: BTreeMap<String, String>,
}

impl ChannelKey {
    /// 파라미터 없는 채널 키를 생성합니다.
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
        }
    }

    /// 파라미터를 추가합니다.
    pub fn with_param(mut self, name: impl Into<String>, value: impl AsRef<str>) -> Self {
        self.insert_param(name.into(), value.as_ref());
        self
    }

    fn insert_param(&mut self, name: String, value: &str) {
        let value = if name == PRECISION {
            Precision::parse(value).into()
        } else {
            value.trim().to_string()
        };
        self.params.insert(name, value);
    }

    /// 내 주문 채널.
    pub fn order() -> Self {
        Self::new(ChannelKind::Order)
    }

    /// 시세 채널.
    pub fn ticker(pair: &str) -> Self {
        Self::new(ChannelKind::Ticker).with_param(TRADING_PAIR_ID, pair)
    }

    /// 캔들 채널.
    pub fn candle(pair: &str, timeframe: Timeframe) -> Self {
        Self::new(ChannelKind::Candle)
            .with_param(TRADING_PAIR_ID, pair)
            .with_param(TIMEFRAME, timeframe.as_str())
    }

    /// 공개 체결 채널.
    pub fn public_trade(pair: &str) -> Self {
        Self::new(ChannelKind::PublicTrade).with_param(TRADING_PAIR_ID, pair)
    }

    /// 호가창 채널.
    pub fn orderbook(pair: &str, precision: impl Into<Precision>) -> Self {
        Self::new(ChannelKind::Orderbook)
            .with_param(TRADING_PAIR_ID, pair)
            .with_param(PRECISION, precision.into().as_str())
    }

    /// 펀딩북 채널.
    pub fn fundingbook(currency: &str, precision: impl Into<Precision>) -> Self {
        Self::new(ChannelKind::Fundingbook)
            .with_param(CURRENCY_ID, currency)
            .with_param(PRECISION, precision.into().as_str())
    }

    /// 대출 시세 채널.
    pub fn loan_ticker(currency: &str) -> Self {
        Self::new(ChannelKind::LoanTicker).with_param(CURRENCY_ID, currency)
    }

    /// 공개 대출 채널.
    pub fn public_loan(currency: &str) -> Self {
        Self::new(ChannelKind::PublicLoan).with_param(CURRENCY_ID, currency)
    }

    /// 내 대출 채널.
    pub fn auth_loan(currency: &str) -> Self {
        Self::new(ChannelKind::AuthLoan).with_param(CURRENCY_ID, currency)
    }

    /// 내 펀딩 채널.
    pub fn funding() -> Self {
        Self::new(ChannelKind::Funding)
    }

    /// 수신 프레임의 `channel`과 `params`에서 키를 계산합니다.
    ///
    /// 알 수 없는 채널 이름이면 `None`을 반환합니다. 숫자 파라미터는
    /// 문자열로 변환하며, 객체/배열 값은 무시합니다.
    pub fn from_wire(channel: &str, params: Option<&Map<String, Value>>) -> Option<Self> {
        let mut key = Self::new(ChannelKind::from_wire(channel)?);
        if let Some(params) = params {
            for (name, value) in params {
                match value {
                    Value::String(s) => key.insert_param(name.clone(), s),
                    Value::Number(n) => key.insert_param(name.clone(), &n.to_string()),
                    Value::Bool(b) => key.insert_param(name.clone(), &b.to_string()),
                    _ => {}
                }
            }
        }
        Some(key)
    }

    /// 채널 유형을 반환합니다.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// 정규화된 파라미터를 반환합니다.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// 파라미터 값을 조회합니다.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// 제어 프레임에 넣을 JSON 파라미터 객체를 생성합니다.
    pub fn params_json(&self) -> Value {
        Value::Object(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.params.is_empty() {
            let joined = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",");
            write!(f, "{{{}}}", joined)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_precision_forms_share_key() {
        let a = ChannelKey::orderbook("BTC-USDT", dec!(0.1));
        let b = ChannelKey::orderbook("BTC-USDT", "1E-1");
        assert_eq!(a, b);
        assert_eq!(a.param(PRECISION), Some("1E-1"));
    }

    #[test]
    fn test_different_params_differ() {
        assert_ne!(
            ChannelKey::orderbook("BTC-USDT", "1E-1"),
            ChannelKey::orderbook("BTC-USDT", "1E-2")
        );
        assert_ne!(ChannelKey::ticker("BTC-USDT"), ChannelKey::public_trade("BTC-USDT"));
        assert_ne!(ChannelKey::loan_ticker("USDT"), ChannelKey::ticker("USDT"));
    }

    #[test]
    fn test_from_wire_matches_outbound() {
        let params = json!({"precision": "0.10", "trading_pair_id": "BTC-USDT"});
        let key = ChannelKey::from_wire("orderbook", params.as_object()).unwrap();
        assert_eq!(key, ChannelKey::orderbook("BTC-USDT", dec!(0.1)));
    }

    #[test]
    fn test_from_wire_numeric_precision() {
        let params = json!({"trading_pair_id": "BTC-USDT", "precision": 0.1});
        let key = ChannelKey::from_wire("orderbook", params.as_object()).unwrap();
        assert_eq!(key, ChannelKey::orderbook("BTC-USDT", "1E-1"));
    }

    #[test]
    fn test_from_wire_unknown_channel() {
        assert!(ChannelKey::from_wire("heartbeat", None).is_none());
    }

    #[test]
    fn test_params_json_round_trips_through_from_wire() {
        let key = ChannelKey::candle("ETH-USDT", Timeframe::H1);
        let json = key.params_json();
        let parsed = ChannelKey::from_wire(key.kind().as_str(), json.as_object()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_display() {
        let key = ChannelKey::orderbook("BTC-USDT", "1E-1");
        assert_eq!(key.to_string(), "orderbook{precision=1E-1,trading_pair_id=BTC-USDT}");
        assert_eq!(ChannelKey::order().to_string(), "order");
    }

    #[test]
    fn test_auth_channels() {
        assert!(ChannelKind::Order.requires_auth());
        assert!(ChannelKind::AuthLoan.requires_auth());
        assert!(!ChannelKind::PublicLoan.requires_auth());
    }

    proptest! {
        #[test]
        fn prop_key_is_insertion_order_independent(
            params in proptest::collection::btree_map("[a-z_]{1,8}", "[A-Z0-9-]{1,8}", 0..6)
        ) {
            let forward = params
                .iter()
                .fold(ChannelKey::new(ChannelKind::Ticker), |key, (k, v)| key.with_param(k.clone(), v));
            let backward = params
                .iter()
                .rev()
                .fold(ChannelKey::new(ChannelKind::Ticker), |key, (k, v)| key.with_param(k.clone(), v));
            prop_assert_eq!(forward, backward);
        }
    }
}
