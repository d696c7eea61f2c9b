//! REST 요청 계층.
//!
//! 모든 응답은 가공하지 않은 `serde_json::Value`로 반환합니다.
//! 실패한 응답은 상태 코드와 응답 본문 원문을 담은 `ApiError`가 됩니다.

use chrono::{DateTime, Utc};
use pairlink_core::{ExchangeConfig, Precision, Side, Timeframe};
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use super::order::PlaceOrder;
use crate::stream::API_KEY_HEADER;
use crate::{ExchangeError, ExchangeResult};

/// 거래 내역 조회 기본 개수.
pub const DEFAULT_TRADES_LIMIT: u32 = 50;

/// REST API 클라이언트.
#[derive(Clone)]
pub struct RestClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***REDACTED***"))
            .finish()
    }
}

impl RestClient {
    /// 새 REST 클라이언트 생성.
    ///
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `ExchangeError::NetworkError`를 반환합니다.
    pub fn new(config: &ExchangeConfig) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ExchangeError::NetworkError(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            base_url: config.rest_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("{} {}", method, url);

        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn get(&self, endpoint: &str, query: &[(&str, String)]) -> ExchangeResult<Value> {
        let response = self.request(Method::GET, endpoint).query(query).send().await?;
        Self::handle_response(response).await
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: &B,
    ) -> ExchangeResult<Value> {
        let response = self.request(method, endpoint).json(body).send().await?;
        Self::handle_response(response).await
    }

    async fn delete(&self, endpoint: &str) -> ExchangeResult<Value> {
        let response = self.request(Method::DELETE, endpoint).send().await?;
        Self::handle_response(response).await
    }

    /// API 응답 처리.
    async fn handle_response(response: reqwest::Response) -> ExchangeResult<Value> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            return Err(ExchangeError::ApiError {
                code: status.as_u16() as i32,
                message: body,
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| {
            error!("Failed to parse response: {} - Body: {}", e, body);
            ExchangeError::ParseError(e.to_string())
        })
    }

    // ========================================================================
    // 시장 데이터
    // ========================================================================

    /// 거래쌍 시세.
    pub async fn get_ticker(&self, pair: &str) -> ExchangeResult<Value> {
        self.get(&format!("/tickers/{}", pair), &[]).await
    }

    /// 기간 내 캔들. `start`/`end`는 밀리초 타임스탬프로 전송됩니다.
    pub async fn get_candles(
        &self,
        pair: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> ExchangeResult<Value> {
        if start > end {
            return Err(ExchangeError::InvalidParameter(format!(
                "candle range start {} is after end {}",
                start, end
            )));
        }
        let query = [
            ("start", start.timestamp_millis().to_string()),
            ("end", end.timestamp_millis().to_string()),
            ("timeframe", timeframe.as_str().to_string()),
        ];
        self.get(&format!("/candles/{}", pair), &query).await
    }

    /// 거래쌍 목록.
    pub async fn list_trading_pairs(&self) -> ExchangeResult<Value> {
        self.get("/trading_pairs", &[]).await
    }

    /// 통화 목록.
    pub async fn list_currencies(&self) -> ExchangeResult<Value> {
        self.get("/currencies", &[]).await
    }

    /// 호가창에서 지원하는 정밀도 목록.
    pub async fn list_orderbook_precisions(&self, pair: &str) -> ExchangeResult<Value> {
        self.get(&format!("/orderbook/{}/precisions", pair), &[]).await
    }

    /// 펀딩북에서 지원하는 정밀도 목록.
    pub async fn list_fundingbook_precisions(&self, currency: &str) -> ExchangeResult<Value> {
        self.get(&format!("/fundingbook/{}/precisions", currency), &[])
            .await
    }

    /// 호가창 스냅샷. `limit`이 0이면 서버 기본값.
    pub async fn get_orderbook(
        &self,
        pair: &str,
        precision: impl Into<Precision>,
        limit: u32,
    ) -> ExchangeResult<Value> {
        let query = [
            ("precision", precision.into().to_string()),
            ("limit", limit.to_string()),
        ];
        self.get(&format!("/orderbook/{}", pair), &query).await
    }

    /// 펀딩북 스냅샷. `limit`이 0이면 서버 기본값.
    pub async fn get_fundingbook(
        &self,
        currency: &str,
        precision: impl Into<Precision>,
        limit: u32,
    ) -> ExchangeResult<Value> {
        let query = [
            ("precision", precision.into().to_string()),
            ("limit", limit.to_string()),
        ];
        self.get(&format!("/fundingbook/{}", currency), &query).await
    }

    /// 거래쌍 공개 체결.
    pub async fn list_trades(&self, pair: &str) -> ExchangeResult<Value> {
        self.get(&format!("/trades/{}", pair), &[]).await
    }

    /// 대출 시세.
    pub async fn get_loan_ticker(&self, currency: &str) -> ExchangeResult<Value> {
        self.get(&format!("/loan_tickers/{}", currency), &[]).await
    }

    // ========================================================================
    // 주문
    // ========================================================================

    /// 미체결 주문 목록.
    pub async fn list_orders(&self) -> ExchangeResult<Value> {
        self.get("/orders", &[]).await
    }

    /// 주문 제출.
    pub async fn place_order(&self, order: &PlaceOrder) -> ExchangeResult<Value> {
        debug!(pair = %order.trading_pair_id, side = %order.side, order_type = ?order.order_type, "Placing order");
        self.send_json(Method::POST, "/orders", order).await
    }

    /// 지정가 주문.
    pub async fn place_limit_order(
        &self,
        pair: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        source: Option<&str>,
    ) -> ExchangeResult<Value> {
        self.place_order(&PlaceOrder::limit(pair, side, price, size).with_source(source))
            .await
    }

    /// 시장가 주문.
    pub async fn place_market_order(
        &self,
        pair: &str,
        side: Side,
        size: Decimal,
        source: Option<&str>,
    ) -> ExchangeResult<Value> {
        self.place_order(&PlaceOrder::market(pair, side, size).with_source(source))
            .await
    }

    /// 스톱 지정가 주문.
    pub async fn place_limit_stop_order(
        &self,
        pair: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        stop_price: Decimal,
    ) -> ExchangeResult<Value> {
        self.place_order(&PlaceOrder::limit_stop(pair, side, price, size, stop_price))
            .await
    }

    /// 스톱 시장가 주문.
    pub async fn place_market_stop_order(
        &self,
        pair: &str,
        side: Side,
        size: Decimal,
        stop_price: Decimal,
    ) -> ExchangeResult<Value> {
        self.place_order(&PlaceOrder::market_stop(pair, side, size, stop_price))
            .await
    }

    /// 주문 취소.
    pub async fn cancel_order(&self, id: &str) -> ExchangeResult<Value> {
        self.delete(&format!("/orders/{}", id)).await
    }

    /// 주문 조회.
    pub async fn get_order(&self, id: &str) -> ExchangeResult<Value> {
        self.get(&format!("/orders/{}", id), &[]).await
    }

    /// 주문 정정.
    pub async fn modify_order(
        &self,
        id: &str,
        pair: &str,
        price: Decimal,
        size: Decimal,
    ) -> ExchangeResult<Value> {
        let body = json!({
            "trading_pair_id": pair,
            "price": price.to_string(),
            "size": size.to_string(),
        });
        self.send_json(Method::PUT, &format!("/orders/{}", id), &body)
            .await
    }

    /// 주문의 체결 내역.
    pub async fn get_trades_of_order(&self, id: &str) -> ExchangeResult<Value> {
        self.get(&format!("/orders/{}/trades", id), &[]).await
    }

    /// 내 체결 내역 (페이지 단위).
    pub async fn get_trades_history(
        &self,
        pair: &str,
        limit: u32,
        page: u32,
    ) -> ExchangeResult<Value> {
        let query = [("limit", limit.to_string()), ("page", page.to_string())];
        self.get(&format!("/trades/history/{}", pair), &query).await
    }

    // ========================================================================
    // 포지션 / 잔고
    // ========================================================================

    /// 포지션 목록.
    pub async fn list_positions(&self) -> ExchangeResult<Value> {
        self.get("/positions", &[]).await
    }

    /// 거래쌍 포지션.
    pub async fn get_position(&self, pair: &str) -> ExchangeResult<Value> {
        self.get(&format!("/positions/{}", pair), &[]).await
    }

    /// 포지션 청산.
    pub async fn close_position(&self, pair: &str) -> ExchangeResult<Value> {
        self.delete(&format!("/positions/{}", pair)).await
    }

    /// 포지션 인수.
    pub async fn claim_position(&self, pair: &str, size: Decimal) -> ExchangeResult<Value> {
        let body = json!({ "size": size.to_string() });
        self.send_json(Method::POST, &format!("/positions/{}/claim", pair), &body)
            .await
    }

    /// 지갑 잔고.
    pub async fn get_balance(&self) -> ExchangeResult<Value> {
        self.get("/balance", &[]).await
    }

    /// 지갑 간 잔고 이체.
    pub async fn transfer_balance(
        &self,
        currency: &str,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> ExchangeResult<Value> {
        let body = json!({
            "currency_id": currency,
            "from": from,
            "to": to,
            "amount": amount.to_string(),
        });
        self.send_json(Method::POST, "/balance/transfer", &body).await
    }

    // ========================================================================
    // 펀딩 / 대출
    // ========================================================================

    /// 펀딩 목록.
    pub async fn list_fundings(&self) -> ExchangeResult<Value> {
        self.get("/fundings", &[]).await
    }

    /// 펀딩 조회.
    pub async fn get_funding(&self, id: &str) -> ExchangeResult<Value> {
        self.get(&format!("/fundings/{}", id), &[]).await
    }

    /// 지정 금리 펀딩 제출.
    pub async fn place_limit_funding(
        &self,
        currency: &str,
        side: Side,
        interest_rate: Decimal,
        period: u32,
        size: Decimal,
    ) -> ExchangeResult<Value> {
        let body = json!({
            "currency_id": currency,
            "side": side,
            "interest_rate": interest_rate.to_string(),
            "period": period,
            "size": size.to_string(),
        });
        self.send_json(Method::POST, "/fundings", &body).await
    }

    /// 펀딩 취소.
    pub async fn cancel_funding(&self, id: &str) -> ExchangeResult<Value> {
        self.delete(&format!("/fundings/{}", id)).await
    }

    /// 대출 목록.
    pub async fn list_loans(&self) -> ExchangeResult<Value> {
        self.get("/loans", &[]).await
    }

    /// 대출 조회.
    pub async fn get_loan(&self, id: &str) -> ExchangeResult<Value> {
        self.get(&format!("/loans/{}", id), &[]).await
    }

    /// 대출 상환.
    pub async fn close_loan(&self, id: &str) -> ExchangeResult<Value> {
        self.delete(&format!("/loans/{}", id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = ExchangeConfig::new("http://localhost:9000/v1/", "ws://localhost:9001");
        let client = RestClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:9000/v1");
    }

    #[test]
    fn test_debug_hides_api_key() {
        let config = ExchangeConfig::default().with_api_key("super-secret-key");
        let client = RestClient::new(&config).unwrap();
        assert!(!format!("{:?}", client).contains("super-secret-key"));
    }

    #[tokio::test]
    async fn test_inverted_candle_range_rejected() {
        let client = RestClient::new(&ExchangeConfig::default()).unwrap();
        let end = Utc::now();
        let start = end + chrono::Duration::hours(1);
        let err = client
            .get_candles("BTC-USDT", start, end, Timeframe::H1)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidParameter(_)));
    }
}
