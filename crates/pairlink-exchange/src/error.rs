//! 거래소 클라이언트 에러 타입.

use thiserror::Error;

/// 거래소 관련 에러.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    NetworkError(String),

    /// 거래소 연결 끊김
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// WebSocket 에러
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// 파싱/역직렬화 에러
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 요청 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// REST 엔드포인트 에러 (상태 코드와 응답 본문 원문)
    #[error("API error {code}: {message}")]
    ApiError { code: i32, message: String },

    /// 잘못된 요청 파라미터
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// 연결이 열려 있지 않은 상태에서 전송 시도
    #[error("Not connected")]
    NotConnected,

    /// 종료된 클라이언트 사용
    #[error("Client closed")]
    Closed,

    /// 서버가 구독 요청을 거부함
    #[error("Subscription rejected: {0}")]
    SubscriptionRejected(String),

    /// 구독 응답 대기 시간 초과
    #[error("Subscription timeout: {0}")]
    SubscriptionTimeout(String),

    /// 실시간 스트림 없이 구독 API 사용
    #[error("No realtime transport configured")]
    NoTransport,
}

impl ExchangeError {
    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::NetworkError(_)
                | ExchangeError::Disconnected(_)
                | ExchangeError::WebSocket(_)
                | ExchangeError::Timeout(_)
                | ExchangeError::NotConnected
                | ExchangeError::SubscriptionTimeout(_)
        )
    }

    /// 구독 프로토콜 단계에서 발생한 에러인지 확인.
    pub fn is_subscription_error(&self) -> bool {
        matches!(
            self,
            ExchangeError::SubscriptionRejected(_) | ExchangeError::SubscriptionTimeout(_)
        )
    }

    /// 다시 사용할 수 없는 클라이언트 상태인지 확인.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExchangeError::Closed | ExchangeError::NoTransport)
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(err.to_string())
        } else if err.is_decode() {
            ExchangeError::ParseError(err.to_string())
        } else {
            ExchangeError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::ParseError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                ExchangeError::Disconnected(err.to_string())
            }
            WsError::Io(e) => ExchangeError::NetworkError(e.to_string()),
            other => ExchangeError::WebSocket(other.to_string()),
        }
    }
}
