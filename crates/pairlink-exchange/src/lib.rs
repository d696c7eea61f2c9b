//! Pairlink 거래소 클라이언트.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - REST 요청 계층 ([`RestClient`])
//! - 단일 WebSocket 연결 위의 채널 멀티플렉서 ([`StreamClient`])
//! - 둘을 묶은 클라이언트 퍼사드 ([`ExchangeClient`])
//! - 재연결 시 구독 복원, 응답 타임아웃, 콜백 격리

pub mod client;
pub mod error;
pub mod rest;
pub mod stream;
pub mod traits;

pub use client::ExchangeClient;
pub use error::*;
pub use rest::{OrderType, PlaceOrder, RestClient};
pub use stream::{
    ChannelHandler, ChannelMessage, ConnectionState, StreamClient, StreamEvent, SubscriptionInfo,
    SubscriptionState, TungsteniteConnector,
};
pub use traits::*;
