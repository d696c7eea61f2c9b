//! 실시간 채널 멀티플렉서.
//!
//! 하나의 WebSocket 연결 위에서 여러 채널 구독을 공유합니다.
//! - [`ChannelRegistry`]: 채널별 콜백과 구독 상태
//! - [`SubscriptionDriver`]: 구독/해제 요청, 응답 매칭, 타임아웃
//! - [`ConnectionManager`]: 연결 수명과 재연결 백오프
//! - [`StreamClient`]: 위 구성 요소를 소유하는 이벤트 루프의 핸들

mod actor;
pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod driver;
pub mod protocol;
pub mod registry;

pub use client::{StreamClient, StreamEvent};
pub use connection::{ConnectionManager, ConnectionState, TungsteniteConnector, API_KEY_HEADER};
pub use driver::SubscriptionDriver;
pub use protocol::{ControlFrame, ControlOp, InboundFrame};
pub use registry::{
    ChannelHandler, ChannelMessage, ChannelRegistry, SubscriptionInfo, SubscriptionState,
};
