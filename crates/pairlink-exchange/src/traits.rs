//! 전송 계층 trait 정의.
//!
//! 실시간 스트림은 [`Connector`]가 돌려주는 [`Link`]만 사용하므로
//! 실제 WebSocket 대신 메모리 파이프를 연결해 테스트할 수 있습니다.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::ExchangeError;

/// 거래소 작업을 위한 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// 전송 계층에서 주고받는 프레임.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// JSON 텍스트 프레임
    Text(String),
    /// Ping 프레임
    Ping(Vec<u8>),
    /// Pong 프레임
    Pong(Vec<u8>),
}

impl WireMessage {
    /// 텍스트 프레임이면 내용을 반환합니다.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WireMessage::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// 송신 방향 프레임 싱크.
pub type FrameSink = Pin<Box<dyn Sink<WireMessage, Error = ExchangeError> + Send>>;

/// 수신 방향 프레임 스트림. 스트림 종료는 연결 끊김을 의미합니다.
pub type FrameStream = Pin<Box<dyn Stream<Item = ExchangeResult<WireMessage>> + Send>>;

/// 열린 전송 연결 하나.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Link {
    /// 싱크와 스트림으로 연결을 구성합니다.
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// 실시간 전송 연결을 생성하는 trait.
///
/// 호출될 때마다 새 연결을 열어야 합니다. 재연결 시에도 같은
/// 커넥터가 다시 호출됩니다.
#[async_trait]
pub trait Connector: Send + Sync {
    /// 새 연결을 엽니다.
    async fn connect(&self) -> ExchangeResult<Link>;
}
