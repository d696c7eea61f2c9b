//! # Pairlink Core
//!
//! 거래소 클라이언트의 공통 타입, 설정, 로깅을 제공합니다.
//!
//! - 채널 식별자 ([`ChannelKey`], [`ChannelKind`])
//! - 가격 정밀도 정규화 ([`Precision`])
//! - 캔들 타임프레임, 주문 방향
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod logging;
pub mod types;

pub use config::*;
pub use logging::*;
pub use types::*;
