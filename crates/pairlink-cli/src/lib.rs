//! Pairlink CLI 도구.
//!
//! - 실시간 채널 구독 후 프레임 출력 (`watch-*`)
//! - REST 조회 결과 JSON 출력

pub mod commands;
