//! 설정 관리.
//!
//! TOML 파일과 `PAIRLINK__` 접두사 환경 변수에서 설정을 로드합니다.
//! 예: `PAIRLINK__STREAM__ACK_TIMEOUT_MS=5000`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// 거래소 접속 설정
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// 실시간 스트림 설정
    #[serde(default)]
    pub stream: StreamConfig,
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 거래소 접속 설정.
///
/// # 보안
/// - `Debug` 구현은 `api_key`를 마스킹합니다.
#[derive(Clone, Deserialize, Serialize)]
pub struct ExchangeConfig {
    /// REST API 기본 URL
    pub rest_base_url: String,
    /// WebSocket URL
    pub ws_url: String,
    /// API 키 (인증 채널 및 개인 REST 엔드포인트용)
    #[serde(default)]
    pub api_key: Option<String>,
    /// REST 요청 타임아웃 (초)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 실시간 스트림 비활성화 (REST 전용 모드)
    #[serde(default)]
    pub disable_ws: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_base_url: "https://api.pairlink.exchange/v1".to_string(),
            ws_url: "wss://ws.pairlink.exchange/v1".to_string(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            disable_ws: false,
        }
    }
}

impl fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked_key = self.api_key.as_ref().map(|key| {
            if key.len() > 8 {
                format!("{}...{}", &key[..4], &key[key.len() - 4..])
            } else {
                "***REDACTED***".to_string()
            }
        });

        f.debug_struct("ExchangeConfig")
            .field("rest_base_url", &self.rest_base_url)
            .field("ws_url", &self.ws_url)
            .field("api_key", &masked_key)
            .field("timeout_secs", &self.timeout_secs)
            .field("disable_ws", &self.disable_ws)
            .finish()
    }
}

impl ExchangeConfig {
    /// 기본 URL로 새 설정을 생성합니다.
    pub fn new(rest_base_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            rest_base_url: rest_base_url.into(),
            ws_url: ws_url.into(),
            ..Default::default()
        }
    }

    /// API 키를 설정합니다.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// 실시간 스트림 사용 여부를 설정합니다.
    pub fn with_disable_ws(mut self, disable_ws: bool) -> Self {
        self.disable_ws = disable_ws;
        self
    }

    /// REST 요청 타임아웃.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 실시간 스트림 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// 구독/구독 해제 응답 대기 시간 (밀리초)
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// 연결 핸드셰이크 타임아웃 (밀리초)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Ping 간격 (초, 0이면 비활성화)
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// 이벤트 브로드캐스트 채널 용량
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// 재연결 정책
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_ack_timeout_ms() -> u64 {
    10_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_event_capacity() -> usize {
    256
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            event_capacity: default_event_capacity(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl StreamConfig {
    /// 응답 대기 시간.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// 연결 핸드셰이크 타임아웃.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Ping 간격. 비활성화되어 있으면 `None`.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

/// 재연결 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconnectConfig {
    /// 최대 재연결 시도 횟수
    pub max_attempts: u32,
    /// 첫 재연결 대기 시간 (밀리초)
    pub initial_delay_ms: u64,
    /// 최대 대기 시간 (밀리초)
    pub max_delay_ms: u64,
    /// 백오프 배수
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// `attempt`번째(1부터) 재연결 전 대기 시간을 계산합니다.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 기본 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
    /// 모듈별 추가 필터 (예: "pairlink_exchange::stream=debug")
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directives: Vec::new(),
        }
    }
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("PAIRLINK")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> Result<Self, config::ConfigError> {
        Self::load("config/default.toml")
    }
}
