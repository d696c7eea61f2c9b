//! tracing 기반 로깅 설정.
//!
//! 기본 레벨에 모듈별 지시어를 더해 필터를 만듭니다. `RUST_LOG`가 있으면
//! 기본 레벨 대신 사용되고, 설정 파일의 지시어는 그 위에 추가됩니다.
//!
//! 스트림 디버깅 예: `directives = ["pairlink_exchange::stream=debug"]`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::{
    filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

/// 로깅 초기화 에러.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// 필터 지시어 파싱 실패
    #[error("invalid log filter `{directive}`: {reason}")]
    InvalidFilter { directive: String, reason: String },

    /// 전역 subscriber가 이미 설정됨
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// 개발용 여러 줄 형식
    #[default]
    Pretty,
    /// 수집기용 JSON 한 줄
    Json,
    /// 간결한 한 줄
    Compact,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [LogFormat::Pretty, LogFormat::Json, LogFormat::Compact]
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown log format: {}", s))
    }
}

/// 로깅 초기화 옵션.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 기본 레벨 (`RUST_LOG`가 없을 때)
    pub level: String,
    pub format: LogFormat,
    /// 모듈별 추가 지시어
    pub directives: Vec<String>,
    /// span 시작/종료 이벤트 출력
    pub span_events: bool,
    /// 파일명과 줄 번호 출력
    pub file_and_line: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directives: Vec::new(),
            span_events: false,
            file_and_line: false,
        }
    }
}

impl LogConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// 모듈별 지시어를 추가합니다 (예: `"pairlink_exchange=trace"`).
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    /// `LOG_LEVEL`, `LOG_FORMAT` 환경 변수에서 생성합니다.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.level = level;
        }
        if let Some(format) = std::env::var("LOG_FORMAT").ok().and_then(|s| s.parse().ok()) {
            config.format = format;
        }
        config
    }

    /// 필터를 생성합니다.
    pub fn filter(&self) -> Result<EnvFilter, LoggingError> {
        let base = match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(env) if !env.trim().is_empty() => env,
            _ => self.level.clone(),
        };
        let mut filter = EnvFilter::try_new(&base).map_err(|e| LoggingError::InvalidFilter {
            directive: base.clone(),
            reason: e.to_string(),
        })?;

        for directive in &self.directives {
            let parsed = directive
                .parse::<Directive>()
                .map_err(|e| LoggingError::InvalidFilter {
                    directive: directive.clone(),
                    reason: e.to_string(),
                })?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            level: config.level.clone(),
            format: config.format.parse().unwrap_or_default(),
            directives: config.directives.clone(),
            ..Default::default()
        }
    }
}

/// 전역 subscriber를 설정합니다. 프로세스에서 한 번만 호출할 수 있습니다.
///
/// ```no_run
/// use pairlink_core::logging::{init_logging, LogConfig, LogFormat};
///
/// init_logging(
///     LogConfig::new("info")
///         .with_format(LogFormat::Json)
///         .with_directive("pairlink_exchange::stream=debug"),
/// )
/// .unwrap();
/// ```
pub fn init_logging(config: LogConfig) -> Result<(), LoggingError> {
    let filter = config.filter()?;

    let spans = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_file(config.file_and_line)
        .with_line_number(config.file_and_line)
        .with_span_events(spans);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::debug!(
        format = %config.format,
        level = %config.level,
        directives = ?config.directives,
        "Logging initialized"
    );
    Ok(())
}
