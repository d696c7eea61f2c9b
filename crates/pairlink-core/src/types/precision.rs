//! 호가창/펀딩북 가격 정밀도.
//!
//! 정밀도는 가격 구간의 단위이며, 채널 키와 REST 요청에서는 항상
//! 대문자 지수 표기 문자열(예: `1E-1`)로 정규화되어 사용됩니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// 정규화된 가격 정밀도.
///
/// `0.1`, `"0.1"`, `"1e-1"`, `"1E-1"`은 모두 같은 값 `1E-1`이 됩니다.
/// 숫자로 해석할 수 없는 문자열(예: 거래소 고유 코드)은 공백만 제거한 뒤
/// 그대로 보존합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Precision(String);

impl Precision {
    /// Decimal 값에서 정밀도를 생성합니다.
    pub fn from_decimal(value: Decimal) -> Self {
        Self(to_exponential(value))
    }

    /// 문자열을 파싱하여 정규화합니다.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match parse_decimal(trimmed) {
            Some(value) => Self::from_decimal(value),
            None => Self(trimmed.to_string()),
        }
    }

    /// 정규화된 문자열을 반환합니다.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 숫자 정밀도라면 Decimal 값을 반환합니다.
    pub fn to_decimal(&self) -> Option<Decimal> {
        parse_decimal(&self.0)
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    if raw.is_empty() {
        return None;
    }
    if raw.contains(['e', 'E']) {
        Decimal::from_scientific(&raw.to_ascii_lowercase()).ok()
    } else {
        Decimal::from_str(raw).ok()
    }
}

/// Decimal 값을 대문자 지수 표기로 변환합니다.
///
/// 가수는 의미 있는 자릿수만 남깁니다: `0.1 -> 1E-1`, `0.25 -> 2.5E-1`,
/// `10 -> 1E+1`, `1 -> 1E+0`.
pub fn to_exponential(value: Decimal) -> String {
    if value.is_zero() {
        return "0E+0".to_string();
    }

    let normalized = value.normalize();
    let mantissa = normalized.mantissa();
    let digits = mantissa.unsigned_abs().to_string();
    let exponent = digits.len() as i64 - 1 - i64::from(normalized.scale());
    let significant = digits.trim_end_matches('0');
    let (head, tail) = significant.split_at(1);

    let mut out = String::with_capacity(significant.len() + 6);
    if mantissa < 0 {
        out.push('-');
    }
    out.push_str(head);
    if !tail.is_empty() {
        out.push('.');
        out.push_str(tail);
    }
    out.push('E');
    if exponent >= 0 {
        out.push('+');
    }
    out.push_str(&exponent.to_string());
    out
}

impl From<Decimal> for Precision {
    fn from(value: Decimal) -> Self {
        Self::from_decimal(value)
    }
}

impl From<&str> for Precision {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for Precision {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<Precision> for String {
    fn from(precision: Precision) -> Self {
        precision.0
    }
}

impl FromStr for Precision {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
