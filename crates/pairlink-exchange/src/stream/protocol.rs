//! 실시간 스트림 와이어 프로토콜.
//!
//! 송신 제어 프레임:
//! ```json
//! {"op":"subscribe","channel":"orderbook","params":{"trading_pair_id":"BTC-USDT","precision":"1E-1"},"id":1}
//! ```
//!
//! 수신 프레임은 세 종류입니다.
//! - 데이터: `{"channel":..,"params":..,"data":..}`
//! - 응답(ack): 요청의 `op`, `channel`, `params`, `id`를 그대로 돌려줌
//! - 에러: 응답 형식에 `"error"` 필드가 추가됨

use pairlink_core::ChannelKey;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::ExchangeResult;

/// 제어 프레임 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlOp {
    Subscribe,
    Unsubscribe,
}

impl ControlOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlOp::Subscribe => "subscribe",
            ControlOp::Unsubscribe => "unsubscribe",
        }
    }

    fn from_wire(name: &str) -> Option<Self> {
        match name {
            "subscribe" => Some(ControlOp::Subscribe),
            "unsubscribe" => Some(ControlOp::Unsubscribe),
            _ => None,
        }
    }
}

impl std::fmt::Display for ControlOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 송신 제어 프레임.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFrame {
    pub op: ControlOp,
    pub channel: &'static str,
    pub params: Value,
    pub id: u64,
}

impl ControlFrame {
    /// 채널 키에 대한 제어 프레임을 생성합니다.
    pub fn new(op: ControlOp, key: &ChannelKey, id: u64) -> Self {
        Self {
            op,
            channel: key.kind().as_str(),
            params: key.params_json(),
            id,
        }
    }

    /// JSON 값으로 변환합니다.
    pub fn to_value(&self) -> Value {
        json!({
            "op": self.op.as_str(),
            "channel": self.channel,
            "params": self.params,
            "id": self.id,
        })
    }

    /// 전송할 JSON 텍스트.
    pub fn to_text(&self) -> String {
        self.to_value().to_string()
    }
}

/// 분류된 수신 프레임.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// 채널 데이터
    Data { key: ChannelKey, data: Value },
    /// 구독/구독 해제 성공 응답
    Ack {
        op: ControlOp,
        key: ChannelKey,
        id: Option<u64>,
    },
    /// 에러 응답. 요청을 특정할 수 없으면 `key`와 `id`가 비어 있습니다.
    Error {
        op: Option<ControlOp>,
        key: Option<ChannelKey>,
        id: Option<u64>,
        reason: String,
    },
    /// 알 수 없는 형식 (무시)
    Unknown,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    params: Option<Map<String, Value>>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// 수신 텍스트 프레임을 파싱하고 분류합니다.
///
/// JSON이 아니면 `ParseError`를 반환합니다. JSON이지만 의미를 알 수
/// 없는 프레임은 [`InboundFrame::Unknown`]이 됩니다.
pub fn parse_inbound(text: &str) -> ExchangeResult<InboundFrame> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Ok(InboundFrame::Unknown);
    }
    let raw: RawFrame = serde_json::from_value(value)?;

    let op = raw.op.as_deref().and_then(ControlOp::from_wire);
    let id = raw.id.as_ref().and_then(Value::as_u64);
    let key = raw
        .channel
        .as_deref()
        .and_then(|channel| ChannelKey::from_wire(channel, raw.params.as_ref()));

    if let Some(error) = raw.error {
        let reason = match error {
            Value::String(s) => s,
            other => other.to_string(),
        };
        return Ok(InboundFrame::Error {
            op,
            key,
            id,
            reason,
        });
    }

    if let Some(data) = raw.data {
        return Ok(match key {
            Some(key) => InboundFrame::Data { key, data },
            None => InboundFrame::Unknown,
        });
    }

    match (op, key) {
        (Some(op), Some(key)) => Ok(InboundFrame::Ack {
            op,
            key,
            id,
        }),
        _ => Ok(InboundFrame::Unknown),
    }
}
