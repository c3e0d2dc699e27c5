//! WebSocket wire format
//!
//! Every frame is a JSON-encoded [`WsMessage`] in a text frame. A `call` is
//! answered by exactly one `response` or `error` with the same `id`; a `ping`
//! by a `pong` echoing its `id`.

use crate::error::{PortalError, PortalResult};
use portico_core::FunctionData;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Call,
    Response,
    Error,
    Ping,
    Pong,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Call => "call",
            MessageType::Response => "response",
            MessageType::Error => "error",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
        }
    }
}

/// One WebSocket frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Correlation token chosen by the sender of the `call` or `ping`
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Error code of an `error` frame, so the caller can rebuild the kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Unix milliseconds at the sender
    #[serde(default)]
    pub timestamp: i64,
}

impl WsMessage {
    fn new(kind: MessageType, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            function: None,
            service: None,
            method: None,
            data: None,
            error: None,
            code: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn call_function(id: impl Into<String>, function: impl Into<String>, data: FunctionData) -> Self {
        Self {
            function: Some(function.into()),
            data: Some(data.into_json()),
            ..Self::new(MessageType::Call, id)
        }
    }

    pub fn call_method(
        id: impl Into<String>,
        service: impl Into<String>,
        method: impl Into<String>,
        data: FunctionData,
    ) -> Self {
        Self {
            service: Some(service.into()),
            method: Some(method.into()),
            data: Some(data.into_json()),
            ..Self::new(MessageType::Call, id)
        }
    }

    pub fn response(id: impl Into<String>, data: FunctionData) -> Self {
        Self {
            data: Some(data.into_json()),
            ..Self::new(MessageType::Response, id)
        }
    }

    pub fn error(id: impl Into<String>, error: &PortalError) -> Self {
        Self {
            error: Some(error.message()),
            code: Some(error.code().to_string()),
            ..Self::new(MessageType::Error, id)
        }
    }

    pub fn ping(id: impl Into<String>) -> Self {
        Self::new(MessageType::Ping, id)
    }

    pub fn pong(id: impl Into<String>) -> Self {
        Self::new(MessageType::Pong, id)
    }

    /// Server push with an arbitrary payload
    pub fn push(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(MessageType::Response, uuid::Uuid::new_v4().to_string())
        }
    }

    pub fn encode(&self) -> PortalResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> PortalResult<Self> {
        serde_json::from_str(text).map_err(|e| {
            PortalError::invalid_argument(format!("malformed WebSocket message: {}", e))
        })
    }

    /// Best-effort `id` of a frame that failed to decode
    pub(crate) fn salvage_id(text: &str) -> String {
        serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|value| value.get("id")?.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    /// Payload of a `call`; missing or null data is an empty map
    pub(crate) fn call_input(&mut self) -> PortalResult<FunctionData> {
        match self.data.take() {
            None | Some(Value::Null) => Ok(FunctionData::new()),
            Some(Value::Object(map)) => Ok(FunctionData::from(map)),
            Some(_) => Err(PortalError::invalid_argument("call data must be a JSON object")),
        }
    }

    /// Outcome carried by a `response` or `error` frame
    pub fn into_result(self, function: &str) -> PortalResult<FunctionData> {
        match self.kind {
            MessageType::Response => Ok(FunctionData::from(self.data.unwrap_or(Value::Null))),
            MessageType::Error => Err(PortalError::from_wire(
                self.code.as_deref().unwrap_or("EXECUTION_FAILED"),
                self.error.unwrap_or_default(),
                function,
            )),
            other => Err(PortalError::transport(
                "ws",
                format!("expected a response to '{}', got '{}'", function, other.as_str()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_wire_shape() {
        let ping = WsMessage::decode(r#"{"type":"ping","id":"p1"}"#).unwrap();
        assert_eq!(ping.kind, MessageType::Ping);
        assert_eq!(ping.id, "p1");

        let pong: Value = serde_json::from_str(&WsMessage::pong("p1").encode().unwrap()).unwrap();
        assert_eq!(pong["type"], "pong");
        assert_eq!(pong["id"], "p1");
        assert!(pong.get("function").is_none());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let text = r#"{"type":"subscribe","id":"s1"}"#;
        assert!(matches!(
            WsMessage::decode(text),
            Err(PortalError::InvalidArgument { .. })
        ));
        assert_eq!(WsMessage::salvage_id(text), "s1");
        assert_eq!(WsMessage::salvage_id("not json"), "");
    }

    #[test]
    fn test_call_input() {
        let mut call = WsMessage::decode(r#"{"type":"call","id":"1","function":"f"}"#).unwrap();
        assert!(call.call_input().unwrap().is_empty());

        let mut call =
            WsMessage::decode(r#"{"type":"call","id":"1","function":"f","data":[1]}"#).unwrap();
        assert!(call.call_input().is_err());
    }

    #[test]
    fn test_error_frame_keeps_kind() {
        let frame = WsMessage::error("c1", &PortalError::not_found("function 'ghost'"));
        assert_eq!(frame.code.as_deref(), Some("NOT_FOUND"));

        let decoded = WsMessage::decode(&frame.encode().unwrap()).unwrap();
        match decoded.into_result("ghost") {
            Err(PortalError::NotFound { what }) => assert_eq!(what, "function 'ghost'"),
            other => panic!("unexpected {:?}", other),
        }

        let ok = WsMessage::response("c2", FunctionData::new().with("sum", 3));
        assert_eq!(ok.into_result("add").unwrap().get_i64("sum"), Some(3));
    }
}
