use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Control channel message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Client -> Server
    Auth,
    Start,
    Stop,
    Config,
    Ping,

    // Server -> Client
    AuthOk,
    AuthFail,
    SessionBusy,
    SessionStarted,
    SessionStopped,
    Realtime,
    Final,
    Pong,
    Error,
    Status,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Auth => "auth",
            MessageType::Start => "start",
            MessageType::Stop => "stop",
            MessageType::Config => "config",
            MessageType::Ping => "ping",
            MessageType::AuthOk => "auth_ok",
            MessageType::AuthFail => "auth_fail",
            MessageType::SessionBusy => "session_busy",
            MessageType::SessionStarted => "session_started",
            MessageType::SessionStopped => "session_stopped",
            MessageType::Realtime => "realtime",
            MessageType::Final => "final",
            MessageType::Pong => "pong",
            MessageType::Error => "error",
            MessageType::Status => "status",
        }
    }

    pub fn parse(s: &str) -> Option<MessageType> {
        let kind = match s {
            "auth" => MessageType::Auth,
            "start" => MessageType::Start,
            "stop" => MessageType::Stop,
            "config" => MessageType::Config,
            "ping" => MessageType::Ping,
            "auth_ok" => MessageType::AuthOk,
            "auth_fail" => MessageType::AuthFail,
            "session_busy" => MessageType::SessionBusy,
            "session_started" => MessageType::SessionStarted,
            "session_stopped" => MessageType::SessionStopped,
            "realtime" => MessageType::Realtime,
            "final" => MessageType::Final,
            "pong" => MessageType::Pong,
            "error" => MessageType::Error,
            "status" => MessageType::Status,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A control channel message: UTF-8 JSON `{type, data, timestamp}`.
///
/// `data` is always a JSON object; unknown fields inside it are preserved
/// verbatim so clients can round-trip extensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub data: Value,
    pub timestamp: f64,
}

/// Relaxed shape used for decoding, so a bad `type` string can be reported
/// as `unknown_type` rather than a generic parse failure.
#[derive(Deserialize)]
struct RawControlMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    timestamp: Option<f64>,
}

pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl ControlMessage {
    pub fn new(kind: MessageType, data: Value) -> Self {
        ControlMessage {
            kind,
            data,
            timestamp: unix_timestamp(),
        }
    }

    /// Decode from the wire. Missing `data` defaults to `{}`; missing
    /// `timestamp` defaults to the receive time; extra fields are ignored.
    pub fn from_json(text: &str) -> Result<ControlMessage, ProtocolError> {
        let raw: RawControlMessage = serde_json::from_str(text)?;
        let kind_str = raw.kind.ok_or(ProtocolError::MissingType)?;
        let kind = MessageType::parse(&kind_str)
            .ok_or_else(|| ProtocolError::UnknownType(kind_str))?;
        Ok(ControlMessage {
            kind,
            data: raw.data.unwrap_or_else(|| Value::Object(Map::new())),
            timestamp: raw.timestamp.unwrap_or_else(unix_timestamp),
        })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// String-valued entry of `data`, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn data_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }

    // ---- client -> server ----

    pub fn auth(token: &str) -> Self {
        Self::new(MessageType::Auth, json!({ "token": token }))
    }

    pub fn start(
        language: Option<&str>,
        enable_realtime: bool,
        word_timestamps: bool,
    ) -> Self {
        Self::new(
            MessageType::Start,
            json!({
                "language": language,
                "enable_realtime": enable_realtime,
                "word_timestamps": word_timestamps,
            }),
        )
    }

    pub fn stop() -> Self {
        Self::new(MessageType::Stop, json!({}))
    }

    pub fn ping() -> Self {
        Self::new(MessageType::Ping, json!({}))
    }

    // ---- server -> client ----

    pub fn auth_ok(client_name: &str, is_admin: bool) -> Self {
        Self::new(
            MessageType::AuthOk,
            json!({ "user": { "name": client_name, "is_admin": is_admin } }),
        )
    }

    pub fn auth_fail(message: &str) -> Self {
        Self::new(MessageType::AuthFail, json!({ "message": message }))
    }

    pub fn session_busy(active_client: &str) -> Self {
        Self::new(
            MessageType::SessionBusy,
            json!({
                "message": "Another user is using the server",
                "active_client": active_client,
            }),
        )
    }

    pub fn session_started(config: Value) -> Self {
        Self::new(MessageType::SessionStarted, json!({ "config": config }))
    }

    pub fn session_stopped(message: &str) -> Self {
        Self::new(MessageType::SessionStopped, json!({ "message": message }))
    }

    pub fn pong() -> Self {
        Self::new(MessageType::Pong, json!({}))
    }

    pub fn error(message: &str, code: &str) -> Self {
        Self::new(
            MessageType::Error,
            json!({ "message": message, "code": code }),
        )
    }

    pub fn status(data: Value) -> Self {
        Self::new(MessageType::Status, data)
    }
}
