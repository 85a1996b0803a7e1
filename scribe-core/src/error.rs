use thiserror::Error;

/// Errors produced while decoding wire frames.
///
/// These never terminate a streaming session on their own; the server
/// decides per call site whether to reply with an `error` control message
/// or to skip the offending frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The binary frame ended before the declared payload did.
    #[error("incomplete frame: {0}")]
    Truncated(&'static str),

    /// The frame carried JSON that failed to parse.
    #[error("invalid JSON: {0}")]
    BadJson(#[from] serde_json::Error),

    /// A control message whose `type` is not part of the protocol.
    #[error("unrecognized message type: {0}")]
    UnknownType(String),

    /// A control message without a `type` field at all.
    #[error("control message missing `type`")]
    MissingType,

    /// Sample-rate conversion failed.
    #[error("resample failed: {0}")]
    Resample(String),
}

impl ProtocolError {
    /// Wire-level error code carried in `error` control messages.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Truncated(_) => "bad_frame",
            ProtocolError::BadJson(_) | ProtocolError::MissingType => "parse_error",
            ProtocolError::UnknownType(_) => "unknown_type",
            ProtocolError::Resample(_) => "bad_audio",
        }
    }
}
