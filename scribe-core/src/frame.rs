use crate::audio::AudioChunk;
use crate::control::ControlMessage;
use crate::error::ProtocolError;

/// A decoded WebSocket frame. Text frames carry control messages, binary
/// frames carry audio; callers dispatch by matching.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Control(ControlMessage),
    Audio(AudioChunk),
}

impl Frame {
    pub fn from_text(text: &str) -> Result<Frame, ProtocolError> {
        ControlMessage::from_json(text).map(Frame::Control)
    }

    pub fn from_binary(data: &[u8]) -> Result<Frame, ProtocolError> {
        AudioChunk::from_bytes(data).map(Frame::Audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SAMPLE_RATE;

    #[test]
    fn test_text_dispatch() {
        let frame = Frame::from_text(r#"{"type": "ping"}"#).unwrap();
        assert!(matches!(frame, Frame::Control(_)));
    }

    #[test]
    fn test_binary_dispatch() {
        let chunk = AudioChunk::new(vec![0u8, 0], SAMPLE_RATE, 0, 1);
        let wire = chunk.to_bytes().unwrap();
        let frame = Frame::from_binary(&wire).unwrap();
        assert_eq!(frame, Frame::Audio(chunk));
    }

    #[test]
    fn test_binary_error_propagates() {
        assert!(Frame::from_binary(&[0]).is_err());
    }
}
