use std::borrow::Cow;

use derive_more::Display;
use thiserror::Error;

use crate::frame::FrameType;

/// QUIC transport error codes.
///
/// See [section-20.1](https://www.rfc-editor.org/rfc/rfc9000.html#section-20.1)
/// of [QUIC](https://www.rfc-editor.org/rfc/rfc9000.html).
#[derive(Debug, Display, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    #[display("NO_ERROR")]
    None,
    #[display("INTERNAL_ERROR")]
    Internal,
    #[display("CONNECTION_REFUSED")]
    ConnectionRefused,
    #[display("FLOW_CONTROL_ERROR")]
    FlowControl,
    #[display("STREAM_LIMIT_ERROR")]
    StreamLimit,
    #[display("STREAM_STATE_ERROR")]
    StreamState,
    #[display("FINAL_SIZE_ERROR")]
    FinalSize,
    #[display("FRAME_ENCODING_ERROR")]
    FrameEncoding,
    #[display("TRANSPORT_PARAMETER_ERROR")]
    TransportParameter,
    #[display("CONNECTION_ID_LIMIT_ERROR")]
    ConnectionIdLimit,
    #[display("PROTOCOL_VIOLATION")]
    ProtocolViolation,
    #[display("INVALID_TOKEN")]
    InvalidToken,
    #[display("APPLICATION_ERROR")]
    Application,
    #[display("CRYPTO_BUFFER_EXCEEDED")]
    CryptoBufferExceeded,
    #[display("KEY_UPDATE_ERROR")]
    KeyUpdate,
    #[display("AEAD_LIMIT_REACHED")]
    AeadLimitReached,
    #[display("NO_VIABLE_PATH")]
    NoViablePath,
    #[display("CRYPTO_ERROR({_0:#x})")]
    Crypto(u8),
}

impl From<ErrorKind> for u64 {
    fn from(value: ErrorKind) -> Self {
        match value {
            ErrorKind::None => 0x00,
            ErrorKind::Internal => 0x01,
            ErrorKind::ConnectionRefused => 0x02,
            ErrorKind::FlowControl => 0x03,
            ErrorKind::StreamLimit => 0x04,
            ErrorKind::StreamState => 0x05,
            ErrorKind::FinalSize => 0x06,
            ErrorKind::FrameEncoding => 0x07,
            ErrorKind::TransportParameter => 0x08,
            ErrorKind::ConnectionIdLimit => 0x09,
            ErrorKind::ProtocolViolation => 0x0a,
            ErrorKind::InvalidToken => 0x0b,
            ErrorKind::Application => 0x0c,
            ErrorKind::CryptoBufferExceeded => 0x0d,
            ErrorKind::KeyUpdate => 0x0e,
            ErrorKind::AeadLimitReached => 0x0f,
            ErrorKind::NoViablePath => 0x10,
            ErrorKind::Crypto(x) => 0x0100 + x as u64,
        }
    }
}

/// A connection error.
///
/// Fatal: the connection has to be closed with `kind` as the error code.
/// `frame_type` names the frame that triggered it, [`FrameType::Padding`]
/// when no frame was involved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {reason}")]
pub struct Error {
    pub kind: ErrorKind,
    pub frame_type: FrameType,
    pub reason: Cow<'static, str>,
}

impl Error {
    pub fn new(
        kind: ErrorKind,
        frame_type: FrameType,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            kind,
            frame_type,
            reason: reason.into(),
        }
    }

    /// Shortcut for the error every misbehaving peer ends up with.
    pub fn protocol_violation(
        frame_type: FrameType,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(ErrorKind::ProtocolViolation, frame_type, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = Error::protocol_violation(
            FrameType::Ack(0),
            "Received ACK for an unsent packet",
        );
        assert_eq!(
            error.to_string(),
            "PROTOCOL_VIOLATION: Received ACK for an unsent packet"
        );
        assert_eq!(u64::from(error.kind), 0x0a);
        assert_eq!(u64::from(ErrorKind::Crypto(0x28)), 0x0128);
    }
}
