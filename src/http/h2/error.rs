//! HTTP/2 error types
//!
//! Error kinds for engine operations plus the RFC 7540 Section 7 error
//! codes carried by RST_STREAM and GOAWAY frames.

use std::fmt;

/// HTTP/2 errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::Error),

    /// Protocol violation (error code 0x1).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Implementation fault (error code 0x2).
    #[error("internal error: {0}")]
    Internal(String),

    /// Flow-control accounting violated (error code 0x3).
    #[error("flow control error: {0}")]
    FlowControl(String),

    /// Settings not acknowledged in time (error code 0x4).
    #[error("settings timeout")]
    SettingsTimeout,

    /// Frame received on a closed stream (error code 0x5).
    #[error("stream closed: {0}")]
    StreamClosed(u32),

    /// Frame size incorrect (error code 0x6).
    #[error("frame size error: {0}")]
    FrameSize(String),

    /// Stream refused before processing (error code 0x7); safe to retry.
    #[error("refused stream: {0}")]
    RefusedStream(u32),

    /// Stream cancelled (error code 0x8).
    #[error("stream cancelled: {0}")]
    Cancel(u32),

    /// HPACK state broken (error code 0x9).
    #[error("compression error: {0}")]
    Compression(String),

    /// CONNECT tunnel failed (error code 0xa).
    #[error("connect error: {0}")]
    Connect(String),

    /// Processing capacity exceeded (error code 0xb).
    #[error("enhance your calm")]
    EnhanceYourCalm,

    /// TLS parameters not acceptable (error code 0xc).
    #[error("inadequate security")]
    InadequateSecurity,

    /// Peer demands HTTP/1.1 (error code 0xd).
    #[error("HTTP/1.1 required")]
    Http11Required,

    /// Peer sent GOAWAY; streams above `last_stream_id` were not processed.
    #[error("connection going away: last stream {last_stream_id}, {code}")]
    GoAway {
        last_stream_id: u32,
        code: ErrorCode,
    },

    #[error("stream not found: {0}")]
    StreamNotFound(u32),

    #[error("invalid settings value: {0}")]
    InvalidSettings(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("missing connection preface")]
    MissingPreface,

    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// RFC 7540 code to put on the wire when escalating this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Protocol(_) | Error::MissingPreface | Error::InvalidHeader(_) => {
                ErrorCode::ProtocolError
            }
            Error::FlowControl(_) => ErrorCode::FlowControlError,
            Error::SettingsTimeout => ErrorCode::SettingsTimeout,
            Error::StreamClosed(_) => ErrorCode::StreamClosed,
            Error::FrameSize(_) => ErrorCode::FrameSizeError,
            Error::RefusedStream(_) => ErrorCode::RefusedStream,
            Error::Cancel(_) => ErrorCode::Cancel,
            Error::Compression(_) => ErrorCode::CompressionError,
            Error::Connect(_) => ErrorCode::ConnectError,
            Error::EnhanceYourCalm => ErrorCode::EnhanceYourCalm,
            Error::InadequateSecurity => ErrorCode::InadequateSecurity,
            Error::Http11Required => ErrorCode::Http11Required,
            Error::InvalidSettings(_) => ErrorCode::ProtocolError,
            Error::GoAway { code, .. } => *code,
            _ => ErrorCode::InternalError,
        }
    }

    /// Reconstruct an error from a wire code attached to a stream.
    pub fn from_code(code: ErrorCode, stream_id: u32) -> Error {
        match code {
            ErrorCode::NoError => Error::StreamClosed(stream_id),
            ErrorCode::ProtocolError => Error::Protocol(format!("stream {}", stream_id)),
            ErrorCode::InternalError => Error::Internal(format!("stream {}", stream_id)),
            ErrorCode::FlowControlError => Error::FlowControl(format!("stream {}", stream_id)),
            ErrorCode::SettingsTimeout => Error::SettingsTimeout,
            ErrorCode::StreamClosed => Error::StreamClosed(stream_id),
            ErrorCode::FrameSizeError => Error::FrameSize(format!("stream {}", stream_id)),
            ErrorCode::RefusedStream => Error::RefusedStream(stream_id),
            ErrorCode::Cancel => Error::Cancel(stream_id),
            ErrorCode::CompressionError => Error::Compression(format!("stream {}", stream_id)),
            ErrorCode::ConnectError => Error::Connect(format!("stream {}", stream_id)),
            ErrorCode::EnhanceYourCalm => Error::EnhanceYourCalm,
            ErrorCode::InadequateSecurity => Error::InadequateSecurity,
            ErrorCode::Http11Required => Error::Http11Required,
        }
    }

    /// Whether this error poisons the whole connection rather than one
    /// stream.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_)
                | Error::FlowControl(_)
                | Error::FrameSize(_)
                | Error::Compression(_)
                | Error::MissingPreface
                | Error::InvalidSettings(_)
                | Error::GoAway { .. }
                | Error::ConnectionClosed
        )
    }
}

/// HTTP/2 error codes as defined in RFC 7540 Section 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(ErrorCode::NoError),
            0x1 => Some(ErrorCode::ProtocolError),
            0x2 => Some(ErrorCode::InternalError),
            0x3 => Some(ErrorCode::FlowControlError),
            0x4 => Some(ErrorCode::SettingsTimeout),
            0x5 => Some(ErrorCode::StreamClosed),
            0x6 => Some(ErrorCode::FrameSizeError),
            0x7 => Some(ErrorCode::RefusedStream),
            0x8 => Some(ErrorCode::Cancel),
            0x9 => Some(ErrorCode::CompressionError),
            0xa => Some(ErrorCode::ConnectError),
            0xb => Some(ErrorCode::EnhanceYourCalm),
            0xc => Some(ErrorCode::InadequateSecurity),
            0xd => Some(ErrorCode::Http11Required),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(ErrorCode::NoError.as_u32(), 0x0);
        assert_eq!(ErrorCode::ProtocolError.as_u32(), 0x1);
        assert_eq!(ErrorCode::Http11Required.as_u32(), 0xd);

        assert_eq!(ErrorCode::from_u32(0x3), Some(ErrorCode::FlowControlError));
        assert_eq!(ErrorCode::from_u32(0xff), None);
    }

    #[test]
    fn test_error_to_code() {
        assert_eq!(
            Error::Protocol("x".to_string()).code(),
            ErrorCode::ProtocolError
        );
        assert_eq!(Error::StreamClosed(1).code(), ErrorCode::StreamClosed);
        assert_eq!(Error::RefusedStream(9).code(), ErrorCode::RefusedStream);
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(Error::Protocol("x".to_string()).is_connection_error());
        assert!(Error::Compression("x".to_string()).is_connection_error());
        assert!(!Error::StreamClosed(1).is_connection_error());
        assert!(!Error::Cancel(1).is_connection_error());
    }
}
