//! HTTP layer
//!
//! Version-indifferent types shared by the HTTP/1 codec, the HTTP/2 engine,
//! the client, and the server cycle: the header multimap, the per-request
//! record, the request phase machine, and the error taxonomy.

pub mod client;
pub mod h1;
pub mod h2;
pub mod headers;
pub mod request;
pub mod server;

pub use client::HttpClient;
pub use headers::Headers;
pub use request::RequestContext;

use crate::cancel::CancelReason;

/// Result type for HTTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::Error),

    #[error("HTTP/2 error: {0}")]
    H2(#[from] h2::Error),

    #[error("invalid URL: {0}")]
    ParseUrl(#[from] crate::url::ParseUrlError),

    #[error("operation not allowed in the current client state")]
    InvalidCondition,

    #[error("endpoint unchanged, existing connection kept")]
    NeedlessToReopen,

    #[error("malformed request: {0}")]
    InvalidRequestFormat(String),

    #[error("malformed response: {0}")]
    InvalidResponseFormat(String),

    #[error("failed reading message body")]
    ReadBody,

    #[error("failed writing to peer")]
    WriteFailure,

    #[error("operation not allowed in phase {0:?}")]
    InvalidPhase(RequestPhase),

    #[error("HTTP version not accepted on this connection")]
    NotAcceptVersion,
}

impl Error {
    /// Cancellation root cause, if this error came from a cancelled
    /// blocking point.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            Error::Transport(crate::transport::Error::Canceled(reason)) => Some(*reason),
            Error::H2(h2::Error::Transport(crate::transport::Error::Canceled(reason))) => {
                Some(*reason)
            }
            _ => None,
        }
    }
}

/// Discrete lifecycle state of a request.
///
/// Transitions are monotonic along the pipeline; [`RequestPhase::Error`] is
/// absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestPhase {
    #[default]
    Idle,
    RequestSending,
    RequestSent,
    RequestRecving,
    RequestRecved,
    ResponseRecving,
    ResponseRecved,
    BodyRecved,
    Error,
}

/// Per-request behavior flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestFlags {
    /// Emit lowercase `host:`/`content-length:` field names.
    pub header_is_small: bool,
    /// Emit `Content-Length` even for an empty body.
    pub need_len: bool,
    /// Suppress the automatic `Content-Length` on responses.
    pub not_need_len: bool,
    /// Accept HTTP/0.9 messages (no version token).
    pub allow_http09: bool,
    /// Do not read a close-delimited body (HEAD requests).
    pub no_read_body: bool,
}

/// Readable error kind stored on the request record when parsing fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequestFormat,
    InvalidResponseFormat,
    ReadBody,
    WriteFailure,
    InvalidPhase,
    NotAcceptVersion,
}

/// Maximum number of headers per message.
pub const MAX_HEADERS: usize = 64;

/// CRLF line ending.
pub const CRLF: &str = "\r\n";
