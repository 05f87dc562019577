//! HTTP/2 protocol engine
//!
//! Frame (de)serialization, HPACK via the `hpack` crate, settings exchange,
//! connection- and stream-level flow control, the per-stream state machine,
//! and the connection engine that ties them together.
//!
//! The engine never owns the transport: every operation borrows the
//! [`Conn`](crate::transport::Conn) it should write to, and streams are
//! addressed by id through the connection's stream table.

pub mod codec;
pub mod conn;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod settings;
pub mod stream;

pub use conn::{H2Connection, Role, SendOutcome};
pub use error::{Error, ErrorCode, Result};
pub use frames::{Frame, FrameHead, PrioritySpec};
pub use settings::Settings;
pub use stream::{H2Stream, StreamId, StreamState};

/// HTTP/2 connection preface sent by clients (RFC 7540 Section 3.5).
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial flow-control window size.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Default maximum frame payload size.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Default HPACK header table size.
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;

/// Maximum stream ID value (2^31 - 1).
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Stream ID 0, reserved for connection-scoped frames.
pub const CONNECTION_STREAM_ID: u32 = 0;
