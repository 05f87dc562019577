//! HTTP/2 frame model
//!
//! Typed view of the ten frame kinds of RFC 7540 Section 6. The codec maps
//! between this model and wire bytes; the connection engine consumes the
//! model directly, so each variant carries exactly the fields the engine
//! acts on and nothing else. Wire kind numbers and flag layouts live in the
//! codec.

use super::error::ErrorCode;
use super::settings::Settings;
use bytes::Bytes;

/// END_STREAM bit on DATA and HEADERS.
pub const FLAG_END_STREAM: u8 = 0x1;

/// ACK bit on SETTINGS and PING.
pub const FLAG_ACK: u8 = 0x1;

/// END_HEADERS bit on HEADERS, PUSH_PROMISE, and CONTINUATION.
pub const FLAG_END_HEADERS: u8 = 0x4;

/// PADDED bit on DATA, HEADERS, and PUSH_PROMISE.
pub const FLAG_PADDED: u8 = 0x8;

/// PRIORITY bit on HEADERS.
pub const FLAG_PRIORITY: u8 = 0x20;

/// The fixed 9-byte header shared by every frame: 24-bit payload length,
/// kind, flags, and a 31-bit stream id (reserved bit dropped on read).
#[derive(Debug, Clone, Copy)]
pub struct FrameHead {
    pub kind: u8,
    pub flags: u8,
    pub stream_id: u32,
    pub length: usize,
}

impl FrameHead {
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Priority fields carried by PRIORITY frames and the HEADERS priority
/// block. `weight` is the wire value (actual weight minus one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    pub depends_on: u32,
    pub exclusive: bool,
    pub weight: u8,
}

/// One decoded HTTP/2 frame.
///
/// `Data::flow_len` keeps the wire payload length (padding included):
/// flow-control accounting charges the whole frame, not just the data
/// bytes that survive unpadding.
#[derive(Debug, Clone)]
pub enum Frame {
    Data {
        stream_id: u32,
        payload: Bytes,
        end_stream: bool,
        flow_len: usize,
    },
    Headers {
        stream_id: u32,
        fragment: Bytes,
        end_stream: bool,
        end_headers: bool,
        priority: Option<PrioritySpec>,
    },
    Priority {
        stream_id: u32,
        spec: PrioritySpec,
    },
    RstStream {
        stream_id: u32,
        code: ErrorCode,
    },
    Settings {
        ack: bool,
        settings: Settings,
    },
    PushPromise {
        stream_id: u32,
        promised_id: u32,
        fragment: Bytes,
        end_headers: bool,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    Goaway {
        last_stream_id: u32,
        code: ErrorCode,
        debug: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        fragment: Bytes,
        end_headers: bool,
    },
    /// A kind this implementation does not know; receivers ignore it.
    Unknown {
        stream_id: u32,
    },
}

impl Frame {
    /// DATA frame for the send path (unpadded, so the flow-controlled
    /// length equals the payload length).
    pub fn data(stream_id: u32, payload: Bytes, end_stream: bool) -> Frame {
        let flow_len = payload.len();
        Frame::Data {
            stream_id,
            payload,
            end_stream,
            flow_len,
        }
    }

    /// Stream the frame addresses; 0 for connection-scoped frames.
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Unknown { stream_id } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::Goaway { .. } => 0,
        }
    }

    /// Frame kind for log lines.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::Data { .. } => "DATA",
            Frame::Headers { .. } => "HEADERS",
            Frame::Priority { .. } => "PRIORITY",
            Frame::RstStream { .. } => "RST_STREAM",
            Frame::Settings { .. } => "SETTINGS",
            Frame::PushPromise { .. } => "PUSH_PROMISE",
            Frame::Ping { .. } => "PING",
            Frame::Goaway { .. } => "GOAWAY",
            Frame::WindowUpdate { .. } => "WINDOW_UPDATE",
            Frame::Continuation { .. } => "CONTINUATION",
            Frame::Unknown { .. } => "UNKNOWN",
        }
    }
}
