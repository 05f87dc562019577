//! HTTP/2 streams
//!
//! Per-stream state machine (RFC 7540 Section 5.1), identifier allocation
//! with role parity and strict monotonicity, priority bookkeeping, and the
//! suspend point used when a DATA send exhausts a flow-control window.

use super::super::Headers;
use super::error::{Error, ErrorCode, Result};
use super::flow_control::Window;
use super::frames::PrioritySpec;
use super::MAX_STREAM_ID;
use bytes::Bytes;
use std::collections::HashMap;

/// Stream ID type.
pub type StreamId = u32;

/// Stream state per RFC 7540 Section 5.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// A DATA send parked on window exhaustion: the remaining bytes resume when
/// a WINDOW_UPDATE arrives.
#[derive(Debug, Clone)]
pub struct PendingData {
    pub buf: Bytes,
    pub offset: usize,
    pub end_stream: bool,
}

/// One HTTP/2 stream.
#[derive(Debug)]
pub struct H2Stream {
    id: StreamId,
    state: StreamState,
    pub path: String,
    pub query: String,
    /// Decoded headers (and trailers) accumulated for this stream.
    pub headers: Headers,
    /// Accumulated DATA payload.
    pub body: Vec<u8>,
    pub depend: u32,
    pub weight: u8,
    pub exclusive: bool,
    pub send_window: Window,
    pub recv_window: Window,
    /// Error code from RST_STREAM or GOAWAY, if the stream failed.
    pub error_code: Option<ErrorCode>,
    /// Suspended DATA send awaiting a window update.
    pub pending: Option<PendingData>,
    /// We sent RST_STREAM; in-flight frames from the peer are dropped
    /// silently.
    pub reset_locally: bool,
    /// END_HEADERS seen for the initial header block.
    pub headers_done: bool,
    /// A trailer block was received.
    pub trailers_seen: bool,
}

impl H2Stream {
    pub fn new(id: StreamId, send_init: u32, recv_init: u32) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            path: String::new(),
            query: String::new(),
            headers: Headers::new(),
            body: Vec::new(),
            depend: 0,
            weight: 0,
            exclusive: false,
            send_window: Window::new(send_init),
            recv_window: Window::new(recv_init),
            error_code: None,
            pending: None,
            reset_locally: false,
            headers_done: false,
            trailers_seen: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }

    pub fn on_send_headers(&mut self, end_stream: bool) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedLocal
                } else {
                    StreamState::Open
                };
            }
            StreamState::ReservedLocal => {
                self.state = StreamState::HalfClosedRemote;
            }
            StreamState::Open => {
                if end_stream {
                    self.state = StreamState::HalfClosedLocal;
                }
            }
            StreamState::HalfClosedRemote => {
                if end_stream {
                    self.state = StreamState::Closed;
                }
            }
            _ => return Err(Error::StreamClosed(self.id)),
        }
        Ok(())
    }

    pub fn on_recv_headers(&mut self, end_stream: bool) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                };
            }
            StreamState::ReservedRemote => {
                self.state = if end_stream {
                    StreamState::Closed
                } else {
                    StreamState::HalfClosedLocal
                };
            }
            StreamState::Open => {
                if end_stream {
                    self.state = StreamState::HalfClosedRemote;
                }
            }
            StreamState::HalfClosedLocal => {
                if end_stream {
                    self.state = StreamState::Closed;
                }
            }
            _ => return Err(Error::StreamClosed(self.id)),
        }
        Ok(())
    }

    pub fn on_send_push_promise(&mut self) -> Result<()> {
        if self.state != StreamState::Idle {
            return Err(Error::Protocol(format!(
                "PUSH_PROMISE for non-idle stream {}",
                self.id
            )));
        }
        self.state = StreamState::ReservedLocal;
        Ok(())
    }

    pub fn on_recv_push_promise(&mut self) -> Result<()> {
        if self.state != StreamState::Idle {
            return Err(Error::Protocol(format!(
                "PUSH_PROMISE for non-idle stream {}",
                self.id
            )));
        }
        self.state = StreamState::ReservedRemote;
        Ok(())
    }

    pub fn on_send_data(&mut self, end_stream: bool) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::StreamClosed(self.id));
        }
        if end_stream {
            self.state = match self.state {
                StreamState::Open => StreamState::HalfClosedLocal,
                StreamState::HalfClosedRemote => StreamState::Closed,
                s => s,
            };
        }
        Ok(())
    }

    pub fn on_recv_data(&mut self, end_stream: bool) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::StreamClosed(self.id));
        }
        if end_stream {
            self.state = match self.state {
                StreamState::Open => StreamState::HalfClosedRemote,
                StreamState::HalfClosedLocal => StreamState::Closed,
                s => s,
            };
        }
        Ok(())
    }

    /// Record priority fields; a stream depending on itself is a protocol
    /// violation.
    pub fn apply_priority(&mut self, spec: &PrioritySpec) -> Result<()> {
        if spec.depends_on == self.id {
            return Err(Error::Protocol(format!(
                "stream {} depends on itself",
                self.id
            )));
        }
        self.depend = spec.depends_on;
        self.weight = spec.weight;
        self.exclusive = spec.exclusive;
        Ok(())
    }

    /// Close via RST_STREAM in either direction.
    pub fn reset(&mut self, code: ErrorCode, local: bool) {
        self.error_code = Some(code);
        self.state = StreamState::Closed;
        if local {
            self.reset_locally = true;
        }
        self.pending = None;
    }
}

/// Stream table owned by the connection; streams are addressed by id only.
#[derive(Debug)]
pub struct StreamMap {
    streams: HashMap<StreamId, H2Stream>,
    /// Highest locally-initiated stream id.
    maxid: StreamId,
    /// Highest remotely-initiated stream id seen.
    max_remote_id: StreamId,
    client: bool,
}

impl StreamMap {
    pub fn new(client: bool) -> Self {
        StreamMap {
            streams: HashMap::new(),
            maxid: 0,
            max_remote_id: 0,
            client,
        }
    }

    pub fn maxid(&self) -> StreamId {
        self.maxid
    }

    fn local_parity_ok(&self, id: StreamId) -> bool {
        if self.client {
            id % 2 == 1
        } else {
            id % 2 == 0
        }
    }

    /// Allocate the next locally-initiated stream. Fails with
    /// `RefusedStream` when the id space is exhausted; the caller must open
    /// a fresh connection.
    pub fn make_stream(
        &mut self,
        path: String,
        query: String,
        send_init: u32,
        recv_init: u32,
    ) -> Result<StreamId> {
        let mut id = self.maxid.wrapping_add(1);
        if !self.local_parity_ok(id) {
            id = id.wrapping_add(1);
        }
        if id > MAX_STREAM_ID || id <= self.maxid {
            return Err(Error::RefusedStream(self.maxid));
        }
        self.maxid = id;
        let mut stream = H2Stream::new(id, send_init, recv_init);
        stream.path = path;
        stream.query = query;
        self.streams.insert(id, stream);
        Ok(id)
    }

    pub fn get(&self, id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&id)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(&id)
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.streams.contains_key(&id)
    }

    /// Look up a stream for an incoming frame, creating it when the peer
    /// legitimately opens a new one. Reusing or decreasing a
    /// remotely-initiated id is a protocol error.
    pub fn entry_remote(
        &mut self,
        id: StreamId,
        send_init: u32,
        recv_init: u32,
    ) -> Result<&mut H2Stream> {
        if !self.streams.contains_key(&id) {
            let remote_parity = !self.local_parity_ok(id);
            if remote_parity && id <= self.max_remote_id {
                return Err(Error::Protocol(format!(
                    "remote stream id {} not monotonic",
                    id
                )));
            }
            if remote_parity {
                self.max_remote_id = id;
            }
            self.streams.insert(id, H2Stream::new(id, send_init, recv_init));
        }
        Ok(self.streams.get_mut(&id).expect("inserted above"))
    }

    pub fn ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }

    pub fn remove(&mut self, id: StreamId) -> Option<H2Stream> {
        self.streams.remove(&id)
    }

    /// Drop closed streams between requests.
    pub fn cleanup_closed(&mut self) {
        self.streams.retain(|_, s| !s.state().is_closed());
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut H2Stream> {
        self.streams.values_mut()
    }
}
