//! HTTP/2 connection engine
//!
//! Owns the stream table, HPACK state, settings, and the connection-level
//! flow-control windows. The engine never owns the transport: every
//! operation borrows the `Conn` it should write to, and callers drive the
//! receive side by feeding frames from
//! [`recv_frame`](H2Connection::recv_frame) into
//! [`apply`](H2Connection::apply).
//!
//! Stream errors are handled inside `apply` (RST_STREAM goes out, the
//! stream closes, the code lands on the stream record). Connection errors
//! surface as `Err`; the caller escalates with
//! [`send_goaway`](H2Connection::send_goaway) and closes the transport.

use super::super::{headers, Headers};
use super::codec;
use super::error::{Error, ErrorCode, Result};
use super::flow_control::Window;
use super::frames::{Frame, PrioritySpec};
use super::settings::Settings;
use super::stream::{H2Stream, PendingData, StreamId, StreamMap};
use super::{CONNECTION_PREFACE, CONNECTION_STREAM_ID, DEFAULT_HEADER_TABLE_SIZE};
use crate::cancel::CancelContext;
use crate::transport::Conn;
use bytes::Bytes;
use std::time::Duration;

/// Which side of the connection this engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Result of a DATA send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Everything was written.
    Done,
    /// A window hit zero; the remainder is parked on the stream and resumes
    /// after a WINDOW_UPDATE.
    Suspended,
}

/// What applying one frame did, for the caller's drive loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct Applied {
    /// Stream the frame addressed (0 for connection-scoped frames).
    pub stream_id: StreamId,
    /// The addressed stream reached the closed state.
    pub stream_closed: bool,
    /// A send window may have opened; suspended sends should resume.
    pub window_opened: bool,
    /// The peer sent GOAWAY.
    pub goaway: bool,
}

/// In-progress header block spanning HEADERS/PUSH_PROMISE + CONTINUATION.
struct ContinuationState {
    stream_id: StreamId,
    /// Stream the decoded block belongs to (differs for PUSH_PROMISE).
    target_id: StreamId,
    end_stream: bool,
    promised: bool,
    block: Vec<u8>,
}

/// HTTP/2 connection context.
pub struct H2Connection {
    role: Role,
    pub local_settings: Settings,
    pub remote_settings: Settings,
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
    send_window: Window,
    recv_window: Window,
    streams: StreamMap,
    continuation: Option<ContinuationState>,
    goaway: Option<(StreamId, ErrorCode)>,
}

impl H2Connection {
    fn with_role(role: Role, settings: Settings) -> Self {
        let mut decoder = hpack::Decoder::new();
        if settings.header_table_size() != DEFAULT_HEADER_TABLE_SIZE {
            decoder.set_max_table_size(settings.header_table_size() as usize);
        }
        H2Connection {
            role,
            recv_window: Window::new(settings.initial_window_size()),
            local_settings: settings,
            remote_settings: Settings::new(),
            encoder: hpack::Encoder::new(),
            decoder,
            send_window: Window::default(),
            streams: StreamMap::new(role == Role::Client),
            continuation: None,
            goaway: None,
        }
    }

    /// Client side: emit the connection preface and the initial SETTINGS.
    /// The peer's SETTINGS are consumed by the normal receive path.
    pub fn client(
        conn: &mut Conn,
        settings: Settings,
        mut cancel: Option<&mut CancelContext>,
    ) -> Result<Self> {
        settings.validate()?;
        let mut this = Self::with_role(Role::Client, settings);
        log::debug!("h2: sending connection preface");
        conn.write(CONNECTION_PREFACE, None, cancel.as_deref_mut())?;
        this.send_settings(conn, cancel)?;
        Ok(this)
    }

    /// Server side: emit SETTINGS, then require the client preface followed
    /// by a SETTINGS frame. Anything else is a connection error.
    pub fn server(
        conn: &mut Conn,
        settings: Settings,
        mut cancel: Option<&mut CancelContext>,
    ) -> Result<Self> {
        settings.validate()?;
        let mut this = Self::with_role(Role::Server, settings);
        this.send_settings(conn, cancel.as_deref_mut())?;

        let mut preface = [0u8; 24];
        let mut read = 0;
        while read < preface.len() {
            let n = conn.read(&mut preface[read..], None, cancel.as_deref_mut())?;
            if n == 0 {
                return Err(Error::MissingPreface);
            }
            read += n;
        }
        if &preface[..] != CONNECTION_PREFACE {
            this.send_goaway(conn, ErrorCode::ProtocolError, "bad preface")?;
            return Err(Error::MissingPreface);
        }

        let frame = this.recv_frame(conn, None, cancel.as_deref_mut())?;
        if !matches!(frame, Frame::Settings { .. }) {
            this.send_goaway(conn, ErrorCode::ProtocolError, "expected SETTINGS")?;
            return Err(Error::Protocol(
                "first frame after preface was not SETTINGS".to_string(),
            ));
        }
        this.apply(conn, frame)?;
        Ok(this)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Highest locally-initiated stream id.
    pub fn maxid(&self) -> StreamId {
        self.streams.maxid()
    }

    pub fn stream(&self, id: StreamId) -> Option<&H2Stream> {
        self.streams.get(id)
    }

    pub fn stream_mut(&mut self, id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(id)
    }

    /// GOAWAY received from the peer, if any.
    pub fn goaway_received(&self) -> Option<(StreamId, ErrorCode)> {
        self.goaway
    }

    pub fn connection_send_window(&self) -> i64 {
        self.send_window.size()
    }

    /// Drop closed streams between requests.
    pub fn cleanup_closed_streams(&mut self) {
        self.streams.cleanup_closed();
    }

    fn stream_send_init(&self) -> u32 {
        self.remote_settings.initial_window_size()
    }

    fn stream_recv_init(&self) -> u32 {
        self.local_settings.initial_window_size()
    }

    /// Allocate the next locally-initiated stream.
    pub fn make_stream(&mut self, path: &str, query: &str) -> Result<StreamId> {
        let id = self.streams.make_stream(
            path.to_string(),
            query.to_string(),
            self.stream_send_init(),
            self.stream_recv_init(),
        )?;
        log::trace!("h2: opened stream {}", id);
        Ok(id)
    }

    /// Read one frame off the transport, bounded by the local max frame
    /// size.
    pub fn recv_frame(
        &mut self,
        conn: &mut Conn,
        timeout: Option<Duration>,
        cancel: Option<&mut CancelContext>,
    ) -> Result<Frame> {
        let frame = codec::read_frame(
            conn,
            self.local_settings.max_frame_size() as usize,
            timeout,
            cancel,
        )?;
        log::trace!("h2: recv {} stream={}", frame.kind_name(), frame.stream_id());
        Ok(frame)
    }

    /// Apply one received frame to the connection and stream state.
    ///
    /// Stream errors are resolved internally (RST_STREAM sent, stream
    /// closed). An `Err` is a connection error.
    pub fn apply(&mut self, conn: &mut Conn, frame: Frame) -> Result<Applied> {
        let mut applied = Applied {
            stream_id: frame.stream_id(),
            ..Applied::default()
        };

        if let Some(cont) = &self.continuation {
            let expected = matches!(
                &frame,
                Frame::Continuation { stream_id, .. } if *stream_id == cont.stream_id
            );
            if !expected {
                return Err(Error::Protocol(
                    "header block interrupted; expected CONTINUATION".to_string(),
                ));
            }
        }

        match frame {
            Frame::Settings { ack, settings } => {
                self.on_settings(conn, ack, settings, &mut applied)?
            }
            Frame::Ping { ack, payload } => {
                if !ack {
                    conn.write(&codec::encode(&Frame::Ping { ack: true, payload }), None, None)?;
                }
            }
            Frame::Goaway {
                last_stream_id,
                code,
                ..
            } => self.on_goaway(last_stream_id, code, &mut applied),
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.on_window_update(conn, stream_id, increment, &mut applied)?,
            Frame::Data {
                stream_id,
                payload,
                end_stream,
                flow_len,
            } => self.on_data(conn, stream_id, payload, end_stream, flow_len, &mut applied)?,
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
                priority,
            } => self.on_headers(
                conn,
                stream_id,
                fragment,
                end_stream,
                end_headers,
                priority,
                &mut applied,
            )?,
            Frame::Continuation {
                fragment,
                end_headers,
                ..
            } => self.on_continuation(conn, fragment, end_headers, &mut applied)?,
            Frame::PushPromise {
                stream_id,
                promised_id,
                fragment,
                end_headers,
            } => self.on_push_promise(
                conn,
                stream_id,
                promised_id,
                fragment,
                end_headers,
                &mut applied,
            )?,
            Frame::Priority { stream_id, spec } => self.on_priority(conn, stream_id, spec)?,
            Frame::RstStream { stream_id, code } => {
                self.on_rst_stream(stream_id, code, &mut applied)?
            }
            Frame::Unknown { .. } => {}
        }
        Ok(applied)
    }

    fn on_settings(
        &mut self,
        conn: &mut Conn,
        ack: bool,
        settings: Settings,
        applied: &mut Applied,
    ) -> Result<()> {
        if ack {
            return Ok(());
        }

        // A changed initial window size lands retroactively on every
        // existing stream's send window.
        if let Some(new_init) = settings.initial_window_size {
            for stream in self.streams.iter_mut() {
                stream.send_window.set_initial(new_init)?;
            }
            applied.window_opened = true;
        }
        self.remote_settings.merge(&settings);
        self.send_settings_ack(conn)?;
        Ok(())
    }

    fn on_goaway(&mut self, last_stream_id: StreamId, code: ErrorCode, applied: &mut Applied) {
        log::debug!("h2: GOAWAY last_stream={} code={}", last_stream_id, code);
        self.goaway = Some((last_stream_id, code));
        // Streams above the last processed id were refused and are safe to
        // retry elsewhere.
        for stream in self.streams.iter_mut() {
            if stream.id() > last_stream_id && !stream.state().is_closed() {
                stream.reset(ErrorCode::RefusedStream, false);
            }
        }
        applied.goaway = true;
    }

    fn on_window_update(
        &mut self,
        conn: &mut Conn,
        stream_id: StreamId,
        increment: u32,
        applied: &mut Applied,
    ) -> Result<()> {
        if increment == 0 {
            return Err(Error::Protocol(
                "WINDOW_UPDATE with zero increment".to_string(),
            ));
        }
        if stream_id == CONNECTION_STREAM_ID {
            self.send_window.widen(increment)?;
            applied.window_opened = true;
            return Ok(());
        }
        if let Some(stream) = self.streams.get_mut(stream_id) {
            if stream.state().is_closed() {
                // Trailing WINDOW_UPDATE on a closed stream is discarded.
                return Ok(());
            }
            if stream.send_window.widen(increment).is_err() {
                // Per-stream overflow only poisons the stream.
                self.stream_error(conn, stream_id, ErrorCode::FlowControlError)?;
                return Ok(());
            }
            applied.window_opened = true;
        }
        Ok(())
    }

    fn on_data(
        &mut self,
        conn: &mut Conn,
        stream_id: StreamId,
        payload: Bytes,
        end_stream: bool,
        flow_len: usize,
        applied: &mut Applied,
    ) -> Result<()> {
        // Flow control covers the whole wire payload including padding.
        self.recv_window.narrow(flow_len);

        if !self.streams.contains(stream_id) {
            return Err(Error::Protocol(format!(
                "DATA for idle stream {}",
                stream_id
            )));
        }

        let stream = self.streams.get_mut(stream_id).expect("checked above");
        if stream.state().is_closed() {
            if !stream.reset_locally {
                self.stream_error(conn, stream_id, ErrorCode::StreamClosed)?;
            }
            // Reset within one RTT: drop silently.
        } else {
            stream.recv_window.narrow(flow_len);
            match stream.on_recv_data(end_stream) {
                Ok(()) => {
                    stream.body.extend_from_slice(&payload);
                    if stream.state().is_closed() {
                        applied.stream_closed = true;
                    }
                }
                Err(e) => {
                    self.stream_error(conn, stream_id, e.code())?;
                }
            }
        }

        // Replenish receive windows once they dip below half.
        if let Some(increment) = self
            .streams
            .get(stream_id)
            .filter(|s| !s.state().is_closed())
            .and_then(|s| s.recv_window.replenish_amount())
        {
            self.send_window_update(conn, stream_id, increment)?;
        }
        if let Some(increment) = self.recv_window.replenish_amount() {
            self.send_window_update(conn, CONNECTION_STREAM_ID, increment)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn on_headers(
        &mut self,
        conn: &mut Conn,
        stream_id: StreamId,
        fragment: Bytes,
        end_stream: bool,
        end_headers: bool,
        priority: Option<PrioritySpec>,
        applied: &mut Applied,
    ) -> Result<()> {
        if let Some(stream) = self.streams.get(stream_id) {
            if stream.state().is_closed() && stream.reset_locally {
                // HEADERS racing our RST_STREAM: drop silently.
                return Ok(());
            }
        }

        let send_init = self.stream_send_init();
        let recv_init = self.stream_recv_init();
        let stream = self.streams.entry_remote(stream_id, send_init, recv_init)?;
        if let Some(spec) = &priority {
            if let Err(e) = stream.apply_priority(spec) {
                self.stream_error(conn, stream_id, e.code())?;
                return Ok(());
            }
        }

        let state = ContinuationState {
            stream_id,
            target_id: stream_id,
            end_stream,
            promised: false,
            block: fragment.to_vec(),
        };
        if end_headers {
            self.finish_header_block(conn, state, applied)?;
        } else {
            self.continuation = Some(state);
        }
        Ok(())
    }

    fn on_continuation(
        &mut self,
        conn: &mut Conn,
        fragment: Bytes,
        end_headers: bool,
        applied: &mut Applied,
    ) -> Result<()> {
        let Some(mut state) = self.continuation.take() else {
            return Err(Error::Protocol(
                "CONTINUATION without open header block".to_string(),
            ));
        };
        state.block.extend_from_slice(&fragment);
        if end_headers {
            self.finish_header_block(conn, state, applied)?;
        } else {
            self.continuation = Some(state);
        }
        Ok(())
    }

    fn on_push_promise(
        &mut self,
        conn: &mut Conn,
        stream_id: StreamId,
        promised_id: StreamId,
        fragment: Bytes,
        end_headers: bool,
        applied: &mut Applied,
    ) -> Result<()> {
        if self.role != Role::Client {
            return Err(Error::Protocol(
                "PUSH_PROMISE received by server".to_string(),
            ));
        }
        if !self.local_settings.enable_push() {
            return Err(Error::Protocol("push is disabled".to_string()));
        }
        if promised_id == 0 || promised_id % 2 != 0 {
            return Err(Error::Protocol(format!(
                "bad promised stream id {}",
                promised_id
            )));
        }
        if !self.streams.contains(stream_id) {
            return Err(Error::Protocol(format!(
                "PUSH_PROMISE on unknown stream {}",
                stream_id
            )));
        }

        let send_init = self.stream_send_init();
        let recv_init = self.stream_recv_init();
        let promised = self.streams.entry_remote(promised_id, send_init, recv_init)?;
        promised.on_recv_push_promise()?;

        let state = ContinuationState {
            stream_id,
            target_id: promised_id,
            end_stream: false,
            promised: true,
            block: fragment.to_vec(),
        };
        if end_headers {
            self.finish_header_block(conn, state, applied)?;
        } else {
            self.continuation = Some(state);
        }
        Ok(())
    }

    fn on_priority(&mut self, conn: &mut Conn, stream_id: StreamId, spec: PrioritySpec) -> Result<()> {
        let send_init = self.stream_send_init();
        let recv_init = self.stream_recv_init();
        let stream = self.streams.entry_remote(stream_id, send_init, recv_init)?;
        if stream.state().is_closed() {
            // Trailing PRIORITY on a closed stream is discarded.
            return Ok(());
        }
        if let Err(e) = stream.apply_priority(&spec) {
            self.stream_error(conn, stream_id, e.code())?;
        }
        Ok(())
    }

    fn on_rst_stream(
        &mut self,
        stream_id: StreamId,
        code: ErrorCode,
        applied: &mut Applied,
    ) -> Result<()> {
        let Some(stream) = self.streams.get_mut(stream_id) else {
            return Err(Error::Protocol(format!(
                "RST_STREAM for idle stream {}",
                stream_id
            )));
        };
        log::debug!("h2: stream {} reset by peer: {}", stream_id, code);
        stream.reset(code, false);
        applied.stream_closed = true;
        Ok(())
    }

    /// Decode an assembled header block and apply it to its stream.
    fn finish_header_block(
        &mut self,
        conn: &mut Conn,
        state: ContinuationState,
        applied: &mut Applied,
    ) -> Result<()> {
        let decoded = self
            .decoder
            .decode(&state.block)
            .map_err(|e| Error::Compression(format!("{:?}", e)))?;

        let mut fields = Headers::new();
        for (name, value) in decoded {
            let name = String::from_utf8_lossy(&name).into_owned();
            let value = String::from_utf8_lossy(&value).into_owned();
            if !headers::is_valid_field(&name, &value) {
                self.stream_error(conn, state.target_id, ErrorCode::ProtocolError)?;
                return Ok(());
            }
            fields.insert(name, value);
        }

        // Request blocks on the server side and pushed requests on the
        // client side; response blocks otherwise.
        let request_style = self.role == Role::Server || state.promised;

        let stream = self
            .streams
            .get_mut(state.target_id)
            .ok_or(Error::StreamNotFound(state.target_id))?;

        let trailer = stream.headers_done && !state.promised;
        if let Err(code) = validate_pseudo_fields(&fields, request_style, trailer, state.end_stream)
        {
            self.stream_error(conn, state.target_id, code)?;
            return Ok(());
        }

        let stream = self.streams.get_mut(state.target_id).expect("exists");
        if let Some(path) = fields.get(headers::PSEUDO_PATH) {
            let (path, query) = crate::url::split_target(path);
            stream.path = path;
            stream.query = query;
        }
        stream.headers.merge(fields);
        if trailer {
            stream.trailers_seen = true;
        }
        stream.headers_done = true;

        if !state.promised {
            if let Err(e) = stream.on_recv_headers(state.end_stream) {
                self.stream_error(conn, state.target_id, e.code())?;
                return Ok(());
            }
            if self
                .streams
                .get(state.target_id)
                .map(|s| s.state().is_closed())
                .unwrap_or(false)
            {
                applied.stream_closed = true;
            }
        }
        Ok(())
    }

    /// Encode and send a header block, splitting into HEADERS plus
    /// CONTINUATION frames at the peer's max frame size. HEADERS and
    /// CONTINUATION for one stream are written back-to-back, never
    /// interleaved with another stream's headers.
    pub fn send_headers(
        &mut self,
        conn: &mut Conn,
        stream_id: StreamId,
        fields: &Headers,
        end_stream: bool,
        mut cancel: Option<&mut CancelContext>,
    ) -> Result<()> {
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        stream.on_send_headers(end_stream)?;

        let tuples: Vec<(&[u8], &[u8])> = fields
            .iter()
            .filter(|(n, v)| headers::is_valid_field(n, v))
            .map(|(n, v)| (n.as_bytes(), v.as_bytes()))
            .collect();
        let mut block = Vec::new();
        self.encoder
            .encode_into(tuples, &mut block)
            .map_err(|e| Error::Compression(e.to_string()))?;

        let max = self.remote_settings.max_frame_size() as usize;
        if block.len() <= max {
            let frame = Frame::Headers {
                stream_id,
                fragment: Bytes::from(block),
                end_stream,
                end_headers: true,
                priority: None,
            };
            conn.write(&codec::encode(&frame), None, cancel.as_deref_mut())?;
            return Ok(());
        }

        let mut chunks = block.chunks(max);
        let first = chunks.next().expect("block is non-empty");
        let frame = Frame::Headers {
            stream_id,
            fragment: Bytes::copy_from_slice(first),
            end_stream,
            end_headers: false,
            priority: None,
        };
        conn.write(&codec::encode(&frame), None, cancel.as_deref_mut())?;

        let rest: Vec<&[u8]> = chunks.collect();
        for (i, chunk) in rest.iter().enumerate() {
            let cont = Frame::Continuation {
                stream_id,
                fragment: Bytes::copy_from_slice(chunk),
                end_headers: i + 1 == rest.len(),
            };
            conn.write(&codec::encode(&cont), None, cancel.as_deref_mut())?;
        }
        Ok(())
    }

    /// Send DATA, chunked to the smallest of the peer's max frame size, the
    /// connection send window, and the stream send window. When a window is
    /// exhausted the remainder parks on the stream and
    /// [`SendOutcome::Suspended`] is returned.
    pub fn send_data(
        &mut self,
        conn: &mut Conn,
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
        cancel: Option<&mut CancelContext>,
    ) -> Result<SendOutcome> {
        self.send_data_from(conn, stream_id, data, 0, end_stream, cancel)
    }

    /// Resume a DATA send parked by window exhaustion.
    pub fn resume_data(
        &mut self,
        conn: &mut Conn,
        stream_id: StreamId,
        cancel: Option<&mut CancelContext>,
    ) -> Result<SendOutcome> {
        let Some(pending) = self
            .streams
            .get_mut(stream_id)
            .and_then(|s| s.pending.take())
        else {
            return Ok(SendOutcome::Done);
        };
        self.send_data_from(
            conn,
            stream_id,
            pending.buf,
            pending.offset,
            pending.end_stream,
            cancel,
        )
    }

    /// Whether a suspended DATA send is parked on the stream.
    pub fn has_pending_data(&self, stream_id: StreamId) -> bool {
        self.streams
            .get(stream_id)
            .map(|s| s.pending.is_some())
            .unwrap_or(false)
    }

    fn send_data_from(
        &mut self,
        conn: &mut Conn,
        stream_id: StreamId,
        data: Bytes,
        start: usize,
        end_stream: bool,
        mut cancel: Option<&mut CancelContext>,
    ) -> Result<SendOutcome> {
        let total = data.len();

        // A zero-payload END_STREAM frame is always allowed, window or not.
        if total == 0 {
            let stream = self
                .streams
                .get_mut(stream_id)
                .ok_or(Error::StreamNotFound(stream_id))?;
            stream.on_send_data(end_stream)?;
            let frame = Frame::data(stream_id, Bytes::new(), end_stream);
            conn.write(&codec::encode(&frame), None, cancel.as_deref_mut())?;
            return Ok(SendOutcome::Done);
        }

        let max_frame = self.remote_settings.max_frame_size() as usize;
        let mut offset = start;
        while offset < total {
            let remaining = total - offset;
            let conn_avail = self.send_window.available();
            let stream_avail = self
                .streams
                .get(stream_id)
                .ok_or(Error::StreamNotFound(stream_id))?
                .send_window
                .available();
            let chunk = remaining.min(max_frame).min(conn_avail).min(stream_avail);
            if chunk == 0 {
                log::trace!(
                    "h2: stream {} send suspended at offset {} (conn={}, stream={})",
                    stream_id,
                    offset,
                    conn_avail,
                    stream_avail
                );
                let stream = self.streams.get_mut(stream_id).expect("checked above");
                stream.pending = Some(PendingData {
                    buf: data,
                    offset,
                    end_stream,
                });
                return Ok(SendOutcome::Suspended);
            }

            let last = offset + chunk == total;
            let fin = end_stream && last;
            self.send_window.consume(chunk);
            let stream = self.streams.get_mut(stream_id).expect("checked above");
            stream.send_window.consume(chunk);
            stream.on_send_data(fin)?;

            let frame = Frame::data(stream_id, data.slice(offset..offset + chunk), fin);
            conn.write(&codec::encode(&frame), None, cancel.as_deref_mut())?;
            offset += chunk;
        }
        Ok(SendOutcome::Done)
    }

    /// Send (or re-send) our SETTINGS.
    pub fn send_settings(
        &mut self,
        conn: &mut Conn,
        cancel: Option<&mut CancelContext>,
    ) -> Result<()> {
        let frame = Frame::Settings {
            ack: false,
            settings: self.local_settings.clone(),
        };
        conn.write(&codec::encode(&frame), None, cancel)?;
        Ok(())
    }

    fn send_settings_ack(&mut self, conn: &mut Conn) -> Result<()> {
        let frame = Frame::Settings {
            ack: true,
            settings: Settings::new(),
        };
        conn.write(&codec::encode(&frame), None, None)?;
        Ok(())
    }

    pub fn send_ping(&mut self, conn: &mut Conn, data: [u8; 8]) -> Result<()> {
        let frame = Frame::Ping {
            ack: false,
            payload: data,
        };
        conn.write(&codec::encode(&frame), None, None)?;
        Ok(())
    }

    /// Send WINDOW_UPDATE and widen the matching local receive window.
    pub fn send_window_update(
        &mut self,
        conn: &mut Conn,
        stream_id: StreamId,
        increment: u32,
    ) -> Result<()> {
        let frame = Frame::WindowUpdate {
            stream_id,
            increment,
        };
        conn.write(&codec::encode(&frame), None, None)?;
        if stream_id == CONNECTION_STREAM_ID {
            self.recv_window.widen(increment)?;
        } else if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.recv_window.widen(increment)?;
        }
        Ok(())
    }

    /// Reset a stream with the given code and close it locally.
    pub fn send_rst_stream(
        &mut self,
        conn: &mut Conn,
        stream_id: StreamId,
        code: ErrorCode,
    ) -> Result<()> {
        self.stream_error(conn, stream_id, code)
    }

    /// Escalate a connection error: GOAWAY with the highest local stream id.
    pub fn send_goaway(&mut self, conn: &mut Conn, code: ErrorCode, debug: &str) -> Result<()> {
        log::debug!("h2: sending GOAWAY code={} ({})", code, debug);
        let frame = Frame::Goaway {
            last_stream_id: self.streams.maxid(),
            code,
            debug: Bytes::copy_from_slice(debug.as_bytes()),
        };
        conn.write(&codec::encode(&frame), None, None)?;
        Ok(())
    }

    fn stream_error(&mut self, conn: &mut Conn, stream_id: StreamId, code: ErrorCode) -> Result<()> {
        log::debug!("h2: stream {} error: {}", stream_id, code);
        let frame = Frame::RstStream { stream_id, code };
        conn.write(&codec::encode(&frame), None, None)?;
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.reset(code, true);
        }
        Ok(())
    }
}

/// Check pseudo-header rules for one decoded block: pseudo fields first and
/// unique, the allowed set depends on request/response direction, trailers
/// carry none and must end the stream.
fn validate_pseudo_fields(
    fields: &Headers,
    request_style: bool,
    trailer: bool,
    end_stream: bool,
) -> std::result::Result<(), ErrorCode> {
    if trailer {
        if !end_stream {
            return Err(ErrorCode::ProtocolError);
        }
        if fields.iter().any(|(n, _)| headers::is_pseudo(n)) {
            return Err(ErrorCode::ProtocolError);
        }
        return Ok(());
    }

    let allowed: &[&str] = if request_style {
        &[
            headers::PSEUDO_METHOD,
            headers::PSEUDO_SCHEME,
            headers::PSEUDO_AUTHORITY,
            headers::PSEUDO_PATH,
        ]
    } else {
        &[headers::PSEUDO_STATUS]
    };

    let mut seen: Vec<&str> = Vec::new();
    let mut regular_seen = false;
    for (name, _) in fields.iter() {
        if headers::is_pseudo(name) {
            if regular_seen {
                return Err(ErrorCode::ProtocolError);
            }
            if !allowed.contains(&name) {
                return Err(ErrorCode::ProtocolError);
            }
            if seen.contains(&name) {
                return Err(ErrorCode::ProtocolError);
            }
            seen.push(name);
        } else {
            regular_seen = true;
        }
    }
    Ok(())
}
