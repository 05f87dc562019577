//! HTTP/2 wire codec
//!
//! One [`encode`] and one [`decode`] cover all ten frame kinds. Decoding
//! also enforces the structural rules that do not need stream state:
//! fixed payload sizes, padding bounds, and which kinds may (or must)
//! target stream 0. Frames that fail those checks never reach the engine.
//!
//! The send path never emits padding or priority weights, so `encode`
//! writes the shortest legal form of each frame.

use super::error::{Error, ErrorCode, Result};
use super::frames::{
    Frame, FrameHead, PrioritySpec, FLAG_ACK, FLAG_END_HEADERS, FLAG_END_STREAM, FLAG_PADDED,
    FLAG_PRIORITY,
};
use super::settings::Settings;
use crate::cancel::CancelContext;
use crate::transport::Conn;
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

/// Size of the fixed frame header.
pub const FRAME_HEAD_LEN: usize = 9;

/// Hard ceiling on any frame payload (24-bit length field).
pub const MAX_FRAME_PAYLOAD: usize = 0x00FF_FFFF;

const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

// Wire kind numbers, RFC 7540 Section 6.
const KIND_DATA: u8 = 0x0;
const KIND_HEADERS: u8 = 0x1;
const KIND_PRIORITY: u8 = 0x2;
const KIND_RST_STREAM: u8 = 0x3;
const KIND_SETTINGS: u8 = 0x4;
const KIND_PUSH_PROMISE: u8 = 0x5;
const KIND_PING: u8 = 0x6;
const KIND_GOAWAY: u8 = 0x7;
const KIND_WINDOW_UPDATE: u8 = 0x8;
const KIND_CONTINUATION: u8 = 0x9;

/// Parse the fixed 9-byte header. The stream id's reserved bit is dropped.
pub fn parse_head(raw: &[u8; FRAME_HEAD_LEN]) -> FrameHead {
    FrameHead {
        kind: raw[3],
        flags: raw[4],
        stream_id: u32::from_be_bytes([raw[5], raw[6], raw[7], raw[8]]) & STREAM_ID_MASK,
        length: u32::from_be_bytes([0, raw[0], raw[1], raw[2]]) as usize,
    }
}

fn put_head(buf: &mut BytesMut, kind: u8, flags: u8, stream_id: u32, length: usize) {
    buf.put_uint(length as u64, 3);
    buf.put_u8(kind);
    buf.put_u8(flags);
    buf.put_u32(stream_id & STREAM_ID_MASK);
}

fn put_priority(buf: &mut BytesMut, spec: &PrioritySpec) {
    let mut word = spec.depends_on & STREAM_ID_MASK;
    if spec.exclusive {
        word |= 1 << 31;
    }
    buf.put_u32(word);
    buf.put_u8(spec.weight);
}

fn read_priority(raw: &[u8]) -> PrioritySpec {
    let word = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    PrioritySpec {
        depends_on: word & STREAM_ID_MASK,
        exclusive: word >> 31 == 1,
        weight: raw[4],
    }
}

/// Serialize one frame, header included.
pub fn encode(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::new();
    match frame {
        Frame::Data {
            stream_id,
            payload,
            end_stream,
            ..
        } => {
            let flags = if *end_stream { FLAG_END_STREAM } else { 0 };
            put_head(&mut buf, KIND_DATA, flags, *stream_id, payload.len());
            buf.put_slice(payload);
        }
        Frame::Headers {
            stream_id,
            fragment,
            end_stream,
            end_headers,
            priority,
        } => {
            let mut flags = 0;
            if *end_stream {
                flags |= FLAG_END_STREAM;
            }
            if *end_headers {
                flags |= FLAG_END_HEADERS;
            }
            let mut length = fragment.len();
            if priority.is_some() {
                flags |= FLAG_PRIORITY;
                length += 5;
            }
            put_head(&mut buf, KIND_HEADERS, flags, *stream_id, length);
            if let Some(spec) = priority {
                put_priority(&mut buf, spec);
            }
            buf.put_slice(fragment);
        }
        Frame::Priority { stream_id, spec } => {
            put_head(&mut buf, KIND_PRIORITY, 0, *stream_id, 5);
            put_priority(&mut buf, spec);
        }
        Frame::RstStream { stream_id, code } => {
            put_head(&mut buf, KIND_RST_STREAM, 0, *stream_id, 4);
            buf.put_u32(code.as_u32());
        }
        Frame::Settings { ack, settings } => {
            if *ack {
                put_head(&mut buf, KIND_SETTINGS, FLAG_ACK, 0, 0);
            } else {
                let entries = settings.entries();
                put_head(&mut buf, KIND_SETTINGS, 0, 0, entries.len() * 6);
                for (id, value) in entries {
                    buf.put_u16(id);
                    buf.put_u32(value);
                }
            }
        }
        Frame::PushPromise {
            stream_id,
            promised_id,
            fragment,
            end_headers,
        } => {
            let flags = if *end_headers { FLAG_END_HEADERS } else { 0 };
            put_head(
                &mut buf,
                KIND_PUSH_PROMISE,
                flags,
                *stream_id,
                4 + fragment.len(),
            );
            buf.put_u32(promised_id & STREAM_ID_MASK);
            buf.put_slice(fragment);
        }
        Frame::Ping { ack, payload } => {
            let flags = if *ack { FLAG_ACK } else { 0 };
            put_head(&mut buf, KIND_PING, flags, 0, payload.len());
            buf.put_slice(payload);
        }
        Frame::Goaway {
            last_stream_id,
            code,
            debug,
        } => {
            put_head(&mut buf, KIND_GOAWAY, 0, 0, 8 + debug.len());
            buf.put_u32(last_stream_id & STREAM_ID_MASK);
            buf.put_u32(code.as_u32());
            buf.put_slice(debug);
        }
        Frame::WindowUpdate {
            stream_id,
            increment,
        } => {
            put_head(&mut buf, KIND_WINDOW_UPDATE, 0, *stream_id, 4);
            buf.put_u32(increment & STREAM_ID_MASK);
        }
        Frame::Continuation {
            stream_id,
            fragment,
            end_headers,
        } => {
            let flags = if *end_headers { FLAG_END_HEADERS } else { 0 };
            put_head(&mut buf, KIND_CONTINUATION, flags, *stream_id, fragment.len());
            buf.put_slice(fragment);
        }
        // Unknown frames are never sent.
        Frame::Unknown { .. } => {}
    }
    buf.freeze()
}

/// Turn a raw payload into a typed frame according to the header.
pub fn decode(head: FrameHead, payload: Bytes) -> Result<Frame> {
    match head.kind {
        KIND_DATA => {
            require_stream(&head)?;
            let flow_len = payload.len();
            let payload = unpad(&head, payload)?;
            Ok(Frame::Data {
                stream_id: head.stream_id,
                payload,
                end_stream: head.has(FLAG_END_STREAM),
                flow_len,
            })
        }
        KIND_HEADERS => {
            require_stream(&head)?;
            let mut fragment = unpad(&head, payload)?;
            let priority = if head.has(FLAG_PRIORITY) {
                if fragment.len() < 5 {
                    return Err(Error::FrameSize(
                        "HEADERS too short for priority fields".to_string(),
                    ));
                }
                let spec = read_priority(&fragment[..5]);
                fragment = fragment.slice(5..);
                Some(spec)
            } else {
                None
            };
            Ok(Frame::Headers {
                stream_id: head.stream_id,
                fragment,
                end_stream: head.has(FLAG_END_STREAM),
                end_headers: head.has(FLAG_END_HEADERS),
                priority,
            })
        }
        KIND_PRIORITY => {
            require_stream(&head)?;
            exact_len(&payload, 5, "PRIORITY")?;
            Ok(Frame::Priority {
                stream_id: head.stream_id,
                spec: read_priority(&payload),
            })
        }
        KIND_RST_STREAM => {
            require_stream(&head)?;
            exact_len(&payload, 4, "RST_STREAM")?;
            Ok(Frame::RstStream {
                stream_id: head.stream_id,
                code: read_code(&payload[..4]),
            })
        }
        KIND_SETTINGS => {
            require_connection(&head)?;
            if head.has(FLAG_ACK) {
                if !payload.is_empty() {
                    return Err(Error::FrameSize("SETTINGS ACK with payload".to_string()));
                }
                return Ok(Frame::Settings {
                    ack: true,
                    settings: Settings::new(),
                });
            }
            if payload.len() % 6 != 0 {
                return Err(Error::FrameSize(format!(
                    "SETTINGS payload length {} not a multiple of 6",
                    payload.len()
                )));
            }
            Ok(Frame::Settings {
                ack: false,
                settings: Settings::parse(&payload)?,
            })
        }
        KIND_PUSH_PROMISE => {
            require_stream(&head)?;
            let fragment = unpad(&head, payload)?;
            if fragment.len() < 4 {
                return Err(Error::FrameSize("PUSH_PROMISE too short".to_string()));
            }
            let promised_id =
                u32::from_be_bytes([fragment[0], fragment[1], fragment[2], fragment[3]])
                    & STREAM_ID_MASK;
            Ok(Frame::PushPromise {
                stream_id: head.stream_id,
                promised_id,
                fragment: fragment.slice(4..),
                end_headers: head.has(FLAG_END_HEADERS),
            })
        }
        KIND_PING => {
            require_connection(&head)?;
            exact_len(&payload, 8, "PING")?;
            let mut data = [0u8; 8];
            data.copy_from_slice(&payload);
            Ok(Frame::Ping {
                ack: head.has(FLAG_ACK),
                payload: data,
            })
        }
        KIND_GOAWAY => {
            require_connection(&head)?;
            if payload.len() < 8 {
                return Err(Error::FrameSize("GOAWAY too short".to_string()));
            }
            let last = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                & STREAM_ID_MASK;
            Ok(Frame::Goaway {
                last_stream_id: last,
                code: read_code(&payload[4..8]),
                debug: payload.slice(8..),
            })
        }
        KIND_WINDOW_UPDATE => {
            exact_len(&payload, 4, "WINDOW_UPDATE")?;
            let increment = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                & STREAM_ID_MASK;
            Ok(Frame::WindowUpdate {
                stream_id: head.stream_id,
                increment,
            })
        }
        KIND_CONTINUATION => {
            require_stream(&head)?;
            Ok(Frame::Continuation {
                stream_id: head.stream_id,
                fragment: payload,
                end_headers: head.has(FLAG_END_HEADERS),
            })
        }
        _ => Ok(Frame::Unknown {
            stream_id: head.stream_id,
        }),
    }
}

/// Frame kinds that address a stream must not use stream 0.
fn require_stream(head: &FrameHead) -> Result<()> {
    if head.stream_id == 0 {
        return Err(Error::Protocol(format!(
            "frame kind 0x{:x} on stream 0",
            head.kind
        )));
    }
    Ok(())
}

/// Connection-scoped frame kinds must use stream 0.
fn require_connection(head: &FrameHead) -> Result<()> {
    if head.stream_id != 0 {
        return Err(Error::Protocol(format!(
            "frame kind 0x{:x} on stream {}",
            head.kind, head.stream_id
        )));
    }
    Ok(())
}

fn exact_len(payload: &Bytes, want: usize, kind: &str) -> Result<()> {
    if payload.len() != want {
        return Err(Error::FrameSize(format!(
            "{} payload must be {} bytes, got {}",
            kind,
            want,
            payload.len()
        )));
    }
    Ok(())
}

fn read_code(raw: &[u8]) -> ErrorCode {
    let value = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    ErrorCode::from_u32(value).unwrap_or(ErrorCode::InternalError)
}

/// Strip padding when the PADDED flag is set. The pad length byte plus the
/// padding itself must fit inside the payload or the frame is a protocol
/// violation.
fn unpad(head: &FrameHead, payload: Bytes) -> Result<Bytes> {
    if !head.has(FLAG_PADDED) {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Error::FrameSize(
            "padded frame with empty payload".to_string(),
        ));
    }
    let pad = payload[0] as usize;
    if pad + 1 > payload.len() {
        return Err(Error::Protocol(format!(
            "pad length {} exceeds frame payload {}",
            pad,
            payload.len()
        )));
    }
    Ok(payload.slice(1..payload.len() - pad))
}

/// Read and decode one frame off the transport. `max_payload` is the local
/// SETTINGS_MAX_FRAME_SIZE; larger frames are a frame-size error.
pub fn read_frame(
    conn: &mut Conn,
    max_payload: usize,
    timeout: Option<Duration>,
    mut cancel: Option<&mut CancelContext>,
) -> Result<Frame> {
    let mut raw = [0u8; FRAME_HEAD_LEN];
    fill(conn, &mut raw, timeout, &mut cancel)?;
    let head = parse_head(&raw);

    if head.length > max_payload.min(MAX_FRAME_PAYLOAD) {
        return Err(Error::FrameSize(format!(
            "frame payload {} exceeds limit {}",
            head.length, max_payload
        )));
    }

    let mut payload = vec![0u8; head.length];
    if head.length > 0 {
        fill(conn, &mut payload, timeout, &mut cancel)?;
    }
    decode(head, Bytes::from(payload))
}

fn fill(
    conn: &mut Conn,
    buf: &mut [u8],
    timeout: Option<Duration>,
    cancel: &mut Option<&mut CancelContext>,
) -> Result<()> {
    let mut done = 0;
    while done < buf.len() {
        let n = conn.read(&mut buf[done..], timeout, cancel.as_deref_mut())?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        done += n;
    }
    Ok(())
}
