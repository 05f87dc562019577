//! End-to-end tests for the HTTP/2 engine against a scripted peer speaking
//! raw frames over loopback TCP.

use bytes::Bytes;
use dualhttp::http::h2::{
    codec, H2Connection, SendOutcome, Settings, StreamState,
};
use dualhttp::http::Headers;
use dualhttp::transport::Conn;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Blocking frame read for the scripted peer.
fn peer_read_frame(stream: &mut TcpStream) -> (u8, u8, u32, Vec<u8>) {
    let mut header = [0u8; 9];
    stream.read_exact(&mut header).unwrap();
    let len = ((header[0] as usize) << 16) | ((header[1] as usize) << 8) | header[2] as usize;
    let ftype = header[3];
    let flags = header[4];
    let stream_id = u32::from_be_bytes([header[5] & 0x7F, header[6], header[7], header[8]]);
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).unwrap();
    (ftype, flags, stream_id, payload)
}

fn peer_write_frame(stream: &mut TcpStream, ftype: u8, flags: u8, stream_id: u32, payload: &[u8]) {
    let mut frame = Vec::with_capacity(9 + payload.len());
    frame.push(((payload.len() >> 16) & 0xFF) as u8);
    frame.push(((payload.len() >> 8) & 0xFF) as u8);
    frame.push((payload.len() & 0xFF) as u8);
    frame.push(ftype);
    frame.push(flags);
    frame.extend_from_slice(&stream_id.to_be_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame).unwrap();
}

fn peer_expect_preface_and_settings(stream: &mut TcpStream) {
    let mut preface = [0u8; 24];
    stream.read_exact(&mut preface).unwrap();
    assert_eq!(&preface[..], PREFACE);
    let (ftype, _, stream_id, _) = peer_read_frame(stream);
    assert_eq!(ftype, 0x4, "expected SETTINGS");
    assert_eq!(stream_id, 0);
    // Our empty SETTINGS.
    peer_write_frame(stream, 0x4, 0, 0, &[]);
}

fn encode_status(status: &str) -> Vec<u8> {
    let mut encoder = hpack::Encoder::new();
    encoder.encode(vec![(b":status".as_ref(), status.as_bytes())])
}

fn connect_pair() -> (Conn, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).unwrap();
    let (server, _) = listener.accept().unwrap();
    (Conn::from_tcp_stream(client).unwrap(), server)
}

/// Drive the receive pump until the given stream closes.
fn pump_until_closed(h2: &mut H2Connection, conn: &mut Conn, stream_id: u32) {
    loop {
        if h2
            .stream(stream_id)
            .map(|s| s.state().is_closed())
            .unwrap_or(true)
        {
            break;
        }
        let frame = h2.recv_frame(conn, None, None).unwrap();
        let applied = h2.apply(conn, frame).unwrap();
        if applied.window_opened && h2.has_pending_data(stream_id) {
            h2.resume_data(conn, stream_id, None).unwrap();
        }
    }
}

#[test]
fn test_get_with_204_response() {
    let (mut conn, mut peer) = connect_pair();

    let server = thread::spawn(move || {
        peer_expect_preface_and_settings(&mut peer);

        // Client HEADERS with END_STREAM | END_HEADERS on stream 1.
        let (ftype, flags, stream_id, payload) = peer_read_frame(&mut peer);
        assert_eq!(ftype, 0x1);
        assert_eq!(flags & 0x1, 0x1, "END_STREAM expected");
        assert_eq!(flags & 0x4, 0x4, "END_HEADERS expected");
        assert_eq!(stream_id, 1);

        let mut decoder = hpack::Decoder::new();
        let decoded = decoder.decode(&payload).unwrap();
        let as_pairs: Vec<(String, String)> = decoded
            .iter()
            .map(|(n, v)| {
                (
                    String::from_utf8_lossy(n).into_owned(),
                    String::from_utf8_lossy(v).into_owned(),
                )
            })
            .collect();
        assert_eq!(as_pairs[0], (":method".to_string(), "GET".to_string()));
        assert!(as_pairs.contains(&(":scheme".to_string(), "https".to_string())));
        assert!(as_pairs.contains(&(":authority".to_string(), "example.test".to_string())));
        assert!(as_pairs.contains(&(":path".to_string(), "/".to_string())));

        // SETTINGS ACK from the client for our empty SETTINGS.
        let (ftype, flags, _, _) = peer_read_frame(&mut peer);
        assert_eq!(ftype, 0x4);
        assert_eq!(flags & 0x1, 0x1);

        // Respond 204, END_STREAM | END_HEADERS, no DATA.
        let block = encode_status("204");
        peer_write_frame(&mut peer, 0x1, 0x1 | 0x4, 1, &block);
    });

    let mut h2 = H2Connection::client(&mut conn, Settings::initial(), None).unwrap();
    let stream_id = h2.make_stream("/", "").unwrap();
    assert_eq!(stream_id, 1);

    let mut fields = Headers::new();
    fields.insert(":method", "GET");
    fields.insert(":scheme", "https");
    fields.insert(":authority", "example.test");
    fields.insert(":path", "/");
    h2.send_headers(&mut conn, stream_id, &fields, true, None)
        .unwrap();

    pump_until_closed(&mut h2, &mut conn, stream_id);

    let stream = h2.stream(stream_id).unwrap();
    assert_eq!(stream.state(), StreamState::Closed);
    assert_eq!(stream.headers.get(":status"), Some("204"));
    assert!(stream.body.is_empty());

    server.join().unwrap();
}

#[test]
fn test_flow_control_suspend_and_resume() {
    let (mut conn, mut peer) = connect_pair();

    const TOTAL: usize = 100_000;
    const WINDOW: usize = 65_535;

    let server = thread::spawn(move || {
        peer_expect_preface_and_settings(&mut peer);

        // HEADERS without END_STREAM.
        let (ftype, flags, stream_id, _) = peer_read_frame(&mut peer);
        assert_eq!(ftype, 0x1);
        assert_eq!(flags & 0x1, 0, "no END_STREAM yet");
        assert_eq!(stream_id, 1);

        // DATA up to the 65535-byte initial window; nothing carries
        // END_STREAM yet.
        let mut received = 0usize;
        while received < WINDOW {
            let (ftype, flags, stream_id, payload) = peer_read_frame(&mut peer);
            if ftype == 0x4 {
                // SETTINGS ACK.
                continue;
            }
            assert_eq!(ftype, 0x0);
            assert_eq!(stream_id, 1);
            assert_eq!(flags & 0x1, 0);
            received += payload.len();
        }
        assert_eq!(received, WINDOW);

        // Open both windows for the remainder.
        let increment = (TOTAL - WINDOW) as u32;
        peer_write_frame(&mut peer, 0x8, 0, 0, &increment.to_be_bytes());
        peer_write_frame(&mut peer, 0x8, 0, 1, &increment.to_be_bytes());

        // Remaining bytes, END_STREAM on the last frame.
        let mut rest = 0usize;
        let mut saw_end_stream = false;
        while rest < TOTAL - WINDOW {
            let (ftype, flags, _, payload) = peer_read_frame(&mut peer);
            if ftype == 0x4 {
                continue;
            }
            assert_eq!(ftype, 0x0);
            rest += payload.len();
            if flags & 0x1 == 0x1 {
                saw_end_stream = true;
            }
        }
        assert_eq!(rest, TOTAL - WINDOW);
        assert!(saw_end_stream);

        // Close out the exchange.
        let block = encode_status("200");
        peer_write_frame(&mut peer, 0x1, 0x1 | 0x4, 1, &block);
    });

    let mut h2 = H2Connection::client(&mut conn, Settings::initial(), None).unwrap();
    let stream_id = h2.make_stream("/upload", "").unwrap();

    let mut fields = Headers::new();
    fields.insert(":method", "POST");
    fields.insert(":scheme", "https");
    fields.insert(":authority", "example.test");
    fields.insert(":path", "/upload");
    h2.send_headers(&mut conn, stream_id, &fields, false, None)
        .unwrap();

    let body = Bytes::from(vec![0x5Au8; TOTAL]);
    let outcome = h2
        .send_data(&mut conn, stream_id, body, true, None)
        .unwrap();
    assert_eq!(outcome, SendOutcome::Suspended);
    assert!(h2.has_pending_data(stream_id));
    assert_eq!(h2.connection_send_window(), 0);

    pump_until_closed(&mut h2, &mut conn, stream_id);

    let stream = h2.stream(stream_id).unwrap();
    assert_eq!(stream.headers.get(":status"), Some("200"));
    assert!(!h2.has_pending_data(stream_id));

    server.join().unwrap();
}

#[test]
fn test_response_with_body_and_window_replenish() {
    let (mut conn, mut peer) = connect_pair();

    let server = thread::spawn(move || {
        peer_expect_preface_and_settings(&mut peer);
        let (_, _, _, _) = peer_read_frame(&mut peer); // HEADERS
        let (ftype, flags, _, _) = peer_read_frame(&mut peer); // SETTINGS ACK
        assert_eq!(ftype, 0x4);
        assert_eq!(flags & 0x1, 0x1);

        let block = encode_status("200");
        peer_write_frame(&mut peer, 0x1, 0x4, 1, &block);
        // Body over two DATA frames, 40000 bytes total dips the 65535
        // receive windows below half and must trigger WINDOW_UPDATEs while
        // the stream is still open.
        peer_write_frame(&mut peer, 0x0, 0, 1, &vec![1u8; 20_000]);
        peer_write_frame(&mut peer, 0x0, 0, 1, &vec![2u8; 20_000]);

        // Expect stream and connection WINDOW_UPDATE from the client.
        let mut got_stream_update = false;
        let mut got_conn_update = false;
        for _ in 0..2 {
            let (ftype, _, stream_id, payload) = peer_read_frame(&mut peer);
            assert_eq!(ftype, 0x8, "expected WINDOW_UPDATE");
            let increment = u32::from_be_bytes(payload[..4].try_into().unwrap());
            assert!(increment > 0);
            if stream_id == 0 {
                got_conn_update = true;
            } else {
                got_stream_update = true;
            }
        }
        assert!(got_conn_update);
        assert!(got_stream_update);

        // Finish the stream.
        peer_write_frame(&mut peer, 0x0, 0x1, 1, &[]);
    });

    let mut h2 = H2Connection::client(&mut conn, Settings::initial(), None).unwrap();
    let stream_id = h2.make_stream("/big", "").unwrap();

    let mut fields = Headers::new();
    fields.insert(":method", "GET");
    fields.insert(":scheme", "https");
    fields.insert(":authority", "example.test");
    fields.insert(":path", "/big");
    h2.send_headers(&mut conn, stream_id, &fields, true, None)
        .unwrap();

    pump_until_closed(&mut h2, &mut conn, stream_id);

    let stream = h2.stream(stream_id).unwrap();
    assert_eq!(stream.body.len(), 40_000);
    assert_eq!(stream.headers.get(":status"), Some("200"));

    server.join().unwrap();
}

#[test]
fn test_rst_stream_closes_with_code() {
    let (mut conn, mut peer) = connect_pair();

    let server = thread::spawn(move || {
        peer_expect_preface_and_settings(&mut peer);
        let (_, _, _, _) = peer_read_frame(&mut peer); // HEADERS
        let (_, _, _, _) = peer_read_frame(&mut peer); // SETTINGS ACK
        // REFUSED_STREAM (0x7).
        peer_write_frame(&mut peer, 0x3, 0, 1, &7u32.to_be_bytes());
    });

    let mut h2 = H2Connection::client(&mut conn, Settings::initial(), None).unwrap();
    let stream_id = h2.make_stream("/", "").unwrap();
    let mut fields = Headers::new();
    fields.insert(":method", "GET");
    fields.insert(":scheme", "https");
    fields.insert(":authority", "example.test");
    fields.insert(":path", "/");
    h2.send_headers(&mut conn, stream_id, &fields, true, None)
        .unwrap();

    pump_until_closed(&mut h2, &mut conn, stream_id);

    let stream = h2.stream(stream_id).unwrap();
    assert_eq!(stream.state(), StreamState::Closed);
    assert_eq!(
        stream.error_code,
        Some(dualhttp::http::h2::ErrorCode::RefusedStream)
    );

    server.join().unwrap();
}

#[test]
fn test_zero_increment_window_update_is_connection_error() {
    let (mut conn, mut peer) = connect_pair();

    let server = thread::spawn(move || {
        peer_expect_preface_and_settings(&mut peer);
        let (_, _, _, _) = peer_read_frame(&mut peer); // HEADERS
        let (_, _, _, _) = peer_read_frame(&mut peer); // SETTINGS ACK
        peer_write_frame(&mut peer, 0x8, 0, 0, &0u32.to_be_bytes());
        // Swallow whatever the client sends back before it closes.
        let mut sink = Vec::new();
        let _ = peer.read_to_end(&mut sink);
    });

    let mut h2 = H2Connection::client(&mut conn, Settings::initial(), None).unwrap();
    let stream_id = h2.make_stream("/", "").unwrap();
    let mut fields = Headers::new();
    fields.insert(":method", "GET");
    fields.insert(":scheme", "https");
    fields.insert(":authority", "example.test");
    fields.insert(":path", "/");
    h2.send_headers(&mut conn, stream_id, &fields, true, None)
        .unwrap();

    // Pump manually: the zero-increment update must surface as a
    // connection-level protocol error.
    let mut saw_error = false;
    loop {
        let frame = h2.recv_frame(&mut conn, None, None).unwrap();
        match h2.apply(&mut conn, frame) {
            Ok(_) => continue,
            Err(e) => {
                assert!(e.is_connection_error());
                h2.send_goaway(&mut conn, e.code(), "bad window update")
                    .unwrap();
                conn.close();
                saw_error = true;
                break;
            }
        }
    }
    assert!(saw_error);

    server.join().unwrap();
}

#[test]
fn test_trailers_append_to_stream_headers() {
    let (mut conn, mut peer) = connect_pair();

    let server = thread::spawn(move || {
        peer_expect_preface_and_settings(&mut peer);
        let (_, _, _, _) = peer_read_frame(&mut peer); // HEADERS
        let (_, _, _, _) = peer_read_frame(&mut peer); // SETTINGS ACK

        let mut encoder = hpack::Encoder::new();
        let head = encoder.encode(vec![(b":status".as_ref(), b"200".as_ref())]);
        peer_write_frame(&mut peer, 0x1, 0x4, 1, &head);
        peer_write_frame(&mut peer, 0x0, 0, 1, b"partial");
        // Trailer block: END_STREAM | END_HEADERS, no pseudo fields.
        let trailers = encoder.encode(vec![(b"x-checksum".as_ref(), b"abc".as_ref())]);
        peer_write_frame(&mut peer, 0x1, 0x1 | 0x4, 1, &trailers);
    });

    let mut h2 = H2Connection::client(&mut conn, Settings::initial(), None).unwrap();
    let stream_id = h2.make_stream("/", "").unwrap();
    let mut fields = Headers::new();
    fields.insert(":method", "GET");
    fields.insert(":scheme", "https");
    fields.insert(":authority", "example.test");
    fields.insert(":path", "/");
    h2.send_headers(&mut conn, stream_id, &fields, true, None)
        .unwrap();

    pump_until_closed(&mut h2, &mut conn, stream_id);

    let stream = h2.stream(stream_id).unwrap();
    assert_eq!(stream.headers.get(":status"), Some("200"));
    assert_eq!(stream.headers.get("x-checksum"), Some("abc"));
    assert_eq!(stream.body, b"partial");

    server.join().unwrap();
}

#[test]
fn test_continuation_frames_assemble_one_block() {
    let (mut conn, mut peer) = connect_pair();

    let server = thread::spawn(move || {
        peer_expect_preface_and_settings(&mut peer);
        let (_, _, _, _) = peer_read_frame(&mut peer); // HEADERS
        let (_, _, _, _) = peer_read_frame(&mut peer); // SETTINGS ACK

        let mut encoder = hpack::Encoder::new();
        let block = encoder.encode(vec![
            (b":status".as_ref(), b"200".as_ref()),
            (b"x-long".as_ref(), b"value".as_ref()),
        ]);
        let split = block.len() / 2;
        // HEADERS without END_HEADERS, then CONTINUATION finishing the
        // block and the stream.
        peer_write_frame(&mut peer, 0x1, 0x1, 1, &block[..split]);
        peer_write_frame(&mut peer, 0x9, 0x4, 1, &block[split..]);
    });

    let mut h2 = H2Connection::client(&mut conn, Settings::initial(), None).unwrap();
    let stream_id = h2.make_stream("/", "").unwrap();
    let mut fields = Headers::new();
    fields.insert(":method", "GET");
    fields.insert(":scheme", "https");
    fields.insert(":authority", "example.test");
    fields.insert(":path", "/");
    h2.send_headers(&mut conn, stream_id, &fields, true, None)
        .unwrap();

    pump_until_closed(&mut h2, &mut conn, stream_id);

    let stream = h2.stream(stream_id).unwrap();
    assert_eq!(stream.headers.get(":status"), Some("200"));
    assert_eq!(stream.headers.get("x-long"), Some("value"));

    server.join().unwrap();
}

#[test]
fn test_frame_size_boundary() {
    // Exactly max_frame_size goes out in one frame; one byte more in two.
    let (mut conn, mut peer) = connect_pair();

    let server = thread::spawn(move || {
        peer_expect_preface_and_settings(&mut peer);
        let (_, _, _, _) = peer_read_frame(&mut peer); // HEADERS

        let mut frames = Vec::new();
        let mut total = 0usize;
        while total < 16_384 + 16_385 {
            let (ftype, _, _, payload) = peer_read_frame(&mut peer);
            if ftype == 0x4 {
                continue;
            }
            assert_eq!(ftype, 0x0);
            total += payload.len();
            frames.push(payload.len());
        }
        // First send: one full frame. Second send: a full frame plus one
        // byte.
        assert_eq!(frames, vec![16_384, 16_384, 1]);
    });

    let mut h2 = H2Connection::client(&mut conn, Settings::initial(), None).unwrap();
    let stream_id = h2.make_stream("/", "").unwrap();
    let mut fields = Headers::new();
    fields.insert(":method", "POST");
    fields.insert(":scheme", "https");
    fields.insert(":authority", "example.test");
    fields.insert(":path", "/");
    h2.send_headers(&mut conn, stream_id, &fields, false, None)
        .unwrap();

    let exact = Bytes::from(vec![0u8; 16_384]);
    assert_eq!(
        h2.send_data(&mut conn, stream_id, exact, false, None).unwrap(),
        SendOutcome::Done
    );
    let plus_one = Bytes::from(vec![0u8; 16_385]);
    assert_eq!(
        h2.send_data(&mut conn, stream_id, plus_one, false, None)
            .unwrap(),
        SendOutcome::Done
    );

    server.join().unwrap();

    // Frame-head math sanity check against the crate's own codec.
    let wire = codec::encode(&dualhttp::http::h2::Frame::data(1, Bytes::new(), false));
    let head = codec::parse_head(wire[..9].try_into().unwrap());
    assert_eq!(head.length, 0);
    assert_eq!(head.stream_id, 1);
}
