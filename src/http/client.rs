//! Version-multiplexed HTTP client
//!
//! [`HttpClient::open`] dials the endpoint and lets ALPN pick the engine:
//! `h2` installs the HTTP/2 connection context (preface plus SETTINGS),
//! `http/1.1` or a plain socket installs the HTTP/1 codec. A single
//! [`method`](HttpClient::method) call then works against either engine and
//! returns the response header map, with the body deposited under the
//! `:body` pseudo-key.

use super::h1::{writer, H1Parser};
use super::h2::{self, ErrorCode, H2Connection, SendOutcome, Settings, StreamState};
use super::{headers, Error, Headers, RequestContext, RequestPhase, Result};
use crate::cancel::CancelContext;
use crate::transport::{self, Conn, DialOptions, IpMode, NetInit, ALPN_H2, ALPN_HTTP11};
use crate::url::{split_target, Url};
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;

/// Options for [`HttpClient::open`] and [`HttpClient::reopen`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// CA certificate file for TLS peer verification.
    pub cacert: Option<PathBuf>,
    /// The URL is already percent-encoded.
    pub encoded: bool,
    /// Address-family restriction for dialing.
    pub ip_mode: IpMode,
    /// Dial this host/port instead of the URL's endpoint.
    pub proxy: Option<(String, u16)>,
    /// TCP connect deadline.
    pub connect_timeout: Option<Duration>,
}

impl ClientOptions {
    fn dial_options(&self) -> DialOptions {
        DialOptions {
            cacert: self.cacert.clone(),
            ip_mode: self.ip_mode,
            proxy: self.proxy.clone(),
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Outcome of [`HttpClient::reopen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReopenOutcome {
    /// The endpoint matched and the live transport was kept.
    Kept,
    /// The transport was torn down and redialed; the engine may have
    /// changed version.
    Redialed,
}

enum Engine {
    H1(H1State),
    H2(Box<H2Connection>),
}

struct H1State {
    last: RequestContext,
}

/// HTTP client speaking HTTP/1.1 or HTTP/2 depending on what the
/// connection negotiated.
pub struct HttpClient {
    conn: Option<Conn>,
    engine: Option<Engine>,
    url: Url,
    version: u8,
    last_body: Vec<u8>,
}

impl HttpClient {
    /// Dial `raw_url` and install the engine the connection negotiates.
    pub fn open(net: &NetInit, raw_url: &str, opts: &ClientOptions) -> Result<HttpClient> {
        let url = Url::parse(raw_url, opts.encoded)?;
        let mut conn = transport::dial(
            net,
            &url.host,
            url.port_or_default(),
            &url.scheme,
            &opts.dial_options(),
        )?;
        let (engine, version) = install_engine(&mut conn)?;
        log::debug!("opened {} as HTTP/{}", url, version);
        Ok(HttpClient {
            conn: Some(conn),
            engine: Some(engine),
            url,
            version,
            last_body: Vec::new(),
        })
    }

    /// Rebind the client to a new URL.
    ///
    /// The live transport is reused when the new URL names the same
    /// (scheme, host, port) endpoint and the socket is still open;
    /// otherwise the old engine is released and the endpoint redialed, and
    /// the negotiated version may change.
    pub fn reopen(
        &mut self,
        net: &NetInit,
        raw_url: &str,
        opts: &ClientOptions,
    ) -> Result<ReopenOutcome> {
        if self.conn.is_none() {
            return Err(Error::InvalidCondition);
        }

        // A bare path keeps the current endpoint.
        let url = if raw_url.starts_with('/') {
            Url::parse(
                &format!(
                    "{}://{}{}",
                    self.url.scheme,
                    self.url.host_with_port(),
                    raw_url
                ),
                opts.encoded,
            )?
        } else {
            Url::parse(raw_url, opts.encoded)?
        };

        let conn = self.conn.as_mut().ok_or(Error::InvalidCondition)?;
        let same_endpoint = conn.is_open()
            && conn.endpoint().scheme == url.scheme
            && conn.endpoint().host == url.host
            && conn.endpoint().port == url.port_or_default();

        if same_endpoint {
            log::debug!("reopen {} kept existing connection", url);
            self.url = url;
            match self.engine.as_mut() {
                Some(Engine::H1(state)) => state.last = RequestContext::new(),
                Some(Engine::H2(h2)) => h2.cleanup_closed_streams(),
                None => return Err(Error::InvalidCondition),
            }
            return Ok(ReopenOutcome::Kept);
        }

        let mut new_conn = transport::dial(
            net,
            &url.host,
            url.port_or_default(),
            &url.scheme,
            &opts.dial_options(),
        )?;
        // Release the old engine before the transport flips.
        self.engine = None;
        let (engine, version) = install_engine(&mut new_conn)?;
        let conn = self.conn.as_mut().ok_or(Error::InvalidCondition)?;
        conn.reset(new_conn);
        log::debug!("reopen {} redialed as HTTP/{}", url, version);
        self.engine = Some(engine);
        self.version = version;
        self.url = url;
        Ok(ReopenOutcome::Redialed)
    }

    /// Issue one request and block until the full response is in.
    ///
    /// Works identically on both engines: returns the response header map
    /// with `:status` set and the body under `:body`. `target` is a path
    /// with optional `?query`.
    pub fn method(
        &mut self,
        verb: &str,
        target: &str,
        fields: Headers,
        body: &[u8],
        cancel: Option<&mut CancelContext>,
    ) -> Result<Headers> {
        if self.version == 0 {
            return Err(Error::InvalidCondition);
        }
        let conn = self.conn.as_mut().ok_or(Error::InvalidCondition)?;
        let engine = self.engine.as_mut().ok_or(Error::InvalidCondition)?;

        let result = match engine {
            Engine::H1(state) => method_h1(
                conn,
                &self.url,
                state,
                verb,
                target,
                fields,
                body,
                cancel,
                &mut self.last_body,
            ),
            Engine::H2(h2) => method_h2(
                conn,
                &self.url,
                h2,
                verb,
                target,
                fields,
                body,
                cancel,
                &mut self.last_body,
            ),
        };

        if let Err(e) = &result {
            // Transport-level failures (including cancellation) leave the
            // connection in an unknown state; close it.
            let fatal = matches!(e, Error::Transport(_) | Error::Io(_))
                || matches!(
                    e,
                    Error::H2(h2::Error::Transport(_))
                        | Error::H2(h2::Error::Io(_))
                        | Error::H2(h2::Error::ConnectionClosed)
                );
            if fatal {
                if let Some(conn) = self.conn.as_mut() {
                    conn.close();
                }
            }
        }
        result
    }

    /// Host (with explicit port, if any) of the current endpoint.
    pub fn host(&self) -> String {
        self.url.host_with_port()
    }

    /// The current URL.
    pub fn url(&self) -> String {
        self.url.to_string()
    }

    /// Peer IP address, empty when closed.
    pub fn ipaddress(&self) -> String {
        self.conn
            .as_ref()
            .map(|c| c.peer_address().to_string())
            .unwrap_or_default()
    }

    /// Negotiated HTTP version: 1, 2, or 0 when closed.
    pub fn http_version(&self) -> u8 {
        self.version
    }

    /// Whether the underlying transport is still open.
    pub fn is_open(&self) -> bool {
        self.conn.as_ref().map(|c| c.is_open()).unwrap_or(false)
    }

    /// Raw bytes of the last response body.
    pub fn response_body(&self) -> &[u8] {
        &self.last_body
    }

    /// The last HTTP/1 request record, for inspection.
    pub fn last_request(&self) -> Option<&RequestContext> {
        match self.engine.as_ref() {
            Some(Engine::H1(state)) => Some(&state.last),
            _ => None,
        }
    }

    /// Tear everything down.
    pub fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
        self.engine = None;
        self.version = 0;
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn install_engine(conn: &mut Conn) -> Result<(Engine, u8)> {
    if conn.is_secure() {
        let alpn = conn.selected_alpn().to_vec();
        if alpn == ALPN_H2 {
            let h2 = H2Connection::client(conn, Settings::initial(), None)?;
            return Ok((Engine::H2(Box::new(h2)), 2));
        }
        if alpn == ALPN_HTTP11 {
            return Ok((
                Engine::H1(H1State {
                    last: RequestContext::new(),
                }),
                1,
            ));
        }
        return Err(Error::Transport(transport::Error::AlpnMismatch));
    }
    // Plain transport always runs HTTP/1.1 (no h2c upgrade).
    Ok((
        Engine::H1(H1State {
            last: RequestContext::new(),
        }),
        1,
    ))
}

#[allow(clippy::too_many_arguments)]
fn method_h1(
    conn: &mut Conn,
    url: &Url,
    state: &mut H1State,
    verb: &str,
    target: &str,
    fields: Headers,
    body: &[u8],
    mut cancel: Option<&mut CancelContext>,
    last_body: &mut Vec<u8>,
) -> Result<Headers> {
    let mut req = RequestContext::new();
    req.resolved_version = 1;
    req.method = verb.to_string();
    req.url = url.clone();
    let (path, query) = split_target(target);
    req.url.path = path;
    req.url.query = query;
    req.request = fields;
    req.request_body = body.to_vec();
    if verb.eq_ignore_ascii_case("HEAD") {
        req.flags.no_read_body = true;
    }

    req.phase = RequestPhase::RequestSending;
    let mut wire = Vec::new();
    writer::write_request(&mut wire, &req);
    conn.write(&wire, None, cancel.as_deref_mut())?;
    req.phase = RequestPhase::RequestSent;

    let mut parser = H1Parser::client();
    req.phase = RequestPhase::ResponseRecving;
    let mut buf = [0u8; 4096];
    while parser.require() {
        let n = conn.read(&mut buf, None, cancel.as_deref_mut())?;
        if n == 0 {
            parser.finish(&mut req)?;
            break;
        }
        parser.append(&mut req, &buf[..n])?;
    }

    if parser.close_conn() {
        log::debug!("peer asked for connection close");
        conn.close();
    }

    let mut result = req.response.clone();
    result.remove(headers::PSEUDO_BODY);
    result.insert(
        headers::PSEUDO_BODY,
        String::from_utf8_lossy(&req.response_body).into_owned(),
    );
    *last_body = req.response_body.clone();
    state.last = req;
    Ok(result)
}

#[allow(clippy::too_many_arguments)]
fn method_h2(
    conn: &mut Conn,
    url: &Url,
    h2: &mut H2Connection,
    verb: &str,
    target: &str,
    fields: Headers,
    body: &[u8],
    mut cancel: Option<&mut CancelContext>,
    last_body: &mut Vec<u8>,
) -> Result<Headers> {
    let (path, query) = split_target(target);

    // Reuse the newest stream while it is still idle, otherwise open one.
    let maxid = h2.maxid();
    let reuse_idle = h2
        .stream(maxid)
        .map(|s| s.state() == StreamState::Idle)
        .unwrap_or(false);
    let stream_id = if reuse_idle {
        let stream = h2
            .stream_mut(maxid)
            .ok_or(h2::Error::StreamNotFound(maxid))?;
        stream.path = path.clone();
        stream.query = query.clone();
        maxid
    } else {
        h2.make_stream(&path, &query)?
    };

    let mut block = Headers::new();
    block.insert(
        headers::PSEUDO_METHOD,
        if verb.is_empty() { "GET" } else { verb },
    );
    block.insert(headers::PSEUDO_SCHEME, url.scheme.clone());
    block.insert(headers::PSEUDO_AUTHORITY, url.host_with_port());
    let full_path = if path.is_empty() {
        format!("/{}", query)
    } else {
        format!("{}{}", path, query)
    };
    block.insert(headers::PSEUDO_PATH, full_path);
    for (name, value) in fields.iter() {
        // The framework owns the authority and pseudo fields.
        if name.eq_ignore_ascii_case("host") || headers::is_pseudo(name) {
            continue;
        }
        block.insert(name, value);
    }

    let has_body = !body.is_empty();
    h2.send_headers(conn, stream_id, &block, !has_body, cancel.as_deref_mut())?;
    if has_body {
        let outcome = h2.send_data(
            conn,
            stream_id,
            Bytes::copy_from_slice(body),
            true,
            cancel.as_deref_mut(),
        )?;
        if outcome == SendOutcome::Suspended {
            log::trace!("h2: stream {} awaiting window update", stream_id);
        }
    }

    // Receive pump: process frames until our stream closes.
    loop {
        match h2.stream(stream_id) {
            Some(s) if s.state().is_closed() => break,
            Some(_) => {}
            None => return Err(h2::Error::StreamNotFound(stream_id).into()),
        }

        let frame = h2.recv_frame(conn, None, cancel.as_deref_mut())?;
        let applied = match h2.apply(conn, frame) {
            Ok(applied) => applied,
            Err(e) => {
                // Connection error: GOAWAY, drain nothing, tear down.
                let _ = h2.send_goaway(conn, e.code(), "protocol failure");
                conn.close();
                return Err(e.into());
            }
        };

        if applied.window_opened && h2.has_pending_data(stream_id) {
            h2.resume_data(conn, stream_id, cancel.as_deref_mut())?;
        }
    }

    let stream = h2
        .stream_mut(stream_id)
        .ok_or(h2::Error::StreamNotFound(stream_id))?;
    if let Some(code) = stream.error_code {
        if code != ErrorCode::NoError {
            return Err(h2::Error::from_code(code, stream_id).into());
        }
    }

    let body_bytes = stream.take_body();
    let mut result = stream.headers.clone();
    result.remove(headers::PSEUDO_BODY);
    result.insert(
        headers::PSEUDO_BODY,
        String::from_utf8_lossy(&body_bytes).into_owned(),
    );
    *last_body = body_bytes;
    h2.cleanup_closed_streams();
    Ok(result)
}
