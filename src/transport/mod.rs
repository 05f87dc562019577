//! Transport abstraction
//!
//! A [`Conn`] is a byte-oriented connection that is either a plain TCP
//! socket or a TLS session. Writes are length-complete (all bytes or error);
//! reads may return partial data and the caller loops. Every blocking point
//! polls the socket in short ticks and consults the caller's
//! [`CancelContext`] after each non-progressing iteration.

pub mod tls;

use crate::cancel::{BlockEvent, CancelContext, CancelReason, SslIssue};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub use tls::{TlsConfig, TlsConn};

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("DNS resolution failed for {0}")]
    DnsFailure(String),

    #[error("TCP connect failed: {0}")]
    TcpFailure(String),

    #[error("TLS failure: {0}")]
    TlsFailure(String),

    #[error("ALPN negotiation failed")]
    AlpnMismatch,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("canceled: {0:?}")]
    Canceled(CancelReason),
}

pub type Result<T> = std::result::Result<T, Error>;

/// ALPN protocol list offered by the client: `h2` then `http/1.1`,
/// length-prefixed per RFC 7301.
pub const ALPN_PROTOCOLS: &[u8] = b"\x02h2\x08http/1.1";

/// ALPN token selecting HTTP/2.
pub const ALPN_H2: &[u8] = b"h2";

/// ALPN token selecting HTTP/1.1.
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

/// Poll granularity between cancellation checks.
const POLL_TICK: Duration = Duration::from_millis(100);

/// Token witnessing that process-wide network/TLS state is initialized.
/// Obtain with [`init`]; required by dial and the client's `open`.
pub struct NetInit {
    _priv: (),
}

/// Initialize the process-wide TLS library state and return the token.
pub fn init() -> NetInit {
    openssl::init();
    NetInit { _priv: () }
}

/// Address-family restriction for dialing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpMode {
    #[default]
    Both,
    V4Only,
    V6Only,
}

/// The endpoint a connection is bound to; `reset`/reopen reuse the socket
/// only when this matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

/// Dial parameters.
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// CA certificate file for peer verification; peer goes unverified when
    /// absent.
    pub cacert: Option<PathBuf>,
    /// Address-family restriction.
    pub ip_mode: IpMode,
    /// Connect to this host/port instead of the endpoint itself.
    pub proxy: Option<(String, u16)>,
    /// TCP connect deadline per resolved address.
    pub connect_timeout: Option<Duration>,
}

/// A transport connection: plain socket or TLS session.
#[derive(Debug)]
pub enum Conn {
    Plain(PlainConn),
    Tls(TlsConn),
}

/// Plain TCP connection.
#[derive(Debug)]
pub struct PlainConn {
    stream: Option<TcpStream>,
    endpoint: Endpoint,
    peer: String,
}

impl Conn {
    /// Wrap an accepted or pre-connected TCP stream as a plain connection.
    pub fn from_tcp_stream(stream: TcpStream) -> Result<Conn> {
        stream.set_nonblocking(true)?;
        let (peer, port) = match stream.peer_addr() {
            Ok(addr) => (format_ip(&addr), addr.port()),
            Err(_) => (String::new(), 0),
        };
        Ok(Conn::Plain(PlainConn {
            stream: Some(stream),
            endpoint: Endpoint {
                scheme: "http".to_string(),
                host: peer.clone(),
                port,
            },
            peer,
        }))
    }

    /// Write the whole buffer or fail. Short writes are retried until the
    /// buffer is consumed or cancellation fires.
    pub fn write(
        &mut self,
        data: &[u8],
        timeout: Option<Duration>,
        cancel: Option<&mut CancelContext>,
    ) -> Result<()> {
        match self {
            Conn::Plain(c) => c.write(data, timeout, cancel),
            Conn::Tls(c) => c.write(data, timeout, cancel),
        }
    }

    /// Read into `buf`; returns the byte count, 0 at EOF. May return less
    /// than the buffer size.
    pub fn read(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
        cancel: Option<&mut CancelContext>,
    ) -> Result<usize> {
        match self {
            Conn::Plain(c) => c.read(buf, timeout, cancel),
            Conn::Tls(c) => c.read(buf, timeout, cancel),
        }
    }

    /// Shut the connection down and release the socket.
    pub fn close(&mut self) {
        match self {
            Conn::Plain(c) => c.close(),
            Conn::Tls(c) => c.close(),
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            Conn::Plain(c) => c.stream.is_some(),
            Conn::Tls(c) => c.is_open(),
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Conn::Tls(_))
    }

    /// Peer IP address as a string, empty if unknown.
    pub fn peer_address(&self) -> &str {
        match self {
            Conn::Plain(c) => &c.peer,
            Conn::Tls(c) => c.peer_address(),
        }
    }

    /// ALPN protocol selected during the handshake, empty for plain
    /// connections or when the peer selected nothing.
    pub fn selected_alpn(&self) -> &[u8] {
        match self {
            Conn::Plain(_) => &[],
            Conn::Tls(c) => c.selected_alpn(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        match self {
            Conn::Plain(c) => &c.endpoint,
            Conn::Tls(c) => c.endpoint(),
        }
    }

    /// Rebind this connection in place. Refused (returns `false`) when the
    /// replacement names the same endpoint and the socket is still open, in
    /// which case `new_conn` is dropped.
    pub fn reset(&mut self, new_conn: Conn) -> bool {
        if self.is_open() && self.endpoint() == new_conn.endpoint() {
            return false;
        }
        self.close();
        *self = new_conn;
        true
    }
}

impl PlainConn {
    fn fd(&self) -> Option<RawFd> {
        use std::os::fd::AsRawFd;
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }

    fn write(
        &mut self,
        data: &[u8],
        timeout: Option<Duration>,
        cancel: Option<&mut CancelContext>,
    ) -> Result<()> {
        let fd = self.fd().ok_or(Error::ConnectionClosed)?;
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        write_all(stream, fd, false, data, timeout, cancel)
    }

    fn read(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
        cancel: Option<&mut CancelContext>,
    ) -> Result<usize> {
        let fd = self.fd().ok_or(Error::ConnectionClosed)?;
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        read_some(stream, fd, false, buf, timeout, cancel)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

/// Resolve and connect, returning a plain or TLS connection.
///
/// TLS connections advertise [`ALPN_PROTOCOLS`]; the selected protocol is
/// readable afterwards via [`Conn::selected_alpn`].
pub fn dial(
    _net: &NetInit,
    host: &str,
    port: u16,
    scheme: &str,
    opts: &DialOptions,
) -> Result<Conn> {
    let secure = scheme == "https";
    let (dial_host, dial_port) = match &opts.proxy {
        Some((h, p)) => (h.clone(), *p),
        None => (host.to_string(), port),
    };

    let addrs: Vec<SocketAddr> = (dial_host.as_str(), dial_port)
        .to_socket_addrs()
        .map_err(|_| Error::DnsFailure(dial_host.clone()))?
        .filter(|a| match opts.ip_mode {
            IpMode::Both => true,
            IpMode::V4Only => a.is_ipv4(),
            IpMode::V6Only => a.is_ipv6(),
        })
        .collect();
    if addrs.is_empty() {
        return Err(Error::DnsFailure(dial_host));
    }

    let endpoint = Endpoint {
        scheme: scheme.to_string(),
        host: host.to_string(),
        port,
    };

    let mut last_err: Option<io::Error> = None;
    for addr in &addrs {
        let stream = match opts.connect_timeout {
            Some(t) => TcpStream::connect_timeout(addr, t),
            None => TcpStream::connect(addr),
        };
        match stream {
            Ok(stream) => {
                let peer = format_ip(addr);
                log::debug!("connected to {} ({})", endpoint.host, peer);
                if secure {
                    let config = TlsConfig::client(opts.cacert.as_deref(), ALPN_PROTOCOLS)?;
                    let tls = config.connect(stream, host, endpoint, peer)?;
                    return Ok(Conn::Tls(tls));
                }
                stream.set_nonblocking(true)?;
                return Ok(Conn::Plain(PlainConn {
                    stream: Some(stream),
                    endpoint,
                    peer,
                }));
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(Error::TcpFailure(
        last_err.map(|e| e.to_string()).unwrap_or_default(),
    ))
}

/// Peer address string; v4-mapped v6 addresses are reported in v4 form.
fn format_ip(addr: &SocketAddr) -> String {
    let ip = addr.ip().to_string();
    match ip.strip_prefix("::ffff:") {
        Some(v4) if v4.contains('.') => v4.to_string(),
        _ => ip,
    }
}

fn poll_fd(fd: RawFd, want_write: bool, tick: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: if want_write {
            libc::POLLOUT
        } else {
            libc::POLLIN
        },
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pfd as *mut libc::pollfd, 1, tick.as_millis() as i32) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0)
}

fn check_cancel(cancel: &mut Option<&mut CancelContext>, ev: &BlockEvent) -> Result<()> {
    if let Some(ctx) = cancel.as_deref_mut() {
        if ctx.on_cancel(ev) {
            return Err(Error::Canceled(ctx.deep_reason()));
        }
    }
    Ok(())
}

fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    if let Some(d) = deadline {
        if Instant::now() >= d {
            return Err(Error::Canceled(CancelReason::Timeout));
        }
    }
    Ok(())
}

/// Shared read loop over a non-blocking stream. `secure` marks would-block
/// retries as TLS `want_*` for the cancel context.
pub(crate) fn read_some<R: Read>(
    io: &mut R,
    fd: RawFd,
    secure: bool,
    buf: &mut [u8],
    timeout: Option<Duration>,
    mut cancel: Option<&mut CancelContext>,
) -> Result<usize> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        match io.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                let ev = BlockEvent {
                    would_block: true,
                    os_err: 0,
                    ssl: if secure {
                        SslIssue::WantRetry
                    } else {
                        SslIssue::None
                    },
                };
                check_cancel(&mut cancel, &ev)?;
                check_deadline(deadline)?;
                poll_fd(fd, false, POLL_TICK)?;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let ev = if secure {
                    BlockEvent::ssl_fatal()
                } else {
                    BlockEvent::os(&e)
                };
                if let Some(ctx) = cancel.as_deref_mut() {
                    ctx.on_cancel(&ev);
                }
                return Err(Error::Io(e));
            }
        }
    }
}

/// Shared length-complete write loop over a non-blocking stream.
pub(crate) fn write_all<W: Write>(
    io: &mut W,
    fd: RawFd,
    secure: bool,
    data: &[u8],
    timeout: Option<Duration>,
    mut cancel: Option<&mut CancelContext>,
) -> Result<()> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut written = 0;
    while written < data.len() {
        match io.write(&data[written..]) {
            Ok(0) => return Err(Error::ConnectionClosed),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                let ev = BlockEvent {
                    would_block: true,
                    os_err: 0,
                    ssl: if secure {
                        SslIssue::WantRetry
                    } else {
                        SslIssue::None
                    },
                };
                check_cancel(&mut cancel, &ev)?;
                check_deadline(deadline)?;
                poll_fd(fd, true, POLL_TICK)?;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let ev = if secure {
                    BlockEvent::ssl_fatal()
                } else {
                    BlockEvent::os(&e)
                };
                if let Some(ctx) = cancel.as_deref_mut() {
                    ctx.on_cancel(&ev);
                }
                return Err(Error::Io(e));
            }
        }
    }
    Ok(())
}
