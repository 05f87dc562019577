//! TLS transport
//!
//! openssl-backed secure connection. The handshake runs in blocking mode;
//! afterwards the underlying socket switches to non-blocking and the shared
//! poll loops drive the session, with `want_read`/`want_write` surfacing as
//! retries. Any other TLS failure latches the session as failed and refuses
//! further writes.

use super::{read_some, write_all, Endpoint, Error, Result};
use crate::cancel::CancelContext;
use openssl::ssl::{Ssl, SslContext, SslContextBuilder, SslMethod, SslStream, SslVerifyMode};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::time::Duration;

/// Client-side TLS configuration.
#[derive(Clone)]
pub struct TlsConfig {
    ctx: SslContext,
}

impl TlsConfig {
    /// Build a client configuration.
    ///
    /// With a CA file the peer certificate is verified against it; without
    /// one verification is disabled. `alpn` is the RFC 7301 length-prefixed
    /// protocol list.
    pub fn client(cacert: Option<&Path>, alpn: &[u8]) -> Result<TlsConfig> {
        let mut builder = SslContextBuilder::new(SslMethod::tls_client())
            .map_err(|e| Error::TlsFailure(e.to_string()))?;
        match cacert {
            Some(path) => {
                builder
                    .set_ca_file(path)
                    .map_err(|e| Error::TlsFailure(e.to_string()))?;
                builder.set_verify(SslVerifyMode::PEER);
            }
            None => builder.set_verify(SslVerifyMode::NONE),
        }
        if !alpn.is_empty() {
            builder
                .set_alpn_protos(alpn)
                .map_err(|e| Error::TlsFailure(e.to_string()))?;
        }
        Ok(TlsConfig {
            ctx: builder.build(),
        })
    }

    /// Perform the handshake over `stream` and return the secure connection.
    pub fn connect(
        &self,
        stream: TcpStream,
        servername: &str,
        endpoint: Endpoint,
        peer: String,
    ) -> Result<TlsConn> {
        let mut ssl = Ssl::new(&self.ctx).map_err(|e| Error::TlsFailure(e.to_string()))?;
        ssl.set_hostname(servername)
            .map_err(|e| Error::TlsFailure(e.to_string()))?;

        let ssl_stream = ssl
            .connect(stream)
            .map_err(|e| Error::TlsFailure(e.to_string()))?;

        let alpn = ssl_stream
            .ssl()
            .selected_alpn_protocol()
            .map(|p| p.to_vec())
            .unwrap_or_default();
        log::debug!(
            "TLS handshake done with {}, alpn={:?}",
            endpoint.host,
            String::from_utf8_lossy(&alpn)
        );

        ssl_stream.get_ref().set_nonblocking(true)?;

        Ok(TlsConn {
            stream: Some(ssl_stream),
            endpoint,
            peer,
            alpn,
            failed: false,
        })
    }
}

/// TLS session over a TCP socket.
#[derive(Debug)]
pub struct TlsConn {
    stream: Option<SslStream<TcpStream>>,
    endpoint: Endpoint,
    peer: String,
    alpn: Vec<u8>,
    failed: bool,
}

impl TlsConn {
    pub fn is_open(&self) -> bool {
        self.stream.is_some() && !self.failed
    }

    pub fn peer_address(&self) -> &str {
        &self.peer
    }

    pub fn selected_alpn(&self) -> &[u8] {
        &self.alpn
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn write(
        &mut self,
        data: &[u8],
        timeout: Option<Duration>,
        cancel: Option<&mut CancelContext>,
    ) -> Result<()> {
        if self.failed {
            return Err(Error::TlsFailure("session failed".to_string()));
        }
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        let fd = stream.get_ref().as_raw_fd();
        match write_all(stream, fd, true, data, timeout, cancel) {
            Ok(()) => Ok(()),
            Err(e) => {
                if matches!(e, Error::Io(_)) {
                    self.failed = true;
                }
                Err(e)
            }
        }
    }

    pub(crate) fn read(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
        cancel: Option<&mut CancelContext>,
    ) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        let fd = stream.get_ref().as_raw_fd();
        match read_some(stream, fd, true, buf, timeout, cancel) {
            Ok(n) => Ok(n),
            Err(e) => {
                if matches!(e, Error::Io(_)) {
                    self.failed = true;
                }
                Err(e)
            }
        }
    }

    pub(crate) fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if !self.failed {
                let _ = stream.shutdown();
            }
            let _ = stream.get_ref().shutdown(std::net::Shutdown::Both);
        }
    }
}
