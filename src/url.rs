//! Minimal URL handling for the client
//!
//! The client only needs scheme/host/port/path/query splitting plus a
//! percent-encoding pass for callers that hand over raw, unencoded URLs.
//! Everything else about URLs is out of scope here.

use std::fmt;

/// Parsed URL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    /// `http` or `https`.
    pub scheme: String,
    /// Host name or literal address (IPv6 brackets stripped).
    pub host: String,
    /// Explicit port, if the URL carried one.
    pub port: Option<u16>,
    /// Absolute path, `/` if absent.
    pub path: String,
    /// Query string including the leading `?`, empty if absent.
    pub query: String,
}

/// URL parse failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseUrlError {
    #[error("unsupported scheme: {0}")]
    Scheme(String),
    #[error("missing host")]
    MissingHost,
    #[error("invalid port: {0}")]
    Port(String),
}

impl Url {
    /// Parse an absolute `http`/`https` URL.
    ///
    /// With `encoded == false` the path and query are percent-encoded before
    /// storage; with `encoded == true` they are taken as already on the wire.
    pub fn parse(raw: &str, encoded: bool) -> Result<Url, ParseUrlError> {
        let (scheme, rest) = match raw.find("://") {
            Some(pos) => (&raw[..pos], &raw[pos + 3..]),
            None => ("http", raw),
        };
        if scheme != "http" && scheme != "https" {
            return Err(ParseUrlError::Scheme(scheme.to_string()));
        }

        let (authority, target) = match rest.find('/') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(ParseUrlError::MissingHost);
        }

        let (host, port) = split_authority(authority)?;
        let (path, query) = split_target(target);

        let (path, query) = if encoded {
            (path, query)
        } else {
            (percent_encode(&path), percent_encode(&query))
        };

        Ok(Url {
            scheme: scheme.to_string(),
            host,
            port,
            path,
            query,
        })
    }

    /// Port from the URL, or the scheme default.
    pub fn port_or_default(&self) -> u16 {
        self.port
            .unwrap_or(if self.scheme == "https" { 443 } else { 80 })
    }

    /// `host` or `host:port` when the port was explicit.
    pub fn host_with_port(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Whether this URL names a TLS endpoint.
    pub fn is_secure(&self) -> bool {
        self.scheme == "https"
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}{}", self.path, self.query)
    }
}

fn split_authority(authority: &str) -> Result<(String, Option<u16>), ParseUrlError> {
    // Bracketed IPv6 literal.
    if let Some(stripped) = authority.strip_prefix('[') {
        let end = stripped
            .find(']')
            .ok_or_else(|| ParseUrlError::MissingHost)?;
        let host = stripped[..end].to_string();
        let rest = &stripped[end + 1..];
        if let Some(port_str) = rest.strip_prefix(':') {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| ParseUrlError::Port(port_str.to_string()))?;
            return Ok((host, Some(port)));
        }
        return Ok((host, None));
    }

    match authority.rfind(':') {
        Some(pos) => {
            let port_str = &authority[pos + 1..];
            let port = port_str
                .parse::<u16>()
                .map_err(|_| ParseUrlError::Port(port_str.to_string()))?;
            Ok((authority[..pos].to_string(), Some(port)))
        }
        None => Ok((authority.to_string(), None)),
    }
}

/// Split a request target into path and query (query keeps its `?`).
pub fn split_target(target: &str) -> (String, String) {
    match target.find('?') {
        Some(pos) => (target[..pos].to_string(), target[pos..].to_string()),
        None => (target.to_string(), String::new()),
    }
}

fn is_url_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'-' | b'.'
                | b'_'
                | b'~'
                | b'/'
                | b'?'
                | b'&'
                | b'='
                | b':'
                | b'@'
                | b'!'
                | b'$'
                | b'\''
                | b'('
                | b')'
                | b'*'
                | b'+'
                | b','
                | b';'
                | b'%'
                | b'#'
                | b'['
                | b']'
        )
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_url_byte(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}
