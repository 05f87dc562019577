//! HTTP/1.x streaming parser
//!
//! Incremental parser shared by the client (responses) and the server
//! (requests). Bytes are appended as they arrive; the parser advances the
//! request record's phase and fills in headers, status, and body. Body
//! framing precedence: chunked, then content-length, then close-delimited,
//! then empty.

use super::super::{Error, ErrorKind, Headers, RequestContext, RequestPhase, Result};
use super::chunked::ChunkedDecoder;

#[derive(Debug, Default)]
struct BodyInfo {
    has_len: bool,
    size: usize,
    chunked: bool,
    close_conn: bool,
}

/// Streaming parser for one HTTP/1.x message.
pub struct H1Parser {
    server: bool,
    raw: Vec<u8>,
    body: BodyInfo,
    decoder: Option<ChunkedDecoder>,
    eos: bool,
}

impl H1Parser {
    /// Parser for responses, used on the client side.
    pub fn client() -> Self {
        H1Parser {
            server: false,
            raw: Vec::new(),
            body: BodyInfo::default(),
            decoder: None,
            eos: false,
        }
    }

    /// Parser for requests, used on the server side.
    pub fn server() -> Self {
        H1Parser {
            server: true,
            ..H1Parser::client()
        }
    }

    /// Whether more input is required.
    pub fn require(&self) -> bool {
        !self.eos
    }

    /// `Connection: close` was present.
    pub fn close_conn(&self) -> bool {
        self.body.close_conn
    }

    /// The body terminates at connection close.
    pub fn close_delimited(&self) -> bool {
        !self.body.chunked && !self.body.has_len
    }

    /// Feed bytes. Errors put the request record into the `Error` phase.
    pub fn append(&mut self, req: &mut RequestContext, data: &[u8]) -> Result<()> {
        self.raw.extend_from_slice(data);

        if req.phase == RequestPhase::Idle {
            req.phase = if self.server {
                RequestPhase::RequestRecving
            } else {
                RequestPhase::ResponseRecving
            };
        }

        if matches!(
            req.phase,
            RequestPhase::RequestRecving | RequestPhase::ResponseRecving
        ) {
            // HTTP/0.9 response: no status line at all, the stream is the body.
            if !self.server && req.flags.allow_http09 && self.looks_like_http09() {
                req.header_version = 9;
                req.status_code = 200;
                req.response.insert(":status", "200");
                req.phase = RequestPhase::ResponseRecved;
            } else if let Some((head_len, sep_len)) = find_head_end(&self.raw) {
                let head = self.raw[..head_len].to_vec();
                self.raw.drain(..head_len + sep_len);
                if let Err(e) = self.parse_head(req, &head) {
                    self.eos = true;
                    return Err(e);
                }
            } else {
                return Ok(());
            }
        }

        if matches!(
            req.phase,
            RequestPhase::RequestRecved | RequestPhase::ResponseRecved
        ) {
            if let Err(e) = self.read_body(req) {
                self.eos = true;
                return Err(e);
            }
        }

        Ok(())
    }

    /// Signal end of stream. Close-delimited bodies complete here; an EOF
    /// anywhere else is an error.
    pub fn finish(&mut self, req: &mut RequestContext) -> Result<()> {
        self.eos = true;
        match req.phase {
            RequestPhase::BodyRecved => Ok(()),
            RequestPhase::RequestRecved | RequestPhase::ResponseRecved => {
                if self.close_delimited() {
                    req.phase = RequestPhase::BodyRecved;
                    return Ok(());
                }
                req.fail(ErrorKind::ReadBody);
                Err(Error::ReadBody)
            }
            _ => {
                let kind = if self.server {
                    req.fail(ErrorKind::InvalidRequestFormat);
                    Error::InvalidRequestFormat("connection closed before headers".to_string())
                } else {
                    req.fail(ErrorKind::InvalidResponseFormat);
                    Error::InvalidResponseFormat("connection closed before headers".to_string())
                };
                Err(kind)
            }
        }
    }

    fn looks_like_http09(&self) -> bool {
        let prefix = b"HTTP/";
        let n = self.raw.len().min(prefix.len());
        n > 0 && self.raw[..n] != prefix[..n]
    }

    fn parse_head(&mut self, req: &mut RequestContext, head: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(head);
        let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));

        let first = lines.next().unwrap_or("");
        if self.server {
            self.parse_request_line(req, first)?;
            if req.header_version == 9 {
                // Bare METHOD SP target, nothing else follows.
                req.phase = RequestPhase::BodyRecved;
                self.eos = true;
                return Ok(());
            }
        } else {
            self.parse_status_line(req, first)?;
        }

        for line in lines {
            if line.is_empty() {
                continue;
            }
            self.parse_header_line(req, line)?;
        }

        req.phase = if self.server {
            RequestPhase::RequestRecved
        } else {
            RequestPhase::ResponseRecved
        };
        if self.body.chunked {
            self.decoder = Some(ChunkedDecoder::new());
        }
        Ok(())
    }

    fn parse_request_line(&mut self, req: &mut RequestContext, line: &str) -> Result<()> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            req.fail(ErrorKind::InvalidRequestFormat);
            return Err(Error::InvalidRequestFormat(format!(
                "bad request line: {}",
                line
            )));
        }
        req.method = parts[0].to_string();
        let (path, query) = crate::url::split_target(parts[1]);
        req.url.path = path;
        req.url.query = query;

        if parts.len() == 2 {
            // HTTP/0.9 form: METHOD SP target with no version token.
            if !req.flags.allow_http09 {
                req.fail(ErrorKind::InvalidRequestFormat);
                return Err(Error::InvalidRequestFormat(
                    "missing version token".to_string(),
                ));
            }
            req.header_version = 9;
            return Ok(());
        }
        req.header_version = match parts[2] {
            "HTTP/1.0" => 10,
            "HTTP/1.1" => 11,
            other => {
                req.fail(ErrorKind::InvalidRequestFormat);
                return Err(Error::InvalidRequestFormat(format!(
                    "bad version: {}",
                    other
                )));
            }
        };
        Ok(())
    }

    fn parse_status_line(&mut self, req: &mut RequestContext, line: &str) -> Result<()> {
        let mut parts = line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        req.header_version = match version {
            "HTTP/1.1" => 11,
            "HTTP/1.0" => 10,
            other => {
                req.fail(ErrorKind::InvalidResponseFormat);
                return Err(Error::InvalidResponseFormat(format!(
                    "bad version: {}",
                    other
                )));
            }
        };
        let code = parts.next().unwrap_or("");
        req.status_code = code.parse::<u16>().map_err(|_| {
            req.fail(ErrorKind::InvalidResponseFormat);
            Error::InvalidResponseFormat(format!("bad status code: {}", code))
        })?;
        let phrase = parts.next().unwrap_or("").to_string();
        req.response.insert(":status", req.status_code.to_string());
        req.response.insert(":phrase", phrase);
        Ok(())
    }

    fn parse_header_line(&mut self, req: &mut RequestContext, line: &str) -> Result<()> {
        let (name, value) = Headers::parse_header_line(line).map_err(|e| {
            req.fail(if self.server {
                ErrorKind::InvalidRequestFormat
            } else {
                ErrorKind::InvalidResponseFormat
            });
            e
        })?;

        if name.eq_ignore_ascii_case("host") {
            let mut split = value.splitn(2, ':');
            if let Some(host) = split.next() {
                if !host.is_empty() {
                    req.url.host = host.to_string();
                }
            }
            if let Some(port) = split.next() {
                req.url.port = port.parse::<u16>().ok();
            }
        } else if name.eq_ignore_ascii_case("connection")
            && value.to_ascii_lowercase().contains("close")
        {
            self.body.close_conn = true;
        } else if !self.body.chunked
            && name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            self.body.chunked = true;
        } else if !self.body.has_len && name.eq_ignore_ascii_case("content-length") {
            self.body.has_len = true;
            self.body.size = value.trim().parse::<usize>().map_err(|_| {
                req.fail(if self.server {
                    ErrorKind::InvalidRequestFormat
                } else {
                    ErrorKind::InvalidResponseFormat
                });
                if self.server {
                    Error::InvalidRequestFormat(format!("bad content-length: {}", value))
                } else {
                    Error::InvalidResponseFormat(format!("bad content-length: {}", value))
                }
            })?;
        }

        let map = if self.server {
            &mut req.request
        } else {
            &mut req.response
        };
        map.insert(name, value);
        Ok(())
    }

    fn read_body(&mut self, req: &mut RequestContext) -> Result<()> {
        if req.flags.no_read_body {
            req.phase = RequestPhase::BodyRecved;
            self.eos = true;
            self.raw.clear();
            return Ok(());
        }

        let server = self.server;

        if let Some(decoder) = self.decoder.as_mut() {
            let body = if server {
                &mut req.request_body
            } else {
                &mut req.response_body
            };
            let complete = decoder.decode(&mut self.raw, body).map_err(|e| {
                req.fail(ErrorKind::ReadBody);
                e
            })?;
            if complete {
                let trailers = decoder.take_trailers();
                let map = if server {
                    &mut req.request
                } else {
                    &mut req.response
                };
                map.merge(trailers);
                req.phase = RequestPhase::BodyRecved;
                self.eos = true;
            }
            return Ok(());
        }

        let body = if server {
            &mut req.request_body
        } else {
            &mut req.response_body
        };

        if self.body.has_len {
            let want = self.body.size - body.len();
            let take = want.min(self.raw.len());
            body.extend_from_slice(&self.raw[..take]);
            self.raw.drain(..take);
            if body.len() == self.body.size {
                req.phase = RequestPhase::BodyRecved;
                self.eos = true;
            }
            return Ok(());
        }

        if self.server {
            // Requests have no close-delimited framing: no length header
            // means no body.
            req.phase = RequestPhase::BodyRecved;
            self.eos = true;
            return Ok(());
        }

        // Close-delimited response: accumulate until finish().
        body.extend_from_slice(&self.raw);
        self.raw.clear();
        Ok(())
    }
}

/// Locate the end of the header section: `\r\n\r\n` or `\n\n`.
/// Returns (head length, separator length).
fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = buf.windows(2).position(|w| w == b"\n\n");
    match (crlf, lf) {
        (Some(a), Some(b)) => {
            if a < b {
                Some((a, 4))
            } else {
                Some((b, 2))
            }
        }
        (Some(a), None) => Some((a, 4)),
        (None, Some(b)) => Some((b, 2)),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_req() -> RequestContext {
        let mut req = RequestContext::new();
        req.phase = RequestPhase::ResponseRecving;
        req
    }

    fn server_req() -> RequestContext {
        let mut req = RequestContext::new();
        req.phase = RequestPhase::RequestRecving;
        req
    }

    #[test]
    fn test_response_content_length() {
        let mut parser = H1Parser::client();
        let mut req = client_req();
        parser
            .append(
                &mut req,
                b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nworld",
            )
            .unwrap();
        assert_eq!(req.phase, RequestPhase::BodyRecved);
        assert_eq!(req.status_code, 200);
        assert_eq!(req.header_version, 11);
        assert_eq!(req.response_body, b"world");
        assert_eq!(req.response.get("Content-Length"), Some("5"));
        assert_eq!(req.response.get(":status"), Some("200"));
        assert_eq!(req.response.get(":phrase"), Some("OK"));
        assert!(!parser.require());
    }

    #[test]
    fn test_response_incremental_feed() {
        let mut parser = H1Parser::client();
        let mut req = client_req();
        for piece in [
            &b"HTTP/1.1 "[..],
            b"200 OK\r\nContent-",
            b"Length: 4\r\n\r\nTe",
            b"st",
        ] {
            parser.append(&mut req, piece).unwrap();
        }
        assert_eq!(req.phase, RequestPhase::BodyRecved);
        assert_eq!(req.response_body, b"Test");
    }

    #[test]
    fn test_response_chunked() {
        let mut parser = H1Parser::client();
        let mut req = client_req();
        parser
            .append(
                &mut req,
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
            )
            .unwrap();
        assert_eq!(req.phase, RequestPhase::BodyRecved);
        assert_eq!(req.response_body, b"hello world");
    }

    #[test]
    fn test_response_chunked_resume_and_trailers() {
        let mut parser = H1Parser::client();
        let mut req = client_req();
        parser
            .append(
                &mut req,
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhe",
            )
            .unwrap();
        assert_eq!(req.phase, RequestPhase::ResponseRecved);
        parser
            .append(&mut req, b"llo\r\n0\r\nX-Sum: ok\r\n\r\n")
            .unwrap();
        assert_eq!(req.phase, RequestPhase::BodyRecved);
        assert_eq!(req.response_body, b"hello");
        assert_eq!(req.response.get("X-Sum"), Some("ok"));
    }

    #[test]
    fn test_response_close_delimited() {
        let mut parser = H1Parser::client();
        let mut req = client_req();
        parser
            .append(&mut req, b"HTTP/1.1 200 OK\r\n\r\npartial ")
            .unwrap();
        assert_eq!(req.phase, RequestPhase::ResponseRecved);
        parser.append(&mut req, b"body").unwrap();
        parser.finish(&mut req).unwrap();
        assert_eq!(req.phase, RequestPhase::BodyRecved);
        assert_eq!(req.response_body, b"partial body");
    }

    #[test]
    fn test_response_connection_close_flag() {
        let mut parser = H1Parser::client();
        let mut req = client_req();
        parser
            .append(
                &mut req,
                b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
            )
            .unwrap();
        assert!(parser.close_conn());
        assert_eq!(req.phase, RequestPhase::BodyRecved);
    }

    #[test]
    fn test_no_read_body_flag() {
        let mut parser = H1Parser::client();
        let mut req = client_req();
        req.flags.no_read_body = true;
        parser
            .append(&mut req, b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n")
            .unwrap();
        assert_eq!(req.phase, RequestPhase::BodyRecved);
        assert!(req.response_body.is_empty());
    }

    #[test]
    fn test_response_http09_allowed() {
        let mut parser = H1Parser::client();
        let mut req = client_req();
        req.flags.allow_http09 = true;
        parser.append(&mut req, b"just raw bytes").unwrap();
        parser.append(&mut req, b", more").unwrap();
        parser.finish(&mut req).unwrap();
        assert_eq!(req.header_version, 9);
        assert_eq!(req.response_body, b"just raw bytes, more");
    }

    #[test]
    fn test_response_bad_version_rejected() {
        let mut parser = H1Parser::client();
        let mut req = client_req();
        let err = parser
            .append(&mut req, b"SPDY/3 200 OK\r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResponseFormat(_)));
        assert_eq!(req.phase, RequestPhase::Error);
        assert_eq!(req.err, Some(ErrorKind::InvalidResponseFormat));
    }

    #[test]
    fn test_lf_only_header_separator() {
        let mut parser = H1Parser::client();
        let mut req = client_req();
        parser
            .append(&mut req, b"HTTP/1.1 204 No Content\nContent-Length: 0\n\n")
            .unwrap();
        assert_eq!(req.status_code, 204);
        assert_eq!(req.phase, RequestPhase::BodyRecved);
    }

    #[test]
    fn test_request_basic() {
        let mut parser = H1Parser::server();
        let mut req = server_req();
        parser
            .append(
                &mut req,
                b"GET /hello?x=1 HTTP/1.1\r\nHost: example.test:8080\r\n\r\n",
            )
            .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.url.path, "/hello");
        assert_eq!(req.url.query, "?x=1");
        assert_eq!(req.url.host, "example.test");
        assert_eq!(req.url.port, Some(8080));
        assert_eq!(req.header_version, 11);
        assert_eq!(req.phase, RequestPhase::BodyRecved);
    }

    #[test]
    fn test_request_with_body() {
        let mut parser = H1Parser::server();
        let mut req = server_req();
        parser
            .append(
                &mut req,
                b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\n\r\nabc",
            )
            .unwrap();
        assert_eq!(req.request_body, b"abc");
        assert_eq!(req.phase, RequestPhase::BodyRecved);
    }

    #[test]
    fn test_request_http09() {
        let mut parser = H1Parser::server();
        let mut req = server_req();
        req.flags.allow_http09 = true;
        parser.append(&mut req, b"GET /old\r\n\r\n").unwrap();
        assert_eq!(req.header_version, 9);
        assert_eq!(req.url.path, "/old");
        assert_eq!(req.phase, RequestPhase::BodyRecved);
    }

    #[test]
    fn test_request_http09_rejected_by_default() {
        let mut parser = H1Parser::server();
        let mut req = server_req();
        let err = parser.append(&mut req, b"GET /old\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::InvalidRequestFormat(_)));
    }

    #[test]
    fn test_eof_mid_length_body_fails() {
        let mut parser = H1Parser::client();
        let mut req = client_req();
        parser
            .append(&mut req, b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc")
            .unwrap();
        let err = parser.finish(&mut req).unwrap_err();
        assert!(matches!(err, Error::ReadBody));
        assert_eq!(req.phase, RequestPhase::Error);
    }

    #[test]
    fn test_eof_before_headers_fails() {
        let mut parser = H1Parser::client();
        let mut req = client_req();
        parser.append(&mut req, b"HTTP/1.1 2").unwrap();
        assert!(parser.finish(&mut req).is_err());
    }

    #[test]
    fn test_duplicate_headers_preserved() {
        let mut parser = H1Parser::client();
        let mut req = client_req();
        parser
            .append(
                &mut req,
                b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\nContent-Length: 0\r\n\r\n",
            )
            .unwrap();
        assert_eq!(req.response.get_all("Set-Cookie"), vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_request_round_trip_preserves_multimap() {
        // Serializing a request and re-parsing it yields the same header
        // multimap, up to the framework-owned Host and Content-Length.
        let mut out = RequestContext::new();
        out.method = "POST".to_string();
        out.url = crate::url::Url::parse("http://example.test/x?q=1", true).unwrap();
        out.request.insert("X-Multi", "one");
        out.request.insert("Accept", "*/*");
        out.request.insert("X-Multi", "two");
        out.request_body = b"abc".to_vec();

        let mut wire = Vec::new();
        super::super::writer::write_request(&mut wire, &out);

        let mut parser = H1Parser::server();
        let mut parsed = server_req();
        parser.append(&mut parsed, &wire).unwrap();

        assert_eq!(parsed.phase, RequestPhase::BodyRecved);
        assert_eq!(parsed.method, "POST");
        assert_eq!(parsed.url.path, "/x");
        assert_eq!(parsed.url.query, "?q=1");
        assert_eq!(parsed.url.host, "example.test");
        assert_eq!(parsed.request.get_all("X-Multi"), vec!["one", "two"]);
        assert_eq!(parsed.request.get("Accept"), Some("*/*"));
        assert_eq!(parsed.request_body, b"abc");
    }

    #[test]
    fn test_header_value_leading_whitespace_stripped() {
        let mut parser = H1Parser::client();
        let mut req = client_req();
        parser
            .append(
                &mut req,
                b"HTTP/1.1 200 OK\r\nX-Pad:   spaced\r\nContent-Length: 0\r\n\r\n",
            )
            .unwrap();
        assert_eq!(req.response.get("X-Pad"), Some("spaced"));
    }
}
