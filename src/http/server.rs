//! Server request cycle
//!
//! Single-shot per-connection handling: parse one request, hand it to the
//! application, write one response with `Connection: close`, and shut the
//! transport down. Keep-alive and pipelining are out of scope; the caller
//! runs one worker per accepted connection.

use super::h1::{writer, H1Parser};
use super::{Error, Headers, RequestContext, RequestPhase, Result};
use crate::cancel::CancelContext;
use crate::transport::Conn;

/// One server-side connection.
pub struct HttpServer {
    conn: Conn,
    req: RequestContext,
}

impl HttpServer {
    pub fn new(conn: Conn) -> Self {
        HttpServer {
            conn,
            req: RequestContext::new(),
        }
    }

    /// The request record (valid after
    /// [`receive_request`](Self::receive_request)).
    pub fn request(&self) -> &RequestContext {
        &self.req
    }

    /// Read and parse one request.
    pub fn receive_request(
        &mut self,
        mut cancel: Option<&mut CancelContext>,
    ) -> Result<&RequestContext> {
        self.req = RequestContext::new();
        self.req.resolved_version = 1;
        self.req.phase = RequestPhase::RequestRecving;
        self.req.url.scheme = if self.conn.is_secure() {
            "https".to_string()
        } else {
            "http".to_string()
        };

        let mut parser = H1Parser::server();
        let mut buf = [0u8; 4096];
        while parser.require() {
            let n = self.conn.read(&mut buf, None, cancel.as_deref_mut())?;
            if n == 0 {
                parser.finish(&mut self.req)?;
                break;
            }
            parser.append(&mut self.req, &buf[..n])?;
        }
        Ok(&self.req)
    }

    /// Write one response and close the connection.
    ///
    /// `Connection: close` is emitted automatically; the status code is
    /// clamped into 100..=599 by the serializer.
    pub fn send_response(
        &mut self,
        status: u16,
        mut fields: Headers,
        body: Vec<u8>,
        cancel: Option<&mut CancelContext>,
    ) -> Result<()> {
        if self.req.phase != RequestPhase::BodyRecved {
            return Err(Error::InvalidPhase(self.req.phase));
        }

        fields.remove("connection");
        fields.insert("Connection", "close");

        self.req.status_code = status;
        self.req.response = fields;
        self.req.response_body = body;
        if self.req.header_version == 0 {
            self.req.header_version = 11;
        }

        let mut wire = Vec::new();
        writer::write_response(&mut wire, &self.req);
        let result = self.conn.write(&wire, None, cancel);
        self.req.phase = RequestPhase::Idle;
        self.conn.close();
        result?;
        Ok(())
    }

    /// Tear the connection down without responding.
    pub fn close(&mut self) {
        self.conn.close();
    }

    /// Run the whole cycle: parse one request, call `handler`, send its
    /// response, close.
    pub fn serve_once<F>(conn: Conn, handler: F, mut cancel: Option<&mut CancelContext>) -> Result<()>
    where
        F: FnOnce(&RequestContext) -> (u16, Headers, Vec<u8>),
    {
        let mut server = HttpServer::new(conn);
        match server.receive_request(cancel.as_deref_mut()) {
            Ok(_) => {}
            Err(e) => {
                server.close();
                return Err(e);
            }
        }
        let (status, fields, body) = handler(server.request());
        server.send_response(status, fields, body, cancel)
    }
}
