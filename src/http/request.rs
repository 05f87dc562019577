//! Per-request record
//!
//! One [`RequestContext`] carries everything about a single request through
//! its lifecycle: target, resolved version, phase, both header maps, both
//! bodies, status, the serialization flags, and the error kind when the
//! pipeline fails.

use super::{ErrorKind, Headers, RequestFlags, RequestPhase};
use crate::url::Url;

/// A single request's state across send and receive.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request method (`GET`, `POST`, ...). Empty defaults to `GET` at
    /// serialization time.
    pub method: String,
    /// Parsed target URL; on the server side host/port are filled in from
    /// the `Host` header.
    pub url: Url,
    /// HTTP version the connection resolved to: 1, 2, or 0 when unset.
    pub resolved_version: u8,
    /// Lifecycle phase.
    pub phase: RequestPhase,
    /// Request header map.
    pub request: Headers,
    /// Response header map.
    pub response: Headers,
    /// Request body bytes.
    pub request_body: Vec<u8>,
    /// Response body bytes.
    pub response_body: Vec<u8>,
    /// Numeric status code of the response (or to be sent by a server).
    pub status_code: u16,
    /// Wire version tag of the parsed message: 9, 10, 11, or 20.
    pub header_version: u8,
    /// Serialization/parsing flags.
    pub flags: RequestFlags,
    /// Error kind recorded when the phase moved to `Error`.
    pub err: Option<ErrorKind>,
}

impl RequestContext {
    pub fn new() -> Self {
        RequestContext {
            method: String::new(),
            url: Url {
                scheme: "http".to_string(),
                host: String::new(),
                port: None,
                path: "/".to_string(),
                query: String::new(),
            },
            resolved_version: 0,
            phase: RequestPhase::Idle,
            request: Headers::new(),
            response: Headers::new(),
            request_body: Vec::new(),
            response_body: Vec::new(),
            status_code: 0,
            header_version: 0,
            flags: RequestFlags::default(),
            err: None,
        }
    }

    /// Record a failure; `Error` is absorbing.
    pub fn fail(&mut self, kind: ErrorKind) {
        if self.err.is_none() {
            self.err = Some(kind);
        }
        self.phase = RequestPhase::Error;
    }

    /// Whether the request reached a terminal successful phase.
    pub fn is_done(&self) -> bool {
        self.phase == RequestPhase::BodyRecved
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
