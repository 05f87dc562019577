//! dualhttp - dual-version HTTP client/server protocol engines
//!
//! This crate implements the protocol cores for HTTP/1.1 and HTTP/2 over a
//! shared transport abstraction, with ALPN deciding which engine runs on a
//! given connection.
//!
//! # Architecture
//!
//! - [`transport`] provides [`transport::Conn`], a byte-oriented connection
//!   that is either a plain TCP socket or a TLS session, with cancellable
//!   reads and length-complete writes.
//! - [`cancel`] provides the composable [`cancel::CancelContext`] consulted
//!   at every blocking point.
//! - [`http::h1`] is the HTTP/1.x codec: request/response serialization and
//!   a streaming parser with chunked, content-length, and close-delimited
//!   body framing.
//! - [`http::h2`] is the HTTP/2 engine: frame codec, HPACK, settings,
//!   per-stream state machine, and connection/stream flow control.
//! - [`http::client::HttpClient`] multiplexes both versions behind a single
//!   `method()` call; [`http::server`] runs the single-shot server cycle.
//!
//! # Examples
//!
//! ```no_run
//! use dualhttp::http::client::{ClientOptions, HttpClient};
//! use dualhttp::http::Headers;
//!
//! let net = dualhttp::transport::init();
//! let mut client =
//!     HttpClient::open(&net, "https://example.test/", &ClientOptions::default()).unwrap();
//! let response = client
//!     .method("GET", "/hello", Headers::new(), b"", None)
//!     .unwrap();
//! assert_eq!(response.get(":status"), Some("200"));
//! ```

pub mod cancel;
pub mod http;
pub mod transport;
pub mod url;
