//! HTTP/1.x codec
//!
//! Request/response serialization ([`writer`]) and a streaming parser
//! ([`reader`]) with chunked, content-length, and close-delimited body
//! framing. Chunked transfer encoding lives in [`chunked`].

pub mod chunked;
pub mod reader;
pub mod writer;

pub use chunked::{ChunkedDecoder, ChunkedEncoder};
pub use reader::H1Parser;
