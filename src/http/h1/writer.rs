//! HTTP/1.x serialization
//!
//! Renders request and response heads plus body framing into a byte buffer.
//! Fields containing CR or LF are dropped silently; user-supplied `Host`
//! and `Content-Length` are stripped because the framework owns both.

use super::super::{headers, Headers, RequestContext, CRLF};

/// Serialize a request head and body.
///
/// Produces `METHOD SP path[?query] SP HTTP/1.1 CRLF`, the mandatory `Host`
/// header, the user headers, an inserted `Content-Length` when the body is
/// non-empty or `need_len` is set, the terminating CRLF, and the body.
pub fn write_request(out: &mut Vec<u8>, req: &RequestContext) {
    let method = if req.method.is_empty() {
        "GET"
    } else {
        &req.method
    };
    out.extend_from_slice(method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(req.url.path.as_bytes());
    out.extend_from_slice(req.url.query.as_bytes());
    out.extend_from_slice(b" HTTP/1.1");
    out.extend_from_slice(CRLF.as_bytes());

    if req.flags.header_is_small {
        out.extend_from_slice(b"host: ");
    } else {
        out.extend_from_slice(b"Host: ");
    }
    out.extend_from_slice(req.url.host_with_port().as_bytes());
    out.extend_from_slice(CRLF.as_bytes());

    write_header_common(
        out,
        &req.request,
        &req.request_body,
        req.flags.header_is_small,
        req.flags.need_len,
    );
}

/// Serialize a response head and body.
///
/// `header_version` 9 writes the bare body; 10 and 11 pick the version
/// token. Status codes outside 100..=599 are clamped to 500.
pub fn write_response(out: &mut Vec<u8>, req: &RequestContext) {
    if req.header_version == 9 {
        out.extend_from_slice(&req.response_body);
        return;
    }
    if req.header_version == 10 {
        out.extend_from_slice(b"HTTP/1.0 ");
    } else {
        out.extend_from_slice(b"HTTP/1.1 ");
    }
    let code = if (100..=599).contains(&req.status_code) {
        req.status_code
    } else {
        500
    };
    out.extend_from_slice(code.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(reason_phrase(code).as_bytes());
    out.extend_from_slice(CRLF.as_bytes());

    write_header_common(
        out,
        &req.response,
        &req.response_body,
        req.flags.header_is_small,
        !req.flags.not_need_len,
    );
}

fn write_header_common(
    out: &mut Vec<u8>,
    header: &Headers,
    body: &[u8],
    header_is_small: bool,
    need_len: bool,
) {
    for (name, value) in header.iter() {
        if !headers::is_valid_field(name, value) || headers::is_pseudo(name) {
            continue;
        }
        // The framework owns these two.
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(CRLF.as_bytes());
    }
    if !body.is_empty() || need_len {
        if header_is_small {
            out.extend_from_slice(b"content-length: ");
        } else {
            out.extend_from_slice(b"Content-Length: ");
        }
        out.extend_from_slice(body.len().to_string().as_bytes());
        out.extend_from_slice(CRLF.as_bytes());
        out.extend_from_slice(CRLF.as_bytes());
        out.extend_from_slice(body);
    } else {
        out.extend_from_slice(CRLF.as_bytes());
    }
}

/// Canonical reason phrase per RFC 7231 plus the WebDAV extension set;
/// unknown codes map to `Unknown`.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        208 => "Already Reported",
        226 => "IM Used",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        421 => "Misdirected Request",
        422 => "Unprocessable Entity",
        423 => "Locked",
        424 => "Failed Dependency",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        508 => "Loop Detected",
        511 => "Network Authentication Required",
        _ => "Unknown",
    }
}
