//! Shared byte-level HTTP/1.1 parsing helpers used by both the plain-proxy
//! path (reading straight off a `TcpStream`) and the MITM path (reading a
//! captured post-hoc transcript).

use mitmkit_core::{canonicalize, ProxyError, ProxyResult, WireRequest};
use tokio::io::AsyncReadExt;

const MAX_HEADERS: usize = 64;
const MAX_HEAD_BYTES: usize = 1 << 16;

/// Read exactly the request head (through the terminating `\r\n\r\n`) off
/// `stream`, one byte at a time, leaving the stream positioned at the first
/// body byte. A chunked read would risk pulling body bytes (for a plain
/// request) or the client's TLS ClientHello (for `CONNECT`) into a buffer
/// the caller has no way to hand back to the next reader.
pub async fn read_head<S: tokio::io::AsyncRead + Unpin>(stream: &mut S) -> ProxyResult<ParsedHead> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| ProxyError::ParseRequest(e.to_string()))?;
        if n == 0 {
            return Err(ProxyError::ParseRequest("connection closed before headers".into()));
        }
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            break;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(ProxyError::ParseRequest("request head too large".into()));
        }
    }
    parse_request_head(&buf)?.ok_or_else(|| ProxyError::ParseRequest("malformed request head".into()))
}

/// Parsed request head plus the byte offset where the body starts.
pub struct ParsedHead {
    pub method: String,
    pub path: String,
    pub proto: String,
    pub headers: Vec<(String, String)>,
    pub body_offset: usize,
}

/// Attempt to parse a complete request head out of `buf`. Returns `Ok(None)`
/// if more bytes are needed.
pub fn parse_request_head(buf: &[u8]) -> ProxyResult<Option<ParsedHead>> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut header_storage);
    match request
        .parse(buf)
        .map_err(|e| ProxyError::ParseRequest(e.to_string()))?
    {
        httparse::Status::Complete(offset) => Ok(Some(ParsedHead {
            method: request.method.unwrap_or("GET").to_string(),
            path: request.path.unwrap_or("/").to_string(),
            proto: format!("HTTP/1.{}", request.version.unwrap_or(1)),
            headers: request
                .headers
                .iter()
                .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                .collect(),
            body_offset: offset,
        })),
        httparse::Status::Partial => Ok(None),
    }
}

/// Same shape for responses, used when reassembling a MITM transcript.
pub struct ParsedResponseHead {
    pub code: u16,
    pub status_message: String,
    pub headers: Vec<(String, String)>,
    pub body_offset: usize,
}

pub fn parse_response_head(buf: &[u8]) -> ProxyResult<Option<ParsedResponseHead>> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut header_storage);
    match response
        .parse(buf)
        .map_err(|e| ProxyError::ParsingResponse(e.to_string()))?
    {
        httparse::Status::Complete(offset) => Ok(Some(ParsedResponseHead {
            code: response.code.unwrap_or(0),
            status_message: response.reason.unwrap_or_default().to_string(),
            headers: response
                .headers
                .iter()
                .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                .collect(),
            body_offset: offset,
        })),
        httparse::Status::Partial => Ok(None),
    }
}

pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn content_length(headers: &[(String, String)]) -> Option<usize> {
    header_value(headers, "content-length").and_then(|v| v.trim().parse().ok())
}

/// Build a [`WireRequest`] from a parsed head and its body. Handles both
/// absolute-URI targets (the plain-proxy path, `GET http://host/a HTTP/1.1`)
/// and origin-form targets reconstructed from a MITM transcript (where the
/// target is a bare path and the host comes from the `Host` header).
pub fn to_wire_request(head: &ParsedHead, over_tls: bool, body: Vec<u8>) -> WireRequest {
    let (scheme, host, rest) = match split_absolute_target(&head.path) {
        Some((scheme, host)) => {
            let rest = head.path[head.path.find(&host).map(|i| i + host.len()).unwrap_or(0)..]
                .to_string();
            (scheme, host, rest)
        }
        None => (
            String::new(),
            header_value(&head.headers, "host").unwrap_or_default().to_string(),
            head.path.clone(),
        ),
    };

    let (path, raw_query) = match rest.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (rest, String::new()),
    };
    let path = if path.is_empty() { "/".to_string() } else { path };

    WireRequest {
        method: head.method.clone(),
        proto: head.proto.clone(),
        host,
        scheme,
        path,
        raw_query,
        headers: head.headers.clone(),
        body,
        over_tls,
    }
}

pub fn canonicalize_wire(wire: WireRequest) -> ProxyResult<mitmkit_core::HttpRequest> {
    canonicalize(wire)
}

/// Split an absolute-URI request target (`http://host/path?q`) into
/// `(scheme, host, path_with_query)`. Proxied plain requests use this form;
/// origin-form targets (bare `/path`) return `None` and the `Host` header
/// is used instead.
pub fn split_absolute_target(raw_target: &str) -> Option<(String, String)> {
    let (scheme, rest) = if let Some(rest) = raw_target.strip_prefix("http://") {
        ("http", rest)
    } else if let Some(rest) = raw_target.strip_prefix("https://") {
        ("https", rest)
    } else {
        return None;
    };
    let host_end = rest.find('/').unwrap_or(rest.len());
    Some((scheme.to_string(), rest[..host_end].to_string()))
}
