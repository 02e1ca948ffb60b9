//! Non-`CONNECT` request path: parse a proxied absolute-URI request
//! straight off the client socket, replay it through the origin, and write
//! the origin's response back verbatim.

use crate::wire::{content_length, read_head, to_wire_request, ParsedHead};
use mitmkit_core::{canonicalize, ProxyError, ProxyResult, RequestStore};
use mitmkit_replay::ReplayEngine;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Read the request head, then (per `Content-Length`) read exactly that
/// many further bytes as the body. A request with no `Content-Length` is
/// treated as bodyless, matching a proxy that doesn't support streaming
/// bodies or chunked transfer-encoding on the plain path.
async fn read_body(stream: &mut TcpStream, head: &ParsedHead) -> ProxyResult<Vec<u8>> {
    let len = match content_length(&head.headers) {
        Some(0) | None => return Ok(Vec::new()),
        Some(len) => len,
    };
    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|e| ProxyError::ParseRequest(format!("short body read: {e}")))?;
    Ok(body)
}

/// Handle one plain (non-tunnel) proxied request end to end. `head` has
/// already been read off `stream` by the caller's dispatch step.
pub async fn handle_plain_request(
    stream: &mut TcpStream,
    head: ParsedHead,
    store: &Arc<dyn RequestStore>,
    engine: &ReplayEngine,
) -> ProxyResult<()> {
    let body = read_body(stream, &head).await?;
    let wire = to_wire_request(&head, false, body);
    debug!(method = %wire.method, host = %wire.host, path = %wire.path, "plain request parsed");

    let request = canonicalize(wire)?;
    let saved = store.save_request(request).await?;

    let response = match engine.send(&saved).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "origin request failed");
            return Err(e);
        }
    };
    let saved_response = store.save_response(response).await?;

    write_response(stream, &saved_response).await
}

async fn write_response(
    stream: &mut TcpStream,
    response: &mitmkit_core::HttpResponse,
) -> ProxyResult<()> {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\n",
        response.code, response.status_message
    );
    for (name, values) in response.headers.iter() {
        for value in values {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
    }
    out.push_str(&format!("content-length: {}\r\n\r\n", response.body.len()));

    stream
        .write_all(out.as_bytes())
        .await
        .map_err(|e| ProxyError::ServingResponse(e.to_string()))?;
    stream
        .write_all(response.body.as_bytes())
        .await
        .map_err(|e| ProxyError::ServingResponse(e.to_string()))?;
    Ok(())
}
