//! `CONNECT` MITM path: hijack the tunnel, terminate client TLS with a
//! forged leaf certificate, dial the origin over TLS, relay both
//! directions while capturing a transcript, then parse and persist the
//! request/response pair once the tunnel closes.

use crate::wire::{content_length, header_value, parse_request_head, parse_response_head, to_wire_request};
use mitmkit_ca::CertificateAuthority;
use mitmkit_core::{canonicalize, HttpResponse, OrderedMultiMap, ProxyError, ProxyResult, RequestStore};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::io::Read;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::{LazyConfigAcceptor, TlsConnector};
use tracing::{debug, error, warn};

const RELAY_BUF: usize = 65536;
const CONNECT_OK: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Split `host:port` (as given on a `CONNECT` request line) into its parts,
/// defaulting the port to `443`.
fn split_connect_target(target: &str) -> (String, String) {
    match target.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.to_string()),
        None => (target.to_string(), "443".to_string()),
    }
}

pub async fn handle_connect(
    mut client_stream: TcpStream,
    connect_target: &str,
    ca: &Arc<CertificateAuthority>,
    root_store: &Arc<RootCertStore>,
    store: &Arc<dyn RequestStore>,
) -> ProxyResult<()> {
    let (target_host, target_port) = split_connect_target(connect_target);

    client_stream
        .write_all(CONNECT_OK)
        .await
        .map_err(|e| ProxyError::ServingConnect(e.to_string()))?;

    let acceptor = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), client_stream);
    tokio::pin!(acceptor);
    let start_handshake = acceptor
        .as_mut()
        .await
        .map_err(|e| ProxyError::ServingConnect(e.to_string()))?;

    let sni = start_handshake
        .client_hello()
        .server_name()
        .map(|s| s.to_string())
        .unwrap_or_else(|| target_host.clone());

    debug!(sni = %sni, target = %connect_target, "issuing leaf certificate for tunnel");
    let leaf = ca
        .issue_leaf(&sni)
        .await
        .map_err(|e| ProxyError::ServingConnect(e.to_string()))?;

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![leaf.cert_der.clone()],
            leaf.private_key(),
        )
        .map_err(|e| ProxyError::ServingConnect(e.to_string()))?;

    let tls_client = start_handshake
        .into_stream(Arc::new(server_config))
        .await
        .map_err(|e| ProxyError::ServingConnect(e.to_string()))?;
    debug!(sni = %sni, "client-facing TLS handshake complete");

    let origin_stream = TcpStream::connect((target_host.as_str(), target_port.parse().unwrap_or(443)))
        .await
        .map_err(|e| ProxyError::ServingConnect(format!("origin dial failed: {e}")))?;

    let client_config = ClientConfig::builder()
        .with_root_certificates((**root_store).clone())
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));
    let server_name: ServerName<'static> = sni
        .clone()
        .try_into()
        .unwrap_or_else(|_| ServerName::try_from("localhost").unwrap().to_owned());

    let tls_origin = connector
        .connect(server_name, origin_stream)
        .await
        .map_err(|e| ProxyError::ServingConnect(format!("origin TLS handshake failed: {e}")))?;
    debug!(sni = %sni, "origin-facing TLS handshake complete");

    let (mut client_read, mut client_write) = tokio::io::split(tls_client);
    let (mut origin_read, mut origin_write) = tokio::io::split(tls_origin);

    let request_transcript = Arc::new(Mutex::new(Vec::<u8>::new()));
    let response_transcript = Arc::new(Mutex::new(Vec::<u8>::new()));

    let req_capture = request_transcript.clone();
    let outbound = async move {
        let mut buf = [0u8; RELAY_BUF];
        loop {
            match client_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    req_capture.lock().await.extend_from_slice(&buf[..n]);
                    if origin_write.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    };

    let resp_capture = response_transcript.clone();
    let inbound = async move {
        let mut buf = [0u8; RELAY_BUF];
        loop {
            match origin_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    resp_capture.lock().await.extend_from_slice(&buf[..n]);
                    if client_write.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    };

    tokio::join!(outbound, inbound);
    debug!(sni = %sni, "tunnel closed, parsing transcript");

    let request_bytes = request_transcript.lock().await;
    let response_bytes = response_transcript.lock().await;

    if let Err(e) = persist_transcript(&request_bytes, &response_bytes, &sni, &target_port, store).await {
        warn!(error = %e, sni = %sni, "failed to parse or persist tunnel transcript");
    }

    Ok(())
}

async fn persist_transcript(
    request_bytes: &[u8],
    response_bytes: &[u8],
    sni: &str,
    port: &str,
    store: &Arc<dyn RequestStore>,
) -> ProxyResult<()> {
    let head = parse_request_head(request_bytes)?
        .ok_or_else(|| ProxyError::ParseRequest("incomplete request transcript".into()))?;
    let body_len = content_length(&head.headers).unwrap_or(0);
    let body = request_bytes
        .get(head.body_offset..head.body_offset + body_len)
        .unwrap_or_default()
        .to_vec();

    let mut wire = to_wire_request(&head, true, body);
    if wire.host.is_empty() {
        wire.host = format!("{sni}:{port}");
    }

    let request = canonicalize(wire)?;
    let saved_request = store.save_request(request).await?;

    let resp_head = parse_response_head(response_bytes)?
        .ok_or_else(|| ProxyError::ParsingResponse("incomplete response transcript".into()))?;
    let resp_body_len = content_length(&resp_head.headers)
        .unwrap_or_else(|| response_bytes.len().saturating_sub(resp_head.body_offset));
    let raw_body = response_bytes
        .get(resp_head.body_offset..resp_head.body_offset + resp_body_len)
        .unwrap_or_default();

    let body = decode_body(&resp_head.headers, raw_body);

    let mut headers = OrderedMultiMap::new();
    for (name, value) in &resp_head.headers {
        headers.append(name.clone(), value.clone());
    }

    let response = HttpResponse {
        id: None,
        request_id: saved_request.id.clone().unwrap_or_default(),
        code: resp_head.code,
        status_message: resp_head.status_message,
        headers,
        body,
    };
    store.save_response(response).await?;
    Ok(())
}

/// Transparently inflate a gzip-encoded transcript body. Unlike the replay
/// path (where `reqwest`'s gzip feature decodes automatically), a captured
/// MITM transcript is raw bytes off the wire, so decoding is explicit here.
fn decode_body(headers: &[(String, String)], raw: &[u8]) -> String {
    let is_gzip = header_value(headers, "content-encoding")
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);

    if is_gzip {
        let mut decoder = flate2::read::GzDecoder::new(raw);
        let mut out = String::new();
        match decoder.read_to_string(&mut out) {
            Ok(_) => out,
            Err(e) => {
                error!(error = %e, "failed to inflate gzip body, storing raw");
                String::from_utf8_lossy(raw).into_owned()
            }
        }
    } else {
        String::from_utf8_lossy(raw).into_owned()
    }
}
