//! End-to-end check of the plain (non-`CONNECT`) proxy path: a client
//! speaks absolute-URI HTTP/1.1 to the proxy, which replays it against a
//! local origin and stores both sides.

use axum::{routing::get, Router};
use mitmkit_ca::CertificateAuthority;
use mitmkit_core::{InMemoryStore, RequestStore};
use mitmkit_proxy::ProxyServer;
use mitmkit_replay::ReplayEngine;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;

async fn spawn_origin() -> SocketAddr {
    let app = Router::new().route("/greet", get(|| async { "hello from origin" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn plain_get_is_replayed_and_stored() {
    let origin = spawn_origin().await;

    let ca_dir = tempfile::tempdir().unwrap();
    let ca = std::sync::Arc::new(
        CertificateAuthority::load_or_create(&ca_dir.path().join("ca.crt"), &ca_dir.path().join("ca.key"))
            .await
            .unwrap(),
    );
    let store = InMemoryStore::new();
    let engine = ReplayEngine::new().unwrap();
    let server = ProxyServer::new(ca, store.clone(), engine);

    let proxy_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = proxy_listener.local_addr().unwrap();
    drop(proxy_listener);
    let server_addr = proxy_addr;
    tokio::spawn(server.run(server_addr));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(server_addr).await.unwrap();
    let request = format!(
        "GET http://{origin}/greet HTTP/1.1\r\nHost: {origin}\r\n\r\n",
        origin = origin
    );
    tokio::io::AsyncWriteExt::write_all(&mut client, request.as_bytes())
        .await
        .unwrap();

    let mut reader = BufReader::new(client);
    let mut status_line = String::new();
    reader.read_line(&mut status_line).await.unwrap();
    assert!(status_line.starts_with("HTTP/1.1 200"));

    let mut rest = String::new();
    reader.read_to_string(&mut rest).await.unwrap();
    assert!(rest.contains("hello from origin"));

    let requests = store.get_requests_list().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/greet");
    assert_eq!(requests[0].scheme, "http");
}
