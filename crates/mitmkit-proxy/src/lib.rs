//! mitmkit-proxy - per-connection HTTP(S) intercept. Classifies each
//! incoming proxy connection as a plain request or a `CONNECT` tunnel and
//! dispatches to the matching path.

mod connect;
mod plain;
mod wire;

use mitmkit_ca::CertificateAuthority;
use mitmkit_core::{ProxyResult, RequestStore};
use mitmkit_replay::ReplayEngine;
use rustls::RootCertStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

pub use wire::ParsedHead;

/// Owns the collaborators every accepted connection needs: the CA for
/// minting leaf certificates, the webpki root store for dialing origins,
/// the request store, and the replay engine used by the plain path.
#[derive(Clone)]
pub struct ProxyServer {
    ca: Arc<CertificateAuthority>,
    root_store: Arc<RootCertStore>,
    store: Arc<dyn RequestStore>,
    engine: ReplayEngine,
}

impl ProxyServer {
    pub fn new(
        ca: Arc<CertificateAuthority>,
        store: Arc<dyn RequestStore>,
        engine: ReplayEngine,
    ) -> Self {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        Self {
            ca,
            root_store: Arc::new(root_store),
            store,
            engine,
        }
    }

    /// Bind `addr` and serve proxy connections until the process is torn
    /// down. Each connection's failure is logged and only terminates that
    /// connection; the accept loop never stops on a per-connection error.
    pub async fn run(self, addr: SocketAddr) -> ProxyResult<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| mitmkit_core::ProxyError::Internal(format!("bind {addr}: {e}")))?;
        info!(%addr, "proxy listener started");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    warn!(%peer, error = %e, "connection handling failed");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> ProxyResult<()> {
        let head = wire::read_head(&mut stream).await?;

        if head.method.eq_ignore_ascii_case("CONNECT") {
            connect::handle_connect(stream, &head.path, &self.ca, &self.root_store, &self.store).await
        } else {
            match plain::handle_plain_request(&mut stream, head, &self.store, &self.engine).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    error!(error = %e, "plain request failed");
                    Err(e)
                }
            }
        }
    }
}
