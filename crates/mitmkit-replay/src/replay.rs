//! Reconstructs a byte-faithful outbound request from a stored
//! [`HttpRequest`] and canonicalizes the origin's response.

use mitmkit_core::{HttpRequest, HttpResponse, OrderedMultiMap, ProxyError, ProxyResult};
use reqwest::{Client, Method};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Sends stored requests to their origin. Holds one pooled client shared by
/// every replay and scan probe, matching the teacher's idle-connection
/// reuse policy.
#[derive(Clone)]
pub struct ReplayEngine {
    client: Client,
}

impl ReplayEngine {
    pub fn new() -> ProxyResult<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Internal(e.to_string()))?;
        Ok(Self { client })
    }

    /// Dispatch `request`, returning the canonicalized response. Does not
    /// touch storage; callers persist the result themselves (the scanner
    /// only persists the final witness, not every probe).
    pub async fn send(&self, request: &HttpRequest) -> ProxyResult<HttpResponse> {
        self.send_cancellable(request, &CancellationToken::new()).await
    }

    /// Like [`Self::send`], but abandons the in-flight request and header
    /// decode as soon as `cancel` fires, returning `ProxyError::Cancelled`
    /// instead of whatever partial response was in progress.
    pub async fn send_cancellable(
        &self,
        request: &HttpRequest,
        cancel: &CancellationToken,
    ) -> ProxyResult<HttpResponse> {
        if cancel.is_cancelled() {
            return Err(ProxyError::Cancelled);
        }

        let method = Method::from_str(&request.method)
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

        let mut url = Url::parse(&request.url())
            .map_err(|e| ProxyError::InvalidRequest(format!("bad url: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (key, values) in request.get_params.iter() {
                for value in values {
                    pairs.append_pair(key, value);
                }
            }
        }
        if request.get_params.is_empty() {
            url.set_query(None);
        }

        let mut builder = self.client.request(method, url);

        for (name, values) in request.headers.iter() {
            for value in values {
                builder = builder.header(name, value);
            }
        }

        if !request.post_params.is_empty() {
            let mut form = form_urlencoded::Serializer::new(String::new());
            for (key, values) in request.post_params.iter() {
                for value in values {
                    form.append_pair(key, value);
                }
            }
            builder = builder
                .header("content-type", "application/x-www-form-urlencoded")
                .body(form.finish());
        } else if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        if !request.cookies.is_empty() {
            let cookie_header = request
                .cookies
                .values()
                .cloned()
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header("cookie", cookie_header);
        }

        debug!(url = %request.url(), method = %request.method, "dispatching replay");

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProxyError::Cancelled),
            result = builder.send() => result.map_err(|e| ProxyError::SendingRequest(e.to_string()))?,
        };

        let code = response.status().as_u16();
        let status_message = response
            .status()
            .canonical_reason()
            .unwrap_or_default()
            .to_string();

        let mut headers = OrderedMultiMap::new();
        for (name, value) in response.headers().iter() {
            let value = value.to_str().unwrap_or_default().to_string();
            headers.append(name.as_str().to_string(), value);
        }

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(ProxyError::Cancelled),
            result = response.text() => match result {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "failed to decode response body");
                    return Err(ProxyError::ParsingResponse(e.to_string()));
                }
            },
        };

        Ok(HttpResponse {
            id: None,
            request_id: request.id.clone().unwrap_or_default(),
            code,
            status_message,
            headers,
            body,
        })
    }
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self::new().expect("default TLS-enabled client configuration is always valid")
    }
}

/// Convenience wrapper that persists the response after a successful send,
/// the shape every API handler actually wants.
pub async fn replay_and_store(
    engine: &ReplayEngine,
    store: &Arc<dyn mitmkit_core::RequestStore>,
    request: &HttpRequest,
    cancel: &CancellationToken,
) -> ProxyResult<HttpResponse> {
    let response = engine.send_cancellable(request, cancel).await?;
    store.save_response(response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use mitmkit_core::HttpRequest;

    async fn spawn_echo_server() -> std::net::SocketAddr {
        let app = Router::new().route(
            "/echo",
            get(|| async { ([("x-echo", "1")], "root: x:0:0:0") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn replays_and_reports_status_and_body() {
        let addr = spawn_echo_server().await;
        let engine = ReplayEngine::new().unwrap();

        let request = HttpRequest {
            method: "GET".into(),
            scheme: "http".into(),
            host: addr.ip().to_string(),
            port: addr.port().to_string(),
            path: "/echo".into(),
            proto: "HTTP/1.1".into(),
            ..Default::default()
        };

        let response = engine.send(&request).await.unwrap();
        assert_eq!(response.code, 200);
        assert!(response.body.contains("root:"));
    }

    #[tokio::test]
    async fn send_cancellable_rejects_a_pre_cancelled_token() {
        let addr = spawn_echo_server().await;
        let engine = ReplayEngine::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = HttpRequest {
            method: "GET".into(),
            scheme: "http".into(),
            host: addr.ip().to_string(),
            port: addr.port().to_string(),
            path: "/echo".into(),
            proto: "HTTP/1.1".into(),
            ..Default::default()
        };

        let err = engine.send_cancellable(&request, &cancel).await.unwrap_err();
        assert!(matches!(err, ProxyError::Cancelled));
    }
}
