//! HTTP exposure of the registry, plus the heartbeat sender.
//!
//! The wire convention is deliberately thin: everything rides in headers on
//! a well-known path. GET answers with the alive list in
//! `X-Wirecall-Servers` (comma-joined); POST registers or refreshes the one
//! address carried in `X-Wirecall-Server`.

use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wirecall_common::error::{Result, WirecallError};

use crate::registry::{Registry, DEFAULT_TIMEOUT};

/// Well-known path the registry answers on.
pub const DEFAULT_PATH: &str = wirecall_common::protocol::REGISTRY_PATH;

/// Response header carrying the comma-joined alive list.
pub const SERVERS_HEADER: &str = wirecall_common::protocol::REGISTRY_SERVERS_HEADER;

/// Request header carrying the one address to register/refresh.
pub const SERVER_HEADER: &str = wirecall_common::protocol::REGISTRY_SERVER_HEADER;

impl Registry {
    /// Serves the registry on `listener` at [`DEFAULT_PATH`], one task per
    /// connection, until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "registry listening on {:?} path {}",
            listener.local_addr().ok(),
            DEFAULT_PATH
        );
        loop {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(|e| WirecallError::Connection(format!("accept error: {}", e)))?;
            let io = TokioIo::new(stream);
            let registry = Arc::clone(&self);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    ready(Ok::<_, std::convert::Infallible>(registry.handle(&req)))
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("registry connection error: {}", e);
                }
            });
        }
    }

    fn handle(&self, req: &Request<Incoming>) -> Response<Full<Bytes>> {
        if req.uri().path() != DEFAULT_PATH {
            return status_response(StatusCode::NOT_FOUND);
        }
        let method = req.method();
        if method == Method::GET {
            let servers = self.alive_servers().join(",");
            Response::builder()
                .status(StatusCode::OK)
                .header(SERVERS_HEADER, servers)
                .body(Full::new(Bytes::new()))
                .unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR))
        } else if method == Method::POST {
            let addr = req
                .headers()
                .get(SERVER_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty());
            match addr {
                Some(addr) => {
                    self.record_heartbeat(addr);
                    status_response(StatusCode::OK)
                }
                None => status_response(StatusCode::INTERNAL_SERVER_ERROR),
            }
        } else {
            status_response(StatusCode::METHOD_NOT_ALLOWED)
        }
    }
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Registers `addr` with the registry at `registry_url` now, then keeps it
/// alive on a fixed period.
///
/// The default period leaves a one-minute margin under the registry's
/// default expiry window. The loop stops on the first failed send (logged,
/// not raised), so a dead registry does not keep a background task retrying
/// forever.
pub async fn heartbeat(
    registry_url: String,
    addr: String,
    period: Option<Duration>,
) -> JoinHandle<()> {
    let period = period.unwrap_or(DEFAULT_TIMEOUT - Duration::from_secs(60));
    let client = reqwest::Client::new();
    let first = send_heartbeat(&client, &registry_url, &addr).await;

    tokio::spawn(async move {
        if first.is_err() {
            return;
        }
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // the first tick completes immediately
        loop {
            ticker.tick().await;
            if send_heartbeat(&client, &registry_url, &addr).await.is_err() {
                break;
            }
        }
    })
}

async fn send_heartbeat(client: &reqwest::Client, registry_url: &str, addr: &str) -> Result<()> {
    debug!("{} send heartbeat to registry {}", addr, registry_url);
    client
        .post(registry_url)
        .header(SERVER_HEADER, addr)
        .send()
        .await
        .map_err(|e| {
            warn!("heartbeat error: {}", e);
            WirecallError::Registry(e.to_string())
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start_registry(timeout: Duration) -> (Arc<Registry>, String) {
        let registry = Arc::new(Registry::new(timeout));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}{}", listener.local_addr().unwrap(), DEFAULT_PATH);
        tokio::spawn(Arc::clone(&registry).serve(listener));
        (registry, url)
    }

    async fn fetch_servers(url: &str) -> Vec<String> {
        let response = reqwest::get(url).await.unwrap();
        response
            .headers()
            .get(SERVERS_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_post_then_get_round_trip() {
        let (_registry, url) = start_registry(DEFAULT_TIMEOUT).await;

        let client = reqwest::Client::new();
        client
            .post(&url)
            .header(SERVER_HEADER, "127.0.0.1:7001")
            .send()
            .await
            .unwrap();
        client
            .post(&url)
            .header(SERVER_HEADER, "127.0.0.1:7000")
            .send()
            .await
            .unwrap();

        assert_eq!(
            fetch_servers(&url).await,
            vec!["127.0.0.1:7000", "127.0.0.1:7001"]
        );
    }

    #[tokio::test]
    async fn test_post_without_address_is_rejected() {
        let (registry, url) = start_registry(DEFAULT_TIMEOUT).await;

        let response = reqwest::Client::new().post(&url).send().await.unwrap();
        assert_eq!(response.status(), 500);
        assert!(registry.alive_servers().is_empty());
    }

    #[tokio::test]
    async fn test_other_methods_are_rejected() {
        let (_registry, url) = start_registry(DEFAULT_TIMEOUT).await;

        let response = reqwest::Client::new().delete(&url).send().await.unwrap();
        assert_eq!(response.status(), 405);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (_registry, url) = start_registry(DEFAULT_TIMEOUT).await;
        let wrong = url.replace(DEFAULT_PATH, "/elsewhere");

        let response = reqwest::get(&wrong).await.unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_address_listed() {
        let (_registry, url) = start_registry(Duration::from_millis(500)).await;

        heartbeat(
            url.clone(),
            "127.0.0.1:7001".to_string(),
            Some(Duration::from_millis(100)),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(fetch_servers(&url).await, vec!["127.0.0.1:7001"]);
    }

    #[tokio::test]
    async fn test_silent_address_expires() {
        let (registry, url) = start_registry(Duration::from_millis(80)).await;

        reqwest::Client::new()
            .post(&url)
            .header(SERVER_HEADER, "127.0.0.1:7001")
            .send()
            .await
            .unwrap();
        assert_eq!(registry.alive_servers().len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(fetch_servers(&url).await.is_empty());
    }
}
