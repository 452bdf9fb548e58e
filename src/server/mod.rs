// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP hosting for the proxy.
//!
//! A thin accept loop around **hyper-util**.  It owns the listening socket,
//! serves the single proxy endpoint and translates between Hyper's body
//! types and [`ProxyRequest`] / [`ProxyResponse`].  Both directions stream;
//! nothing is buffered.
//!
//! `hyper_util::server::conn::auto::Builder` lets one connection speak either
//! HTTP/1.1 or HTTP/2.
//!
//! Dispatcher errors become JSON `{ "message", "status" }` responses:
//!
//! | error           | status |
//! |-----------------|--------|
//! | `ClientError`   | 502    |
//! | `TokenPayload`  | 502    |
//! | `Timeout`       | 504    |
//! | anything else   | 500    |
//!
//! A cancelled request is logged at debug level and never reported as a
//! failure.


use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::TryStreamExt;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use reqwest::Body;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::core::{ClientDisconnected, ProxyCore, ProxyError, ProxyRequest, ProxyResponse};
use crate::logging::structured::RequestInfo;
use crate::{debug_fmt, error_fmt, info_fmt, trace_fmt, warn_fmt};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How long open connections may keep running after shutdown starts.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

/// The `server` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ProxyError> {
        format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .map_err(|e| ProxyError::Other(format!("Invalid server address: {e}")))
    }
}

/// HTTP server for the proxy endpoint.
#[derive(Debug, Clone)]
pub struct ProxyServer {
    config: ServerConfig,
    /// Request path the proxy answers on, compared case-insensitively.
    proxy_path: Arc<str>,
    core: Arc<ProxyCore>,
}

impl ProxyServer {
    pub fn new(config: ServerConfig, proxy_path: impl Into<String>, core: Arc<ProxyCore>) -> Self {
        Self {
            config,
            proxy_path: Arc::from(proxy_path.into()),
            core,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn proxy_path(&self) -> &str {
        &self.proxy_path
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM.
    pub async fn start(&self) -> Result<(), ProxyError> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::Other(format!("Failed to bind {addr}: {e}")))?;

        #[cfg(unix)]
        let mut term_stream = signal(SignalKind::terminate())
            .map_err(|e| ProxyError::Other(format!("Cannot install SIGTERM handler: {e}")))?;

        let shutdown = async move {
            #[cfg(unix)]
            let sigterm = term_stream.recv();
            #[cfg(not(unix))]
            let sigterm = std::future::pending::<Option<()>>();

            tokio::select! {
                _ = signal::ctrl_c() => info_fmt!("Server", "Received Ctrl-C; initiating graceful shutdown"),
                _ = sigterm => info_fmt!("Server", "Received SIGTERM; initiating graceful shutdown"),
            }
        };

        self.serve(listener, shutdown).await
    }

    /// Serve connections from `listener` until `shutdown` resolves, then
    /// drain open connections for up to thirty seconds.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()> + Send,
    {
        let local = listener.local_addr()?;
        info_fmt!("Server", "Resource proxy listening on http://{}{}", local, self.proxy_path);

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accept = listener.accept() => {
                    let (stream, remote_addr) = match accept {
                        Ok(conn) => conn,
                        Err(e) => {
                            error_fmt!("Server", "Accept error: {}", e);
                            continue;
                        }
                    };

                    let core = Arc::clone(&self.core);
                    let proxy_path = Arc::clone(&self.proxy_path);
                    let mut stop_rx = stop_rx.clone();

                    connections.spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            handle_request(req, Arc::clone(&core), Arc::clone(&proxy_path), remote_addr)
                        });

                        let builder = AutoBuilder::new(TokioExecutor::new());
                        let conn = builder.serve_connection(TokioIo::new(stream), service);
                        let mut conn = std::pin::pin!(conn);

                        tokio::select! {
                            res = &mut conn => log_connection_end(res),
                            _ = stop_rx.changed() => {
                                conn.as_mut().graceful_shutdown();
                                log_connection_end(conn.await);
                            }
                        }
                    });
                }
            }
        }

        info_fmt!("Server", "Shutting down; draining {} connection(s)", connections.len());
        let _ = stop_tx.send(true);

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_DRAIN, drain).await.is_err() {
            warn_fmt!(
                "Server",
                "Shutdown timed out after {}s; closing remaining connections",
                SHUTDOWN_DRAIN.as_secs()
            );
            connections.shutdown().await;
        }

        info_fmt!("Server", "Shutdown complete");
        Ok(())
    }
}

fn log_connection_end(res: Result<(), Box<dyn std::error::Error + Send + Sync>>) {
    match res {
        Ok(()) => trace_fmt!("Server", "Connection closed"),
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("connection closed") || msg.contains("connection reset") {
                debug_fmt!("Server", "Connection dropped by peer: {}", msg);
            } else {
                error_fmt!("Server", "Connection error: {}", msg);
            }
        }
    }
}

/// Hyper request → [`ProxyRequest`].  A failure while reading the inbound
/// body means the client went away; it is tagged so the dispatcher can tell
/// it apart from a backend failure.
fn convert_hyper_request(req: Request<Incoming>) -> ProxyRequest {
    let (parts, body) = req.into_parts();

    let stream = body
        .into_data_stream()
        .map_err(|e| io::Error::other(ClientDisconnected(e.to_string())));

    ProxyRequest::new(
        parts.method,
        parts.uri.query().map(str::to_owned),
        parts.headers,
    )
    .with_body(Body::wrap_stream(stream))
}

/// [`ProxyResponse`] → Hyper response.
fn convert_proxy_response(resp: ProxyResponse) -> Result<Response<Body>, ProxyError> {
    let mut builder = Response::builder().status(resp.status);
    let headers = builder
        .headers_mut()
        .ok_or_else(|| ProxyError::Other(format!("invalid response status {}", resp.status)))?;
    *headers = resp.headers;

    builder
        .body(resp.body)
        .map_err(|e| ProxyError::Other(e.to_string()))
}

/// Status code reported for a dispatcher error; `None` for cancellation.
fn error_status(err: &ProxyError) -> Option<u16> {
    match err {
        ProxyError::Cancelled => None,
        ProxyError::ClientError(_) | ProxyError::TokenPayload(_) => Some(502),
        ProxyError::Timeout(_) => Some(504),
        _ => Some(500),
    }
}

fn error_message(status: u16) -> &'static str {
    match status {
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Internal Server Error",
    }
}

/// Last-resort response that cannot fail to build.
fn plain_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

async fn handle_request(
    req: Request<Incoming>,
    core: Arc<ProxyCore>,
    proxy_path: Arc<str>,
    remote_addr: SocketAddr,
) -> Result<Response<Body>, Infallible> {
    let info = RequestInfo::new(
        req.method().as_str(),
        req.uri().path(),
        Some(remote_addr.to_string()),
    );
    trace_fmt!("Server", "[{}] {} {} over {:?}", info.request_id, info.method, info.path, req.version());

    if !info.path.eq_ignore_ascii_case(&proxy_path) {
        debug_fmt!("Server", "[{}] No endpoint at {}", info.request_id, info.path);
        return Ok(to_hyper(ProxyResponse::error(404, "Not Found")));
    }

    let proxy_req = convert_hyper_request(req);

    let response = match core.handle(proxy_req).await {
        Ok(resp) => resp,
        Err(e) => match error_status(&e) {
            None => {
                debug_fmt!("Server", "[{}] Request cancelled by client after {}ms", info.request_id, info.elapsed_ms());
                ProxyResponse::error(499, "Client Closed Request")
            }
            Some(status) => {
                if status == 500 {
                    error_fmt!("Server", "[{}] {} {} failed: {}", info.request_id, info.method, info.path, e);
                } else {
                    warn_fmt!("Server", "[{}] {} {} failed upstream: {}", info.request_id, info.method, info.path, e);
                }
                ProxyResponse::error(status, error_message(status))
            }
        },
    };

    debug_fmt!(
        "Server",
        "[{}] {} {} from {} -> {} in {}ms",
        info.request_id,
        info.method,
        info.path,
        info.remote_addr,
        response.status,
        info.elapsed_ms()
    );

    Ok(to_hyper(response))
}

fn to_hyper(response: ProxyResponse) -> Response<Body> {
    convert_proxy_response(response).unwrap_or_else(|e| {
        error_fmt!("Server", "Failed to build response: {}", e);
        plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    })
}
