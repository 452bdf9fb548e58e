// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core primitives – requests, responses and the request dispatcher.
//!
//! Everything that physically moves through the proxy is defined here.  No
//! socket handling lives in this module; that sits in `server` (IO), while
//! credential lookup lives in `token` and rule matching in `rules`.
//!
//! ```text
//! inbound ─▶ ReferrerGuard ─▶ RuleSet::find ─▶ TokenCache (AppLogin/TokenLogin)
//!                                          └──▶ Forwarder ─▶ relay ─▶ outbound
//! ```

mod forward;
mod relay;
mod transport;


pub use forward::Forwarder;
pub use relay::relay;
pub use transport::{ClientPool, ConfigCredentialProvider, CredentialProvider, Credentials};

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Instant;
use std::{fmt, io};

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, REFERER};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::rules::{RuleSet, TargetServerRule};
use crate::security::ReferrerGuard;
use crate::token::TokenCache;
use crate::{debug_fmt, info_fmt, trace_fmt};

/// Errors that can occur while proxying a request.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// HTTP client error talking to a backend or token endpoint
    #[error("HTTP client error: {0}")]
    ClientError(#[source] reqwest::Error),

    /// The outbound request exceeded the transport timeout
    #[error("upstream request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// A rule cannot be served as configured
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A token endpoint answered with something that is not a usable token
    #[error("invalid token payload: {0}")]
    TokenPayload(String),

    /// The client went away before the request finished
    #[error("request cancelled by client")]
    Cancelled,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    /// Cancellation is an expected outcome, not a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProxyError::Cancelled)
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if caused_by_client_disconnect(&err) {
            ProxyError::Cancelled
        } else if err.is_timeout() {
            ProxyError::Timeout(err)
        } else {
            ProxyError::ClientError(err)
        }
    }
}

impl From<crate::config::ConfigError> for ProxyError {
    fn from(err: crate::config::ConfigError) -> Self {
        ProxyError::ConfigError(err.to_string())
    }
}

/// Marker error placed into the inbound body stream when the client
/// connection fails mid-request.
#[derive(Debug)]
pub struct ClientDisconnected(pub String);

impl fmt::Display for ClientDisconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client disconnected: {}", self.0)
    }
}

impl StdError for ClientDisconnected {}

fn caused_by_client_disconnect(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<ClientDisconnected>() {
            return true;
        }
        // io::Error hides its payload from `source()`.
        if let Some(inner) = e.downcast_ref::<io::Error>().and_then(|io| io.get_ref()) {
            if inner.is::<ClientDisconnected>() {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// An inbound request as seen by the dispatcher.
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: reqwest::Method,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: reqwest::Body,
    pub start_time: Instant,
}

impl ProxyRequest {
    pub fn new(method: reqwest::Method, query: Option<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            query,
            headers,
            body: reqwest::Body::from(""),
            start_time: Instant::now(),
        }
    }

    pub fn with_body(mut self, body: reqwest::Body) -> Self {
        self.body = body;
        self
    }

    /// The `referer` header, if present and readable.
    pub fn referrer(&self) -> Option<String> {
        self.headers
            .get(REFERER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }
}

/// The response handed back to the server layer.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: reqwest::Body,
}

impl ProxyResponse {
    /// A small JSON document generated by the proxy itself.
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Self {
            status,
            headers,
            body: reqwest::Body::from(body),
        }
    }

    /// `{ "message": ..., "status": ... }` with a matching status code.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, &json!({ "message": message.into(), "status": status }))
    }
}

/// Per-request state owned by the dispatcher for the lifetime of one request.
#[derive(Debug, Clone)]
pub struct ProxyRequestContext {
    pub referrer: Option<String>,
    pub rule: Option<Arc<TargetServerRule>>,
    pub proxied_url: String,
}

/// Token-invalid status codes; `498` is the vendor's "invalid token".
const INVALID_TOKEN_STATUSES: [u16; 2] = [401, 498];

/// The request dispatcher.  One instance serves every request; it holds no
/// per-request state.
#[derive(Debug)]
pub struct ProxyCore {
    rules: Arc<RuleSet>,
    guard: ReferrerGuard,
    tokens: Arc<TokenCache>,
    forwarder: Forwarder,
}

impl ProxyCore {
    pub fn new(
        rules: Arc<RuleSet>,
        guard: ReferrerGuard,
        tokens: Arc<TokenCache>,
        clients: Arc<ClientPool>,
    ) -> Self {
        Self {
            rules,
            guard,
            tokens,
            forwarder: Forwarder::new(clients),
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn token_cache(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// Handle one inbound request: ping, admission, rule match, credential
    /// resolution, forwarding and relay.
    pub async fn handle(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let query = request.query.as_deref().unwrap_or("");
        let referrer = request.referrer();

        if query.eq_ignore_ascii_case("ping") {
            trace_fmt!("ProxyCore", "Answering ping");
            return Ok(self.ping_response(referrer.as_deref()));
        }

        if !self.guard.is_allowed(referrer.as_deref()) {
            let shown = referrer.as_deref().unwrap_or("");
            info_fmt!("ProxyCore", "Rejected request with referrer '{}'", shown);
            return Ok(ProxyResponse::error(
                400,
                format!("Referrer {shown} is not allowed."),
            ));
        }

        let proxied_url = query.trim_start_matches('?').to_string();
        if proxied_url.is_empty() {
            return Ok(ProxyResponse::error(400, "No proxied url was supplied."));
        }
        let target = match reqwest::Url::parse(&proxied_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => {
                return Ok(ProxyResponse::error(
                    400,
                    format!("Proxied url {proxied_url} is not a valid http(s) url."),
                ));
            }
        };

        let ctx = ProxyRequestContext {
            rule: self.rules.find(&proxied_url),
            referrer,
            proxied_url,
        };

        let token = match ctx.rule.as_deref() {
            Some(rule) if rule.mode.requires_token() => {
                debug_fmt!("ProxyCore", "Token required for {} ({})", rule.url, rule.mode.name());
                Some(
                    self.tokens
                        .get_token(rule, ctx.referrer.as_deref(), false)
                        .await?,
                )
            }
            Some(rule) => {
                debug_fmt!("ProxyCore", "Forwarding to {} as {}", rule.url, rule.mode.name());
                None
            }
            None => {
                debug_fmt!("ProxyCore", "No rule for {}; passing through", ctx.proxied_url);
                None
            }
        };

        let method = request.method.clone();
        let start_time = request.start_time;
        let upstream_start = Instant::now();
        let response = self
            .forwarder
            .forward(request, target, ctx.rule.as_deref(), token.as_deref())
            .await?;
        let upstream_elapsed = upstream_start.elapsed();

        if let (Some(rule), Some(_)) = (ctx.rule.as_deref(), token.as_ref()) {
            if INVALID_TOKEN_STATUSES.contains(&response.status().as_u16()) {
                info_fmt!(
                    "ProxyCore",
                    "Backend {} rejected the cached token ({}); invalidating",
                    rule.url,
                    response.status()
                );
                self.tokens.invalidate(&rule.url);
            }
        }

        let proxy_resp = relay(response);

        let overall_elapsed = start_time.elapsed();
        debug_fmt!(
            "ProxyCore",
            "[timing] {} {} -> {} | total={:?} upstream={:?} internal={:?}",
            method,
            ctx.proxied_url,
            proxy_resp.status,
            overall_elapsed,
            upstream_elapsed,
            overall_elapsed.saturating_sub(upstream_elapsed)
        );

        Ok(proxy_resp)
    }

    fn ping_response(&self, referrer: Option<&str>) -> ProxyResponse {
        ProxyResponse::json(
            200,
            &json!({
                "message": "Pong!",
                "hasConfig": self.rules.is_loaded(),
                "referringUrl": referrer,
            }),
        )
    }
}
