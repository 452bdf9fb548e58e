// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builds and sends the outbound request.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HOST, HeaderMap, HeaderName, HeaderValue};

use super::{ClientPool, ProxyError, ProxyRequest};
use crate::rules::{AuthMode, TargetServerRule};
use crate::trace_fmt;

/// Connection-scoped headers that must not travel to the backend.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
];

#[derive(Debug, Clone)]
pub struct Forwarder {
    clients: Arc<ClientPool>,
}

impl Forwarder {
    pub fn new(clients: Arc<ClientPool>) -> Self {
        Self { clients }
    }

    /// Send `request` to `target` with method, headers and streaming body
    /// preserved.  A token is attached as a bearer header, or as the rule's
    /// `token_param` query parameter when one is configured.
    pub async fn forward(
        &self,
        request: ProxyRequest,
        mut target: reqwest::Url,
        rule: Option<&TargetServerRule>,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ProxyError> {
        let mut headers = outbound_headers(request.headers);

        // The pooled client carries the configured basic credentials; a
        // request-level header would replace them.
        if rule.is_some_and(|r| matches!(r.mode, AuthMode::UserLogin { .. })) {
            headers.remove(AUTHORIZATION);
        }

        if let Some(token) = token {
            match rule.and_then(|r| r.token_param.as_deref()) {
                Some(param) => {
                    target.query_pairs_mut().append_pair(param, token);
                }
                None => {
                    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                        .map_err(|e| ProxyError::TokenPayload(format!("token is not a valid header value: {e}")))?;
                    value.set_sensitive(true);
                    headers.insert(AUTHORIZATION, value);
                }
            }
        }

        trace_fmt!("Forwarder", "{} {} with {} headers", request.method, target, headers.len());

        let response = self
            .clients
            .client_for(rule)
            .request(request.method, target)
            .headers(headers)
            .body(request.body)
            .send()
            .await?;

        Ok(response)
    }
}

/// Inbound headers minus `host` and the hop-by-hop set.
fn outbound_headers(mut headers: HeaderMap) -> HeaderMap {
    headers.remove(HOST);
    for name in HOP_BY_HOP {
        headers.remove(HeaderName::from_static(name));
    }
    // `transfer-encoding` is recomputed by the outbound connection.
    headers.remove(reqwest::header::TRANSFER_ENCODING);
    headers
}
