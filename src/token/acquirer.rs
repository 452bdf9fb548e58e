// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Credential exchange against token endpoints.
//!
//! The acquirer is transport only: it posts the form and hands back the raw
//! response body.  Reading the payload is the cache's job.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{ClientPool, ProxyError};
use crate::rules::{AuthMode, TargetServerRule, TokenEndpoint};
use crate::{debug_fmt, error_fmt, trace_fmt};

/// Performs a credential exchange for a rule.
#[async_trait]
pub trait TokenAcquirer: fmt::Debug + Send + Sync {
    /// Request a token for `rule` and return the raw, unparsed response body.
    async fn acquire(
        &self,
        rule: &TargetServerRule,
        referrer: Option<&str>,
    ) -> Result<String, ProxyError>;
}

/// Form fields for a token request.
///
/// The rule's static `referer` wins over the request referrer.  OAuth2
/// endpoints receive a client-credentials grant; vendor endpoints receive a
/// `getToken` request.
pub fn token_form_data(
    rule: &TargetServerRule,
    referrer: Option<&str>,
) -> Result<Vec<(&'static str, String)>, ProxyError> {
    let endpoint = rule.token_endpoint().ok_or_else(|| missing_endpoint(rule))?;
    let referrer = rule
        .referer
        .as_deref()
        .or(referrer)
        .filter(|r| !r.is_empty());

    let mut form: Vec<(&'static str, String)> = Vec::with_capacity(8);

    match endpoint {
        TokenEndpoint::OAuth2(_) => {
            let AuthMode::AppLogin {
                client_id,
                client_secret,
                ..
            } = &rule.mode
            else {
                return Err(ProxyError::ConfigError(format!(
                    "{} uses an oauth2_endpoint without client credentials",
                    rule.url
                )));
            };
            form.push(("client_id", client_id.clone()));
            form.push(("client_secret", client_secret.clone()));
            form.push(("grant_type", "client_credentials".to_string()));
            if let Some(referrer) = referrer {
                form.push(("referer", referrer.to_string()));
            }
        }
        TokenEndpoint::Vendor(_) => {
            form.push(("request", "getToken".to_string()));
            match &rule.mode {
                AuthMode::TokenLogin {
                    username, password, ..
                } => {
                    form.push(("username", username.clone()));
                    form.push(("password", password.clone()));
                }
                AuthMode::AppLogin {
                    client_id,
                    client_secret,
                    ..
                } => {
                    form.push(("client_id", client_id.clone()));
                    form.push(("client_secret", client_secret.clone()));
                }
                _ => return Err(missing_endpoint(rule)),
            }
            match referrer {
                Some(referrer) => {
                    form.push(("client", "referer".to_string()));
                    form.push(("referer", referrer.to_string()));
                }
                None => form.push(("client", "requestip".to_string())),
            }
            if let Some(minutes) = rule.token_expiration {
                form.push(("expiration", minutes.to_string()));
            }
        }
    }

    form.push(("f", "json".to_string()));
    Ok(form)
}

fn missing_endpoint(rule: &TargetServerRule) -> ProxyError {
    ProxyError::ConfigError(format!(
        "{} requires a token but has neither an oauth2_endpoint nor a token_url",
        rule.url
    ))
}

/// Posts token forms over the rule's pooled client.
#[derive(Debug, Clone)]
pub struct HttpTokenAcquirer {
    clients: Arc<ClientPool>,
}

impl HttpTokenAcquirer {
    pub fn new(clients: Arc<ClientPool>) -> Self {
        Self { clients }
    }
}

#[async_trait]
impl TokenAcquirer for HttpTokenAcquirer {
    async fn acquire(
        &self,
        rule: &TargetServerRule,
        referrer: Option<&str>,
    ) -> Result<String, ProxyError> {
        let endpoint = rule.token_endpoint().ok_or_else(|| {
            let err = missing_endpoint(rule);
            error_fmt!("TokenAcquirer", "{}", err);
            err
        })?;
        let form = token_form_data(rule, referrer)?;

        debug_fmt!("TokenAcquirer", "Requesting token for {} from {}", rule.url, endpoint.url());

        let response = self
            .clients
            .client_for(Some(rule))
            .post(endpoint.url())
            .form(&form)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;

        trace_fmt!("TokenAcquirer", "Token endpoint {} answered with {} bytes", endpoint.url(), body.len());
        Ok(body)
    }
}
