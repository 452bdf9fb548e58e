// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound HTTP transport.
//!
//! One pooled `reqwest::Client` per configured rule plus a shared client for
//! passthrough traffic.  Redirects are never followed: a `3xx` from a backend
//! is relayed to the caller untouched.  User-login rules get their basic
//! credentials baked into the client as a default header, so no per-request
//! credential handling is needed for them.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, redirect};

use super::ProxyError;
use crate::debug_fmt;
use crate::rules::{AuthMode, RuleSet, TargetServerRule};

/// A username/password pair for a user-login backend.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    fn basic_header(&self) -> Result<HeaderValue, ProxyError> {
        let encoded =
            general_purpose::STANDARD.encode(format!("{}:{}", self.username, self.password));
        let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
            .map_err(|e| ProxyError::ConfigError(format!("invalid basic credentials: {e}")))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// Supplies transport-level credentials for a rule.
pub trait CredentialProvider: fmt::Debug + Send + Sync {
    fn credentials_for(&self, rule: &TargetServerRule) -> Option<Credentials>;
}

/// Reads credentials straight from the rule configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigCredentialProvider;

impl CredentialProvider for ConfigCredentialProvider {
    fn credentials_for(&self, rule: &TargetServerRule) -> Option<Credentials> {
        match &rule.mode {
            AuthMode::UserLogin { username, password } => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

/// Connection-pooled clients keyed by rule URL.
#[derive(Debug, Clone)]
pub struct ClientPool {
    passthrough: Client,
    per_rule: HashMap<String, Client>,
}

impl ClientPool {
    pub fn new(
        rules: &RuleSet,
        credentials: &dyn CredentialProvider,
        timeout: Duration,
    ) -> Result<Self, ProxyError> {
        let passthrough = Self::builder(timeout).build()?;

        let mut per_rule = HashMap::with_capacity(rules.rules().len());
        for rule in rules.rules() {
            let mut builder = Self::builder(timeout);
            if let Some(creds) = credentials.credentials_for(rule) {
                debug_fmt!("ClientPool", "Attaching basic credentials for {} to its client", rule.url);
                let mut headers = HeaderMap::new();
                headers.insert(AUTHORIZATION, creds.basic_header()?);
                builder = builder.default_headers(headers);
            }
            per_rule.insert(rule.url.clone(), builder.build()?);
        }

        Ok(Self {
            passthrough,
            per_rule,
        })
    }

    fn builder(timeout: Duration) -> reqwest::ClientBuilder {
        Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
    }

    /// The client for `rule`, or the shared passthrough client.
    pub fn client_for(&self, rule: Option<&TargetServerRule>) -> &Client {
        rule.and_then(|r| self.per_rule.get(&r.url))
            .unwrap_or(&self.passthrough)
    }
}
