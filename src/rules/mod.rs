// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Target-server rules and the prefix matcher.
//!
//! Every entry of `proxy.server_urls` becomes a [`TargetServerRule`] whose
//! [`AuthMode`] is decided once, when configuration is loaded.  The
//! [`RuleSet`] answers "which rule covers this proxied URL?" with a
//! longest-prefix match; no match means the request is a passthrough.
//!
//! | populated fields                                   | mode          |
//! |----------------------------------------------------|---------------|
//! | `client_id` + `client_secret`                      | `AppLogin`    |
//! | `username` + `password` + `token_url`              | `TokenLogin`  |
//! | `username` + `password`                            | `UserLogin`   |
//!
//! An `oauth2_endpoint` only matters for client credentials; a username and
//! password next to one are still sent as basic credentials.
//! | nothing                                            | `Passthrough` |

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::config::{ConfigError, ServerUrlConfig};
use crate::{debug_fmt, warn_fmt};

/// Where a token is obtained, and therefore how its payload is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEndpoint {
    /// OAuth2 client-credentials endpoint; payload carries `access_token` / `expires_in`.
    OAuth2(String),
    /// Vendor token-generation endpoint; payload carries `token` / `expires`.
    Vendor(String),
}

impl TokenEndpoint {
    pub fn url(&self) -> &str {
        match self {
            TokenEndpoint::OAuth2(url) | TokenEndpoint::Vendor(url) => url,
        }
    }

    /// OAuth2 is preferred whenever it is configured.
    fn select(oauth2_endpoint: Option<String>, token_url: Option<String>) -> Option<Self> {
        oauth2_endpoint
            .map(TokenEndpoint::OAuth2)
            .or_else(|| token_url.map(TokenEndpoint::Vendor))
    }
}

/// How requests to a target server are authenticated.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// No credentials are injected.
    Passthrough,
    /// Basic credentials attached to every forwarded request.
    UserLogin { username: String, password: String },
    /// Client-credentials exchange. The endpoint may be missing, which only
    /// fails once a token is actually needed.
    AppLogin {
        client_id: String,
        client_secret: String,
        endpoint: Option<TokenEndpoint>,
    },
    /// Username/password exchanged at a vendor token-generation endpoint.
    TokenLogin {
        username: String,
        password: String,
        endpoint: TokenEndpoint,
    },
}

impl AuthMode {
    /// Whether requests in this mode carry a cached token.
    pub fn requires_token(&self) -> bool {
        matches!(self, AuthMode::AppLogin { .. } | AuthMode::TokenLogin { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuthMode::Passthrough => "passthrough",
            AuthMode::UserLogin { .. } => "user-login",
            AuthMode::AppLogin { .. } => "app-login",
            AuthMode::TokenLogin { .. } => "token-login",
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Passthrough => f.write_str("Passthrough"),
            AuthMode::UserLogin { username, .. } => f
                .debug_struct("UserLogin")
                .field("username", username)
                .finish_non_exhaustive(),
            AuthMode::AppLogin {
                client_id,
                endpoint,
                ..
            } => f
                .debug_struct("AppLogin")
                .field("client_id", client_id)
                .field("endpoint", endpoint)
                .finish_non_exhaustive(),
            AuthMode::TokenLogin {
                username, endpoint, ..
            } => f
                .debug_struct("TokenLogin")
                .field("username", username)
                .field("endpoint", endpoint)
                .finish_non_exhaustive(),
        }
    }
}

/// One configured backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetServerRule {
    /// URL prefix; also the token-cache key and the transport-client identity.
    pub url: String,
    pub mode: AuthMode,
    /// Static referrer override sent to token endpoints.
    pub referer: Option<String>,
    /// Query parameter carrying the token instead of an `Authorization` header.
    pub token_param: Option<String>,
    /// Requested vendor-token lifetime in minutes.
    pub token_expiration: Option<u32>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TargetServerRule {
    /// Resolve a raw config entry into a rule with an explicit mode.
    pub fn from_config(cfg: ServerUrlConfig) -> Result<Self, ConfigError> {
        let url = cfg.url.trim().to_string();
        if url.is_empty() {
            return Err(ConfigError::invalid_rule(&cfg.url, "url must not be empty"));
        }

        let username = non_empty(cfg.username);
        let password = non_empty(cfg.password);
        let client_id = non_empty(cfg.client_id);
        let client_secret = non_empty(cfg.client_secret);
        let token_url = non_empty(cfg.token_url);
        let endpoint = TokenEndpoint::select(non_empty(cfg.oauth2_endpoint), token_url.clone());

        let mode = match (client_id, client_secret, username, password) {
            (Some(_), Some(_), Some(_), Some(_)) => {
                return Err(ConfigError::invalid_rule(
                    &url,
                    "both client credentials and username/password are configured",
                ));
            }
            (Some(client_id), Some(client_secret), _, _) => AuthMode::AppLogin {
                client_id,
                client_secret,
                endpoint,
            },
            (_, _, Some(username), Some(password)) => match token_url {
                Some(token_url) => AuthMode::TokenLogin {
                    username,
                    password,
                    endpoint: TokenEndpoint::Vendor(token_url),
                },
                None => AuthMode::UserLogin { username, password },
            },
            (Some(_), None, _, _) | (None, Some(_), _, _) => {
                warn_fmt!("Rules", "Rule {} has an incomplete client id/secret pair; treating as passthrough", url);
                AuthMode::Passthrough
            }
            _ => AuthMode::Passthrough,
        };

        Ok(Self {
            url,
            mode,
            referer: non_empty(cfg.referer),
            token_param: non_empty(cfg.token_param),
            token_expiration: cfg.token_expiration,
        })
    }

    /// The endpoint a token for this rule is requested from, if any.
    pub fn token_endpoint(&self) -> Option<&TokenEndpoint> {
        match &self.mode {
            AuthMode::AppLogin { endpoint, .. } => endpoint.as_ref(),
            AuthMode::TokenLogin { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }

    /// Case-insensitive prefix test against a proxied URL.
    pub fn matches(&self, proxied_url: &str) -> bool {
        proxied_url
            .get(..self.url.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(&self.url))
    }

    fn identity(&self) -> String {
        self.url.trim_end_matches('/').to_ascii_lowercase()
    }
}

/// The immutable set of configured rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Arc<TargetServerRule>>,
    loaded: bool,
}

impl RuleSet {
    /// A rule set for a proxy started without any `server_urls` section.
    pub fn unconfigured() -> Self {
        Self::default()
    }

    /// Build from config entries, rejecting empty and duplicate URLs.
    pub fn from_configs(cfgs: Vec<ServerUrlConfig>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::with_capacity(cfgs.len());
        let mut rules = Vec::with_capacity(cfgs.len());

        for cfg in cfgs {
            let rule = TargetServerRule::from_config(cfg)?;
            if !seen.insert(rule.identity()) {
                return Err(ConfigError::invalid_rule(&rule.url, "duplicate url"));
            }
            debug_fmt!("Rules", "Loaded rule {} ({})", rule.url, rule.mode.name());
            rules.push(Arc::new(rule));
        }

        Ok(Self {
            rules,
            loaded: true,
        })
    }

    /// Whether a rule configuration was supplied at all.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn rules(&self) -> &[Arc<TargetServerRule>] {
        &self.rules
    }

    /// Longest-prefix match of `proxied_url` against the configured rules.
    pub fn find(&self, proxied_url: &str) -> Option<Arc<TargetServerRule>> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(proxied_url))
            .max_by_key(|rule| rule.url.len())
            .cloned()
    }
}
