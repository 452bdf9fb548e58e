// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shapes of the `proxy.*` configuration section.

use serde::{Deserialize, Serialize};

/// One entry of `proxy.server_urls`, exactly as written in the config file.
///
/// Which credential fields are populated decides the rule's auth mode; see
/// [`crate::rules::TargetServerRule::from_config`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerUrlConfig {
    /// URL prefix this rule applies to.
    pub url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    /// OAuth2 client-credentials token endpoint.
    #[serde(default)]
    pub oauth2_endpoint: Option<String>,

    /// Vendor `generateToken` endpoint.
    #[serde(default)]
    pub token_url: Option<String>,

    /// Static referrer sent to the token endpoint instead of the caller's.
    #[serde(default)]
    pub referer: Option<String>,

    /// Send the token as this query parameter instead of an `Authorization` header.
    #[serde(default)]
    pub token_param: Option<String>,

    /// Requested token lifetime in minutes (vendor exchange only).
    #[serde(default)]
    pub token_expiration: Option<u32>,
}

/// Proxy-wide settings read from `proxy.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Path of the proxy endpoint, matched case-insensitively.
    #[serde(default = "default_path")]
    pub path: String,

    /// Timeout in seconds applied to token requests and forwarded requests.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Referrer prefixes allowed to use the proxy. Empty means open.
    #[serde(default)]
    pub allowed_referrers: Vec<String>,
}

fn default_path() -> String {
    "/proxy/proxy.ashx".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            path: default_path(),
            timeout: default_timeout(),
            allowed_referrers: Vec::new(),
        }
    }
}
