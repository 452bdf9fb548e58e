// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! resource-proxy - a configuration-driven forwarding proxy that attaches
//! server-held credentials to backend requests.
//!
//! A browser application calls `/proxy/proxy.ashx?<target url>`.  The proxy
//! checks the caller's `referer` against an allow-list, finds the
//! configured target-server rule with the longest matching URL prefix and
//! forwards the request with whatever credential that rule calls for:
//!
//! - **app-login / token-login**: a bearer token obtained from an OAuth2 or
//!   vendor token endpoint and cached until it expires
//! - **user-login**: HTTP basic credentials on the pooled client
//! - **passthrough**: nothing
//!
//! The backend response is streamed back unchanged apart from
//! `transfer-encoding`.  `?ping` answers with a small diagnostic document.
//!
//! # Configuration
//!
//! Configuration is layered from a file (JSON, TOML or YAML) and
//! `RESOURCE_PROXY_*` environment variables; see [`config`] for the keys.
//!
//! ```rust,no_run
//! use resource_proxy::ResourceProxy;
//!
//! # async fn run() -> Result<(), resource_proxy::LoaderError> {
//! let proxy = ResourceProxy::loader()
//!     .with_config_file("config.toml")
//!     .with_env_vars()
//!     .build()
//!     .await?;
//! proxy.start().await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod loader;
pub mod logging;
pub mod rules;
pub mod security;
pub mod server;
pub mod token;

pub use config::{Config, ConfigError, ConfigProvider, ConfigProviderExt};
pub use core::{
    ClientPool, CredentialProvider, Credentials, ProxyCore, ProxyError, ProxyRequest,
    ProxyResponse,
};
pub use loader::{LoaderError, ProxyLoader, ResourceProxy};
pub use rules::{AuthMode, RuleSet, TargetServerRule, TokenEndpoint};
pub use security::ReferrerGuard;
pub use server::{ProxyServer, ServerConfig};
pub use token::{TokenAcquirer, TokenCache};
