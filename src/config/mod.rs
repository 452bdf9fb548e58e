// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration subsystem.
//!
//! A running proxy is created from an ordered list of [`ConfigProvider`]s;
//! later providers override earlier ones:
//!
//! 1. `FileConfigProvider` – `config.{toml,json,yaml}`
//! 2. `EnvConfigProvider`  – `RESOURCE_PROXY_PROXY_TIMEOUT=10`
//! 3. *your* provider implementing [`ConfigProvider`]
//!
//! | key | type | default | description |
//! |-----|------|---------|-------------|
//! | `server.host`             | string   | `127.0.0.1`          | Bind address                       |
//! | `server.port`             | u16      | `8080`               | Bind port                          |
//! | `proxy.path`              | string   | `/proxy/proxy.ashx`  | Path the proxy endpoint answers on |
//! | `proxy.timeout`           | seconds  | `30`                 | Outbound request timeout           |
//! | `proxy.allowed_referrers` | array    | `[]` (open)          | Referrer allow-list                |
//! | `proxy.server_urls`       | array    | –                    | Target-server rules                |
//! | `proxy.logging`           | object   | see `LoggingConfig`  | Logging backend                    |

mod env;
pub mod error;
mod file;
mod proxy;

#[cfg(test)]
mod tests;

pub use env::EnvConfigProvider;
pub use error::ConfigError;
pub use file::FileConfigProvider;
pub use proxy::{ProxySettings, ServerUrlConfig};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// A source of configuration values.
///
/// Object-safe; typed access lives in [`ConfigProviderExt`].
pub trait ConfigProvider: Debug + Send + Sync {
    /// Check if the configuration provider has a value for the given key.
    fn has(&self, key: &str) -> bool;

    /// Name of the provider, used in error messages.
    fn provider_name(&self) -> &str;

    /// Get a raw configuration value by dot-separated key.
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError>;
}

/// Typed access on top of [`ConfigProvider`].
pub trait ConfigProviderExt: ConfigProvider {
    /// Get a configuration value by key and deserialize it to the specified type.
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                ConfigError::ParseError(format!("failed to deserialize '{key}': {e}"))
            }),
            None => Ok(None),
        }
    }
}

impl<T: ConfigProvider> ConfigProviderExt for T {}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configuration provider. Later providers take precedence.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Add an already shared provider.
    pub fn with_shared_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> Config {
        Config {
            providers: self.providers,
        }
    }
}

fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (k, v) in overlay {
                let merged = match base.remove(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => v,
                };
                base.insert(k, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Layered configuration. Read-only once built.
#[derive(Debug, Clone)]
pub struct Config {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Objects are merged key by key across providers; any other value
    /// from a later provider replaces the earlier one.
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        let mut merged: Option<Value> = None;
        for provider in self.providers.iter().filter(|p| p.has(key)) {
            if let Some(value) = provider.get_raw(key)? {
                merged = Some(match merged {
                    Some(base) => merge_values(base, value),
                    None => value,
                });
            }
        }
        Ok(merged)
    }

    /// Whether any provider knows `key`.
    pub fn has(&self, key: &str) -> bool {
        self.providers.iter().any(|p| p.has(key))
    }

    /// Get a configuration value by key from the highest-priority provider that has it.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                ConfigError::ParseError(format!("failed to deserialize '{key}': {e}"))
            }),
            None => Ok(None),
        }
    }

    /// Get a configuration value by key with a default fallback value.
    pub fn get_or_default<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, ConfigError> {
        match self.get(key)? {
            Some(value) => Ok(value),
            None => Ok(default),
        }
    }
}
