// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-level entry-point.
//!
//! [`ProxyLoader`] reads configuration, initializes logging, resolves the
//! target-server rules and wires the dispatcher, token cache and transport
//! into a [`ResourceProxy`] ready to [`start`](ResourceProxy::start).


use std::env;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{
    Config, ConfigError, ConfigProvider, EnvConfigProvider, FileConfigProvider, ProxySettings,
    ServerUrlConfig,
};
use crate::core::{ClientPool, ConfigCredentialProvider, CredentialProvider, ProxyCore, ProxyError};
use crate::logging::{self, LoggingConfig};
use crate::rules::RuleSet;
use crate::security::ReferrerGuard;
use crate::server::{ProxyServer, ServerConfig};
use crate::token::{HttpTokenAcquirer, TokenAcquirer, TokenCache};
use crate::{info_fmt, warn_fmt};

/// Errors that can occur while assembling the proxy.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("proxy error: {0}")]
    ProxyError(#[from] ProxyError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Builder for a [`ResourceProxy`].
///
/// Provider order, lowest precedence first: configuration file, environment,
/// then providers added with [`with_provider`](Self::with_provider).  A
/// complete [`Config`] passed to [`with_config`](Self::with_config) replaces
/// all of them.
#[derive(Debug, Default)]
pub struct ProxyLoader {
    config: Option<Config>,
    config_file_path: Option<String>,
    use_env_vars: bool,
    env_prefix: Option<String>,
    providers: Vec<Arc<dyn ConfigProvider>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    acquirer: Option<Arc<dyn TokenAcquirer>>,
}

impl ProxyLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a ready-made configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Load a JSON, TOML or YAML configuration file.
    pub fn with_config_file(mut self, file_path: &str) -> Self {
        self.config_file_path = Some(file_path.to_string());
        self
    }

    /// Read `RESOURCE_PROXY_*` environment variables.
    pub fn with_env_vars(mut self) -> Self {
        self.use_env_vars = true;
        self
    }

    /// Read environment variables with a custom prefix.
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.use_env_vars = true;
        self
    }

    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Source user-login credentials from somewhere other than the rule
    /// configuration, e.g. a secret store.
    pub fn with_credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Replace the HTTP token exchange.
    pub fn with_acquirer(mut self, acquirer: Arc<dyn TokenAcquirer>) -> Self {
        self.acquirer = Some(acquirer);
        self
    }

    fn build_config(&mut self) -> Result<Config, LoaderError> {
        if let Some(config) = self.config.take() {
            return Ok(config);
        }

        let mut builder = Config::builder();
        if let Some(file_path) = &self.config_file_path {
            builder = builder.with_provider(FileConfigProvider::new(file_path)?);
        }
        if self.use_env_vars {
            builder = match &self.env_prefix {
                Some(prefix) => builder.with_provider(EnvConfigProvider::new(prefix)),
                None => builder.with_provider(EnvConfigProvider::default()),
            };
        }
        for provider in self.providers.drain(..) {
            builder = builder.with_shared_provider(provider);
        }

        Ok(builder.build())
    }

    pub async fn build(mut self) -> Result<ResourceProxy, LoaderError> {
        let config = Arc::new(self.build_config()?);

        init_logging(&config);
        info_fmt!("Startup", "Resource proxy starting up");

        let settings: ProxySettings = config.get_or_default("proxy", ProxySettings::default())?;

        let rules = match config.get::<Vec<ServerUrlConfig>>("proxy.server_urls")? {
            Some(entries) => {
                let rules = RuleSet::from_configs(entries)?;
                info_fmt!("Startup", "Loaded {} target server rule(s)", rules.rules().len());
                rules
            }
            None => {
                warn_fmt!("Startup", "No proxy.server_urls configured; every request is a passthrough");
                RuleSet::unconfigured()
            }
        };
        let rules = Arc::new(rules);

        let guard = ReferrerGuard::new(&settings.allowed_referrers);
        if settings.allowed_referrers.is_empty() {
            warn_fmt!("Startup", "No allowed_referrers configured; any referrer may use the proxy");
        }

        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(ConfigCredentialProvider) as Arc<dyn CredentialProvider>);
        let clients = Arc::new(ClientPool::new(
            &rules,
            credentials.as_ref(),
            Duration::from_secs(settings.timeout),
        )?);

        let acquirer = self
            .acquirer
            .unwrap_or_else(|| {
                Arc::new(HttpTokenAcquirer::new(Arc::clone(&clients))) as Arc<dyn TokenAcquirer>
            });
        let tokens = Arc::new(TokenCache::new(acquirer));

        let core = Arc::new(ProxyCore::new(rules, guard, tokens, clients));

        let server_config: ServerConfig = config.get_or_default("server", ServerConfig::default())?;
        let server = ProxyServer::new(server_config, settings.path, Arc::clone(&core));

        Ok(ResourceProxy {
            config,
            core,
            server,
        })
    }
}

/// `RUST_LOG_LEVEL` overrides the configured level.
fn init_logging(config: &Config) {
    let logging_config = match config.get::<LoggingConfig>("proxy.logging") {
        Ok(Some(cfg)) => cfg,
        Ok(None) => LoggingConfig::default(),
        Err(e) => {
            eprintln!("Invalid proxy.logging section, using defaults: {e}");
            LoggingConfig::default()
        }
    };

    let level = env::var("RUST_LOG_LEVEL")
        .ok()
        .map(|l| logging::level_from_str(&l))
        .unwrap_or_else(|| logging_config.level_filter());

    logging::init_with_config(level, &logging_config);
}

/// An assembled proxy.
#[derive(Debug, Clone)]
pub struct ResourceProxy {
    config: Arc<Config>,
    core: Arc<ProxyCore>,
    server: ProxyServer,
}

impl ResourceProxy {
    pub fn loader() -> ProxyLoader {
        ProxyLoader::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn core(&self) -> &Arc<ProxyCore> {
        &self.core
    }

    pub fn server(&self) -> &ProxyServer {
        &self.server
    }

    /// Serve until Ctrl-C or SIGTERM.
    pub async fn start(&self) -> Result<(), LoaderError> {
        self.server.start().await.map_err(LoaderError::ProxyError)
    }
}
