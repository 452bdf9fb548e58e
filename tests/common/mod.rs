// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared helpers for the integration tests.

#![allow(dead_code)]

use resource_proxy::config::{ConfigError, ConfigProvider};
use resource_proxy::{ProxyLoader, ResourceProxy};
use serde_json::Value;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Serves a nested JSON document with dotted-key lookup.
#[derive(Debug, Clone)]
pub struct TestConfigProvider {
    root: Value,
}

impl TestConfigProvider {
    pub fn from_json(root: Value) -> Self {
        Self { root }
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        key.split('.')
            .try_fold(&self.root, |current, part| current.get(part))
    }
}

impl ConfigProvider for TestConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    fn provider_name(&self) -> &str {
        "test"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.lookup(key).cloned())
    }
}

/// A proxy serving on an ephemeral port.  Dropping it stops the server.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub proxy: ResourceProxy,
    _stop: oneshot::Sender<()>,
}

impl RunningProxy {
    pub fn endpoint(&self, target: &str) -> String {
        format!("http://{}/proxy/proxy.ashx?{}", self.addr, target)
    }
}

pub async fn start_proxy(config: Value) -> RunningProxy {
    start_with_loader(ProxyLoader::new().with_provider(TestConfigProvider::from_json(config))).await
}

pub async fn start_with_loader(loader: ProxyLoader) -> RunningProxy {
    let proxy = loader.build().await.expect("proxy should build");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();

    let server = proxy.server().clone();
    tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = stopped.await;
            })
            .await
    });

    RunningProxy {
        addr,
        proxy,
        _stop: stop,
    }
}
