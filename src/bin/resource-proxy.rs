// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stand-alone resource proxy.
//!
//! Reads `RESOURCE_PROXY_CONFIG_FILE`, falling back to
//! `/etc/resource-proxy/config.toml`, layered under `RESOURCE_PROXY_*`
//! environment variables.

use std::env;
use std::error::Error;
use std::path::Path;

use resource_proxy::{ResourceProxy, error_fmt, info_fmt};

const DEFAULT_CONFIG_FILE: &str = "/etc/resource-proxy/config.toml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let path = match env::var("RESOURCE_PROXY_CONFIG_FILE") {
        Ok(path) => path,
        Err(_) => {
            if !Path::new(DEFAULT_CONFIG_FILE).exists() {
                eprintln!(
                    "No RESOURCE_PROXY_CONFIG_FILE set and {DEFAULT_CONFIG_FILE} does not exist."
                );
                return Err(Box::from("No configuration file found."));
            }
            DEFAULT_CONFIG_FILE.to_string()
        }
    };

    let proxy = match ResourceProxy::loader()
        .with_config_file(&path)
        .with_env_vars()
        .build()
        .await
    {
        Ok(proxy) => proxy,
        Err(e) => {
            eprintln!("Failed to build proxy from {path}: {e}");
            return Err(e.into());
        }
    };
    info_fmt!("Startup", "Configuration loaded from {}", path);

    if let Err(e) = proxy.start().await {
        error_fmt!("Startup", "Proxy server failed: {}", e);
        return Err(e.into());
    }

    info_fmt!("Startup", "Proxy server stopped gracefully");
    Ok(())
}
