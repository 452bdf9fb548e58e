// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::config::{Config, ConfigError, ConfigProvider, ProxySettings, ServerUrlConfig};
use serde_json::{Value, json};

#[derive(Debug)]
struct MockConfigProvider {
    values: serde_json::Map<String, Value>,
    name: String,
}

impl MockConfigProvider {
    fn new(name: &str) -> Self {
        let mut values = serde_json::Map::new();
        values.insert("server.port".to_string(), json!(8080));
        values.insert("proxy.timeout".to_string(), json!(30));
        Self {
            values,
            name: name.to_string(),
        }
    }
}

impl ConfigProvider for MockConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn provider_name(&self) -> &str {
        &self.name
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.values.get(key).cloned())
    }
}

#[test]
fn test_later_provider_wins() {
    let base = MockConfigProvider::new("base");
    let mut overrides = MockConfigProvider::new("overrides");
    overrides
        .values
        .insert("proxy.timeout".to_string(), json!(5));

    let config = Config::builder()
        .with_provider(base)
        .with_provider(overrides)
        .build();

    assert_eq!(config.get::<u64>("proxy.timeout").unwrap(), Some(5));
    assert_eq!(config.get::<u16>("server.port").unwrap(), Some(8080));
}

#[test]
fn test_get_or_default_and_has() {
    let config = Config::builder()
        .with_provider(MockConfigProvider::new("test"))
        .build();

    assert!(config.has("server.port"));
    assert!(!config.has("proxy.server_urls"));
    assert_eq!(config.get_or_default("proxy.path", "/fallback".to_string()).unwrap(), "/fallback");
}

#[test]
fn test_type_mismatch_is_parse_error() {
    let config = Config::builder()
        .with_provider(MockConfigProvider::new("test"))
        .build();

    let err = config.get::<Vec<ServerUrlConfig>>("server.port").unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
}

#[test]
fn test_proxy_section_deserializes_from_provider() {
    let mut provider = MockConfigProvider::new("test");
    provider.values.insert(
        "proxy".to_string(),
        json!({ "path": "/p", "allowed_referrers": ["https://a.example.com"] }),
    );

    let config = Config::builder().with_provider(provider).build();
    let settings: ProxySettings = config.get("proxy").unwrap().unwrap();

    assert_eq!(settings.path, "/p");
    assert_eq!(settings.timeout, 30);
}

#[test]
fn test_sections_merge_across_providers() {
    let mut file = MockConfigProvider::new("file");
    file.values.insert(
        "server".to_string(),
        json!({ "host": "0.0.0.0", "port": 8080 }),
    );
    let mut env = MockConfigProvider::new("env");
    env.values.insert("server".to_string(), json!({ "port": 9443 }));

    let config = Config::builder().with_provider(file).with_provider(env).build();

    assert_eq!(
        config.get::<Value>("server").unwrap().unwrap(),
        json!({ "host": "0.0.0.0", "port": 9443 })
    );
}
