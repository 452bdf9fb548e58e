// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Environment variable-based configuration provider.
//!
//! `RESOURCE_PROXY_PROXY__ALLOWED_REFERRERS='["https://app.example.com"]'`
//! maps to the key `proxy.allowed_referrers`: the prefix is stripped, the
//! remainder is lower-cased and `__` separates nesting levels so single
//! underscores survive inside snake_case keys.

use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::env;

use super::ConfigError;
use super::ConfigProvider;

pub const DEFAULT_ENV_PREFIX: &str = "RESOURCE_PROXY_";

/// Configuration provider that retrieves values from environment variables.
#[derive(Debug)]
pub struct EnvConfigProvider {
    prefix: String,
    cache: HashMap<String, String>,
}

impl EnvConfigProvider {
    /// Create a provider reading every variable that starts with `prefix`.
    pub fn new(prefix: &str) -> Self {
        let mut provider = Self {
            prefix: prefix.to_string(),
            cache: HashMap::new(),
        };
        provider.refresh_cache();
        provider
    }

    /// Re-read the process environment.
    pub fn refresh_cache(&mut self) {
        self.cache.clear();

        for (key, value) in env::vars() {
            if let Some(rest) = key.strip_prefix(&self.prefix) {
                let config_key = rest.to_lowercase().replace("__", ".");
                self.cache.insert(config_key, value);
            }
        }
    }

    /// Values are JSON when they parse as JSON, otherwise plain strings.
    fn parse_value_to_json(&self, value: &str) -> Result<Value, ConfigError> {
        if let Ok(json_value) = serde_json::from_str(value) {
            return Ok(json_value);
        }

        if value.eq_ignore_ascii_case("true") {
            return Ok(json!(true));
        } else if value.eq_ignore_ascii_case("false") {
            return Ok(json!(false));
        }

        Ok(json!(value))
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_PREFIX)
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.cache.contains_key(key) || self.nested_keys(key).next().is_some()
    }

    fn provider_name(&self) -> &str {
        "env"
    }

    /// A leaf variable wins; otherwise nested variables are assembled into
    /// an object so `proxy` sees `RESOURCE_PROXY_PROXY__TIMEOUT`.
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        if let Some(value) = self.cache.get(key) {
            return self.parse_value_to_json(value).map(Some);
        }

        let mut root = Map::new();
        for (rest, value) in self.nested_keys(key) {
            let value = self.parse_value_to_json(value)?;
            insert_path(&mut root, rest, value);
        }

        Ok((!root.is_empty()).then_some(Value::Object(root)))
    }
}

impl EnvConfigProvider {
    /// `(remaining path, raw value)` for every variable below `key`.
    fn nested_keys<'a>(&'a self, key: &'a str) -> impl Iterator<Item = (&'a str, &'a String)> + 'a {
        self.cache.iter().filter_map(move |(k, v)| {
            k.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('.'))
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest, v))
        })
    }
}

fn insert_path(object: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            object.insert(path.to_string(), value);
        }
        Some((head, tail)) => {
            let child = object
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                insert_path(child, tail, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigProviderExt;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_double_underscore_nesting_keeps_snake_case() {
        unsafe {
            env::set_var("RPTEST_PROXY__TIMEOUT", "10");
            env::set_var(
                "RPTEST_PROXY__ALLOWED_REFERRERS",
                r#"["https://app.example.com"]"#,
            );
        }

        let provider = EnvConfigProvider::new("RPTEST_");

        let timeout: u64 = provider.get("proxy.timeout").unwrap().unwrap();
        assert_eq!(timeout, 10);

        let referrers: Vec<String> = provider.get("proxy.allowed_referrers").unwrap().unwrap();
        assert_eq!(referrers, vec!["https://app.example.com".to_string()]);

        unsafe {
            env::remove_var("RPTEST_PROXY__TIMEOUT");
            env::remove_var("RPTEST_PROXY__ALLOWED_REFERRERS");
        }
    }

    #[test]
    #[serial]
    fn test_cache_refresh() {
        let mut provider = EnvConfigProvider::new("RPREFRESH_");
        assert!(!provider.has("value"));

        unsafe {
            env::set_var("RPREFRESH_VALUE", "42");
        }

        assert!(!provider.has("value"));
        provider.refresh_cache();

        let value: i32 = provider.get("value").unwrap().unwrap();
        assert_eq!(value, 42);

        unsafe {
            env::remove_var("RPREFRESH_VALUE");
        }
    }

    #[test]
    #[serial]
    fn test_non_json_values_are_strings() {
        unsafe {
            env::set_var("RPSTR_PROXY__PATH", "/proxy/proxy.ashx");
            env::set_var("RPSTR_FLAG", "TRUE");
        }

        let provider = EnvConfigProvider::new("RPSTR_");

        let path: String = provider.get("proxy.path").unwrap().unwrap();
        assert_eq!(path, "/proxy/proxy.ashx");
        let flag: bool = provider.get("flag").unwrap().unwrap();
        assert!(flag);
        assert_eq!(provider.provider_name(), "env");

        unsafe {
            env::remove_var("RPSTR_PROXY__PATH");
            env::remove_var("RPSTR_FLAG");
        }
    }

    #[test]
    #[serial]
    fn test_section_is_assembled_from_nested_variables() {
        unsafe {
            env::set_var("RPNEST_PROXY__TIMEOUT", "12");
            env::set_var("RPNEST_PROXY__LOGGING__LEVEL", "debug");
        }

        let provider = EnvConfigProvider::new("RPNEST_");

        assert!(provider.has("proxy"));
        assert!(provider.has("proxy.logging"));
        assert!(!provider.has("server"));
        assert_eq!(
            provider.get_raw("proxy").unwrap().unwrap(),
            json!({ "timeout": 12, "logging": { "level": "debug" } })
        );

        unsafe {
            env::remove_var("RPNEST_PROXY__TIMEOUT");
            env::remove_var("RPNEST_PROXY__LOGGING__LEVEL");
        }
    }
}
