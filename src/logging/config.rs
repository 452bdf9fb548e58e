// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `proxy.logging` configuration section.

use crate::logging::structured::{LogFormat, LoggerConfig};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `false` silences the proxy completely
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Route records through slog instead of env_logger
    #[serde(default)]
    pub structured: bool,

    /// `terminal` or `json`; structured logging only
    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_true")]
    pub include_location: bool,

    #[serde(default = "default_true")]
    pub include_thread_id: bool,

    /// Key/value pairs attached to every structured record
    #[serde(default)]
    pub static_fields: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_format() -> String {
    "terminal".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            structured: false,
            format: default_format(),
            level: default_level(),
            include_location: true,
            include_thread_id: true,
            static_fields: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    /// The effective level filter, `Off` when disabled.
    pub fn level_filter(&self) -> LevelFilter {
        if self.enabled {
            crate::logging::level_from_str(&self.level)
        } else {
            LevelFilter::Off
        }
    }

    pub fn to_logger_config(&self) -> LoggerConfig {
        let mut static_fields: Vec<(String, String)> = self
            .static_fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        static_fields.sort();

        LoggerConfig {
            format: match self.format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Terminal,
            },
            level: match self.level.to_lowercase().as_str() {
                "trace" => slog::Level::Trace,
                "debug" => slog::Level::Debug,
                "warn" | "warning" => slog::Level::Warning,
                "error" => slog::Level::Error,
                "critical" => slog::Level::Critical,
                _ => slog::Level::Info,
            },
            include_location: self.include_location,
            include_thread_id: self.include_thread_id,
            static_fields,
        }
    }
}
