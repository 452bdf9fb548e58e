// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! slog backend and per-request log context.

use slog::{Drain, FnValue, Logger, o};
use slog_async::Async;
use slog_json::Json;
use slog_term::{FullFormat, TermDecorator};
use std::io;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Terminal,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LogFormat,
    pub level: slog::Level,
    pub include_location: bool,
    pub include_thread_id: bool,
    /// Attached to every record, in this order.
    pub static_fields: Vec<(String, String)>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Terminal,
            level: slog::Level::Info,
            include_location: true,
            include_thread_id: true,
            static_fields: Vec::new(),
        }
    }
}

/// Build a root logger for `config`.
pub fn create_logger(config: &LoggerConfig) -> Logger {
    let root = match config.format {
        LogFormat::Terminal => {
            let decorator = TermDecorator::new().build();
            let drain = FullFormat::new(decorator).build().fuse();
            let drain = drain.filter_level(config.level).fuse();
            Logger::root(Async::new(drain).build().fuse(), o!())
        }
        LogFormat::Json => {
            let drain = Json::new(io::stdout()).add_default_keys().build().fuse();
            let drain = drain.filter_level(config.level).fuse();
            Logger::root(Async::new(drain).build().fuse(), o!())
        }
    };

    let mut logger = root;
    if config.include_location {
        logger = logger.new(o!("location" => FnValue(|record: &slog::Record| {
            format!("{}:{}", record.file(), record.line())
        })));
    }
    if config.include_thread_id {
        logger = logger.new(o!("thread" => FnValue(|_: &slog::Record| {
            format!("{:?}", std::thread::current().id())
        })));
    }
    for (key, value) in &config.static_fields {
        // slog keys are 'static; static fields live for the whole process.
        let key: &'static str = Box::leak(key.clone().into_boxed_str());
        logger = logger.new(o!(key => value.clone()));
    }

    logger
}

/// Keeps the global slog logger installed while alive.
pub struct LoggerGuard {
    _guard: slog_scope::GlobalLoggerGuard,
}

pub fn init_global_logger(config: &LoggerConfig) -> LoggerGuard {
    let guard = slog_scope::set_global_logger(create_logger(config));
    LoggerGuard { _guard: guard }
}

/// Identity of one inbound request for log correlation.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub remote_addr: String,
    started: Instant,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, path: impl Into<String>, remote_addr: Option<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            method: method.into(),
            path: path.into(),
            remote_addr: remote_addr.unwrap_or_else(|| "unknown".to_string()),
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }
}
