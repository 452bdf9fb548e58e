// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging setup for the proxy.
//!
//! Every module logs through the `log` facade using the `*_fmt!` context
//! macros from [`wrapper`].  The backend is `env_logger` unless
//! `proxy.logging.structured` is set, in which case records are bridged into
//! a global `slog` logger (terminal or JSON).

pub mod config;
pub mod structured;
pub mod wrapper;

#[cfg(test)]
pub mod test_logger;


pub use config::LoggingConfig;

use log::LevelFilter;
use once_cell::sync::OnceCell;
use std::sync::Once;

static INIT: Once = Once::new();

static GLOBAL_GUARD: OnceCell<structured::LoggerGuard> = OnceCell::new();

/// Parse a level name as used in configuration files.  Unknown names fall
/// back to `info`.
pub fn level_from_str(level: &str) -> LevelFilter {
    match level.trim().to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" | "critical" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Initialize the `env_logger` backend.  Only the first call has an effect.
/// `RUST_LOG` still overrides `level`.
pub fn init(level: Option<LevelFilter>) {
    INIT.call_once(|| {
        let default = level.unwrap_or(LevelFilter::Info).to_string().to_lowercase();
        let env = env_logger::Env::default().filter_or("RUST_LOG", default);

        let _ = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_target(true)
            .try_init();

        log::info!("Logging initialized at level: {}", log::max_level());
    });
}

/// Initialize logging from a [`LoggingConfig`].
///
/// A disabled configuration turns the facade off entirely.  Structured
/// configurations install the slog bridge, all others fall through to
/// [`init`].
pub fn init_with_config(level: LevelFilter, config: &LoggingConfig) {
    let level = if config.enabled { level } else { LevelFilter::Off };

    if !config.structured {
        init(Some(level));
    } else {
        init_structured(level, config);
    }

    if !config.enabled {
        log::set_max_level(LevelFilter::Off);
    }
}

fn init_structured(level: LevelFilter, config: &LoggingConfig) {
    INIT.call_once(|| {
        let logger_config = config.to_logger_config();
        let guard = structured::init_global_logger(&logger_config);
        let _ = GLOBAL_GUARD.set(guard);

        match slog_stdlog::init_with_level(to_log_level(level)) {
            Ok(()) => {
                log::set_max_level(level);
                log::info!("Structured logging initialized at level: {}", level);
            }
            Err(e) => eprintln!("structured logging unavailable: {e}"),
        }
    });
}

fn to_log_level(level: LevelFilter) -> log::Level {
    level.to_level().unwrap_or(log::Level::Error)
}
