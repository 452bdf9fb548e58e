// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Token cache and expiry handling.
//!
//! A [`TokenCache`] maps a rule URL to the last token obtained for it.  An
//! entry is served until its expiry instant and treated as absent from then
//! on (lazy expiry, no background sweep).  Refreshes replace the entry as a
//! whole, and a per-key async mutex guarantees at most one acquisition in
//! flight per rule; concurrent callers wait and reuse its result.
//!
//! Two payload shapes exist and the endpoint that produced a payload decides
//! how it is read:
//!
//! | endpoint | token field    | expiry field   | expiry meaning                  |
//! |----------|----------------|----------------|---------------------------------|
//! | OAuth2   | `access_token` | `expires_in`   | seconds from the request time   |
//! | Vendor   | `token`        | `expires`      | milliseconds since Unix epoch   |

pub mod acquirer;


pub use acquirer::{HttpTokenAcquirer, TokenAcquirer, token_form_data};

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Deserializer};
use tokio::sync::Mutex;

use crate::core::ProxyError;
use crate::rules::{TargetServerRule, TokenEndpoint};
use crate::{debug_fmt, trace_fmt, warn_fmt};

/// Source of "now" for expiry decisions.
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// An immutable cache entry.
#[derive(Clone)]
pub struct CachedToken {
    /// Raw provider response.
    pub payload: String,
    /// Bearer token extracted from `payload`.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct OAuth2Payload {
    access_token: String,
    #[serde(deserialize_with = "number_or_string")]
    expires_in: f64,
}

#[derive(Deserialize)]
struct VendorPayload {
    token: String,
    #[serde(deserialize_with = "number_or_string")]
    expires: f64,
}

/// Some token servers quote their numbers (`"expires_in":"3600"`).
#[derive(Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Numeric::deserialize(deserializer)? {
        Numeric::Number(value) => Ok(value),
        Numeric::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// A token and its absolute expiry, decoded from a raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Decode `raw` according to the endpoint that produced it.
///
/// `requested_at` is the instant the token request was sent; it only matters
/// for OAuth2 payloads, whose lifetime is relative.
pub fn decode_payload(
    endpoint: &TokenEndpoint,
    raw: &str,
    requested_at: DateTime<Utc>,
) -> Result<DecodedToken, ProxyError> {
    match endpoint {
        TokenEndpoint::OAuth2(_) => {
            let payload: OAuth2Payload = serde_json::from_str(raw)
                .map_err(|e| ProxyError::TokenPayload(format!("OAuth2 response: {e}")))?;
            let lifetime = (payload.expires_in.is_finite() && payload.expires_in >= 0.0)
                .then(|| TimeDelta::try_milliseconds((payload.expires_in * 1000.0).round() as i64))
                .flatten()
                .ok_or_else(|| {
                    ProxyError::TokenPayload(format!("invalid expires_in {}", payload.expires_in))
                })?;
            let expires_at = requested_at.checked_add_signed(lifetime).ok_or_else(|| {
                ProxyError::TokenPayload("expires_in overflows the calendar".to_string())
            })?;

            Ok(DecodedToken {
                token: payload.access_token,
                expires_at,
            })
        }
        TokenEndpoint::Vendor(_) => {
            let payload: VendorPayload = serde_json::from_str(raw)
                .map_err(|e| ProxyError::TokenPayload(format!("token response: {e}")))?;
            // Absolute instant: 1970-01-01T00:00:00Z plus the declared milliseconds.
            let expires_at = payload
                .expires
                .is_finite()
                .then(|| DateTime::from_timestamp_millis(payload.expires.round() as i64))
                .flatten()
                .ok_or_else(|| {
                    ProxyError::TokenPayload(format!("invalid expires {}", payload.expires))
                })?;

            Ok(DecodedToken {
                token: payload.token,
                expires_at,
            })
        }
    }
}

/// Shared, per-rule token cache.  Construct one per proxy and pass it to the
/// dispatcher.
pub struct TokenCache {
    acquirer: Arc<dyn TokenAcquirer>,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, Arc<CachedToken>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("acquirer", &self.acquirer)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl TokenCache {
    pub fn new(acquirer: Arc<dyn TokenAcquirer>) -> Self {
        Self::with_clock(acquirer, Arc::new(SystemClock))
    }

    pub fn with_clock(acquirer: Arc<dyn TokenAcquirer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            acquirer,
            clock,
            entries: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// The entry for `key` if it is still valid.  Expired entries are
    /// evicted on the way.
    pub fn lookup(&self, key: &str) -> Option<Arc<CachedToken>> {
        let now = self.clock.now();
        let entry = self.entries.get(key).map(|e| Arc::clone(e.value()))?;
        if entry.is_valid_at(now) {
            return Some(entry);
        }

        trace_fmt!("TokenCache", "Token for {} expired at {}", key, entry.expires_at);
        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, &entry));
        None
    }

    /// Drop the entry for `key`, forcing the next request to re-acquire.
    pub fn invalidate(&self, key: &str) {
        if self.entries.remove(key).is_some() {
            debug_fmt!("TokenCache", "Invalidated token for {}", key);
        }
    }

    /// Number of stored entries, expired ones included until next touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Bearer token for `rule`, from cache or freshly acquired.
    ///
    /// With `force_refresh` a valid cached entry is ignored, unless another
    /// caller replaced it while this one waited for the key lock.  A failed
    /// acquisition leaves the cache exactly as it was.
    pub async fn get_token(
        &self,
        rule: &TargetServerRule,
        referrer: Option<&str>,
        force_refresh: bool,
    ) -> Result<String, ProxyError> {
        let key = rule.url.as_str();
        let seen = self.lookup(key);

        if !force_refresh {
            if let Some(entry) = &seen {
                trace_fmt!("TokenCache", "Cache hit for {}", key);
                return Ok(entry.token.clone());
            }
        }

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        if let Some(current) = self.lookup(key) {
            let replaced = seen.as_ref().is_none_or(|s| !Arc::ptr_eq(s, &current));
            if !force_refresh || replaced {
                trace_fmt!("TokenCache", "Token for {} refreshed by a concurrent request", key);
                return Ok(current.token.clone());
            }
        }

        let endpoint = rule.token_endpoint().ok_or_else(|| {
            ProxyError::ConfigError(format!(
                "{} requires a token but has neither an oauth2_endpoint nor a token_url",
                rule.url
            ))
        })?;

        debug_fmt!("TokenCache", "No valid token for {}; requesting a new one", key);
        let requested_at = self.clock.now();
        let raw = self.acquirer.acquire(rule, referrer).await?;
        let decoded = decode_payload(endpoint, &raw, requested_at)?;

        if decoded.expires_at <= self.clock.now() {
            warn_fmt!(
                "TokenCache",
                "Token for {} expired on arrival ({}); using it once without caching",
                key,
                decoded.expires_at
            );
            return Ok(decoded.token);
        }

        debug_fmt!("TokenCache", "Caching token for {} until {}", key, decoded.expires_at);
        self.entries.insert(
            key.to_string(),
            Arc::new(CachedToken {
                payload: raw,
                token: decoded.token.clone(),
                expires_at: decoded.expires_at,
            }),
        );

        Ok(decoded.token)
    }
}
