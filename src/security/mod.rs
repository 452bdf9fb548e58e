// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Admission control.
//!
//! The proxy only serves callers whose `referer` header starts with one of
//! the configured `proxy.allowed_referrers` prefixes.  An empty list, or a
//! list containing `*`, admits everyone.


use crate::trace_fmt;

const ANY_REFERRER: &str = "*";

/// Referrer allow-list check.
#[derive(Debug, Clone)]
pub struct ReferrerGuard {
    allowed: Vec<String>,
    open: bool,
}

impl ReferrerGuard {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed: Vec<String> = allowed
            .into_iter()
            .map(|s| s.as_ref().trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        let open = allowed.is_empty() || allowed.iter().any(|s| s == ANY_REFERRER);

        Self { allowed, open }
    }

    /// A guard that admits every request.
    pub fn open() -> Self {
        Self {
            allowed: Vec::new(),
            open: true,
        }
    }

    /// Case-insensitive prefix match of `referrer` against the allow-list.
    /// A missing referrer only passes an open guard.
    pub fn is_allowed(&self, referrer: Option<&str>) -> bool {
        if self.open {
            return true;
        }

        let Some(referrer) = referrer.map(str::trim).filter(|r| !r.is_empty()) else {
            trace_fmt!("ReferrerGuard", "Rejecting request without referrer");
            return false;
        };

        let allowed = self.allowed.iter().any(|prefix| {
            referrer
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        });

        trace_fmt!("ReferrerGuard", "Referrer {} allowed={}", referrer, allowed);
        allowed
    }
}
