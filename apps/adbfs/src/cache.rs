// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide the time-boxed per-path caches used by adbfs.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::stat::RemoteAttr;

/// Time source abstraction used for cache freshness.
pub trait Clock: Send + Sync {
    /// Return the current instant.
    fn now(&self) -> Instant;
}

/// System clock implementation backed by `Instant::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock (primarily for tests).
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("manual clock lock");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().expect("manual clock lock")
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    fetched: Instant,
}

/// Path-keyed cache whose entries go stale `ttl` after they were fetched.
///
/// Entries are replaced wholesale and never evicted; the map grows with the
/// number of distinct paths observed.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    ttl: Duration,
}

/// Attribute records keyed by remote path.
pub type AttrCache = TtlCache<Arc<RemoteAttr>>;
/// Directory listings keyed by remote path, in remote order.
pub type DirCache = TtlCache<Arc<[String]>>;

impl<V: Clone> TtlCache<V> {
    /// Create an empty cache with the supplied freshness window.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Return the freshness window.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the value for `path` if it was fetched less than `ttl` before `now`.
    #[must_use]
    pub fn fresh(&self, path: &str, now: Instant) -> Option<V> {
        let entry = self.entries.get(path)?;
        if now.saturating_duration_since(entry.fetched) < self.ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Return the value for `path` regardless of its age.
    #[must_use]
    pub fn peek(&self, path: &str) -> Option<V> {
        self.entries.get(path).map(|entry| entry.value.clone())
    }

    /// Store `value` for `path`, replacing any previous entry.
    pub fn insert(&mut self, path: &str, value: V, fetched: Instant) {
        self.entries
            .insert(path.to_owned(), CacheEntry { value, fetched });
    }

    /// Return when the entry for `path` was fetched.
    #[must_use]
    pub fn fetched_at(&self, path: &str) -> Option<Instant> {
        self.entries.get(path).map(|entry| entry.fetched)
    }

    /// Number of cached paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
