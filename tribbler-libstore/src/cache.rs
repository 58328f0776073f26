// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of tribbler.
//
// tribbler is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// tribbler is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with tribbler.  If not,
// see <http://www.gnu.org/licenses/>.

//! # cache
//!
//! The libstore's local state: the lease-governed value cache and the per-key query window.
//!
//! The cache holds whatever the storage tier granted a lease on -- a scalar or a list, one entry
//! per key, both namespaces searched by a single lookup. Entries are replaced whole, never
//! mutated, so a reader either sees the previous value or the new one. Expiry is enforced
//! lazily: a lookup that finds a stale entry removes it on the way out, and there is no size
//! bound -- every entry dies within [LEASE_SECONDS](tribbler_shared::rpc::LEASE_SECONDS) of its
//! insertion, which caps the cache at "keys this process read in the last few seconds".
//!
//! The query window answers one question: has this key been read often enough, recently enough,
//! that a lease is worth the storage tier's bookkeeping? It is a rolling log of read instants,
//! pruned to [QUERY_CACHE_SECONDS] on every note.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};

use tribbler_shared::rpc::QUERY_CACHE_SECONDS;

/// A cached value: the two storage namespaces, locally
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Cached {
    Scalar(String),
    List(Vec<String>),
}

#[derive(Debug)]
struct Entry {
    value: Cached,
    expires_at: Instant,
}

/// Values this libstore holds valid leases on
#[derive(Default, Debug)]
pub struct LeaseCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl LeaseCache {
    pub fn new() -> LeaseCache {
        LeaseCache::default()
    }

    /// A non-expired entry for `key`, whichever namespace it lives in; expired entries are
    /// evicted on the way through
    pub fn lookup(&self, key: &str) -> Option<Cached> {
        let mut entries = self.entries.lock().expect("poisoned lease cache");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert (or atomically replace) the entry for `key`, valid for `valid_for` from now
    pub fn insert(&self, key: &str, value: Cached, valid_for: Duration) {
        self.entries
            .lock()
            .expect("poisoned lease cache")
            .insert(
                key.to_owned(),
                Entry {
                    value,
                    expires_at: Instant::now() + valid_for,
                },
            );
    }

    /// Drop the entry for `key`; true if there was one
    pub fn evict(&self, key: &str) -> bool {
        self.entries
            .lock()
            .expect("poisoned lease cache")
            .remove(key)
            .is_some()
    }
}

/// Rolling per-key log of recent read instants
#[derive(Default, Debug)]
pub struct QueryWindow {
    reads: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl QueryWindow {
    pub fn new() -> QueryWindow {
        QueryWindow::default()
    }

    /// Record a read of `key` at `now`; return how many reads fall within the window, this one
    /// included
    pub fn note(&self, key: &str, now: Instant) -> usize {
        let mut reads = self.reads.lock().expect("poisoned query window");
        let window = reads.entry(key.to_owned()).or_default();
        window.push_back(now);
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t).as_secs() >= QUERY_CACHE_SECONDS)
        {
            window.pop_front();
        }
        window.len()
    }
}
