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

//! # store
//!
//! The per-key value store and lease table.
//!
//! Each key moves between two states: `Quiescent` (reads may take leases) and `Revoking` (a
//! write is in flight; reads are still served from the committed value, but no new lease may be
//! granted). The transition is driven by [KeyStore::begin_write] / [WriteGuard::commit]:
//!
//! ```text
//!               begin_write: set Revoking, snapshot leases
//!   Quiescent ------------------------------------------------> Revoking
//!       ^                                                          |
//!       |   commit: clear leases, apply mutation, clear Revoking   |
//!       +----------------------------------------------------------+
//! ```
//!
//! The caller fans out `RevokeLease` to the snapshotted holders *between* those two calls,
//! without any lock held -- the only thing held across the fan-out is the key's write gate, an
//! async mutex whose entire purpose is to make concurrent writes to one key take turns. Reads
//! never touch the gate; they take the (brief, synchronous) state lock only.
//!
//! Scalar and list values share one namespace and are disjoint: a key holding one kind is, to
//! operations of the other kind, simply in the way (see the `apply_*` functions for the exact
//! statuses).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tribbler_shared::rpc::{Lease, StorageStatus, LEASE_GUARD_SECONDS, LEASE_SECONDS};

/// What a key holds: a single string, or an ordered set of unique strings
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Scalar(String),
    List(Vec<String>),
}

/// One outstanding lease on one key
#[derive(Clone, Debug)]
pub struct LeaseRecord {
    /// Address at which the holder serves `RevokeLease`
    pub holder: String,
    /// When the *client* stops trusting the lease
    pub expires_at: Instant,
}

impl LeaseRecord {
    /// When the *server* stops waiting on the holder: advertised expiry plus the guard window
    pub fn grace_deadline(&self) -> Instant {
        self.expires_at + Duration::from_secs(LEASE_GUARD_SECONDS)
    }
}

#[derive(Default)]
struct KeyState {
    value: Option<Value>,
    leases: Vec<LeaseRecord>,
    revoking: bool,
}

struct KeyEntry {
    /// Serializes writers to this key; held across the revocation fan-out
    gate: Arc<tokio::sync::Mutex<()>>,
    /// Everything else; never held across an await point
    state: Mutex<KeyState>,
}

impl KeyEntry {
    fn new() -> KeyEntry {
        KeyEntry {
            gate: Arc::new(tokio::sync::Mutex::new(())),
            state: Mutex::new(KeyState::default()),
        }
    }
}

/// The node's entire key space: a map of keys to their value/lease state
#[derive(Default)]
pub struct KeyStore {
    keys: Mutex<HashMap<String, Arc<KeyEntry>>>,
}

impl KeyStore {
    pub fn new() -> KeyStore {
        KeyStore::default()
    }

    fn lookup(&self, key: &str) -> Option<Arc<KeyEntry>> {
        self.keys
            .lock()
            .expect("poisoned key map")
            .get(key)
            .cloned()
    }

    fn entry(&self, key: &str) -> Arc<KeyEntry> {
        self.keys
            .lock()
            .expect("poisoned key map")
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(KeyEntry::new()))
            .clone()
    }

    /// Read a scalar, optionally taking a lease for `lease_holder`
    ///
    /// The read succeeds whether or not the lease is granted; `Revoking` only refuses the lease.
    pub fn get(&self, key: &str, lease_holder: Option<&str>) -> (StorageStatus, Option<String>, Lease) {
        let Some(entry) = self.lookup(key) else {
            return (StorageStatus::KeyNotFound, None, Lease::refused());
        };
        let mut state = entry.state.lock().expect("poisoned key state");
        let value = match &state.value {
            Some(Value::Scalar(value)) => value.clone(),
            _ => return (StorageStatus::KeyNotFound, None, Lease::refused()),
        };
        let lease = maybe_grant(&mut state, lease_holder);
        (StorageStatus::Ok, Some(value), lease)
    }

    /// Read a list, optionally taking a lease for `lease_holder`
    pub fn get_list(
        &self,
        key: &str,
        lease_holder: Option<&str>,
    ) -> (StorageStatus, Vec<String>, Lease) {
        let Some(entry) = self.lookup(key) else {
            return (StorageStatus::ItemNotFound, Vec::new(), Lease::refused());
        };
        let mut state = entry.state.lock().expect("poisoned key state");
        let items = match &state.value {
            Some(Value::List(items)) => items.clone(),
            _ => return (StorageStatus::ItemNotFound, Vec::new(), Lease::refused()),
        };
        let lease = maybe_grant(&mut state, lease_holder);
        (StorageStatus::Ok, items, lease)
    }

    /// Open the write gate on `key`: take the writer's turn, flag the key `Revoking`, and
    /// snapshot the leases the caller must now revoke
    ///
    /// From this call until [WriteGuard::commit], reads of `key` are served from the committed
    /// value and are refused leases. Waiting on the gate is exactly how a second concurrent
    /// write serializes behind the first.
    pub async fn begin_write(&self, key: &str) -> WriteGuard {
        let entry = self.entry(key);
        let gate = entry.gate.clone().lock_owned().await;
        let holders = {
            let mut state = entry.state.lock().expect("poisoned key state");
            state.revoking = true;
            let now = Instant::now();
            state.leases.retain(|lease| lease.grace_deadline() > now);
            state.leases.clone()
        };
        WriteGuard {
            entry,
            holders,
            _gate: gate,
        }
    }
}

/// Grant a lease iff a holder was named and the key is not mid-revocation
///
/// Expired records are pruned on the way through; a holder re-requesting its lease has its
/// existing record refreshed rather than duplicated, so the lease set stays one-per-holder.
fn maybe_grant(state: &mut KeyState, lease_holder: Option<&str>) -> Lease {
    let Some(holder) = lease_holder else {
        return Lease::refused();
    };
    if state.revoking {
        return Lease::refused();
    }
    let now = Instant::now();
    state.leases.retain(|lease| lease.grace_deadline() > now);
    let expires_at = now + Duration::from_secs(LEASE_SECONDS);
    match state.leases.iter_mut().find(|lease| lease.holder == holder) {
        Some(lease) => lease.expires_at = expires_at,
        None => state.leases.push(LeaseRecord {
            holder: holder.to_owned(),
            expires_at,
        }),
    }
    Lease::granted()
}

/// An open write on one key
///
/// Holds the key's write gate. [holders](WriteGuard::holders) names the leases to revoke;
/// [commit](WriteGuard::commit) applies the mutation and returns the key to `Quiescent`. If the
/// guard is dropped without committing (the serving task was cancelled mid-fan-out), the
/// `Revoking` flag is lifted so the key is not wedged -- the mutation simply never happened.
pub struct WriteGuard {
    entry: Arc<KeyEntry>,
    holders: Vec<LeaseRecord>,
    _gate: tokio::sync::OwnedMutexGuard<()>,
}

impl WriteGuard {
    /// The leases outstanding at the moment the gate opened
    pub fn holders(&self) -> &[LeaseRecord] {
        &self.holders
    }

    /// Clear the lease set, apply `apply` to the key's value, and leave `Revoking`
    ///
    /// Call only after every holder has acknowledged its revocation or aged past its grace
    /// deadline. The returned status is whatever `apply` decides (e.g. `ItemExists`); a negative
    /// status still commits the (unchanged) value and still clears the lease set.
    pub fn commit<F>(self, apply: F) -> StorageStatus
    where
        F: FnOnce(&mut Option<Value>) -> StorageStatus,
    {
        let mut state = self.entry.state.lock().expect("poisoned key state");
        state.leases.clear();
        let status = apply(&mut state.value);
        state.revoking = false;
        status
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        // After a commit this is a no-op (the flag is already down); the case that matters is a
        // guard abandoned before commit.
        self.entry
            .state
            .lock()
            .expect("poisoned key state")
            .revoking = false;
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           mutations                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// `Put`: set a scalar, creating the key if needed; refuses to clobber a list
pub fn apply_put(value: String) -> impl FnOnce(&mut Option<Value>) -> StorageStatus {
    move |slot| match slot {
        Some(Value::List(_)) => StorageStatus::ItemExists,
        _ => {
            *slot = Some(Value::Scalar(value));
            StorageStatus::Ok
        }
    }
}

/// `Delete`: remove a key of either kind
pub fn apply_delete() -> impl FnOnce(&mut Option<Value>) -> StorageStatus {
    |slot| match slot.take() {
        Some(_) => StorageStatus::Ok,
        None => StorageStatus::KeyNotFound,
    }
}

/// `AppendToList`: add a unique item, creating the list if needed
pub fn apply_append(item: String) -> impl FnOnce(&mut Option<Value>) -> StorageStatus {
    move |slot| match slot {
        None => {
            *slot = Some(Value::List(vec![item]));
            StorageStatus::Ok
        }
        Some(Value::List(items)) => {
            if items.contains(&item) {
                StorageStatus::ItemExists
            } else {
                items.push(item);
                StorageStatus::Ok
            }
        }
        Some(Value::Scalar(_)) => StorageStatus::ItemExists,
    }
}

/// `RemoveFromList`: drop an item, preserving the order of the rest
pub fn apply_remove(item: String) -> impl FnOnce(&mut Option<Value>) -> StorageStatus {
    move |slot| match slot {
        Some(Value::List(items)) => match items.iter().position(|candidate| *candidate == item) {
            Some(idx) => {
                items.remove(idx);
                StorageStatus::Ok
            }
            None => StorageStatus::ItemNotFound,
        },
        _ => StorageStatus::ItemNotFound,
    }
}
