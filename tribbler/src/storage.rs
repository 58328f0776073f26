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

//! # storage
//!
//! The seam between the trib tier and whatever stores its data.
//!
//! [TribServer](crate::server::TribServer) writes to this trait, not to
//! [Libstore](tribbler_libstore::Libstore) directly. The expected-absence statuses are folded
//! into the signatures (`get` an absent key is `None`, a duplicate `append_to_list` is `false`)
//! so the trib logic reads as logic, and the only `Err`s flowing up are genuinely unexpected:
//! transport failures, routing bugs, a `NotReady` cluster.

use async_trait::async_trait;
use snafu::{Backtrace, ResultExt, Snafu};

use tribbler_libstore::Libstore;
use tribbler_shared::rpc::StorageStatus;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Storage failure: {source}"))]
    Storage {
        source: tribbler_libstore::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Object-safe trait abstracting the storage tier for the trib tier's purposes
///
/// In production this is a [Libstore] over a live cluster; tests drop in an in-memory map.
#[async_trait]
pub trait Backend {
    /// `None` if the key is absent
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;
    /// `false` if the key was absent
    async fn delete(&self, key: &str) -> Result<bool>;
    /// `None` if the key is absent
    async fn get_list(&self, key: &str) -> Result<Option<Vec<String>>>;
    /// `false` if `item` was already present
    async fn append_to_list(&self, key: &str, item: &str) -> Result<bool>;
    /// `false` if `item` was absent
    async fn remove_from_list(&self, key: &str, item: &str) -> Result<bool>;
}

/// Fold one expected status into the `Ok` side of a libstore result
fn absent_as<T>(
    result: tribbler_libstore::Result<T>,
    absent: StorageStatus,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.status() == Some(absent) => Ok(None),
        Err(err) => Err(err).context(StorageSnafu),
    }
}

#[async_trait]
impl Backend for Libstore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        absent_as(Libstore::get(self, key).await, StorageStatus::KeyNotFound)
    }
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        Libstore::put(self, key, value).await.context(StorageSnafu)
    }
    async fn delete(&self, key: &str) -> Result<bool> {
        absent_as(Libstore::delete(self, key).await, StorageStatus::KeyNotFound)
            .map(|opt| opt.is_some())
    }
    async fn get_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        absent_as(
            Libstore::get_list(self, key).await,
            StorageStatus::ItemNotFound,
        )
    }
    async fn append_to_list(&self, key: &str, item: &str) -> Result<bool> {
        absent_as(
            Libstore::append_to_list(self, key, item).await,
            StorageStatus::ItemExists,
        )
        .map(|opt| opt.is_some())
    }
    async fn remove_from_list(&self, key: &str, item: &str) -> Result<bool> {
        absent_as(
            Libstore::remove_from_list(self, key, item).await,
            StorageStatus::ItemNotFound,
        )
        .map(|opt| opt.is_some())
    }
}
