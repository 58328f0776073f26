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

//! # tribbler-storage
//!
//! The tribbler storage tier. Each process in the cluster owns an arc of the 32-bit hash ring
//! and serves six operations over it (`Get`, `GetList`, `Put`, `Delete`, `AppendToList`,
//! `RemoveFromList`), granting leases on reads and revoking them before writes commit.
//!
//! The interesting machinery is split across three modules:
//!
//! - [store] -- the per-key value/lease state machine (`Quiescent`/`Revoking`) and the write
//!   gate that serializes mutations to a key;
//! - [membership] -- one-shot cluster formation: the master's registry and the non-master
//!   register-then-poll bootstrap;
//! - [server] -- the RPC surface tying the two together, including the revocation fan-out that
//!   runs between a write's arrival and its commit.
//!
//! Nothing here persists: the cluster is formed once, lives in memory, and is fixed for its
//! lifetime.

pub mod membership;
pub mod server;
pub mod store;

pub use server::{make_router, StorageServer};
