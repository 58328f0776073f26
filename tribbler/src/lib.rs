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

//! # tribbler
//!
//! A three-tier distributed micro-blogging service.
//!
//! This crate is the top tier: the stateless front end mapping user-level operations (users,
//! subscriptions, posts, feeds) onto the storage primitives offered by [tribbler-libstore],
//! plus the two daemons (`tribstoraged`, `tribserverd`) that stand the whole system up. All the
//! interesting distributed-systems machinery -- cluster bootstrap, consistent-hash placement,
//! the lease/revocation coherence protocol -- lives a tier down; everything up here is a
//! straightforward translation through the key-naming scheme in
//! [tribbler-shared::keys](tribbler_shared::keys).

pub mod http;
pub mod server;
pub mod storage;

pub use server::TribServer;
