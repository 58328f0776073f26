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

//! # tribbler-shared
//!
//! Everything both sides of the tribbler wire have to agree on: the RPC argument & reply structs,
//! the status enumerations, the protocol constants, the storage-key naming scheme, and the
//! consistent-hash ring. The storage tier, the libstore and the front end all speak in terms of
//! this crate; none of them re-declare any of it.

pub mod keys;
pub mod ring;
pub mod rpc;
