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

//! # wire types
//!
//! Argument & reply structs for the storage and trib RPC surfaces, along with the two status
//! enumerations and the protocol constants. Statuses ride *inside* replies; an HTTP-level error
//! on these endpoints always indicates a transport or encoding failure, never a negative answer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How long a client may treat a granted lease as valid, in seconds.
pub const LEASE_SECONDS: u64 = 5;

/// Extra slack the server allows past a lease's advertised expiry, to absorb clock skew and
/// network delay. A holder that has not acknowledged a revocation by `expiry + guard` is treated
/// as revoked.
pub const LEASE_GUARD_SECONDS: u64 = 2;

/// Width of the libstore's per-key query window, in seconds.
pub const QUERY_CACHE_SECONDS: u64 = 10;

/// Number of reads within the query window at which the libstore starts asking for leases.
pub const QUERY_CACHE_THRESH: usize = 3;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          status codes                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Status codes spoken by the storage tier
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum StorageStatus {
    Ok,
    KeyNotFound,
    ItemNotFound,
    WrongServer,
    ItemExists,
    NotReady,
}

impl std::fmt::Display for StorageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                StorageStatus::Ok => "OK",
                StorageStatus::KeyNotFound => "KeyNotFound",
                StorageStatus::ItemNotFound => "ItemNotFound",
                StorageStatus::WrongServer => "WrongServer",
                StorageStatus::ItemExists => "ItemExists",
                StorageStatus::NotReady => "NotReady",
            }
        )
    }
}

/// Status codes spoken by the trib tier
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum TribStatus {
    Ok,
    NoSuchUser,
    NoSuchPost,
    NoSuchTargetUser,
    Exists,
}

impl std::fmt::Display for TribStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TribStatus::Ok => "OK",
                TribStatus::NoSuchUser => "NoSuchUser",
                TribStatus::NoSuchPost => "NoSuchPost",
                TribStatus::NoSuchTargetUser => "NoSuchTargetUser",
                TribStatus::Exists => "Exists",
            }
        )
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       storage wire types                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A member of the storage cluster
///
/// `NodeID`s double as positions on the 32-bit hash ring (see [ring](crate::ring)), so the
/// derived ordering puts `node_id` first deliberately: a sorted `Vec<Node>` *is* the ring.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Node {
    pub node_id: u32,
    pub host_port: String,
}

/// A server-to-client promise that a key's value will not change without notice
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Lease {
    pub granted: bool,
    pub valid_seconds: u64,
}

impl Lease {
    pub fn granted() -> Lease {
        Lease {
            granted: true,
            valid_seconds: LEASE_SECONDS,
        }
    }
    pub fn refused() -> Lease {
        Lease::default()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GetArgs {
    pub key: String,
    pub want_lease: bool,
    /// Callback address at which the caller serves `RevokeLease`; empty when the caller cannot
    /// receive callbacks (and so must never set `want_lease`)
    pub host_port: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GetReply {
    pub status: StorageStatus,
    pub value: Option<String>,
    pub lease: Lease,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GetListReply {
    pub status: StorageStatus,
    pub value: Vec<String>,
    pub lease: Lease,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PutArgs {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct KeyArgs {
    pub key: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StatusReply {
    pub status: StorageStatus,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegisterArgs {
    pub node: Node,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegisterReply {
    pub status: StorageStatus,
    /// The full member list, sorted by `NodeID`; empty until the cluster is complete
    pub servers: Vec<Node>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GetServersReply {
    pub status: StorageStatus,
    pub servers: Vec<Node>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RevokeLeaseArgs {
    pub key: String,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        trib wire types                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A single post: author, timestamp, contents. Stored as JSON at its post key.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Tribble {
    pub user_id: String,
    pub posted: DateTime<Utc>,
    pub contents: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UserArgs {
    pub user_id: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SubscriptionArgs {
    pub user_id: String,
    pub target_user_id: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PostTribbleArgs {
    pub user_id: String,
    pub contents: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PostTribbleReply {
    pub status: TribStatus,
    /// Key under which the tribble body was stored; empty unless `status` is `Ok`
    pub post_key: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeleteTribbleArgs {
    pub user_id: String,
    pub post_key: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TribReply {
    pub status: TribStatus,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GetFriendsReply {
    pub status: TribStatus,
    pub user_ids: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GetTribblesReply {
    pub status: TribStatus,
    pub tribbles: Vec<Tribble>,
}

#[cfg(test)]
pub mod test {
    use super::*;

    // The statuses ride on the wire by variant name; a rename would silently break mixed-version
    // clusters, so pin the encoding down.
    #[test]
    fn status_encoding() {
        assert_eq!(
            serde_json::to_string(&StorageStatus::KeyNotFound).unwrap(),
            "\"KeyNotFound\""
        );
        assert_eq!(
            serde_json::from_str::<StorageStatus>("\"WrongServer\"").unwrap(),
            StorageStatus::WrongServer
        );
        assert_eq!(
            serde_json::to_string(&TribStatus::NoSuchTargetUser).unwrap(),
            "\"NoSuchTargetUser\""
        );
    }

    #[test]
    fn lease_constructors() {
        assert!(Lease::granted().granted);
        assert_eq!(Lease::granted().valid_seconds, LEASE_SECONDS);
        assert!(!Lease::refused().granted);
    }

    #[test]
    fn node_ordering() {
        let mut nodes = vec![
            Node {
                node_id: 7,
                host_port: "localhost:9003".to_owned(),
            },
            Node {
                node_id: 2,
                host_port: "localhost:9001".to_owned(),
            },
        ];
        nodes.sort();
        assert_eq!(nodes[0].node_id, 2);
    }
}
