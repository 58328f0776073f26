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

//! # tribbler-libstore
//!
//! The client side of the tribbler storage tier.
//!
//! A [Libstore] does three jobs for its host process:
//!
//! 1. **Routing**: every key is hashed onto the ring fetched at construction and the request
//!    goes straight to the owning storage node. The ring is fixed for the cluster's lifetime,
//!    so `WrongServer` from storage means somebody's ring is wrong -- we retry once (re-deriving
//!    the owner) and then surface it rather than paper over it.
//! 2. **Caching**: reads may carry `WantLease`; granted leases admit the value into a local
//!    cache that short-circuits subsequent reads until the lease expires or is revoked. Whether
//!    to ask is governed by [LeaseMode] and, in [Normal](LeaseMode::Normal) mode, by the per-key
//!    query window.
//! 3. **Revocation service**: storage nodes call back to `/revoke` (see [revocation_router])
//!    before committing writes; the handler evicts locally and must answer promptly, since the
//!    writing node is blocking its write on our reply.
//!
//! There is a deliberate cycle in the *protocol* here -- libstores call storage, storage calls
//! libstores back -- but not in the code: the callback direction is this one narrow
//! `RevokeLease` endpoint, and storage knows us only by the `host_port` we send with each
//! leased read.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{extract::State, routing::post, Json, Router};
use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use tap::Pipe;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use tribbler_shared::{
    ring::Ring,
    rpc::{
        GetArgs, GetListReply, GetReply, GetServersReply, KeyArgs, PutArgs, RevokeLeaseArgs,
        StatusReply, StorageStatus, QUERY_CACHE_THRESH,
    },
};

pub mod cache;

use cache::{Cached, LeaseCache, QueryWindow};

/// Attempts against a `NotReady` master before [Libstore::new] gives up
pub const BOOTSTRAP_ATTEMPTS: usize = 5;

const BOOTSTRAP_RETRY_INTERVAL: Duration = Duration::from_secs(1);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to reach the storage master at {master}: {source}"))]
    Dial {
        master: String,
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to decode the member list from {master}: {source}"))]
    ServersDe {
        master: String,
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Storage cluster not ready after {attempts} attempts"))]
    NotReady { attempts: usize },
    #[snafu(display("The master returned an empty member list"))]
    EmptyCluster,
    #[snafu(display("Storage RPC to {host_port} failed: {source}"))]
    Rpc {
        host_port: String,
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Storage node {host_port} answered with an HTTP error: {source}"))]
    RpcStatus {
        host_port: String,
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to decode a reply from storage node {host_port}: {source}"))]
    RpcDe {
        host_port: String,
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Storage answered {status} for key {key:?}"))]
    Status {
        status: StorageStatus,
        key: String,
    },
    #[snafu(display("Storage persistently mis-routed key {key:?}; client & server rings disagree"))]
    WrongServer { key: String },
}

impl Error {
    /// The protocol status carried by this error, if it is a protocol-level failure (as opposed
    /// to a transport or routing one)
    pub fn status(&self) -> Option<StorageStatus> {
        match self {
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Libstore                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// When to ask storage for leases
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LeaseMode {
    /// Ask on every read
    Always,
    /// Never ask (forced whenever the host cannot receive callbacks)
    Never,
    /// Ask once a key's query window crosses the threshold
    Normal,
}

/// A routing, caching client of the storage cluster
#[derive(Debug)]
pub struct Libstore {
    ring: Ring,
    /// Address at which our host serves [revocation_router]; empty in [LeaseMode::Never]
    me: String,
    mode: LeaseMode,
    cache: LeaseCache,
    window: QueryWindow,
    http: reqwest::Client,
}

impl Libstore {
    /// Dial the master, fetch the member list (with bounded retry against `NotReady`), and
    /// build a libstore around the resulting ring
    ///
    /// `my_host_port` is the address at which the *caller* promises to serve
    /// [revocation_router]; pass the empty string when there is no such server, which also
    /// forces [LeaseMode::Never] -- a lease we cannot be asked to give back is not one we may
    /// take.
    pub async fn new(master_host_port: &str, my_host_port: &str, mode: LeaseMode) -> Result<Libstore> {
        let http = reqwest::Client::new();
        let mut servers = None;
        for attempt in 1..=BOOTSTRAP_ATTEMPTS {
            let reply = http
                .get(format!("http://{master_host_port}/storage/servers"))
                .send()
                .await
                .context(DialSnafu {
                    master: master_host_port,
                })?
                .json::<GetServersReply>()
                .await
                .context(ServersDeSnafu {
                    master: master_host_port,
                })?;
            if reply.status == StorageStatus::Ok {
                servers = Some(reply.servers);
                break;
            }
            debug!(attempt, "Storage cluster not ready yet");
            if attempt < BOOTSTRAP_ATTEMPTS {
                tokio::time::sleep(BOOTSTRAP_RETRY_INTERVAL).await;
            }
        }
        let servers = servers.context(NotReadySnafu {
            attempts: BOOTSTRAP_ATTEMPTS,
        })?;
        let ring = Ring::new(servers).context(EmptyClusterSnafu)?;
        debug!(nodes = ring.len(), "Libstore connected to the storage cluster");
        let mode = if my_host_port.is_empty() {
            LeaseMode::Never
        } else {
            mode
        };
        Ok(Libstore {
            ring,
            me: my_host_port.to_owned(),
            mode,
            cache: LeaseCache::new(),
            window: QueryWindow::new(),
            http,
        })
    }

    pub async fn get(&self, key: &str) -> Result<String> {
        let reads = self.window.note(key, Instant::now());
        if let Some(Cached::Scalar(value)) = self.cache.lookup(key) {
            return Ok(value);
        }
        let args = GetArgs {
            key: key.to_owned(),
            want_lease: self.want_lease(reads),
            host_port: self.me.clone(),
        };
        let reply: GetReply = self
            .routed(key, Method::GET, "storage/get", &args, |r: &GetReply| {
                r.status
            })
            .await?;
        match reply.status {
            StorageStatus::Ok => {
                let value = reply.value.unwrap_or_default();
                if reply.lease.granted {
                    self.cache.insert(
                        key,
                        Cached::Scalar(value.clone()),
                        Duration::from_secs(reply.lease.valid_seconds),
                    );
                }
                Ok(value)
            }
            status => StatusSnafu { status, key }.fail(),
        }
    }

    pub async fn get_list(&self, key: &str) -> Result<Vec<String>> {
        let reads = self.window.note(key, Instant::now());
        if let Some(Cached::List(items)) = self.cache.lookup(key) {
            return Ok(items);
        }
        let args = GetArgs {
            key: key.to_owned(),
            want_lease: self.want_lease(reads),
            host_port: self.me.clone(),
        };
        let reply: GetListReply = self
            .routed(
                key,
                Method::GET,
                "storage/get-list",
                &args,
                |r: &GetListReply| r.status,
            )
            .await?;
        match reply.status {
            StorageStatus::Ok => {
                if reply.lease.granted {
                    self.cache.insert(
                        key,
                        Cached::List(reply.value.clone()),
                        Duration::from_secs(reply.lease.valid_seconds),
                    );
                }
                Ok(reply.value)
            }
            status => StatusSnafu { status, key }.fail(),
        }
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(
            key,
            "storage/put",
            &PutArgs {
                key: key.to_owned(),
                value: value.to_owned(),
            },
        )
        .await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.mutate(key, "storage/delete", &KeyArgs { key: key.to_owned() })
            .await
    }

    pub async fn append_to_list(&self, key: &str, item: &str) -> Result<()> {
        self.mutate(
            key,
            "storage/append",
            &PutArgs {
                key: key.to_owned(),
                value: item.to_owned(),
            },
        )
        .await
    }

    pub async fn remove_from_list(&self, key: &str, item: &str) -> Result<()> {
        self.mutate(
            key,
            "storage/remove",
            &PutArgs {
                key: key.to_owned(),
                value: item.to_owned(),
            },
        )
        .await
    }

    /// Evict `key` from the local cache in response to a `RevokeLease` callback
    ///
    /// Always `OK`: the holder's obligation is to not serve the key from cache afterwards,
    /// which holds trivially when it never had the key (its lease may simply have lapsed
    /// moments earlier).
    pub fn revoke(&self, key: &str) -> StorageStatus {
        let evicted = self.cache.evict(key);
        debug!(key, evicted, "Lease revoked by storage");
        StorageStatus::Ok
    }

    fn want_lease(&self, reads_in_window: usize) -> bool {
        match self.mode {
            LeaseMode::Never => false,
            LeaseMode::Always => true,
            LeaseMode::Normal => reads_in_window >= QUERY_CACHE_THRESH,
        }
    }

    async fn mutate<Req>(&self, key: &str, path: &str, args: &Req) -> Result<()>
    where
        Req: Serialize,
    {
        let reply: StatusReply = self
            .routed(key, Method::POST, path, args, |r: &StatusReply| r.status)
            .await?;
        match reply.status {
            StorageStatus::Ok => Ok(()),
            status => StatusSnafu { status, key }.fail(),
        }
    }

    /// Send `args` to the node owning `key`, retrying once on `WrongServer`
    ///
    /// On a static ring re-deriving the owner lands on the same node, so the retry exists only
    /// to absorb a node answering mid-bootstrap; a second `WrongServer` is a routing bug and
    /// surfaces as such.
    async fn routed<Req, Rsp>(
        &self,
        key: &str,
        method: Method,
        path: &str,
        args: &Req,
        status_of: impl Fn(&Rsp) -> StorageStatus,
    ) -> Result<Rsp>
    where
        Req: Serialize,
        Rsp: DeserializeOwned,
    {
        for attempt in 0..2 {
            let owner = self.ring.owner(key);
            let reply: Rsp = self
                .call(&owner.host_port, method.clone(), path, args)
                .await?;
            if status_of(&reply) != StorageStatus::WrongServer {
                return Ok(reply);
            }
            if attempt == 0 {
                warn!(key, owner = %owner.host_port, "Storage answered WrongServer; retrying once");
            }
        }
        WrongServerSnafu { key }.fail()
    }

    async fn call<Req, Rsp>(
        &self,
        host_port: &str,
        method: Method,
        path: &str,
        args: &Req,
    ) -> Result<Rsp>
    where
        Req: Serialize,
        Rsp: DeserializeOwned,
    {
        self.http
            .request(method, format!("http://{host_port}/{path}"))
            .json(args)
            .send()
            .await
            .context(RpcSnafu { host_port })?
            .error_for_status()
            .context(RpcStatusSnafu { host_port })?
            .json::<Rsp>()
            .await
            .context(RpcDeSnafu { host_port })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      revocation endpoint                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn revoke_lease(
    State(libstore): State<Arc<Libstore>>,
    Json(args): Json<RevokeLeaseArgs>,
) -> Json<StatusReply> {
    StatusReply {
        status: libstore.revoke(&args.key),
    }
    .pipe(Json)
}

/// The callback surface a leasing libstore's host must serve at the `my_host_port` it handed to
/// [Libstore::new]
///
/// Storage nodes block their writes on these replies; mount this somewhere it will be answered
/// promptly.
pub fn revocation_router(state: Arc<Libstore>) -> Router {
    Router::new()
        .route("/revoke", post(revoke_lease))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub mod test {
    use super::*;

    use tribbler_shared::rpc::Node;

    fn libstore(me: &str, mode: LeaseMode) -> Libstore {
        Libstore {
            ring: Ring::new(vec![Node {
                node_id: 0,
                host_port: "localhost:9000".to_owned(),
            }])
            .unwrap(),
            me: me.to_owned(),
            mode,
            cache: LeaseCache::new(),
            window: QueryWindow::new(),
            http: reqwest::Client::new(),
        }
    }

    #[test]
    fn lease_appetite_by_mode() {
        let always = libstore("localhost:9010", LeaseMode::Always);
        assert!(always.want_lease(0));
        let never = libstore("", LeaseMode::Never);
        assert!(!never.want_lease(100));
        let normal = libstore("localhost:9010", LeaseMode::Normal);
        assert!(!normal.want_lease(QUERY_CACHE_THRESH - 1));
        assert!(normal.want_lease(QUERY_CACHE_THRESH));
    }

    #[test]
    fn revoke_evicts_both_namespaces() {
        let ls = libstore("localhost:9010", LeaseMode::Always);
        ls.cache
            .insert("s", Cached::Scalar("v".to_owned()), Duration::from_secs(60));
        ls.cache.insert(
            "l",
            Cached::List(vec!["a".to_owned()]),
            Duration::from_secs(60),
        );
        assert_eq!(ls.revoke("s"), StorageStatus::Ok);
        assert_eq!(ls.revoke("l"), StorageStatus::Ok);
        // Revoking a key we never held is still OK:
        assert_eq!(ls.revoke("nope"), StorageStatus::Ok);
        assert_eq!(ls.cache.lookup("s"), None);
        assert_eq!(ls.cache.lookup("l"), None);
    }
}
