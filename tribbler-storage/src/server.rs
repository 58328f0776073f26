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

//! # server
//!
//! One storage node: the RPC surface over [KeyStore], membership wiring, and the revocation
//! fan-out.
//!
//! Every mutating operation runs the same sequence: take the key's write gate (which flags the
//! key `Revoking` and snapshots its lease set), issue `RevokeLease` to every holder
//! concurrently, and only then commit the mutation and answer the caller. A holder that cannot
//! be reached, or that dawdles, is waited out to its `expiry + guard` deadline and then treated
//! as revoked -- a write never fails because a revocation did. Together with the `Revoking`
//! flag's refusal of new leases, this guarantees that no libstore can serve a pre-write value
//! from cache after the write has returned.
//!
//! Ownership is checked freshly on every request: a key that does not hash into this node's arc
//! is answered `WrongServer`, and every data operation is `NotReady` until bootstrap completes.

use std::{
    sync::{Arc, OnceLock},
    time::Instant,
};

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use futures::future::join_all;
use snafu::{ensure, ResultExt, Snafu};
use tap::Pipe;
use tower_http::trace::TraceLayer;
use tracing::{debug, instrument};

use tribbler_shared::{
    ring::Ring,
    rpc::{
        GetArgs, GetListReply, GetReply, GetServersReply, KeyArgs, Lease, Node, PutArgs,
        RegisterArgs, RegisterReply, RevokeLeaseArgs, StatusReply, StorageStatus,
    },
};

use crate::{
    membership::{self, Registry},
    store::{self, KeyStore, LeaseRecord, Value},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to join the storage cluster: {source}"))]
    Join { source: membership::Error },
    #[snafu(display("The member list does not form a ring"))]
    EmptyRing,
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         StorageServer                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One node of the storage cluster
pub struct StorageServer {
    me: Node,
    /// `Some` iff this node is the master
    registry: Option<Registry>,
    /// Set exactly once, when bootstrap completes; data operations answer `NotReady` before then
    ring: OnceLock<Ring>,
    store: KeyStore,
    http: reqwest::Client,
}

impl StorageServer {
    /// Stand up the master for a cluster of `num_nodes`
    ///
    /// The master registers itself immediately, so a cluster of one is ready on return; anything
    /// larger is `NotReady` until the remaining nodes register. Serve [make_router] right away
    /// either way -- the registration endpoint has to be up for the others to find us.
    pub fn new_master(num_nodes: usize, me: Node) -> Arc<StorageServer> {
        let registry = Registry::new(num_nodes);
        let reply = registry.register(me.clone());
        let srv = Arc::new(StorageServer {
            me,
            registry: Some(registry),
            ring: OnceLock::new(),
            store: KeyStore::new(),
            http: reqwest::Client::new(),
        });
        if reply.status == StorageStatus::Ok {
            srv.install_ring(reply.servers);
        }
        srv
    }

    /// Stand up a non-master node: register with the master at `master` and wait for the full
    /// member list
    ///
    /// Does not return until the cluster is formed (or bootstrap gives up), so the caller can
    /// serve [make_router] the moment it has the server in hand.
    pub async fn join(master: &str, me: Node) -> Result<Arc<StorageServer>> {
        let http = reqwest::Client::new();
        let servers = membership::join(master, &me, &http)
            .await
            .context(JoinSnafu)?;
        ensure!(!servers.is_empty(), EmptyRingSnafu);
        let srv = Arc::new(StorageServer {
            me,
            registry: None,
            ring: OnceLock::new(),
            store: KeyStore::new(),
            http,
        });
        srv.install_ring(servers);
        Ok(srv)
    }

    pub fn node(&self) -> &Node {
        &self.me
    }

    fn install_ring(&self, servers: Vec<Node>) {
        if let Some(ring) = Ring::new(servers) {
            let _ = self.ring.set(ring);
        }
    }

    /// `RegisterServer`: only the master keeps a registry; anyone else declines
    pub fn register(&self, node: Node) -> RegisterReply {
        match &self.registry {
            Some(registry) => {
                let reply = registry.register(node);
                if reply.status == StorageStatus::Ok {
                    self.install_ring(reply.servers.clone());
                }
                reply
            }
            None => RegisterReply {
                status: StorageStatus::NotReady,
                servers: Vec::new(),
            },
        }
    }

    /// `GetServers`: the member list once known, `NotReady` until then
    pub fn servers(&self) -> GetServersReply {
        match &self.registry {
            Some(registry) => registry.servers(),
            None => match self.ring.get() {
                Some(ring) => GetServersReply {
                    status: StorageStatus::Ok,
                    servers: ring.nodes().to_vec(),
                },
                None => GetServersReply {
                    status: StorageStatus::NotReady,
                    servers: Vec::new(),
                },
            },
        }
    }

    /// `NotReady` before bootstrap, `WrongServer` for keys outside our arc, `None` to proceed.
    /// Computed freshly per request; routing decisions are never cached server-side.
    fn misrouted(&self, key: &str) -> Option<StorageStatus> {
        let Some(ring) = self.ring.get() else {
            return Some(StorageStatus::NotReady);
        };
        (ring.owner(key).node_id != self.me.node_id).then_some(StorageStatus::WrongServer)
    }

    pub fn get(&self, args: &GetArgs) -> GetReply {
        if let Some(status) = self.misrouted(&args.key) {
            return GetReply {
                status,
                value: None,
                lease: Lease::refused(),
            };
        }
        let (status, value, lease) = self.store.get(&args.key, lease_holder(args));
        GetReply {
            status,
            value,
            lease,
        }
    }

    pub fn get_list(&self, args: &GetArgs) -> GetListReply {
        if let Some(status) = self.misrouted(&args.key) {
            return GetListReply {
                status,
                value: Vec::new(),
                lease: Lease::refused(),
            };
        }
        let (status, value, lease) = self.store.get_list(&args.key, lease_holder(args));
        GetListReply {
            status,
            value,
            lease,
        }
    }

    pub async fn put(&self, args: PutArgs) -> StatusReply {
        self.write(&args.key, store::apply_put(args.value)).await
    }

    pub async fn delete(&self, args: KeyArgs) -> StatusReply {
        self.write(&args.key, store::apply_delete()).await
    }

    pub async fn append_to_list(&self, args: PutArgs) -> StatusReply {
        self.write(&args.key, store::apply_append(args.value)).await
    }

    pub async fn remove_from_list(&self, args: PutArgs) -> StatusReply {
        self.write(&args.key, store::apply_remove(args.value)).await
    }

    /// The write path: gate, revoke, commit
    #[instrument(level = "debug", skip(self, apply))]
    async fn write<F>(&self, key: &str, apply: F) -> StatusReply
    where
        F: FnOnce(&mut Option<Value>) -> StorageStatus,
    {
        if let Some(status) = self.misrouted(key) {
            return StatusReply { status };
        }
        let guard = self.store.begin_write(key).await;
        let holders = guard.holders().to_vec();
        if !holders.is_empty() {
            debug!(key, holders = holders.len(), "Revoking leases before write");
            join_all(
                holders
                    .into_iter()
                    .map(|lease| revoke_one(self.http.clone(), key.to_owned(), lease)),
            )
            .await;
        }
        StatusReply {
            status: guard.commit(apply),
        }
    }
}

fn lease_holder(args: &GetArgs) -> Option<&str> {
    (args.want_lease && !args.host_port.is_empty()).then_some(args.host_port.as_str())
}

/// Revoke one holder's lease on `key`, or wait it out
///
/// One attempt, bounded by the holder's grace deadline. Anything other than a prompt `OK` --
/// transport failure, an error status, a hung connection -- parks until the deadline passes, at
/// which point the lease is dead by expiry and the holder may be forgotten.
async fn revoke_one(http: reqwest::Client, key: String, lease: LeaseRecord) {
    let deadline = lease.grace_deadline();
    let now = Instant::now();
    let Some(remaining) = deadline.checked_duration_since(now).filter(|d| !d.is_zero()) else {
        return;
    };
    let attempt = async {
        http.post(format!("http://{}/revoke", lease.holder))
            .json(&RevokeLeaseArgs { key: key.clone() })
            .send()
            .await
            .ok()?
            .json::<StatusReply>()
            .await
            .ok()
    };
    match tokio::time::timeout(remaining, attempt).await {
        Ok(Some(StatusReply {
            status: StorageStatus::Ok,
        })) => {
            debug!(%key, holder = %lease.holder, "Lease revoked");
        }
        _ => {
            debug!(%key, holder = %lease.holder, "Revocation unacknowledged; waiting out the grace window");
            let now = Instant::now();
            if let Some(remaining) = deadline.checked_duration_since(now).filter(|d| !d.is_zero())
            {
                tokio::time::sleep(remaining).await;
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         the RPC surface                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn healthcheck() -> &'static str {
    "GOOD"
}

async fn register_server(
    State(srv): State<Arc<StorageServer>>,
    Json(args): Json<RegisterArgs>,
) -> Json<RegisterReply> {
    srv.register(args.node).pipe(Json)
}

async fn get_servers(State(srv): State<Arc<StorageServer>>) -> Json<GetServersReply> {
    srv.servers().pipe(Json)
}

async fn get_value(
    State(srv): State<Arc<StorageServer>>,
    Json(args): Json<GetArgs>,
) -> Json<GetReply> {
    srv.get(&args).pipe(Json)
}

async fn get_list_value(
    State(srv): State<Arc<StorageServer>>,
    Json(args): Json<GetArgs>,
) -> Json<GetListReply> {
    srv.get_list(&args).pipe(Json)
}

async fn put_value(
    State(srv): State<Arc<StorageServer>>,
    Json(args): Json<PutArgs>,
) -> Json<StatusReply> {
    srv.put(args).await.pipe(Json)
}

async fn delete_key(
    State(srv): State<Arc<StorageServer>>,
    Json(args): Json<KeyArgs>,
) -> Json<StatusReply> {
    srv.delete(args).await.pipe(Json)
}

async fn append_to_list(
    State(srv): State<Arc<StorageServer>>,
    Json(args): Json<PutArgs>,
) -> Json<StatusReply> {
    srv.append_to_list(args).await.pipe(Json)
}

async fn remove_from_list(
    State(srv): State<Arc<StorageServer>>,
    Json(args): Json<PutArgs>,
) -> Json<StatusReply> {
    srv.remove_from_list(args).await.pipe(Json)
}

/// The storage node's RPC surface
///
/// Queries ride on `GET` (with JSON bodies where they take arguments), mutations on `POST`.
pub fn make_router(state: Arc<StorageServer>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/storage/register", post(register_server))
        .route("/storage/servers", get(get_servers))
        .route("/storage/get", get(get_value))
        .route("/storage/get-list", get(get_list_value))
        .route("/storage/put", post(put_value))
        .route("/storage/delete", post(delete_key))
        .route("/storage/append", post(append_to_list))
        .route("/storage/remove", post(remove_from_list))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub mod test {
    use super::*;

    fn node(id: u32) -> Node {
        Node {
            node_id: id,
            host_port: format!("localhost:{}", 9000 + id),
        }
    }

    fn get_args(key: &str) -> GetArgs {
        GetArgs {
            key: key.to_owned(),
            want_lease: false,
            host_port: String::new(),
        }
    }

    #[tokio::test]
    async fn not_ready_until_bootstrapped() {
        let srv = StorageServer::new_master(2, node(0));
        assert_eq!(srv.get(&get_args("k")).status, StorageStatus::NotReady);
        assert_eq!(
            srv.put(PutArgs {
                key: "k".to_owned(),
                value: "v".to_owned(),
            })
            .await
            .status,
            StorageStatus::NotReady
        );
        assert_eq!(srv.servers().status, StorageStatus::NotReady);
        // The second node shows up...
        assert_eq!(srv.register(node(1)).status, StorageStatus::Ok);
        // ...and the data plane opens.
        assert_eq!(srv.servers().status, StorageStatus::Ok);
        assert_ne!(srv.get(&get_args("k")).status, StorageStatus::NotReady);
    }

    #[tokio::test]
    async fn single_node_owns_everything() {
        let srv = StorageServer::new_master(1, node(0));
        for key in ["alice:usrid", "bob:sublist", "zebra"] {
            assert_eq!(
                srv.put(PutArgs {
                    key: key.to_owned(),
                    value: "v".to_owned(),
                })
                .await
                .status,
                StorageStatus::Ok
            );
            assert_eq!(srv.get(&get_args(key)).status, StorageStatus::Ok);
        }
    }

    #[tokio::test]
    async fn misrouted_keys_are_rejected() {
        use tribbler_shared::ring::shard_for;
        // A two-node "cluster" assembled by hand; node 0 is master, node u32::MAX completes it.
        let srv = StorageServer::new_master(2, node(0));
        let far = Node {
            node_id: u32::MAX,
            host_port: "localhost:9999".to_owned(),
        };
        assert_eq!(srv.register(far).status, StorageStatus::Ok);
        // Node 0 owns only the hash value 0 (everything else falls to u32::MAX), so any key with
        // a non-zero hash is misrouted here:
        let key = (0..)
            .map(|i| format!("user{i}:usrid"))
            .find(|k| shard_for(k) != 0)
            .unwrap();
        assert_eq!(srv.get(&get_args(&key)).status, StorageStatus::WrongServer);
        assert_eq!(
            srv.delete(KeyArgs { key }).await.status,
            StorageStatus::WrongServer
        );
    }

    #[tokio::test]
    async fn non_master_declines_registration() {
        // Forge a non-master without the bootstrap dance: a master of 1 whose ring we borrow.
        let srv = StorageServer::new_master(1, node(0));
        assert_eq!(srv.servers().status, StorageStatus::Ok);
        let non_master = StorageServer {
            me: node(1),
            registry: None,
            ring: OnceLock::new(),
            store: KeyStore::new(),
            http: reqwest::Client::new(),
        };
        assert_eq!(
            non_master.register(node(2)).status,
            StorageStatus::NotReady
        );
    }
}
