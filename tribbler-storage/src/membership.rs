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

//! # membership
//!
//! One-shot cluster formation.
//!
//! One node is designated *master* by configuration and told the cluster size; it holds a
//! [Registry] and answers `RegisterServer`/`GetServers` with `NotReady` until exactly that many
//! distinct `NodeID`s have checked in, after which both answer `OK` with the full member list
//! (sorted by `NodeID`, so the reply is directly usable as a ring). Every other node drives
//! [join] against it: register, then poll `GetServers` with bounded retry, and only start
//! serving data operations once the list is in hand.
//!
//! Membership is immutable once formed -- there is no re-balancing, no failure detection, and no
//! way in after the fact. Restarting a node *before* the cluster completes is fine: registration
//! by an already-known `NodeID` replaces the stored entry without growing the set.

use std::{collections::BTreeMap, sync::Mutex, time::Duration};

use snafu::{Backtrace, ResultExt, Snafu};
use tracing::{debug, info};

use tribbler_shared::rpc::{
    GetServersReply, Node, RegisterArgs, RegisterReply, StorageStatus,
};

/// Attempts a joining node will make against a `NotReady` master before giving up
pub const JOIN_ATTEMPTS: usize = 5;

/// Spacing between those attempts
pub const JOIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to register with the master at {master}: {source}"))]
    Register {
        master: String,
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to poll the master at {master} for the member list: {source}"))]
    Poll {
        master: String,
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to decode a reply from the master at {master}: {source}"))]
    De {
        master: String,
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Cluster still not ready after {attempts} attempts"))]
    NotReady { attempts: usize },
    #[snafu(display("The master returned an empty member list"))]
    EmptyCluster,
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        the master side                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The master's view of who has shown up
///
/// All mutation happens under one mutex; registration is infrequent (it happens `numNodes` times,
/// ever), so there is nothing to be gained from anything finer.
pub struct Registry {
    expected: usize,
    members: Mutex<BTreeMap<u32, Node>>,
}

impl Registry {
    pub fn new(expected: usize) -> Registry {
        Registry {
            expected,
            members: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record (or refresh) a member; answer `OK` with the full list once the cluster is complete
    pub fn register(&self, node: Node) -> RegisterReply {
        let mut members = self.members.lock().expect("poisoned registry");
        debug!(
            node_id = node.node_id,
            host_port = %node.host_port,
            "Registering a storage node"
        );
        members.insert(node.node_id, node);
        if members.len() >= self.expected {
            info!(members = members.len(), "Storage cluster complete");
            RegisterReply {
                status: StorageStatus::Ok,
                servers: members.values().cloned().collect(),
            }
        } else {
            RegisterReply {
                status: StorageStatus::NotReady,
                servers: Vec::new(),
            }
        }
    }

    /// Answer `GetServers`: the full list once complete, `NotReady` (and nothing) until then
    pub fn servers(&self) -> GetServersReply {
        let members = self.members.lock().expect("poisoned registry");
        if members.len() >= self.expected {
            GetServersReply {
                status: StorageStatus::Ok,
                servers: members.values().cloned().collect(),
            }
        } else {
            GetServersReply {
                status: StorageStatus::NotReady,
                servers: Vec::new(),
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        the joining side                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Register `me` with the master and wait for the full member list
///
/// Registration itself is retried only on transport failure (the master may simply not be
/// listening yet); once it lands, the master has us and we drop into polling `GetServers`.
/// Either phase gives up after [JOIN_ATTEMPTS] tries at [JOIN_RETRY_INTERVAL] spacing.
pub async fn join(master: &str, me: &Node, http: &reqwest::Client) -> Result<Vec<Node>> {
    let mut registered = false;
    for attempt in 1..=JOIN_ATTEMPTS {
        match http
            .post(format!("http://{master}/storage/register"))
            .json(&RegisterArgs { node: me.clone() })
            .send()
            .await
        {
            Ok(rsp) => {
                let reply = rsp
                    .json::<RegisterReply>()
                    .await
                    .context(DeSnafu { master })?;
                if reply.status == StorageStatus::Ok {
                    return check_nonempty(reply.servers);
                }
                // NotReady: we're in the book; now we wait for the others.
                registered = true;
                break;
            }
            Err(err) if attempt == JOIN_ATTEMPTS => {
                return Err(err).context(RegisterSnafu { master });
            }
            Err(err) => {
                debug!(attempt, %err, "Master not reachable yet; will retry");
                tokio::time::sleep(JOIN_RETRY_INTERVAL).await;
            }
        }
    }
    if !registered {
        return NotReadySnafu {
            attempts: JOIN_ATTEMPTS,
        }
        .fail();
    }

    for _attempt in 1..=JOIN_ATTEMPTS {
        tokio::time::sleep(JOIN_RETRY_INTERVAL).await;
        let reply = http
            .get(format!("http://{master}/storage/servers"))
            .send()
            .await
            .context(PollSnafu { master })?
            .json::<GetServersReply>()
            .await
            .context(DeSnafu { master })?;
        if reply.status == StorageStatus::Ok {
            return check_nonempty(reply.servers);
        }
        debug!("Cluster not complete yet; will poll again");
    }

    NotReadySnafu {
        attempts: JOIN_ATTEMPTS,
    }
    .fail()
}

fn check_nonempty(servers: Vec<Node>) -> Result<Vec<Node>> {
    if servers.is_empty() {
        EmptyClusterSnafu.fail()
    } else {
        Ok(servers)
    }
}
