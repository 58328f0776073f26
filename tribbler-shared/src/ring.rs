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

//! # ring
//!
//! Consistent-hash placement of keys onto storage nodes.
//!
//! The range of a 32-bit hash function is laid out around a ring (so `0` and `u32::MAX` are
//! adjacent), and each storage node occupies the point named by its `NodeID`. A key belongs to
//! the first node at or clockwise of the key's hash; walking off the top of the range wraps back
//! around to the smallest `NodeID`. Every node therefore owns the contiguous arc between its
//! predecessor (exclusive) and itself (inclusive).
//!
//! Two properties matter for correctness and must hold identically on every client and server:
//!
//! 1. The hash is taken over the key's *prefix* -- everything before the first `:`, or the whole
//!    key if it has none -- so all of one user's keys land on one node.
//! 2. The ownership rule is "least `NodeID >= hash`, wrapping". An off-by-one on either side of
//!    the wire produces `WrongServer` storms, so both sides call into this module rather than
//!    re-implementing it.
//!
//! We use xxhash (32-bit) to map prefixes onto the ring. The cluster is fixed at bootstrap, so
//! unlike the usual presentation of consistent hashing there is no node addition or removal to
//! handle, and no need for virtual nodes to smooth a changing distribution.

use crate::rpc::Node;

/// The portion of `key` that determines placement: everything before the first `:`, or all of
/// `key` if it contains none
pub fn key_prefix(key: &str) -> &str {
    match key.find(':') {
        Some(idx) => &key[..idx],
        None => key,
    }
}

/// Hash a key onto the ring
pub fn shard_for(key: &str) -> u32 {
    twox_hash::XxHash32::oneshot(0, key_prefix(key).as_bytes())
}

/// The assembled cluster: an immutable list of nodes, sorted by `NodeID`
///
/// Built once, at bootstrap, from the member list returned by the master; never mutated
/// afterwards, so it may be shared freely without locking.
#[derive(Clone, Debug)]
pub struct Ring {
    nodes: Vec<Node>,
}

impl Ring {
    /// Assemble a ring from a member list; `None` if the list is empty
    ///
    /// The list is sorted by `NodeID`. Duplicate `NodeID`s are a registration bug upstream; the
    /// first entry wins here.
    pub fn new(mut nodes: Vec<Node>) -> Option<Ring> {
        if nodes.is_empty() {
            return None;
        }
        nodes.sort();
        nodes.dedup_by(|a, b| a.node_id == b.node_id);
        Some(Ring { nodes })
    }

    /// The node responsible for `key`: least `NodeID >= shard_for(key)`, wrapping
    pub fn owner(&self, key: &str) -> &Node {
        let shard = shard_for(key);
        let idx = self.nodes.partition_point(|node| node.node_id < shard);
        if idx == self.nodes.len() {
            &self.nodes[0]
        } else {
            &self.nodes[idx]
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    fn node(id: u32) -> Node {
        Node {
            node_id: id,
            host_port: format!("localhost:{}", 9000 + id % 1000),
        }
    }

    #[test]
    fn prefixes() {
        assert_eq!(key_prefix("roc:usrid"), "roc");
        assert_eq!(key_prefix("roc:post_0_0"), "roc");
        assert_eq!(key_prefix("no-colon"), "no-colon");
        assert_eq!(key_prefix(":leading"), "");
    }

    // All of a user's keys must hash identically, whatever the suffix.
    #[test]
    fn prefix_hashing() {
        assert_eq!(shard_for("roc:usrid"), shard_for("roc:sublist"));
        assert_eq!(shard_for("roc:usrid"), shard_for("roc"));
        assert_ne!(shard_for("roc:usrid"), shard_for("cor:usrid"));
    }

    #[test]
    fn empty_ring() {
        assert!(Ring::new(Vec::new()).is_none());
    }

    #[test]
    fn ownership() {
        let ring = Ring::new(vec![node(300), node(100), node(200)]).unwrap();
        // Sorted on construction:
        assert_eq!(
            ring.nodes().iter().map(|n| n.node_id).collect::<Vec<_>>(),
            vec![100, 200, 300]
        );
        // Walk the arcs by hand. `owner` is defined in terms of the shard, so probe it through a
        // little shim that lets us pick the hash directly:
        let owner_of = |shard: u32| {
            let idx = ring.nodes().partition_point(|n| n.node_id < shard);
            if idx == ring.nodes().len() {
                ring.nodes()[0].node_id
            } else {
                ring.nodes()[idx].node_id
            }
        };
        assert_eq!(owner_of(0), 100);
        assert_eq!(owner_of(100), 100); // boundary is inclusive
        assert_eq!(owner_of(101), 200);
        assert_eq!(owner_of(300), 300);
        assert_eq!(owner_of(301), 100); // wraps
        assert_eq!(owner_of(u32::MAX), 100);
    }

    // The same key must route to the same node no matter who asks.
    #[test]
    fn owner_is_deterministic() {
        let ring1 = Ring::new(vec![node(1 << 8), node(1 << 16), node(1 << 24)]).unwrap();
        let ring2 = Ring::new(vec![node(1 << 24), node(1 << 8), node(1 << 16)]).unwrap();
        for key in ["alice:usrid", "bob:sublist", "carol:triblist", "dave"] {
            assert_eq!(ring1.owner(key).node_id, ring2.owner(key).node_id);
        }
    }

    #[test]
    fn duplicate_ids_collapse() {
        let ring = Ring::new(vec![node(100), node(100), node(200)]).unwrap();
        assert_eq!(ring.len(), 2);
    }
}
