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

//! # lease integration tests
//!
//! The cache-coherence protocol, end to end: a real storage node, real libstores, real
//! revocation callbacks over HTTP.

use std::{sync::Arc, time::Duration};

use tokio::{net::TcpListener, sync::Notify};

use tribbler_libstore::{revocation_router, LeaseMode, Libstore};
use tribbler_shared::rpc::{Node, StorageStatus};
use tribbler_storage::{make_router, StorageServer};

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host_port = listener.local_addr().unwrap().to_string();
    (listener, host_port)
}

/// Stand up a single-node storage cluster; returns its address and a handle that will shut it
/// down when notified
async fn single_node_storage() -> (String, Arc<Notify>) {
    let (listener, host_port) = bind().await;
    let srv = StorageServer::new_master(
        1,
        Node {
            node_id: 0,
            host_port: host_port.clone(),
        },
    );
    let nfy = Arc::new(Notify::new());
    let shutdown = nfy.clone();
    tokio::spawn(async move {
        axum::serve(listener, make_router(srv))
            .with_graceful_shutdown(async move { shutdown.notified().await })
            .await
            .unwrap();
    });
    (host_port, nfy)
}

/// A libstore in `Always` mode with its revocation endpoint live
async fn leasing_libstore(master: &str) -> Arc<Libstore> {
    let (listener, host_port) = bind().await;
    let libstore = Arc::new(
        Libstore::new(master, &host_port, LeaseMode::Always)
            .await
            .unwrap(),
    );
    let state = libstore.clone();
    tokio::spawn(async move {
        axum::serve(listener, revocation_router(state)).await.unwrap();
    });
    libstore
}

// A write through one libstore must revoke the lease another holds *before* it returns; the
// holder's next read then comes back fresh.
#[tokio::test]
async fn writes_revoke_outstanding_leases() {
    let (master, _storage) = single_node_storage().await;
    let holder = leasing_libstore(&master).await;
    let writer = Libstore::new(&master, "", LeaseMode::Never).await.unwrap();

    writer.put("k:1", "v1").await.unwrap();
    assert_eq!(holder.get("k:1").await.unwrap(), "v1"); // lease taken & cached
    writer.put("k:1", "v2").await.unwrap(); // blocks on revoking the holder
    assert_eq!(holder.get("k:1").await.unwrap(), "v2");
}

#[tokio::test]
async fn list_leases_are_revoked_too() {
    let (master, _storage) = single_node_storage().await;
    let holder = leasing_libstore(&master).await;
    let writer = Libstore::new(&master, "", LeaseMode::Never).await.unwrap();

    writer.append_to_list("l:1", "a").await.unwrap();
    assert_eq!(holder.get_list("l:1").await.unwrap(), vec!["a"]);
    writer.append_to_list("l:1", "b").await.unwrap();
    assert_eq!(holder.get_list("l:1").await.unwrap(), vec!["a", "b"]);
    writer.remove_from_list("l:1", "a").await.unwrap();
    assert_eq!(holder.get_list("l:1").await.unwrap(), vec!["b"]);
}

// Leased reads really are served locally: take the storage node away and the holder can still
// answer from cache for as long as its lease runs.
#[tokio::test]
async fn leased_reads_are_local() {
    let (master, storage) = single_node_storage().await;
    let holder = leasing_libstore(&master).await;
    let bystander = Libstore::new(&master, "", LeaseMode::Never).await.unwrap();

    holder.put("k:1", "v1").await.unwrap();
    assert_eq!(holder.get("k:1").await.unwrap(), "v1");

    storage.notify_one(); // storage goes dark
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The un-leased client has to go to storage, and can't:
    assert!(bystander.get("k:1").await.is_err());
    // The leaseholder doesn't have to:
    assert_eq!(holder.get("k:1").await.unwrap(), "v1");
}

#[tokio::test]
async fn bootstrap_gives_up_on_a_never_ready_cluster() {
    let (listener, host_port) = bind().await;
    // A cluster of two that will never complete:
    let srv = StorageServer::new_master(
        2,
        Node {
            node_id: 0,
            host_port: host_port.clone(),
        },
    );
    tokio::spawn(async move {
        axum::serve(listener, make_router(srv)).await.unwrap();
    });
    let err = Libstore::new(&host_port, "", LeaseMode::Never)
        .await
        .unwrap_err();
    assert!(matches!(err, tribbler_libstore::Error::NotReady { .. }));
}

#[tokio::test]
async fn bootstrap_fails_fast_when_nobody_is_listening() {
    // Bind & immediately drop, so the port is known-dead:
    let (listener, host_port) = bind().await;
    drop(listener);
    let err = Libstore::new(&host_port, "", LeaseMode::Never)
        .await
        .unwrap_err();
    assert!(matches!(err, tribbler_libstore::Error::Dial { .. }));
}

// Sanity-check the status surfaced on expected-absence paths, through the whole stack.
#[tokio::test]
async fn negative_statuses_surface_as_typed_errors() {
    let (master, _storage) = single_node_storage().await;
    let libstore = Libstore::new(&master, "", LeaseMode::Never).await.unwrap();
    assert_eq!(
        libstore.get("k:absent").await.unwrap_err().status(),
        Some(StorageStatus::KeyNotFound)
    );
    assert_eq!(
        libstore.get_list("l:absent").await.unwrap_err().status(),
        Some(StorageStatus::ItemNotFound)
    );
    assert_eq!(
        libstore.delete("k:absent").await.unwrap_err().status(),
        Some(StorageStatus::KeyNotFound)
    );
}
