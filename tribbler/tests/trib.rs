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

//! # trib integration tests
//!
//! The user-level contract, exercised through the full stack: TribServer over a Libstore over a
//! live storage node.

use std::sync::Arc;

use tokio::net::TcpListener;

use tribbler::{http::make_router, TribServer};
use tribbler_libstore::{LeaseMode, Libstore};
use tribbler_shared::rpc::{Node, TribReply, TribStatus, UserArgs};
use tribbler_storage::{make_router as make_storage_router, StorageServer};

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host_port = listener.local_addr().unwrap().to_string();
    (listener, host_port)
}

/// A complete single-storage-node stack
async fn stack() -> TribServer {
    let (listener, master) = bind().await;
    let srv = StorageServer::new_master(
        1,
        Node {
            node_id: 0,
            host_port: master.clone(),
        },
    );
    tokio::spawn(async move {
        axum::serve(listener, make_storage_router(srv)).await.unwrap();
    });
    let libstore = Libstore::new(&master, "", LeaseMode::Never).await.unwrap();
    TribServer::new(Arc::new(libstore))
}

#[tokio::test]
async fn creating_a_user_twice() {
    let trib = stack().await;
    assert_eq!(trib.create_user("user").await.unwrap(), TribStatus::Ok);
    assert_eq!(trib.create_user("user").await.unwrap(), TribStatus::Exists);
}

#[tokio::test]
async fn a_hundred_posts_come_back_newest_first() {
    let trib = stack().await;
    trib.create_user("tribUser").await.unwrap();
    for i in 0..100 {
        let reply = trib
            .post_tribble("tribUser", &format!("contents{i}"))
            .await
            .unwrap();
        assert_eq!(reply.status, TribStatus::Ok);
    }
    let feed = trib.get_tribbles("tribUser").await.unwrap();
    assert_eq!(feed.status, TribStatus::Ok);
    assert_eq!(feed.tribbles.len(), 100);
    assert_eq!(feed.tribbles[0].contents, "contents99");
    assert_eq!(feed.tribbles[99].contents, "contents0");
    assert!(feed
        .tribbles
        .windows(2)
        .all(|pair| pair[0].posted >= pair[1].posted));
}

#[tokio::test]
async fn mutual_subscribers_are_friends() {
    let trib = stack().await;
    trib.create_user("a").await.unwrap();
    trib.create_user("b").await.unwrap();
    assert_eq!(trib.add_subscription("a", "b").await.unwrap(), TribStatus::Ok);
    assert_eq!(trib.add_subscription("b", "a").await.unwrap(), TribStatus::Ok);
    assert_eq!(
        trib.get_friends("a").await.unwrap().user_ids,
        vec!["b".to_owned()]
    );
}

#[tokio::test]
async fn unsubscribing_twice() {
    let trib = stack().await;
    trib.create_user("a").await.unwrap();
    trib.create_user("b").await.unwrap();
    trib.add_subscription("a", "b").await.unwrap();
    assert_eq!(
        trib.remove_subscription("a", "b").await.unwrap(),
        TribStatus::Ok
    );
    assert_eq!(
        trib.remove_subscription("a", "b").await.unwrap(),
        TribStatus::NoSuchTargetUser
    );
}

#[tokio::test]
async fn deleted_tribbles_leave_the_feed() {
    let trib = stack().await;
    trib.create_user("u").await.unwrap();
    let post_key = trib.post_tribble("u", "x").await.unwrap().post_key;
    trib.post_tribble("u", "y").await.unwrap();
    assert_eq!(
        trib.delete_tribble("u", &post_key).await.unwrap(),
        TribStatus::Ok
    );
    assert_eq!(
        trib.delete_tribble("u", &post_key).await.unwrap(),
        TribStatus::NoSuchPost
    );
    let feed = trib.get_tribbles("u").await.unwrap();
    assert_eq!(feed.tribbles.len(), 1);
    assert_eq!(feed.tribbles[0].contents, "y");
}

#[tokio::test]
async fn subscription_feeds_merge_across_authors() {
    let trib = stack().await;
    for user in ["reader", "u0", "u1"] {
        trib.create_user(user).await.unwrap();
    }
    trib.add_subscription("reader", "u0").await.unwrap();
    trib.add_subscription("reader", "u1").await.unwrap();
    for i in 0..3 {
        trib.post_tribble("u0", &format!("u0-{i}")).await.unwrap();
        trib.post_tribble("u1", &format!("u1-{i}")).await.unwrap();
    }
    let feed = trib.get_tribbles_by_subscription("reader").await.unwrap();
    assert_eq!(feed.tribbles.len(), 6);
    assert!(feed
        .tribbles
        .windows(2)
        .all(|pair| pair[0].posted >= pair[1].posted));
    // Our own posts aren't in our subscription feed:
    assert!(feed.tribbles.iter().all(|t| t.user_id != "reader"));
}

#[tokio::test]
async fn unknown_users_are_refused_everywhere() {
    let trib = stack().await;
    trib.create_user("real").await.unwrap();
    assert_eq!(
        trib.post_tribble("ghost", "boo").await.unwrap().status,
        TribStatus::NoSuchUser
    );
    assert_eq!(
        trib.get_tribbles("ghost").await.unwrap().status,
        TribStatus::NoSuchUser
    );
    assert_eq!(
        trib.get_tribbles_by_subscription("ghost").await.unwrap().status,
        TribStatus::NoSuchUser
    );
    assert_eq!(
        trib.get_friends("ghost").await.unwrap().status,
        TribStatus::NoSuchUser
    );
    assert_eq!(
        trib.add_subscription("real", "ghost").await.unwrap(),
        TribStatus::NoSuchTargetUser
    );
    assert_eq!(
        trib.delete_tribble("ghost", "ghost:post_0_0").await.unwrap(),
        TribStatus::NoSuchUser
    );
}

// One pass over the HTTP surface itself; the semantics above go through the library API.
#[tokio::test]
async fn the_trib_api_speaks_json() {
    let trib = Arc::new(stack().await);
    let (listener, host_port) = bind().await;
    tokio::spawn(async move {
        axum::serve(listener, make_router(trib)).await.unwrap();
    });

    let client = reqwest::Client::new();
    let reply = client
        .post(format!("http://{host_port}/trib/create-user"))
        .json(&UserArgs {
            user_id: "roc".to_owned(),
        })
        .send()
        .await
        .unwrap()
        .json::<TribReply>()
        .await
        .unwrap();
    assert_eq!(reply.status, TribStatus::Ok);

    let reply = client
        .get(format!("http://{host_port}/trib/friends"))
        .json(&UserArgs {
            user_id: "roc".to_owned(),
        })
        .send()
        .await
        .unwrap()
        .json::<tribbler_shared::rpc::GetFriendsReply>()
        .await
        .unwrap();
    assert_eq!(reply.status, TribStatus::Ok);
    assert!(reply.user_ids.is_empty());

    assert_eq!(
        client
            .get(format!("http://{host_port}/healthcheck"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap(),
        "GOOD"
    );
}
