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

//! # http
//!
//! The trib tier's RPC surface. Mutations ride on `POST`, queries on `GET` (with JSON bodies
//! where they take arguments). Negative answers (`NoSuchUser` & friends) are `200`s carrying
//! their status; an HTTP error from these endpoints means the request never got a proper answer
//! (storage unreachable, mid-bootstrap, and so on).

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use http::StatusCode;
use tap::Pipe;
use tower_http::trace::TraceLayer;
use tracing::error;

use tribbler_shared::rpc::{
    DeleteTribbleArgs, PostTribbleArgs, SubscriptionArgs, TribReply, UserArgs,
};

use crate::server::TribServer;

/// Render a trib-level result: statuses pass through, errors become 500s
fn render<R>(result: crate::server::Result<R>) -> axum::response::Response
where
    R: serde::Serialize,
{
    match result {
        Ok(reply) => Json(reply).into_response(),
        Err(err) => {
            error!("{err:?}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthcheck() -> &'static str {
    "GOOD"
}

async fn create_user(
    State(trib): State<Arc<TribServer>>,
    Json(args): Json<UserArgs>,
) -> axum::response::Response {
    trib.create_user(&args.user_id)
        .await
        .map(|status| TribReply { status })
        .pipe(render)
}

async fn add_subscription(
    State(trib): State<Arc<TribServer>>,
    Json(args): Json<SubscriptionArgs>,
) -> axum::response::Response {
    trib.add_subscription(&args.user_id, &args.target_user_id)
        .await
        .map(|status| TribReply { status })
        .pipe(render)
}

async fn remove_subscription(
    State(trib): State<Arc<TribServer>>,
    Json(args): Json<SubscriptionArgs>,
) -> axum::response::Response {
    trib.remove_subscription(&args.user_id, &args.target_user_id)
        .await
        .map(|status| TribReply { status })
        .pipe(render)
}

async fn get_friends(
    State(trib): State<Arc<TribServer>>,
    Json(args): Json<UserArgs>,
) -> axum::response::Response {
    trib.get_friends(&args.user_id).await.pipe(render)
}

async fn post_tribble(
    State(trib): State<Arc<TribServer>>,
    Json(args): Json<PostTribbleArgs>,
) -> axum::response::Response {
    trib.post_tribble(&args.user_id, &args.contents)
        .await
        .pipe(render)
}

async fn delete_tribble(
    State(trib): State<Arc<TribServer>>,
    Json(args): Json<DeleteTribbleArgs>,
) -> axum::response::Response {
    trib.delete_tribble(&args.user_id, &args.post_key)
        .await
        .map(|status| TribReply { status })
        .pipe(render)
}

async fn get_tribbles(
    State(trib): State<Arc<TribServer>>,
    Json(args): Json<UserArgs>,
) -> axum::response::Response {
    trib.get_tribbles(&args.user_id).await.pipe(render)
}

async fn get_tribbles_by_subscription(
    State(trib): State<Arc<TribServer>>,
    Json(args): Json<UserArgs>,
) -> axum::response::Response {
    trib.get_tribbles_by_subscription(&args.user_id)
        .await
        .pipe(render)
}

/// The trib API
pub fn make_router(state: Arc<TribServer>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/trib/create-user", post(create_user))
        .route("/trib/add-subscription", post(add_subscription))
        .route("/trib/remove-subscription", post(remove_subscription))
        .route("/trib/friends", get(get_friends))
        .route("/trib/post", post(post_tribble))
        .route("/trib/delete", post(delete_tribble))
        .route("/trib/tribbles", get(get_tribbles))
        .route("/trib/feed", get(get_tribbles_by_subscription))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
