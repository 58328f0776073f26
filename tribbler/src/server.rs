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
//! The user-level operations, mapped onto storage primitives through the key-naming scheme in
//! [keys](tribbler_shared::keys). [TribServer] holds no state of its own beyond a handle to
//! storage; any number of instances may front one cluster.
//!
//! The one operation with any subtlety is feed assembly: both feed reads order candidate post
//! keys by the timestamp *embedded in the key*, truncate to [FEED_LIMIT], and only then fetch
//! bodies -- over N subscriptions with M posts each that is O(N) list reads plus at most
//! [FEED_LIMIT] body reads, not O(N*M).

use std::sync::Arc;

use chrono::Utc;
use itertools::Itertools;
use snafu::{ResultExt, Snafu};
use tracing::{debug, warn};

use tribbler_shared::{
    keys,
    rpc::{GetFriendsReply, GetTribblesReply, PostTribbleReply, TribStatus, Tribble},
};

use crate::storage::{self, Backend};

/// Most tribbles either feed read will return
pub const FEED_LIMIT: usize = 100;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Storage { source: storage::Error },
    #[snafu(display("Failed to serialize a tribble: {source}"))]
    TribbleSer { source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           TribServer                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The stateless trib front end
pub struct TribServer {
    storage: Arc<dyn Backend + Send + Sync>,
}

impl TribServer {
    pub fn new(storage: Arc<dyn Backend + Send + Sync>) -> TribServer {
        TribServer { storage }
    }

    async fn user_exists(&self, user_id: &str) -> Result<bool> {
        self.storage
            .get(&keys::user_key(user_id))
            .await
            .context(StorageSnafu)
            .map(|marker| marker.is_some())
    }

    /// Create a user; `Exists` if the ID is taken
    pub async fn create_user(&self, user_id: &str) -> Result<TribStatus> {
        if self.user_exists(user_id).await? {
            return Ok(TribStatus::Exists);
        }
        self.storage
            .put(&keys::user_key(user_id), "")
            .await
            .context(StorageSnafu)?;
        Ok(TribStatus::Ok)
    }

    /// Subscribe `user_id` to `target_user_id`
    pub async fn add_subscription(
        &self,
        user_id: &str,
        target_user_id: &str,
    ) -> Result<TribStatus> {
        if !self.user_exists(user_id).await? {
            return Ok(TribStatus::NoSuchUser);
        }
        if !self.user_exists(target_user_id).await? {
            return Ok(TribStatus::NoSuchTargetUser);
        }
        if self
            .storage
            .append_to_list(&keys::sublist_key(user_id), target_user_id)
            .await
            .context(StorageSnafu)?
        {
            Ok(TribStatus::Ok)
        } else {
            Ok(TribStatus::Exists)
        }
    }

    /// Unsubscribe `user_id` from `target_user_id`; `NoSuchTargetUser` if there was no such
    /// subscription
    pub async fn remove_subscription(
        &self,
        user_id: &str,
        target_user_id: &str,
    ) -> Result<TribStatus> {
        if !self.user_exists(user_id).await? {
            return Ok(TribStatus::NoSuchUser);
        }
        if !self.user_exists(target_user_id).await? {
            return Ok(TribStatus::NoSuchTargetUser);
        }
        if self
            .storage
            .remove_from_list(&keys::sublist_key(user_id), target_user_id)
            .await
            .context(StorageSnafu)?
        {
            Ok(TribStatus::Ok)
        } else {
            Ok(TribStatus::NoSuchTargetUser)
        }
    }

    /// Mutual subscribers of `user_id`, sorted
    ///
    /// Subscription is asymmetric; friendship is the symmetric intersection, computed by
    /// checking each of our subscriptions for a subscription back.
    pub async fn get_friends(&self, user_id: &str) -> Result<GetFriendsReply> {
        if !self.user_exists(user_id).await? {
            return Ok(GetFriendsReply {
                status: TribStatus::NoSuchUser,
                user_ids: Vec::new(),
            });
        }
        let subscriptions = self
            .storage
            .get_list(&keys::sublist_key(user_id))
            .await
            .context(StorageSnafu)?
            .unwrap_or_default();
        let mut friends = Vec::new();
        for target in subscriptions {
            let theirs = self
                .storage
                .get_list(&keys::sublist_key(&target))
                .await
                .context(StorageSnafu)?
                .unwrap_or_default();
            if theirs.iter().any(|back| back == user_id) {
                friends.push(target);
            }
        }
        friends.sort();
        Ok(GetFriendsReply {
            status: TribStatus::Ok,
            user_ids: friends,
        })
    }

    /// Post a tribble on behalf of `user_id`, timestamping it here
    ///
    /// The post key embeds the timestamp and a random tie-breaker; `ItemExists` from the
    /// triblist append means we somehow collided, and is taken as a cue to regenerate the whole
    /// key (fresh timestamp and all) and try again.
    pub async fn post_tribble(&self, user_id: &str, contents: &str) -> Result<PostTribbleReply> {
        if !self.user_exists(user_id).await? {
            return Ok(PostTribbleReply {
                status: TribStatus::NoSuchUser,
                post_key: String::new(),
            });
        }
        let triblist = keys::triblist_key(user_id);
        loop {
            let posted = Utc::now();
            let nanos = posted.timestamp_nanos_opt().unwrap_or_default() as u64;
            let post_key = keys::post_key(user_id, nanos, rand::random());
            let body = serde_json::to_string(&Tribble {
                user_id: user_id.to_owned(),
                posted,
                contents: contents.to_owned(),
            })
            .context(TribbleSerSnafu)?;
            self.storage
                .put(&post_key, &body)
                .await
                .context(StorageSnafu)?;
            if self
                .storage
                .append_to_list(&triblist, &post_key)
                .await
                .context(StorageSnafu)?
            {
                return Ok(PostTribbleReply {
                    status: TribStatus::Ok,
                    post_key,
                });
            }
            debug!(%post_key, "Post-key collision; regenerating");
        }
    }

    /// Delete one of `user_id`'s tribbles; `NoSuchPost` if it isn't there
    pub async fn delete_tribble(&self, user_id: &str, post_key: &str) -> Result<TribStatus> {
        if !self.user_exists(user_id).await? {
            return Ok(TribStatus::NoSuchUser);
        }
        if !self.storage.delete(post_key).await.context(StorageSnafu)? {
            return Ok(TribStatus::NoSuchPost);
        }
        if !self
            .storage
            .remove_from_list(&keys::triblist_key(user_id), post_key)
            .await
            .context(StorageSnafu)?
        {
            return Ok(TribStatus::NoSuchPost);
        }
        Ok(TribStatus::Ok)
    }

    /// Up to [FEED_LIMIT] of `user_id`'s tribbles, newest first
    pub async fn get_tribbles(&self, user_id: &str) -> Result<GetTribblesReply> {
        if !self.user_exists(user_id).await? {
            return Ok(GetTribblesReply {
                status: TribStatus::NoSuchUser,
                tribbles: Vec::new(),
            });
        }
        let post_keys = self
            .storage
            .get_list(&keys::triblist_key(user_id))
            .await
            .context(StorageSnafu)?
            .unwrap_or_default();
        self.assemble_feed(post_keys).await
    }

    /// Up to [FEED_LIMIT] tribbles across everyone `user_id` subscribes to, newest first
    pub async fn get_tribbles_by_subscription(&self, user_id: &str) -> Result<GetTribblesReply> {
        if !self.user_exists(user_id).await? {
            return Ok(GetTribblesReply {
                status: TribStatus::NoSuchUser,
                tribbles: Vec::new(),
            });
        }
        let subscriptions = self
            .storage
            .get_list(&keys::sublist_key(user_id))
            .await
            .context(StorageSnafu)?
            .unwrap_or_default();
        let mut post_keys = Vec::new();
        for target in &subscriptions {
            post_keys.extend(
                self.storage
                    .get_list(&keys::triblist_key(target))
                    .await
                    .context(StorageSnafu)?
                    .unwrap_or_default(),
            );
        }
        self.assemble_feed(post_keys).await
    }

    /// Order candidate keys by embedded timestamp (newest first), truncate to [FEED_LIMIT], and
    /// only then fetch bodies. Keys whose bodies have been deleted in the meantime are skipped,
    /// as are keys that don't parse as post keys at all.
    async fn assemble_feed(&self, post_keys: Vec<String>) -> Result<GetTribblesReply> {
        let selected = post_keys
            .into_iter()
            .filter_map(|key| keys::post_timestamp(&key).map(|nanos| (nanos, key)))
            .sorted_by(|a, b| b.cmp(a))
            .dedup()
            .take(FEED_LIMIT);
        let mut tribbles = Vec::new();
        for (_nanos, key) in selected {
            match self.storage.get(&key).await.context(StorageSnafu)? {
                Some(body) => match serde_json::from_str::<Tribble>(&body) {
                    Ok(tribble) => tribbles.push(tribble),
                    Err(err) => warn!(%key, %err, "Skipping undecodable tribble body"),
                },
                None => debug!(%key, "Post deleted between listing & fetch; skipping"),
            }
        }
        Ok(GetTribblesReply {
            status: TribStatus::Ok,
            tribbles,
        })
    }
}
