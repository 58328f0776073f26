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

//! # tribstoraged
//!
//! One node of the tribbler storage cluster.
//!
//! Run the master with `-N <cluster size>` (it starts serving immediately, answering `NotReady`
//! on the data plane until the rest of the cluster registers); run everyone else with
//! `-m <master host:port>` (they register, wait for the full member list, and only then start
//! serving).

use std::{future::IntoFuture, io, sync::Arc};

use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, Command};
use snafu::{ResultExt, Snafu};
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    sync::Notify,
};
use tracing::{error, info, subscriber::set_global_default, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use tribbler_shared::rpc::Node;
use tribbler_storage::{make_router, server, StorageServer};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to bind port {port}-- is someone already listening?: {source}"))]
    Bind { port: u16, source: std::io::Error },
    #[snafu(display("Failed to join the cluster: {source}"))]
    Join { source: server::Error },
    #[snafu(display("Give either -N (master) or -m (everyone else), not both or neither"))]
    Role,
    #[snafu(display("The server exited early: {source}"))]
    Serve { source: std::io::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

type Result<T> = std::result::Result<T, Error>;

fn configure_logging(verbose: bool) -> Result<()> {
    set_global_default(
        Registry::default()
            .with(fmt::Layer::default().compact().with_writer(io::stdout))
            .with(
                EnvFilter::builder()
                    .with_default_directive(
                        if verbose { Level::DEBUG } else { Level::INFO }.into(),
                    )
                    .from_env()
                    .context(EnvFilterSnafu)?,
            ),
    )
    .context(SubscriberSnafu)
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("tribstoraged")
        .version(crate_version!())
        .author(crate_authors!())
        .about("tribbler storage node")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .num_args(1)
                .required(true)
                .value_parser(value_parser!(u16))
                .env("TRIBBLER_STORAGE_PORT")
                .help("port on which to serve storage RPCs"),
        )
        .arg(
            Arg::new("id")
                .short('i')
                .long("id")
                .num_args(1)
                .required(true)
                .value_parser(value_parser!(u32))
                .env("TRIBBLER_NODE_ID")
                .help("this node's ID; doubles as its position on the hash ring, so IDs should \
                       be spread across the 32-bit range"),
        )
        .arg(
            Arg::new("num-nodes")
                .short('N')
                .long("num-nodes")
                .num_args(1)
                .value_parser(value_parser!(usize))
                .conflicts_with("master")
                .help("run as master of a cluster of this many nodes"),
        )
        .arg(
            Arg::new("master")
                .short('m')
                .long("master")
                .num_args(1)
                .env("TRIBBLER_MASTER")
                .help("the master's host:port; run as a non-master node"),
        )
        .arg(
            Arg::new("host")
                .short('H')
                .long("host")
                .num_args(1)
                .default_value("localhost")
                .env("TRIBBLER_HOST")
                .help("hostname under which other processes should reach this node"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .help("produce prolix output"),
        )
        .get_matches();

    configure_logging(matches.get_flag("verbose"))?;

    let port = *matches.get_one::<u16>("port").unwrap(/* required */);
    let me = Node {
        node_id: *matches.get_one::<u32>("id").unwrap(/* required */),
        host_port: format!(
            "{}:{}",
            matches.get_one::<String>("host").unwrap(/* defaulted */),
            port
        ),
    };

    // Bind before bootstrap either way, so the port is ours from the start; a non-master only
    // begins *serving* once it has the member list.
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .context(BindSnafu { port })?;

    let srv: Arc<StorageServer> = match (
        matches.get_one::<usize>("num-nodes"),
        matches.get_one::<String>("master"),
    ) {
        (Some(num_nodes), None) => {
            info!(
                node_id = me.node_id,
                num_nodes = *num_nodes,
                "Starting as storage master"
            );
            StorageServer::new_master(*num_nodes, me)
        }
        (None, Some(master)) => {
            info!(node_id = me.node_id, %master, "Joining the storage cluster");
            StorageServer::join(master, me).await.context(JoinSnafu)?
        }
        _ => return RoleSnafu.fail(),
    };

    let nfy = Arc::new(Notify::new());
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to subscribe to SIGTERM");
    let mut server = std::pin::pin!(axum::serve(listener, make_router(srv))
        .with_graceful_shutdown({
            let nfy = nfy.clone();
            async move { nfy.notified().await }
        })
        .into_future());

    info!(port, "Serving storage RPCs");
    tokio::select! {
        res = &mut server => { res.context(ServeSnafu)?; }
        _ = sigterm.recv() => {
            info!("Received SIGTERM; shutting down...");
            nfy.notify_one();
            if let Err(err) = server.await {
                error!("On server shutdown: {err:#?}");
            }
        }
    }

    info!("Good-bye.");
    Ok(())
}
