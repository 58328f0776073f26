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

//! # tribserverd
//!
//! The tribbler front end: serves the user-facing trib API, backed by a [Libstore] over the
//! storage cluster whose master is named by `-m`. The libstore's revocation endpoint is merged
//! onto the same listener, at the `host:port` this daemon advertises when it takes leases.

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

use tribbler::{http::make_router, storage::Backend, TribServer};
use tribbler_libstore::{revocation_router, Libstore, LeaseMode};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to bind port {port}-- is someone already listening?: {source}"))]
    Bind { port: u16, source: std::io::Error },
    #[snafu(display("Failed to connect to the storage cluster: {source}"))]
    Libstore { source: tribbler_libstore::Error },
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
    let matches = Command::new("tribserverd")
        .version(crate_version!())
        .author(crate_authors!())
        .about("tribbler front-end server")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .num_args(1)
                .required(true)
                .value_parser(value_parser!(u16))
                .env("TRIBBLER_PORT")
                .help("port on which to serve the trib API (and lease revocations)"),
        )
        .arg(
            Arg::new("master")
                .short('m')
                .long("master")
                .num_args(1)
                .required(true)
                .env("TRIBBLER_MASTER")
                .help("the storage master's host:port"),
        )
        .arg(
            Arg::new("host")
                .short('H')
                .long("host")
                .num_args(1)
                .default_value("localhost")
                .env("TRIBBLER_HOST")
                .help("hostname under which storage nodes should call back for revocations"),
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
    let master = matches.get_one::<String>("master").unwrap(/* required */);
    let me = format!(
        "{}:{}",
        matches.get_one::<String>("host").unwrap(/* defaulted */),
        port
    );

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .context(BindSnafu { port })?;

    let libstore = Arc::new(
        Libstore::new(master, &me, LeaseMode::Normal)
            .await
            .context(LibstoreSnafu)?,
    );
    let backend: Arc<dyn Backend + Send + Sync> = libstore.clone();
    let trib = Arc::new(TribServer::new(backend));

    let nfy = Arc::new(Notify::new());
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to subscribe to SIGTERM");
    let mut server = std::pin::pin!(axum::serve(
        listener,
        make_router(trib).merge(revocation_router(libstore)),
    )
    .with_graceful_shutdown({
        let nfy = nfy.clone();
        async move { nfy.notified().await }
    })
    .into_future());

    info!(port, %master, "Serving the trib API");
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
