/* This file is part of Vesper
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::sync::Arc;

use easy_parallel::Parallel;
use log::{error, info};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use smol::Executor;
use structopt::StructOpt;
use url::Url;

use vesper::{
    net::{NetAddr, P2p, Settings},
    system::ExecutorPtr,
    util::path::expand_path,
    Error, Result,
};

/// vesperd cli
#[derive(Debug, StructOpt)]
#[structopt(name = "vesperd", about = "Vesper network daemon")]
struct Args {
    /// Network to join (mainnet, testnet)
    #[structopt(long, default_value = "mainnet")]
    network: String,

    /// Override the inbound port (0 disables listening)
    #[structopt(long)]
    inbound_port: Option<u16>,

    /// Override the hosts file location
    #[structopt(long)]
    hosts_file: Option<String>,

    /// Our own advertised address (tcp://ip:port)
    #[structopt(long)]
    external_addr: Option<Url>,

    /// Additional peers to connect to
    #[structopt(long)]
    connect: Vec<Url>,

    /// Increase verbosity (-vvv supported)
    #[structopt(short, parse(from_occurrences))]
    verbose: u8,
}

async fn realmain(settings: Settings, ex: ExecutorPtr) -> Result<()> {
    let p2p = P2p::new(settings, ex.clone()).await;

    info!("Starting the P2P network");
    p2p.clone().start().await?;
    p2p.clone().run().await?;

    let (term_tx, term_rx) = smol::channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = term_tx.try_send(());
    })
    .map_err(|_| Error::OperationFailed)?;

    let _ = term_rx.recv().await;
    info!("Caught termination signal, cleaning up and exiting...");

    if let Err(e) = p2p.clone().stop().await {
        error!("Failed stopping the P2P network: {}", e);
    }

    info!("Shut down successfully");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::from_args();

    let log_level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    TermLogger::init(log_level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto)?;

    let mut settings = match args.network.as_str() {
        "mainnet" => Settings::mainnet(),
        "testnet" => Settings::testnet(),
        other => {
            error!("Unknown network \"{}\"", other);
            return Err(Error::OperationFailed)
        }
    };

    if let Some(port) = args.inbound_port {
        settings.inbound_port = port;
    }
    if let Some(path) = &args.hosts_file {
        settings.hosts_file = expand_path(path)?;
    }
    if let Some(url) = &args.external_addr {
        settings.external_addr = Some(NetAddr::from_url(url)?);
    }
    settings.peers.extend(args.connect.iter().cloned());

    let nthreads = settings.threads;
    let ex = Arc::new(Executor::new());
    let ex2 = ex.clone();
    let (signal, shutdown) = smol::channel::unbounded::<()>();

    let (_, result) = Parallel::new()
        .each(0..nthreads, |_| smol::future::block_on(ex.run(shutdown.recv())))
        .finish(|| {
            smol::future::block_on(async move {
                realmain(settings, ex2).await?;
                drop(signal);
                Ok(())
            })
        });

    result
}
