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

use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
};

use darkfi_serial::serialize;
use easy_parallel::Parallel;
use smol::Executor;
use url::Url;

use crate::{
    system::{msleep, ExecutorPtr},
    util::file::save_file,
    Error,
};

use super::{
    channel::Channel,
    connections::Connections,
    message::NetAddr,
    p2p::P2p,
    settings::Settings,
};

fn init_logger() {
    let _ = simplelog::SimpleLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
    );
}

fn localhost(port: u16) -> NetAddr {
    NetAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port, 0)
}

fn testdir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Three nodes: a listener, a seeder whose host pool knows the listener,
/// and a client that seeds from the seeder and then fills its outbound
/// slot with the listener.
#[test]
fn p2p_seed_then_outbound_bootstrap() {
    init_logger();

    const LISTENER_PORT: u16 = 42101;
    const SEEDER_PORT: u16 = 42102;

    let base = testdir("vesper_test_bootstrap");

    let ex: ExecutorPtr = Arc::new(Executor::new());
    let (signal, shutdown) = smol::channel::unbounded::<()>();
    let ex_ = ex.clone();

    Parallel::new()
        .each(0..4, |_| smol::future::block_on(ex_.run(shutdown.recv())))
        .finish(|| {
            smol::future::block_on(async move {
                let listener = P2p::new(
                    Settings {
                        inbound_port: LISTENER_PORT,
                        outbound_connections: 0,
                        connection_limit: 8,
                        external_addr: Some(localhost(LISTENER_PORT)),
                        hosts_file: base.join("listener_hosts.cache"),
                        channel_handshake_seconds: 5,
                        connect_timeout_seconds: 5,
                        ..Default::default()
                    },
                    ex.clone(),
                )
                .await;
                listener.clone().start().await.unwrap();
                listener.clone().run().await.unwrap();

                // This registration must see the client's future channel
                let listener_sub = listener.subscribe_channel().await.unwrap();

                // The seeder knows about the listener through its
                // persisted host pool
                let seeder_hosts = base.join("seeder_hosts.cache");
                save_file(&seeder_hosts, &serialize(&vec![localhost(LISTENER_PORT)])).unwrap();

                let seeder = P2p::new(
                    Settings {
                        inbound_port: SEEDER_PORT,
                        outbound_connections: 0,
                        connection_limit: 8,
                        hosts_file: seeder_hosts,
                        channel_handshake_seconds: 5,
                        connect_timeout_seconds: 5,
                        ..Default::default()
                    },
                    ex.clone(),
                )
                .await;
                seeder.clone().start().await.unwrap();
                seeder.clone().run().await.unwrap();

                let client = P2p::new(
                    Settings {
                        inbound_port: 0,
                        outbound_connections: 1,
                        connect_batch_size: 2,
                        seeds: vec![
                            Url::parse(&format!("tcp://127.0.0.1:{SEEDER_PORT}")).unwrap()
                        ],
                        hosts_file: base.join("client_hosts.cache"),
                        channel_handshake_seconds: 5,
                        connect_timeout_seconds: 5,
                        ..Default::default()
                    },
                    ex.clone(),
                )
                .await;

                // start blocks until seeding finished
                client.clone().start().await.unwrap();
                assert!(client.address_count().await >= 1);

                client.clone().run().await.unwrap();

                let mut connected = false;
                for _ in 0..100 {
                    if client.connections_count().await == 1 {
                        connected = true;
                        break
                    }
                    msleep(100).await;
                }
                assert!(connected, "outbound slot never filled");

                let mut accepted = false;
                for _ in 0..100 {
                    if listener.connections_count().await == 1 {
                        accepted = true;
                        break
                    }
                    msleep(100).await;
                }
                assert!(accepted, "listener never promoted the inbound channel");

                // The event bus delivered the promoted channel
                let event = listener_sub.receive().await;
                assert!(event.is_ok());

                // A registration outstanding at stop time is flushed with
                // ServiceStopped
                let client_sub = client.subscribe_channel().await.unwrap();

                client.clone().stop().await.unwrap();
                assert!(matches!(client.clone().stop().await, Err(Error::ServiceStopped)));
                assert!(matches!(client_sub.receive().await, Err(Error::ServiceStopped)));
                assert_eq!(client.connections_count().await, 0);
                assert!(base.join("client_hosts.cache").exists());

                seeder.clone().stop().await.unwrap();
                listener.clone().stop().await.unwrap();

                drop(signal);
            })
        });
}

/// Dialing our own inbound port must be rejected through the pending
/// nonce registry, leaving no connection and no stale nonce behind.
#[test]
fn p2p_self_connection_rejected() {
    init_logger();

    const PORT: u16 = 42111;

    let base = testdir("vesper_test_selfconn");

    let ex: ExecutorPtr = Arc::new(Executor::new());
    let (signal, shutdown) = smol::channel::unbounded::<()>();
    let ex_ = ex.clone();

    Parallel::new()
        .each(0..4, |_| smol::future::block_on(ex_.run(shutdown.recv())))
        .finish(|| {
            smol::future::block_on(async move {
                let node = P2p::new(
                    Settings {
                        inbound_port: PORT,
                        outbound_connections: 0,
                        manual_attempt_limit: 1,
                        external_addr: Some(localhost(PORT)),
                        hosts_file: base.join("hosts.cache"),
                        channel_handshake_seconds: 5,
                        connect_timeout_seconds: 5,
                        ..Default::default()
                    },
                    ex.clone(),
                )
                .await;

                node.clone().start().await.unwrap();
                node.clone().run().await.unwrap();

                // Only the accepting side holds the registered nonce and
                // detects the self-connection; the dialing side must not
                // fail with AcceptFailed, it just sees its handshake die
                // when the remote end drops us
                let result = node.connect("127.0.0.1", PORT).await;
                assert!(result.is_err());
                assert!(!matches!(result, Err(Error::AcceptFailed)));

                let mut drained = false;
                for _ in 0..50 {
                    if node.pending_count().await == 0 && node.connections_count().await == 0 {
                        drained = true;
                        break
                    }
                    msleep(100).await;
                }
                assert!(drained, "self-connection left state behind");

                node.clone().stop().await.unwrap();
                drop(signal);
            })
        });
}

/// Lifecycle state machine: start is legal only from stopped, run only
/// after started, stop only once.
#[test]
fn p2p_lifecycle_gating() {
    init_logger();

    let base = testdir("vesper_test_lifecycle");

    let ex: ExecutorPtr = Arc::new(Executor::new());
    let (signal, shutdown) = smol::channel::unbounded::<()>();
    let ex_ = ex.clone();

    Parallel::new()
        .each(0..4, |_| smol::future::block_on(ex_.run(shutdown.recv())))
        .finish(|| {
            smol::future::block_on(async move {
                let node = P2p::new(
                    Settings {
                        inbound_port: 0,
                        outbound_connections: 0,
                        hosts_file: base.join("hosts.cache"),
                        ..Default::default()
                    },
                    ex.clone(),
                )
                .await;

                // run before start
                assert!(matches!(node.clone().run().await, Err(Error::OperationFailed)));

                node.clone().start().await.unwrap();
                assert!(matches!(node.clone().start().await, Err(Error::OperationFailed)));

                node.clone().run().await.unwrap();
                assert!(matches!(node.clone().run().await, Err(Error::OperationFailed)));

                node.clone().stop().await.unwrap();
                assert!(matches!(node.clone().stop().await, Err(Error::ServiceStopped)));

                // The host pool was persisted on stop
                assert!(base.join("hosts.cache").exists());

                // A stopped node can be started again
                node.clone().start().await.unwrap();
                node.clone().stop().await.unwrap();

                drop(signal);
            })
        });
}

/// Connection registry admission policy, driven with synthetic remote
/// addresses over real (unstarted) channels.
#[test]
fn connections_admission_policy() {
    init_logger();

    smol::block_on(async {
        let listener = smol::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let settings = Arc::new(Settings { connection_limit: 2, ..Default::default() });
        let connections = Connections::new(settings.clone());

        let mut channels = vec![];
        for i in 1..=4u8 {
            let stream = smol::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            let addr = NetAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, i)), 8333, 0);
            channels.push(Channel::new(stream, addr, settings.clone()).await);
        }

        connections.store(channels[0].clone()).await.unwrap();
        assert_eq!(connections.count().await, 1);

        // Same remote IP as channels[0]
        let stream = smol::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let dup = Channel::new(
            stream,
            NetAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 9999, 0),
            settings.clone(),
        )
        .await;
        assert!(matches!(connections.store(dup).await, Err(Error::AddressInUse)));

        connections.store(channels[1].clone()).await.unwrap();
        assert!(matches!(
            connections.store(channels[2].clone()).await,
            Err(Error::ResourceLimit)
        ));
        assert_eq!(connections.count().await, 2);

        // Removing a channel makes room again
        connections.remove(&channels[0]).await;
        connections.store(channels[2].clone()).await.unwrap();

        // stop empties the registry and refuses later stores
        connections.stop(Error::ServiceStopped).await;
        assert_eq!(connections.count().await, 0);
        assert!(matches!(
            connections.store(channels[3].clone()).await,
            Err(Error::ServiceStopped)
        ));
    });
}
