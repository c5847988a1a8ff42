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
    fmt,
    net::IpAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use log::{debug, error, info, warn};
use smol::lock::Mutex;

use crate::{system::ExecutorPtr, Error, Result};

use super::{
    channel::ChannelPtr,
    connections::{Connections, ConnectionsPtr},
    hosts::{Hosts, HostsPtr},
    message::NetAddr,
    pending::{Pending, PendingPtr},
    protocol::{register_default_protocols, ProtocolRegistry},
    session::{
        InboundSession, InboundSessionPtr, ManualSession, ManualSessionPtr, OutboundSession,
        OutboundSessionPtr, SeedSession,
    },
    settings::{Settings, SettingsPtr},
};

/// Atomic pointer to the p2p interface.
pub type P2pPtr = Arc<P2p>;

enum P2pState {
    /// Initial state, and the state after `stop`
    Stopped,
    /// The start sequence is executing
    Starting,
    /// Seeding finished, the network is not yet active
    Started,
    /// Inbound and outbound sessions are live
    Running,
}

impl fmt::Display for P2pState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Stopped => "stopped",
                Self::Starting => "starting",
                Self::Started => "started",
                Self::Running => "running",
            }
        )
    }
}

/// The stopped flag, the channel-event registrations, and their teardown
/// live under one lock, so a subscriber can never register between the
/// flag flipping and the bus draining.
struct RelayBus {
    stopped: bool,
    subscribers: Vec<smol::channel::Sender<Result<ChannelPtr>>>,
}

/// One-shot registration on the coordinator's channel event bus,
/// consumed by the first relayed event.
pub struct ChannelSubscription {
    recv_queue: smol::channel::Receiver<Result<ChannelPtr>>,
}

impl ChannelSubscription {
    /// Resolves with the next relayed channel, or `ServiceStopped` when
    /// the bus is torn down first.
    pub async fn receive(self) -> Result<ChannelPtr> {
        match self.recv_queue.recv().await {
            Ok(event) => event,
            Err(_) => Err(Error::ServiceStopped),
        }
    }
}

/// Top level peer-to-peer networking interface. Owns the worker executor
/// handle, the host pool, the connection and pending registries, and the
/// sessions, and exposes the start/run/stop lifecycle.
pub struct P2p {
    executor: ExecutorPtr,
    settings: SettingsPtr,
    state: Mutex<P2pState>,
    hosts: HostsPtr,
    connections: ConnectionsPtr,
    pending: PendingPtr,
    /// Current height of our best chain, exchanged in handshakes
    height: AtomicU64,
    protocol_registry: ProtocolRegistry,
    relay_bus: Mutex<RelayBus>,

    // We keep references to the sessions; manual stays reachable after
    // start so users can dial through it
    session_manual: Mutex<Option<ManualSessionPtr>>,
    session_inbound: Mutex<Option<InboundSessionPtr>>,
    session_outbound: Mutex<Option<OutboundSessionPtr>>,
}

impl P2p {
    /// Initialize a new p2p network.
    ///
    /// Creates the host pool, the registries, and all long-lived
    /// sessions, and registers the default protocols. Sessions reach
    /// back at us through a weak pointer.
    pub async fn new(settings: Settings, executor: ExecutorPtr) -> P2pPtr {
        let settings = Arc::new(settings);

        let self_ = Arc::new(Self {
            executor,
            settings: settings.clone(),
            state: Mutex::new(P2pState::Stopped),
            hosts: Hosts::new(settings.clone()),
            connections: Connections::new(settings.clone()),
            pending: Pending::new(),
            height: AtomicU64::new(0),
            protocol_registry: ProtocolRegistry::new(),
            relay_bus: Mutex::new(RelayBus { stopped: true, subscribers: vec![] }),
            session_manual: Mutex::new(None),
            session_inbound: Mutex::new(None),
            session_outbound: Mutex::new(None),
        });

        self_.clone().create_sessions().await;
        register_default_protocols(self_.clone()).await;

        self_
    }

    async fn create_sessions(self: Arc<Self>) {
        let parent = Arc::downgrade(&self);
        *self.session_manual.lock().await = Some(ManualSession::new(parent.clone()));
        *self.session_inbound.lock().await = Some(InboundSession::new(parent.clone()));
        *self.session_outbound.lock().await = Some(OutboundSession::new(parent));
    }

    /// Invoke the startup and seeding sequence: manual session, host pool
    /// load, then the seed session, which blocks until seeding finished.
    /// Legal only from the stopped state. Every stage short-circuits with
    /// `ServiceStopped` if `stop` lands in between, and stage errors are
    /// surfaced to the caller verbatim.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        debug!(target: "net::p2p", "P2p::start() [BEGIN]");

        {
            let mut bus = self.relay_bus.lock().await;
            if !bus.stopped {
                return Err(Error::OperationFailed)
            }
            bus.stopped = false;
        }

        *self.state.lock().await = P2pState::Starting;
        self.connections.reset().await;
        if self.session_manual.lock().await.is_none() {
            self.clone().create_sessions().await;
        }

        if let Err(e) = self.session_manual().await.start().await {
            error!(target: "net::p2p", "Failed starting manual session: {}", e);
            return Err(e)
        }

        if self.is_stopped().await {
            return Err(Error::ServiceStopped)
        }

        if let Err(e) = self.hosts.load().await {
            error!(target: "net::p2p", "Failed loading hosts: {}", e);
            return Err(e)
        }

        if self.is_stopped().await {
            return Err(Error::ServiceStopped)
        }

        // This blocks until all seed queries have finished
        let seed = SeedSession::new(Arc::downgrade(&self));
        if let Err(e) = seed.start(self.executor.clone()).await {
            error!(target: "net::p2p", "Seeding failed: {}", e);
            return Err(e)
        }

        if self.is_stopped().await {
            return Err(Error::ServiceStopped)
        }

        *self.state.lock().await = P2pState::Started;
        debug!(target: "net::p2p", "P2p::start() [END]");
        Ok(())
    }

    /// Activate the network: start the inbound and outbound sessions and
    /// dial the configured peers. Legal only after a successful `start`.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        debug!(target: "net::p2p", "P2p::run() [BEGIN]");

        {
            let state = self.state.lock().await;
            if !matches!(*state, P2pState::Started) {
                return Err(Error::OperationFailed)
            }
        }

        if self.is_stopped().await {
            return Err(Error::ServiceStopped)
        }

        if let Err(e) = self.session_inbound().await.start(self.executor.clone()).await {
            error!(target: "net::p2p", "Failed starting inbound session: {}", e);
            return Err(e)
        }

        if self.is_stopped().await {
            return Err(Error::ServiceStopped)
        }

        if let Err(e) = self.session_outbound().await.start(self.executor.clone()).await {
            error!(target: "net::p2p", "Failed starting outbound session: {}", e);
            return Err(e)
        }

        // Configured peers go through the manual session
        let manual = self.session_manual().await;
        for peer in &self.settings.peers {
            let manual_ = manual.clone();
            let peer = peer.clone();
            let executor = self.executor.clone();
            self.executor
                .spawn(async move {
                    if let Err(e) = manual_.connect_url(&peer, executor).await {
                        warn!(target: "net::p2p", "Configured peer {} failed: {}", peer, e);
                    }
                })
                .detach();
        }

        *self.state.lock().await = P2pState::Running;
        info!(target: "net::p2p", "P2P network is running");
        debug!(target: "net::p2p", "P2p::run() [END]");
        Ok(())
    }

    /// Tear the network down: flush the event bus, stop the sessions,
    /// stop every live channel, and persist the host pool. Idempotent; a
    /// second call fails with `ServiceStopped`.
    pub async fn stop(self: Arc<Self>) -> Result<()> {
        debug!(target: "net::p2p", "P2p::stop() [BEGIN]");

        {
            let mut bus = self.relay_bus.lock().await;
            if bus.stopped {
                return Err(Error::ServiceStopped)
            }
            bus.stopped = true;

            for sub in bus.subscribers.drain(..) {
                let _ = sub.try_send(Err(Error::ServiceStopped));
            }
        }

        *self.state.lock().await = P2pState::Stopped;

        // Release the session handles
        let _ = self.session_manual.lock().await.take();
        if let Some(inbound) = self.session_inbound.lock().await.take() {
            inbound.stop().await;
        }
        if let Some(outbound) = self.session_outbound.lock().await.take() {
            outbound.stop().await;
        }

        self.connections.stop(Error::ServiceStopped).await;
        self.pending.clear().await;

        if let Err(e) = self.hosts.save().await {
            error!(target: "net::p2p", "Failed saving hosts: {}", e);
        }

        info!(target: "net::p2p", "P2P network stopped");
        Ok(())
    }

    /// Whether `stop` has been called (or `start` not yet).
    pub async fn is_stopped(&self) -> bool {
        self.relay_bus.lock().await.stopped
    }

    /// Register for the next channel event. Refused once stopped, so no
    /// registration can be stranded by a concurrent `stop`.
    pub async fn subscribe_channel(&self) -> Result<ChannelSubscription> {
        let mut bus = self.relay_bus.lock().await;
        if bus.stopped {
            return Err(Error::ServiceStopped)
        }

        let (sender, recv_queue) = smol::channel::bounded(1);
        bus.subscribers.push(sender);
        Ok(ChannelSubscription { recv_queue })
    }

    /// Deliver a channel event to all current registrations, consuming
    /// them.
    pub async fn relay(&self, event: Result<ChannelPtr>) {
        let mut bus = self.relay_bus.lock().await;
        for sub in bus.subscribers.drain(..) {
            let _ = sub.try_send(event.clone());
        }
    }

    /// Dial `host:port` through the manual session.
    pub async fn connect(&self, host: &str, port: u16) -> Result<ChannelPtr> {
        if self.is_stopped().await {
            return Err(Error::ServiceStopped)
        }

        self.session_manual().await.connect(host, port, self.executor.clone()).await
    }

    // Connection registry operations

    /// Add a promoted channel to the connection registry.
    pub async fn store(&self, channel: ChannelPtr) -> Result<()> {
        self.connections.store(channel).await
    }

    /// Remove a channel from the connection registry.
    pub async fn remove(&self, channel: &ChannelPtr) {
        self.connections.remove(channel).await
    }

    /// Whether a channel to this remote IP is live.
    pub async fn connected(&self, ip: &IpAddr) -> bool {
        self.connections.exists(ip).await
    }

    pub async fn connections_count(&self) -> usize {
        self.connections.count().await
    }

    // Pending registry operations

    /// Register an in-flight handshake nonce.
    pub async fn pend(&self, nonce: u64) -> Result<()> {
        if self.is_stopped().await {
            return Err(Error::ServiceStopped)
        }

        self.pending.store(nonce).await;
        Ok(())
    }

    pub async fn unpend(&self, nonce: u64) {
        self.pending.remove(nonce).await;
    }

    /// Whether the nonce belongs to one of our own in-flight handshakes.
    pub async fn pent(&self, nonce: u64) -> bool {
        self.pending.contains(nonce).await
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.count().await
    }

    // Host pool operations

    pub async fn store_address(&self, addr: NetAddr) {
        self.hosts.store(addr).await
    }

    pub async fn store_addresses(&self, addrs: Vec<NetAddr>) {
        self.hosts.store_many(addrs).await
    }

    pub async fn remove_address(&self, addr: &NetAddr) {
        self.hosts.remove(addr).await
    }

    pub async fn fetch_address(&self) -> Result<NetAddr> {
        self.hosts.fetch().await
    }

    pub async fn address_count(&self) -> usize {
        self.hosts.count().await
    }

    // Accessors

    pub fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst)
    }

    pub fn settings(&self) -> SettingsPtr {
        self.settings.clone()
    }

    pub fn hosts(&self) -> HostsPtr {
        self.hosts.clone()
    }

    pub fn connections(&self) -> ConnectionsPtr {
        self.connections.clone()
    }

    pub fn pending(&self) -> PendingPtr {
        self.pending.clone()
    }

    pub fn protocol_registry(&self) -> &ProtocolRegistry {
        &self.protocol_registry
    }

    pub fn executor(&self) -> ExecutorPtr {
        self.executor.clone()
    }

    pub async fn state(&self) -> String {
        self.state.lock().await.to_string()
    }

    pub async fn session_manual(&self) -> ManualSessionPtr {
        self.session_manual.lock().await.as_ref().unwrap().clone()
    }

    pub async fn session_inbound(&self) -> InboundSessionPtr {
        self.session_inbound.lock().await.as_ref().unwrap().clone()
    }

    pub async fn session_outbound(&self) -> OutboundSessionPtr {
        self.session_outbound.lock().await.as_ref().unwrap().clone()
    }
}
