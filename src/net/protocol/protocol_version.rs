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
    time::Duration,
};

use log::{debug, warn};
use rand::{rngs::OsRng, Rng};

use crate::{system::timeout, util::time::unix_timestamp, Error, Result};

use super::super::{
    channel::ChannelPtr,
    message::{NetAddr, VerackMessage, VersionMessage, NODE_NETWORK, PROTOCOL_VERSION},
    message_subscriber::MessageSubscription,
    p2p::P2pPtr,
};

/// Drives the version/verack exchange that promotes a channel. This is
/// the first protocol run on every channel and is driven directly by the
/// owning session rather than attached through the registry.
pub struct ProtocolVersion {
    channel: ChannelPtr,
    version_sub: MessageSubscription<VersionMessage>,
    verack_sub: MessageSubscription<VerackMessage>,
    /// Whether we dialed this channel. Only dials register their
    /// handshake nonce; the accepting side merely checks against the
    /// registry.
    outbound: bool,
    p2p: P2pPtr,
}

impl ProtocolVersion {
    pub async fn new(channel: ChannelPtr, p2p: P2pPtr, outbound: bool) -> Arc<Self> {
        let message_subsystem = channel.message_subsystem();
        message_subsystem.add_dispatch::<VersionMessage>().await;
        message_subsystem.add_dispatch::<VerackMessage>().await;

        let version_sub = channel
            .subscribe_msg::<VersionMessage>()
            .await
            .expect("Missing VersionMessage dispatcher!");
        let verack_sub = channel
            .subscribe_msg::<VerackMessage>()
            .await
            .expect("Missing VerackMessage dispatcher!");

        Arc::new(Self { channel, version_sub, verack_sub, outbound, p2p })
    }

    /// Run the full handshake under the configured timeout. An outbound
    /// dial's handshake nonce stays registered in the pending registry
    /// for the duration and never thereafter.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        debug!(target: "net::protocol_version", "ProtocolVersion::run() [START]");
        let settings = self.p2p.settings();

        let nonce: u64 = OsRng.gen();
        if self.outbound {
            self.p2p.pend(nonce).await?;
        }

        let result = timeout(
            Duration::from_secs(settings.channel_handshake_seconds as u64),
            self.clone().exchange_versions(nonce),
        )
        .await;

        if self.outbound {
            self.p2p.unpend(nonce).await;
        }

        if let Err(e) = &result {
            debug!(
                target: "net::protocol_version",
                "Handshake with {} failed: {}", self.channel.address(), e
            );
        }

        result
    }

    async fn exchange_versions(self: Arc<Self>, nonce: u64) -> Result<()> {
        let settings = self.p2p.settings();

        let addr_from = match &settings.external_addr {
            Some(addr) => addr.clone(),
            None => NetAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0, 0),
        };

        let version = VersionMessage {
            version: PROTOCOL_VERSION,
            services: NODE_NETWORK,
            timestamp: unix_timestamp(),
            addr_recv: self.channel.address().clone(),
            addr_from,
            nonce,
            user_agent: settings.user_agent.clone(),
            start_height: self.p2p.height() as u32,
            relay: settings.relay_transactions,
        };
        self.channel.send(&version).await?;

        let remote_version = self.version_sub.receive().await?;

        // An in-flight handshake nonce coming back at us means the remote
        // end is this very node
        if self.p2p.pent(remote_version.nonce).await {
            warn!(
                target: "net::protocol_version",
                "Self-connection detected on {}, dropping", self.channel.address()
            );
            return Err(Error::AcceptFailed)
        }

        self.channel.set_remote_info(&remote_version).await;
        debug!(
            target: "net::protocol_version",
            "Peer {} runs protocol {} at height {} ({})",
            self.channel.address(),
            remote_version.version,
            remote_version.start_height,
            remote_version.user_agent,
        );

        self.channel.send(&VerackMessage {}).await?;
        let _ = self.verack_sub.receive().await?;

        debug!(target: "net::protocol_version", "ProtocolVersion::run() [END]");
        Ok(())
    }
}
