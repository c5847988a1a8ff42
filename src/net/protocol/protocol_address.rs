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

use async_trait::async_trait;
use log::debug;

use crate::{system::ExecutorPtr, Result};

use super::{
    super::{
        channel::ChannelPtr,
        message::{AddrsMessage, GetAddrsMessage, ADDRS_MIN_VERSION, MAX_ADDRS_PER_MESSAGE},
        message_subscriber::MessageSubscription,
        p2p::P2pPtr,
    },
    ProtocolBase, ProtocolBasePtr, ProtocolJobsManager, ProtocolJobsManagerPtr,
};

/// Address gossip. On promotion asks the peer for its address book, feeds
/// every received batch into the host pool, and serves the peer's own
/// requests with a bounded random sample. Re-polls when the channel's
/// revival timer fires.
pub struct ProtocolAddress {
    channel: ChannelPtr,
    addrs_sub: MessageSubscription<AddrsMessage>,
    getaddrs_sub: MessageSubscription<GetAddrsMessage>,
    jobsman: ProtocolJobsManagerPtr,
    p2p: P2pPtr,
}

impl ProtocolAddress {
    pub async fn init(channel: ChannelPtr, p2p: P2pPtr) -> ProtocolBasePtr {
        let message_subsystem = channel.message_subsystem();
        message_subsystem.add_dispatch::<AddrsMessage>().await;
        message_subsystem.add_dispatch::<GetAddrsMessage>().await;

        let addrs_sub =
            channel.subscribe_msg::<AddrsMessage>().await.expect("Missing AddrsMessage dispatcher!");
        let getaddrs_sub = channel
            .subscribe_msg::<GetAddrsMessage>()
            .await
            .expect("Missing GetAddrsMessage dispatcher!");

        Arc::new(Self {
            channel: channel.clone(),
            addrs_sub,
            getaddrs_sub,
            jobsman: ProtocolJobsManager::new("ProtocolAddress", channel),
            p2p,
        })
    }

    /// Every received address batch goes into the host pool; blacklisted
    /// and own addresses are dropped there silently.
    async fn handle_receive_addrs(self: Arc<Self>) -> Result<()> {
        loop {
            let addrs = self.addrs_sub.receive().await?;
            debug!(
                target: "net::protocol_address",
                "Received {} addrs from {}", addrs.addrs.len(), self.channel.address()
            );
            self.p2p.hosts().store_many(addrs.addrs.clone()).await;
        }
    }

    async fn handle_receive_getaddrs(self: Arc<Self>) -> Result<()> {
        loop {
            let _ = self.getaddrs_sub.receive().await?;
            let sample = self.p2p.hosts().sample(MAX_ADDRS_PER_MESSAGE).await;
            debug!(
                target: "net::protocol_address",
                "Sending {} addrs to {}", sample.len(), self.channel.address()
            );
            self.channel.send(&AddrsMessage { addrs: sample }).await?;
        }
    }

    /// A quiet channel re-polls the remote's address book.
    async fn handle_revival(self: Arc<Self>) -> Result<()> {
        let revival_sub = self.channel.subscribe_revival().await;
        loop {
            revival_sub.receive().await;
            self.channel.send(&GetAddrsMessage {}).await?;
        }
    }
}

#[async_trait]
impl ProtocolBase for ProtocolAddress {
    async fn start(self: Arc<Self>, executor: ExecutorPtr) -> Result<()> {
        self.jobsman.clone().start(executor.clone());
        self.jobsman.clone().spawn(self.clone().handle_receive_addrs(), executor.clone()).await;
        self.jobsman.clone().spawn(self.clone().handle_receive_getaddrs(), executor.clone()).await;
        self.jobsman.clone().spawn(self.clone().handle_revival(), executor.clone()).await;

        // Advertise ourselves if we are reachable
        let settings = self.p2p.settings();
        if let Some(external) = &settings.external_addr {
            self.channel.send(&AddrsMessage { addrs: vec![external.clone()] }).await?;
        }

        // Ancient peers do not understand address gossip
        let remote_info = self.channel.remote_info().await;
        if remote_info.version >= ADDRS_MIN_VERSION {
            self.channel.send(&GetAddrsMessage {}).await?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "ProtocolAddress"
    }
}
