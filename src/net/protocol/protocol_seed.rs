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

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use log::info;

use crate::{
    system::{timeout, ExecutorPtr},
    Result,
};

use super::{
    super::{
        channel::ChannelPtr,
        message::{AddrsMessage, GetAddrsMessage},
        message_subscriber::MessageSubscription,
        p2p::P2pPtr,
    },
    ProtocolBase, ProtocolBasePtr,
};

/// One-shot address harvest, attached only inside seed sessions. Requests
/// the seed's address book, records it into the host pool, and finishes;
/// the owning session then closes the channel. Bounded by the germination
/// window.
pub struct ProtocolSeed {
    channel: ChannelPtr,
    addrs_sub: MessageSubscription<AddrsMessage>,
    p2p: P2pPtr,
}

impl ProtocolSeed {
    pub async fn init(channel: ChannelPtr, p2p: P2pPtr) -> ProtocolBasePtr {
        let message_subsystem = channel.message_subsystem();
        message_subsystem.add_dispatch::<AddrsMessage>().await;

        let addrs_sub =
            channel.subscribe_msg::<AddrsMessage>().await.expect("Missing AddrsMessage dispatcher!");

        Arc::new(Self { channel, addrs_sub, p2p })
    }
}

#[async_trait]
impl ProtocolBase for ProtocolSeed {
    /// Runs the whole harvest inline, so the owning session can await it.
    async fn start(self: Arc<Self>, _executor: ExecutorPtr) -> Result<()> {
        let settings = self.p2p.settings();

        // Advertise our own address so the seed can propagate it
        if let Some(external) = &settings.external_addr {
            self.channel.send(&AddrsMessage { addrs: vec![external.clone()] }).await?;
        }

        self.channel.send(&GetAddrsMessage {}).await?;

        let addrs = timeout(
            Duration::from_secs(settings.channel_germination_seconds as u64),
            self.addrs_sub.receive(),
        )
        .await?;

        info!(
            target: "net::protocol_seed",
            "Harvested {} addrs from seed {}", addrs.addrs.len(), self.channel.address()
        );
        self.p2p.hosts().store_many(addrs.addrs.clone()).await;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "ProtocolSeed"
    }
}
