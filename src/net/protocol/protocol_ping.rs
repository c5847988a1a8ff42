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
use log::{debug, warn};
use rand::{rngs::OsRng, Rng};

use crate::{
    system::{sleep, timeout, ExecutorPtr},
    Error, Result,
};

use super::{
    super::{
        channel::ChannelPtr,
        message::{PingMessage, PongMessage},
        message_subscriber::MessageSubscription,
        p2p::P2pPtr,
        settings::SettingsPtr,
    },
    ProtocolBase, ProtocolBasePtr, ProtocolJobsManager, ProtocolJobsManagerPtr,
};

/// How long we wait for the echoed pong before killing the channel.
const PONG_TIMEOUT_SECONDS: u64 = 30;

/// Keep-alive. Sends a nonced ping every heartbeat interval and requires
/// the matching pong within the tolerance; answers the peer's pings.
pub struct ProtocolPing {
    channel: ChannelPtr,
    ping_sub: MessageSubscription<PingMessage>,
    pong_sub: MessageSubscription<PongMessage>,
    jobsman: ProtocolJobsManagerPtr,
    settings: SettingsPtr,
}

impl ProtocolPing {
    pub async fn init(channel: ChannelPtr, p2p: P2pPtr) -> ProtocolBasePtr {
        let message_subsystem = channel.message_subsystem();
        message_subsystem.add_dispatch::<PingMessage>().await;
        message_subsystem.add_dispatch::<PongMessage>().await;

        let ping_sub =
            channel.subscribe_msg::<PingMessage>().await.expect("Missing PingMessage dispatcher!");
        let pong_sub =
            channel.subscribe_msg::<PongMessage>().await.expect("Missing PongMessage dispatcher!");

        Arc::new(Self {
            channel: channel.clone(),
            ping_sub,
            pong_sub,
            jobsman: ProtocolJobsManager::new("ProtocolPing", channel),
            settings: p2p.settings(),
        })
    }

    async fn run_ping_pong(self: Arc<Self>) -> Result<()> {
        debug!(target: "net::protocol_ping", "ProtocolPing::run_ping_pong() [START]");
        loop {
            sleep(self.settings.channel_heartbeat_minutes as u64 * 60).await;

            let nonce: u64 = OsRng.gen();
            self.channel.send(&PingMessage { nonce }).await?;

            let pong = timeout(
                Duration::from_secs(PONG_TIMEOUT_SECONDS),
                self.pong_sub.receive(),
            )
            .await;

            match pong {
                Ok(pong) => {
                    if pong.nonce != nonce {
                        warn!(
                            target: "net::protocol_ping",
                            "Peer {} replied with wrong pong nonce", self.channel.address()
                        );
                        self.channel.clone().stop(Error::ChannelTimeout).await;
                        return Ok(())
                    }
                    debug!(target: "net::protocol_ping", "Peer {} is alive", self.channel.address());
                }
                Err(_) => {
                    warn!(
                        target: "net::protocol_ping",
                        "Peer {} missed its pong, stopping channel", self.channel.address()
                    );
                    self.channel.clone().stop(Error::ChannelTimeout).await;
                    return Ok(())
                }
            }
        }
    }

    async fn reply_to_ping(self: Arc<Self>) -> Result<()> {
        debug!(target: "net::protocol_ping", "ProtocolPing::reply_to_ping() [START]");
        loop {
            let ping = self.ping_sub.receive().await?;
            self.channel.send(&PongMessage { nonce: ping.nonce }).await?;
        }
    }
}

#[async_trait]
impl ProtocolBase for ProtocolPing {
    async fn start(self: Arc<Self>, executor: ExecutorPtr) -> Result<()> {
        self.jobsman.clone().start(executor.clone());
        self.jobsman.clone().spawn(self.clone().run_ping_pong(), executor.clone()).await;
        self.jobsman.clone().spawn(self.clone().reply_to_ping(), executor.clone()).await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ProtocolPing"
    }
}
