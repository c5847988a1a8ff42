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

use super::{channel::ChannelPtr, p2p::P2pPtr, protocol::ProtocolVersion};

/// Accepts up to the connection limit
pub mod inbound_session;
pub use inbound_session::{InboundSession, InboundSessionPtr};

/// User-requested dials
pub mod manual_session;
pub use manual_session::{ManualSession, ManualSessionPtr};

/// Keeps the outbound slots filled
pub mod outbound_session;
pub use outbound_session::{OutboundSession, OutboundSessionPtr};

/// Short-lived dials to the configured seeds
pub mod seed_session;
pub use seed_session::{SeedSession, SeedSessionPtr};

/// Bitflags identifying the session types a protocol attaches to.
pub type SessionBitFlag = u32;

pub const SESSION_INBOUND: SessionBitFlag = 0b0001;
pub const SESSION_OUTBOUND: SessionBitFlag = 0b0010;
pub const SESSION_MANUAL: SessionBitFlag = 0b0100;
pub const SESSION_SEED: SessionBitFlag = 0b1000;
pub const SESSION_ALL: SessionBitFlag = 0b1111;
pub const SESSION_DEFAULT: SessionBitFlag = SESSION_INBOUND | SESSION_OUTBOUND | SESSION_MANUAL;

/// Watches a promoted channel and removes it from the connection registry
/// once it stops.
pub(crate) fn remove_sub_on_stop(p2p: P2pPtr, channel: ChannelPtr, executor: ExecutorPtr) {
    executor
        .clone()
        .spawn(async move {
            if let Ok(stop_sub) = channel.subscribe_stop().await {
                stop_sub.receive().await;
            }
            debug!(
                target: "net::session",
                "Removing stopped channel {} from connections", channel.address()
            );
            p2p.remove(&channel).await;
        })
        .detach();
}

/// A session owns one discipline of channel creation (manual, seed,
/// inbound, outbound). Sessions hold the coordinator through a weak
/// pointer and keep themselves alive by capturing their own handle in the
/// tasks they spawn.
#[async_trait]
pub trait Session: Sync + Send {
    /// Upgraded pointer to the owning coordinator.
    fn p2p(&self) -> P2pPtr;

    /// Bitflag identifying this session type to the protocol registry.
    fn type_id(&self) -> SessionBitFlag;

    /// Run a fresh channel through the version handshake, promote it into
    /// the connection registry, and start its attached protocols. Seed
    /// channels skip promotion; they exist only to harvest addresses.
    async fn register_channel(
        self: Arc<Self>,
        channel: ChannelPtr,
        executor: ExecutorPtr,
    ) -> Result<()> {
        debug!(target: "net::session", "Registering channel {}", channel.address());

        let p2p = self.p2p();
        let type_id = self.type_id();

        // Construct (but do not start) the protocols selected for this
        // session type
        let protocols =
            p2p.protocol_registry().attach(type_id, channel.clone(), p2p.clone()).await;

        // The read loop must run for handshake messages to be delivered.
        // Only dialed channels register their handshake nonce; that is
        // what lets the accepting side of a self-connection spot it.
        channel.clone().start(executor.clone());

        let outbound = type_id != SESSION_INBOUND;
        let protocol_version =
            ProtocolVersion::new(channel.clone(), p2p.clone(), outbound).await;
        if let Err(e) = protocol_version.run().await {
            channel.clone().stop(e.clone()).await;
            return Err(e)
        }

        if type_id != SESSION_SEED {
            // Promote. The registry enforces the connection limit and the
            // one-channel-per-IP policy.
            if let Err(e) = p2p.store(channel.clone()).await {
                channel.clone().stop(e.clone()).await;
                return Err(e)
            }

            remove_sub_on_stop(p2p.clone(), channel.clone(), executor.clone());
            channel.clone().start_timers(executor.clone());
        }

        for protocol in protocols {
            protocol.start(executor.clone()).await?;
        }

        if type_id != SESSION_SEED {
            p2p.relay(Ok(channel.clone())).await;
        }

        Ok(())
    }
}
