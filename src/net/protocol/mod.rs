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

use crate::{system::ExecutorPtr, Result};

use super::{
    p2p::P2pPtr,
    session::{SESSION_DEFAULT, SESSION_SEED},
};

/// Address gossip
pub mod protocol_address;
pub use protocol_address::ProtocolAddress;

/// Supervises a protocol's detached tasks
pub mod protocol_jobs_manager;
pub use protocol_jobs_manager::{ProtocolJobsManager, ProtocolJobsManagerPtr};

/// Keep-alive ping/pong
pub mod protocol_ping;
pub use protocol_ping::ProtocolPing;

/// Session-selected protocol attachment
pub mod protocol_registry;
pub use protocol_registry::ProtocolRegistry;

/// One-shot address harvest for seed sessions
pub mod protocol_seed;
pub use protocol_seed::ProtocolSeed;

/// Version/verack handshake
pub mod protocol_version;
pub use protocol_version::ProtocolVersion;

/// Bitcoin protocol state machine, one instance per channel.
#[async_trait]
pub trait ProtocolBase: Send + Sync {
    async fn start(self: Arc<Self>, executor: ExecutorPtr) -> Result<()>;

    fn name(&self) -> &'static str;
}

pub type ProtocolBasePtr = Arc<dyn ProtocolBase + Send + Sync>;

/// Register the stock protocols on the coordinator's registry: keep-alive
/// and address gossip on every long-lived session, the harvest protocol on
/// seed sessions only. The version handshake is driven directly by the
/// sessions and is not registered here.
pub async fn register_default_protocols(p2p: P2pPtr) {
    let registry = p2p.protocol_registry();

    registry
        .register(SESSION_DEFAULT, |channel, p2p| async move {
            ProtocolPing::init(channel, p2p).await
        })
        .await;

    registry
        .register(SESSION_DEFAULT, |channel, p2p| async move {
            ProtocolAddress::init(channel, p2p).await
        })
        .await;

    registry
        .register(SESSION_SEED, |channel, p2p| async move {
            ProtocolSeed::init(channel, p2p).await
        })
        .await;
}
