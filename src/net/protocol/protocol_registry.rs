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

use std::{future::Future, pin::Pin};

use log::debug;
use smol::lock::Mutex;

use super::{
    super::{channel::ChannelPtr, p2p::P2pPtr, session::SessionBitFlag},
    ProtocolBasePtr,
};

type Constructor = Box<
    dyn Fn(ChannelPtr, P2pPtr) -> Pin<Box<dyn Future<Output = ProtocolBasePtr> + Send>>
        + Send
        + Sync,
>;

/// Table of protocol constructors, each tagged with the session types its
/// protocol attaches to. Consumers register custom protocols here before
/// the coordinator is started.
pub struct ProtocolRegistry {
    constructors: Mutex<Vec<(SessionBitFlag, Constructor)>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self { constructors: Mutex::new(vec![]) }
    }

    /// Register a protocol constructor for the sessions selected by
    /// `session_flags`.
    pub async fn register<C, F>(&self, session_flags: SessionBitFlag, constructor: C)
    where
        C: 'static + Fn(ChannelPtr, P2pPtr) -> F + Send + Sync,
        F: 'static + Future<Output = ProtocolBasePtr> + Send,
    {
        let constructor: Constructor =
            Box::new(move |channel, p2p| Box::pin(constructor(channel, p2p)));
        self.constructors.lock().await.push((session_flags, constructor));
    }

    /// Construct every protocol selected for this session type on the
    /// given channel. The instances are returned unstarted.
    pub async fn attach(
        &self,
        type_id: SessionBitFlag,
        channel: ChannelPtr,
        p2p: P2pPtr,
    ) -> Vec<ProtocolBasePtr> {
        let mut protocols = vec![];

        for (flags, constructor) in self.constructors.lock().await.iter() {
            if flags & type_id == 0 {
                continue
            }
            let protocol = constructor(channel.clone(), p2p.clone()).await;
            debug!(target: "net::protocol_registry", "Attached {} to {}", protocol.name(), channel.address());
            protocols.push(protocol);
        }

        protocols
    }
}
