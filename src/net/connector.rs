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

use std::time::Duration;

use log::debug;
use smol::net::TcpStream;

use crate::{system::timeout, Result};

use super::{
    channel::{Channel, ChannelPtr},
    message::NetAddr,
    settings::SettingsPtr,
};

/// Dials remote hosts and wraps the resulting streams in channels.
pub struct Connector {
    settings: SettingsPtr,
}

impl Connector {
    pub fn new(settings: SettingsPtr) -> Self {
        Self { settings }
    }

    /// Dial `host:port`, resolving the host if needed. Bounded by the
    /// configured connect timeout.
    pub async fn connect(&self, host: &str, port: u16) -> Result<ChannelPtr> {
        debug!(target: "net::connector", "Dialing {}:{}", host, port);

        let dial = async {
            let stream = TcpStream::connect((host, port)).await?;
            Ok(stream)
        };
        let stream =
            timeout(Duration::from_secs(self.settings.connect_timeout_seconds as u64), dial)
                .await?;

        let _ = stream.set_nodelay(true);
        let peer_addr = stream.peer_addr()?;
        let address = NetAddr::from_socket_addr(peer_addr, 0);

        Ok(Channel::new(stream, address, self.settings.clone()).await)
    }
}
