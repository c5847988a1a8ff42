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

use std::{collections::HashMap, net::IpAddr, sync::Arc};

use log::debug;
use smol::lock::Mutex;

use crate::{Error, Result};

use super::{channel::ChannelPtr, message::NetAddr, settings::SettingsPtr};

/// Atomic pointer to the connection registry.
pub type ConnectionsPtr = Arc<Connections>;

struct Inner {
    stopped: bool,
    channels: HashMap<IpAddr, ChannelPtr>,
}

/// Registry of live, promoted channels. Bounded by the configured
/// connection limit, with at most one channel per remote IP. The stopped
/// flag lives inside the same lock as the map, so no store can slip in
/// behind a concurrent `stop`.
pub struct Connections {
    inner: Mutex<Inner>,
    settings: SettingsPtr,
}

impl Connections {
    pub fn new(settings: SettingsPtr) -> ConnectionsPtr {
        Arc::new(Self {
            inner: Mutex::new(Inner { stopped: false, channels: HashMap::new() }),
            settings,
        })
    }

    /// Insert a promoted channel. Fails with `AddressInUse` when another
    /// channel occupies the same remote IP, and `ResourceLimit` when the
    /// connection limit is reached.
    pub async fn store(&self, channel: ChannelPtr) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if inner.stopped {
            return Err(Error::ServiceStopped)
        }

        let ip = channel.address().ip;
        if inner.channels.contains_key(&ip) {
            return Err(Error::AddressInUse)
        }

        if inner.channels.len() >= self.settings.connection_limit {
            return Err(Error::ResourceLimit)
        }

        debug!(target: "net::connections", "Storing channel {}", channel.address());
        inner.channels.insert(ip, channel);
        Ok(())
    }

    /// Remove the channel if it is the one registered for its IP. A
    /// replacement that took over the slot in the meantime is left alone.
    pub async fn remove(&self, channel: &ChannelPtr) {
        let mut inner = self.inner.lock().await;

        let ip = channel.address().ip;
        if let Some(existing) = inner.channels.get(&ip) {
            if Arc::ptr_eq(existing, channel) {
                inner.channels.remove(&ip);
            }
        }
    }

    pub async fn exists(&self, ip: &IpAddr) -> bool {
        self.inner.lock().await.channels.contains_key(ip)
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.channels.len()
    }

    pub async fn addrs(&self) -> Vec<NetAddr> {
        self.inner.lock().await.channels.values().map(|c| c.address().clone()).collect()
    }

    pub async fn channels(&self) -> Vec<ChannelPtr> {
        self.inner.lock().await.channels.values().cloned().collect()
    }

    /// Stop every registered channel with the given code and empty the
    /// registry. Later stores fail with `ServiceStopped` until `reset`.
    pub async fn stop(&self, code: Error) {
        let channels: Vec<ChannelPtr> = {
            let mut inner = self.inner.lock().await;
            inner.stopped = true;
            inner.channels.drain().map(|(_, channel)| channel).collect()
        };

        for channel in channels {
            channel.stop(code.clone()).await;
        }
    }

    /// Re-arm the registry for a fresh start.
    pub async fn reset(&self) {
        self.inner.lock().await.stopped = false;
    }
}
