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

use std::{path::PathBuf, sync::Arc};

use url::Url;

use super::message::NetAddr;

/// Atomic pointer to network settings.
pub type SettingsPtr = Arc<Settings>;

/// P2P network settings. The scope of this is a single network instance,
/// and it is provided fully-formed by the caller. Two canonical presets
/// exist, [`Settings::mainnet`] and [`Settings::testnet`].
#[derive(Debug, Clone)]
pub struct Settings {
    /// Worker threads driving the executor
    pub threads: usize,
    /// Network magic word prefixed to every packet
    pub magic: u32,
    /// Port to accept inbound connections on (0 disables listening)
    pub inbound_port: u16,
    /// Maximum number of live channels, inbound and outbound combined
    pub connection_limit: usize,
    /// Outbound connection slots to keep filled
    pub outbound_connections: usize,
    /// Dial attempts for user-requested connections (0 retries forever)
    pub manual_attempt_limit: u32,
    /// Parallel dial fan-out per outbound slot
    pub connect_batch_size: usize,
    /// Dial timeout
    pub connect_timeout_seconds: u32,
    /// Bound on the full version handshake
    pub channel_handshake_seconds: u32,
    /// Interval between keep-alive pings
    pub channel_heartbeat_minutes: u32,
    /// A channel that has received nothing for this long is killed
    pub channel_inactivity_minutes: u32,
    /// Mandatory rotation age for a promoted channel
    pub channel_expiration_minutes: u32,
    /// Bound on a channel's pre-handshake lifetime, and on the seed harvest
    pub channel_germination_seconds: u32,
    /// A channel that has sent nothing for this long fires its revival
    /// event (0 disables revival)
    pub channel_revival_minutes: u32,
    /// Maximum number of addresses held in the host pool
    pub host_pool_capacity: usize,
    /// Whether we ask peers to relay transactions to us
    pub relay_transactions: bool,
    /// Path the host pool is persisted to
    pub hosts_file: PathBuf,
    /// Our own advertised address, if we are reachable
    pub external_addr: Option<NetAddr>,
    /// Address rules (`"ip"` or `"ip:port"`) we never connect to nor store
    pub blacklist: Vec<String>,
    /// Seed hosts contacted only to harvest an initial address set
    pub seeds: Vec<Url>,
    /// Peers dialed through the manual session on `run`
    pub peers: Vec<Url>,
    /// User agent advertised in the version handshake
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threads: 4,
            magic: 0xd9b4_bef9,
            inbound_port: 0,
            connection_limit: 16,
            outbound_connections: 8,
            manual_attempt_limit: 0,
            connect_batch_size: 5,
            connect_timeout_seconds: 5,
            channel_handshake_seconds: 30,
            channel_heartbeat_minutes: 5,
            channel_inactivity_minutes: 10,
            channel_expiration_minutes: 90,
            channel_germination_seconds: 30,
            channel_revival_minutes: 5,
            host_pool_capacity: 1000,
            relay_transactions: true,
            hosts_file: PathBuf::from("hosts.cache"),
            external_addr: None,
            blacklist: vec![],
            seeds: vec![],
            peers: vec![],
            user_agent: concat!("/vesper:", env!("CARGO_PKG_VERSION"), "/").to_string(),
        }
    }
}

impl Settings {
    pub fn mainnet() -> Self {
        Self {
            magic: 0xd9b4_bef9,
            inbound_port: 8333,
            seeds: vec![
                Url::parse("tcp://seed1.vesper.network:8333").unwrap(),
                Url::parse("tcp://seed2.vesper.network:8333").unwrap(),
                Url::parse("tcp://seed3.vesper.network:8333").unwrap(),
            ],
            ..Default::default()
        }
    }

    pub fn testnet() -> Self {
        Self {
            magic: 0x0709_110b,
            inbound_port: 18333,
            seeds: vec![
                Url::parse("tcp://testnet-seed1.vesper.network:18333").unwrap(),
                Url::parse("tcp://testnet-seed2.vesper.network:18333").unwrap(),
            ],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_differ_only_where_expected() {
        let mainnet = Settings::mainnet();
        let testnet = Settings::testnet();

        assert_ne!(mainnet.magic, testnet.magic);
        assert_ne!(mainnet.inbound_port, testnet.inbound_port);
        assert_ne!(mainnet.seeds, testnet.seeds);

        assert_eq!(mainnet.connection_limit, testnet.connection_limit);
        assert_eq!(mainnet.host_pool_capacity, testnet.host_pool_capacity);
        assert_eq!(mainnet.channel_handshake_seconds, testnet.channel_handshake_seconds);
    }
}
