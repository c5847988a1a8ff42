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

use darkfi_serial::{deserialize, serialize};
use log::{debug, info};
use rand::{rngs::OsRng, Rng};
use smol::lock::Mutex;

use crate::{
    util::{
        file::{load_file, save_file},
        time::unix_timestamp,
    },
    Error, Result,
};

use super::{
    message::NetAddr,
    settings::{Settings, SettingsPtr},
};

/// Atomic pointer to the host pool.
pub type HostsPtr = Arc<Hosts>;

/// Seconds an address handed out by `fetch` stays out of the rotation.
const FETCH_COOLOFF_SECONDS: u64 = 60;

/// Whether the address matches one of the configured blacklist rules.
/// A rule is either `"ip"`, blocking every port, or `"ip:port"`.
pub fn is_blacklisted(addr: &NetAddr, settings: &Settings) -> bool {
    let ip = addr.ip.to_string();
    let ip_port = addr.to_string();
    settings.blacklist.iter().any(|rule| *rule == ip || *rule == ip_port)
}

struct HostEntry {
    addr: NetAddr,
    last_fetch: u64,
}

/// Bounded, de-duplicated pool of known peer addresses, persisted between
/// runs through the configured hosts file.
pub struct Hosts {
    store: Mutex<Vec<HostEntry>>,
    settings: SettingsPtr,
}

impl Hosts {
    pub fn new(settings: SettingsPtr) -> HostsPtr {
        Arc::new(Self { store: Mutex::new(vec![]), settings })
    }

    /// Whether the pool accepts this address at all: it must be dialable,
    /// not ourselves, and not blacklisted.
    fn accepts(&self, addr: &NetAddr) -> bool {
        if !addr.is_valid() {
            return false
        }

        if let Some(external) = &self.settings.external_addr {
            if external == addr {
                return false
            }
        }

        !is_blacklisted(addr, &self.settings)
    }

    fn insert(store: &mut Vec<HostEntry>, addr: NetAddr, capacity: usize) {
        if capacity == 0 {
            return
        }

        if let Some(entry) = store.iter_mut().find(|entry| entry.addr == addr) {
            // Duplicates collapse, keeping the freshest metadata
            if addr.last_seen > entry.addr.last_seen {
                entry.addr = addr;
            }
            return
        }

        if store.len() >= capacity {
            // Evict the address seen longest ago
            let mut oldest = 0;
            for (index, entry) in store.iter().enumerate() {
                if entry.addr.last_seen < store[oldest].addr.last_seen {
                    oldest = index;
                }
            }
            store.swap_remove(oldest);
        }

        store.push(HostEntry { addr, last_fetch: 0 });
    }

    /// Read the persisted pool from the hosts file. A missing file is a
    /// fresh node and yields an empty pool; a corrupt or unreadable file is
    /// surfaced to the caller.
    pub async fn load(&self) -> Result<()> {
        let path = &self.settings.hosts_file;

        let bytes = match load_file(path) {
            Ok(bytes) => bytes,
            Err(Error::Io(std::io::ErrorKind::NotFound)) => {
                info!(target: "net::hosts", "No hosts file at {:?}, starting with an empty pool", path);
                return Ok(())
            }
            Err(e) => return Err(e),
        };

        let mut addrs: Vec<NetAddr> =
            deserialize(&bytes).map_err(|e| Error::BadStream(format!("hosts file: {e}")))?;

        // Freshest first, so capacity truncation drops the oldest entries
        addrs.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));

        let mut store = self.store.lock().await;
        store.clear();
        for addr in addrs {
            if self.accepts(&addr) {
                Self::insert(&mut store, addr, self.settings.host_pool_capacity);
            }
        }

        info!(target: "net::hosts", "Loaded {} hosts from {:?}", store.len(), path);
        Ok(())
    }

    /// Persist the pool, replacing the hosts file atomically.
    pub async fn save(&self) -> Result<()> {
        let addrs: Vec<NetAddr> =
            self.store.lock().await.iter().map(|entry| entry.addr.clone()).collect();

        save_file(&self.settings.hosts_file, &serialize(&addrs))?;
        debug!(target: "net::hosts", "Saved {} hosts to {:?}", addrs.len(), self.settings.hosts_file);
        Ok(())
    }

    /// Insert a single address. Self, blacklisted, and undialable
    /// addresses are dropped silently.
    pub async fn store(&self, addr: NetAddr) {
        if !self.accepts(&addr) {
            debug!(target: "net::hosts", "Ignoring address {}", addr);
            return
        }

        let mut store = self.store.lock().await;
        Self::insert(&mut store, addr, self.settings.host_pool_capacity);
    }

    /// Insert a batch of gossiped addresses.
    pub async fn store_many(&self, addrs: Vec<NetAddr>) {
        let mut store = self.store.lock().await;
        for addr in addrs {
            if self.accepts(&addr) {
                Self::insert(&mut store, addr, self.settings.host_pool_capacity);
            }
        }
    }

    /// Delete the address if present.
    pub async fn remove(&self, addr: &NetAddr) {
        self.store.lock().await.retain(|entry| entry.addr != *addr);
    }

    /// Hand out one address chosen uniformly at random among the entries
    /// that have not been fetched recently.
    pub async fn fetch(&self) -> Result<NetAddr> {
        let mut store = self.store.lock().await;
        if store.is_empty() {
            return Err(Error::AddressNotFound)
        }

        let now = unix_timestamp();
        let mut pool: Vec<usize> = (0..store.len())
            .filter(|i| store[*i].last_fetch + FETCH_COOLOFF_SECONDS <= now)
            .collect();
        if pool.is_empty() {
            pool = (0..store.len()).collect();
        }

        let index = pool[OsRng.gen_range(0..pool.len())];
        store[index].last_fetch = now;
        Ok(store[index].addr.clone())
    }

    /// Hand out up to `limit` distinct random addresses, skipping entries
    /// in `exclude` and entries fetched recently.
    pub async fn fetch_many(&self, limit: usize, exclude: &[NetAddr]) -> Vec<NetAddr> {
        let mut store = self.store.lock().await;
        let now = unix_timestamp();

        let mut pool: Vec<usize> = (0..store.len())
            .filter(|i| {
                store[*i].last_fetch + FETCH_COOLOFF_SECONDS <= now &&
                    !exclude.contains(&store[*i].addr)
            })
            .collect();

        let mut picked = vec![];
        while picked.len() < limit && !pool.is_empty() {
            let index = pool.swap_remove(OsRng.gen_range(0..pool.len()));
            store[index].last_fetch = now;
            picked.push(store[index].addr.clone());
        }

        picked
    }

    /// A random sample of up to `limit` addresses for gossip replies.
    /// Does not affect fetch rotation.
    pub async fn sample(&self, limit: usize) -> Vec<NetAddr> {
        let store = self.store.lock().await;

        let mut pool: Vec<usize> = (0..store.len()).collect();
        let mut picked = vec![];
        while picked.len() < limit && !pool.is_empty() {
            let index = pool.swap_remove(OsRng.gen_range(0..pool.len()));
            picked.push(store[index].addr.clone());
        }

        picked
    }

    pub async fn count(&self) -> usize {
        self.store.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn testaddr(last_octet: u8, port: u16, last_seen: u32) -> NetAddr {
        let mut addr =
            NetAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), port, 0);
        addr.last_seen = last_seen;
        addr
    }

    fn settings(capacity: usize) -> SettingsPtr {
        Arc::new(Settings {
            host_pool_capacity: capacity,
            hosts_file: std::env::temp_dir().join("vesper_hosts_test.cache"),
            external_addr: Some(testaddr(100, 8333, 0)),
            blacklist: vec!["10.0.0.66".to_string(), "10.0.0.67:7777".to_string()],
            ..Default::default()
        })
    }

    #[test]
    fn store_remove_count() {
        smol::block_on(async {
            let hosts = Hosts::new(settings(10));
            hosts.store(testaddr(1, 8333, 1)).await;
            hosts.store(testaddr(2, 8333, 2)).await;
            assert_eq!(hosts.count().await, 2);

            // Duplicates collapse
            hosts.store(testaddr(1, 8333, 9)).await;
            assert_eq!(hosts.count().await, 2);

            hosts.remove(&testaddr(1, 8333, 0)).await;
            assert_eq!(hosts.count().await, 1);
        });
    }

    #[test]
    fn rejects_self_blacklisted_and_invalid() {
        smol::block_on(async {
            let hosts = Hosts::new(settings(10));

            // Our own external address
            hosts.store(testaddr(100, 8333, 1)).await;
            // Blacklisted by IP, any port
            hosts.store(testaddr(66, 1234, 1)).await;
            // Blacklisted by IP and port
            hosts.store(testaddr(67, 7777, 1)).await;
            // Undialable
            hosts.store(testaddr(1, 0, 1)).await;

            assert_eq!(hosts.count().await, 0);

            // Same blacklisted IP on another port is fine
            hosts.store(testaddr(67, 8333, 1)).await;
            assert_eq!(hosts.count().await, 1);
        });
    }

    #[test]
    fn capacity_evicts_oldest() {
        smol::block_on(async {
            let hosts = Hosts::new(settings(3));
            for i in 1..=4 {
                hosts.store(testaddr(i, 8333, i as u32)).await;
            }
            assert_eq!(hosts.count().await, 3);

            // The entry with the lowest last-seen was evicted
            let sample = hosts.sample(10).await;
            assert!(!sample.contains(&testaddr(1, 8333, 0)));
        });
    }

    #[test]
    fn fetch_empty_fails() {
        smol::block_on(async {
            let hosts = Hosts::new(settings(10));
            assert!(matches!(hosts.fetch().await, Err(Error::AddressNotFound)));
        });
    }

    #[test]
    fn fetch_many_excludes() {
        smol::block_on(async {
            let hosts = Hosts::new(settings(10));
            hosts.store(testaddr(1, 8333, 1)).await;
            hosts.store(testaddr(2, 8333, 1)).await;

            let picked = hosts.fetch_many(5, &[testaddr(1, 8333, 0)]).await;
            assert_eq!(picked, vec![testaddr(2, 8333, 0)]);
        });
    }

    #[test]
    fn save_load_roundtrip() {
        smol::block_on(async {
            let settings = Arc::new(Settings {
                host_pool_capacity: 10,
                hosts_file: std::env::temp_dir().join("vesper_hosts_roundtrip.cache"),
                ..Default::default()
            });

            let hosts = Hosts::new(settings.clone());
            hosts.store(testaddr(1, 8333, 1)).await;
            hosts.store(testaddr(2, 8334, 2)).await;
            hosts.save().await.unwrap();

            let restored = Hosts::new(settings.clone());
            restored.load().await.unwrap();
            assert_eq!(restored.count().await, 2);

            let mut sample = restored.sample(10).await;
            sample.sort_by_key(|a| a.port);
            assert_eq!(sample, vec![testaddr(1, 8333, 0), testaddr(2, 8334, 0)]);

            std::fs::remove_file(&settings.hosts_file).unwrap();
        });
    }
}
