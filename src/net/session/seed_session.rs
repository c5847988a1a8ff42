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

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use log::{debug, info, warn};
use url::Url;

use crate::{system::ExecutorPtr, Error, Result};

use super::{
    super::{connector::Connector, p2p::P2p, p2p::P2pPtr},
    Session, SessionBitFlag, SESSION_SEED,
};

pub type SeedSessionPtr = Arc<SeedSession>;

/// Seeding is skipped when the host pool already holds this many entries.
const SEED_SKIP_THRESHOLD: usize = 5;

/// Short-lived session that dials the configured seed hosts in parallel
/// to bootstrap the host pool. `start` completes once the pool has at
/// least one entry or every seed has been tried.
pub struct SeedSession {
    p2p: Weak<P2p>,
}

impl SeedSession {
    pub fn new(p2p: Weak<P2p>) -> SeedSessionPtr {
        Arc::new(Self { p2p })
    }

    pub async fn start(self: Arc<Self>, executor: ExecutorPtr) -> Result<()> {
        debug!(target: "net::seed_session", "SeedSession::start() [START]");
        let p2p = self.p2p();
        let settings = p2p.settings();

        if p2p.hosts().count().await >= SEED_SKIP_THRESHOLD {
            info!(target: "net::seed_session", "Host pool is warm, skipping seeding");
            return Ok(())
        }

        if settings.seeds.is_empty() {
            warn!(target: "net::seed_session", "No seeds configured, skipping seeding");
            return Ok(())
        }

        let (done_tx, done_rx) = smol::channel::bounded(settings.seeds.len());
        for seed in &settings.seeds {
            executor
                .spawn(self.clone().start_seed(seed.clone(), done_tx.clone(), executor.clone()))
                .detach();
        }

        // Success as soon as any seed has produced addresses; the
        // remaining dials keep harvesting in the background
        for _ in 0..settings.seeds.len() {
            if done_rx.recv().await.is_err() {
                break
            }
            if !p2p.hosts().is_empty().await {
                break
            }
        }

        if p2p.hosts().is_empty().await {
            warn!(target: "net::seed_session", "Seeding yielded no addresses");
            return Err(Error::PeerThrottling)
        }

        debug!(target: "net::seed_session", "SeedSession::start() [END]");
        Ok(())
    }

    async fn start_seed(
        self: Arc<Self>,
        seed: Url,
        done_tx: smol::channel::Sender<()>,
        executor: ExecutorPtr,
    ) {
        if let Err(e) = self.clone().connect_seed(&seed, executor).await {
            warn!(target: "net::seed_session", "Seed {} failed: {}", seed, e);
        }
        let _ = done_tx.send(()).await;
    }

    /// Dial one seed, run the harvest, and cleanly close the channel.
    async fn connect_seed(self: Arc<Self>, seed: &Url, executor: ExecutorPtr) -> Result<()> {
        let p2p = self.p2p();
        let settings = p2p.settings();

        let host = seed
            .host_str()
            .ok_or_else(|| Error::BadStream("seed URL without host".into()))?
            .to_string();
        let port = seed.port().ok_or_else(|| Error::BadStream("seed URL without port".into()))?;

        let connector = Connector::new(settings.clone());
        let channel = connector.connect(&host, port).await?;

        // Handshake plus the seed protocol's full harvest
        let result = self.register_channel(channel.clone(), executor).await;
        channel.stop(Error::ChannelStopped).await;
        result
    }
}

#[async_trait]
impl Session for SeedSession {
    fn p2p(&self) -> P2pPtr {
        self.p2p.upgrade().unwrap()
    }

    fn type_id(&self) -> SessionBitFlag {
        SESSION_SEED
    }
}
