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
use log::{debug, error, info};
use smol::lock::Mutex;

use crate::{
    system::{sleep, ExecutorPtr, StoppableTask, StoppableTaskPtr},
    Error, Result,
};

use super::{
    super::{
        channel::ChannelPtr,
        connector::Connector,
        message::NetAddr,
        p2p::{P2p, P2pPtr},
    },
    Session, SessionBitFlag, SESSION_OUTBOUND,
};

pub type OutboundSessionPtr = Arc<OutboundSession>;

/// Seconds a vacant slot waits before retrying when the host pool has no
/// candidates to offer.
const SLOT_RETRY_SECONDS: u64 = 5;

/// Maintains the configured number of outbound connections. Each slot
/// fans out a batch of parallel dials; the first to complete the
/// handshake wins the slot and the losers are dropped. Candidates that
/// fail to dial are purged from the host pool.
pub struct OutboundSession {
    p2p: Weak<P2p>,
    slots: Mutex<Vec<StoppableTaskPtr>>,
}

impl OutboundSession {
    pub fn new(p2p: Weak<P2p>) -> OutboundSessionPtr {
        Arc::new(Self { p2p, slots: Mutex::new(vec![]) })
    }

    pub async fn start(self: Arc<Self>, executor: ExecutorPtr) -> Result<()> {
        let outbound_connections = self.p2p().settings().outbound_connections;
        info!(
            target: "net::outbound_session",
            "Starting {} outbound connection slots", outbound_connections
        );

        let mut slots = self.slots.lock().await;
        for slot in 0..outbound_connections {
            let task = StoppableTask::new();
            task.clone().start(
                self.clone().channel_loop(slot, executor.clone()),
                |result| async move {
                    match result {
                        Ok(()) | Err(Error::ServiceStopped) => {}
                        Err(e) => {
                            error!(target: "net::outbound_session", "Slot loop failed: {}", e)
                        }
                    }
                },
                Error::ServiceStopped,
                executor.clone(),
            );
            slots.push(task);
        }

        Ok(())
    }

    pub async fn stop(&self) {
        let slots: Vec<_> = self.slots.lock().await.drain(..).collect();
        for slot in slots {
            slot.stop().await;
        }
    }

    /// Keep one outbound slot filled forever.
    async fn channel_loop(self: Arc<Self>, slot: usize, executor: ExecutorPtr) -> Result<()> {
        let p2p = self.p2p();
        let settings = p2p.settings();

        loop {
            if p2p.is_stopped().await {
                return Err(Error::ServiceStopped)
            }

            // Distinct candidates, skipping hosts we are connected to
            let exclude = p2p.connections().addrs().await;
            let candidates =
                p2p.hosts().fetch_many(settings.connect_batch_size, &exclude).await;

            if candidates.is_empty() {
                debug!(
                    target: "net::outbound_session",
                    "Slot #{} found no candidate hosts, retrying", slot
                );
                sleep(SLOT_RETRY_SECONDS).await;
                continue
            }

            let Some(channel) = self.clone().batch_dial(slot, candidates, executor.clone()).await
            else {
                continue
            };

            info!(
                target: "net::outbound_session",
                "Slot #{} connected to {}", slot, channel.address()
            );

            // Block until the slot is vacated, then refill immediately
            match channel.subscribe_stop().await {
                Ok(stop_sub) => {
                    stop_sub.receive().await;
                }
                Err(_) => {}
            }

            debug!(target: "net::outbound_session", "Slot #{} vacated", slot);
        }
    }

    /// Dial all candidates in parallel. The first channel through the
    /// handshake wins; surplus winners are dropped and dial failures are
    /// removed from the host pool.
    async fn batch_dial(
        self: Arc<Self>,
        slot: usize,
        candidates: Vec<NetAddr>,
        executor: ExecutorPtr,
    ) -> Option<ChannelPtr> {
        let p2p = self.p2p();
        let (result_tx, result_rx) = smol::channel::bounded(candidates.len());

        for addr in candidates.iter().cloned() {
            let session = self.clone();
            let executor_ = executor.clone();
            let result_tx = result_tx.clone();
            executor
                .spawn(async move {
                    let result = session.try_connect(addr.clone(), executor_).await;
                    let _ = result_tx.send((addr, result)).await;
                })
                .detach();
        }

        let mut winner: Option<ChannelPtr> = None;
        for _ in 0..candidates.len() {
            let Ok((addr, result)) = result_rx.recv().await else { break };

            match result {
                Ok(channel) => {
                    if winner.is_none() {
                        winner = Some(channel);
                    } else {
                        // Lost the race for this slot
                        channel.stop(Error::ChannelDropped).await;
                    }
                }
                Err(e) => {
                    debug!(
                        target: "net::outbound_session",
                        "Slot #{} dial to {} failed: {}", slot, addr, e
                    );
                    // Only unreachable or misbehaving hosts are purged;
                    // registry rejections say nothing about the address
                    match e {
                        Error::AddressInUse | Error::ResourceLimit | Error::ServiceStopped => {}
                        _ => p2p.hosts().remove(&addr).await,
                    }
                }
            }
        }

        winner
    }

    async fn try_connect(
        self: Arc<Self>,
        addr: NetAddr,
        executor: ExecutorPtr,
    ) -> Result<ChannelPtr> {
        let p2p = self.p2p();
        if p2p.is_stopped().await {
            return Err(Error::ServiceStopped)
        }

        let connector = Connector::new(p2p.settings());
        let channel = connector.connect(&addr.ip.to_string(), addr.port).await?;
        self.register_channel(channel.clone(), executor).await?;
        Ok(channel)
    }
}

#[async_trait]
impl Session for OutboundSession {
    fn p2p(&self) -> P2pPtr {
        self.p2p.upgrade().unwrap()
    }

    fn type_id(&self) -> SessionBitFlag {
        SESSION_OUTBOUND
    }
}
