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

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use smol::lock::Mutex;

use crate::{
    system::{timeout, ExecutorPtr, StoppableTask, StoppableTaskPtr},
    Error, Result,
};

use super::{
    super::{
        acceptor::{Acceptor, AcceptorPtr},
        channel::ChannelPtr,
        hosts::is_blacklisted,
        p2p::{P2p, P2pPtr},
    },
    Session, SessionBitFlag, SESSION_INBOUND,
};

pub type InboundSessionPtr = Arc<InboundSession>;

/// Accepts remote connections on the configured inbound port, up to the
/// connection limit. Channels that cannot be admitted (limit reached,
/// duplicate IP, blacklisted) are dropped before the handshake completes.
pub struct InboundSession {
    p2p: Weak<P2p>,
    acceptor: Mutex<Option<AcceptorPtr>>,
    accept_task: StoppableTaskPtr,
}

impl InboundSession {
    pub fn new(p2p: Weak<P2p>) -> InboundSessionPtr {
        Arc::new(Self {
            p2p,
            acceptor: Mutex::new(None),
            accept_task: StoppableTask::new(),
        })
    }

    pub async fn start(self: Arc<Self>, executor: ExecutorPtr) -> Result<()> {
        let p2p = self.p2p();
        let settings = p2p.settings();

        if settings.inbound_port == 0 {
            info!(target: "net::inbound_session", "Not configured for inbound connections");
            return Ok(())
        }

        if settings.connection_limit <= settings.outbound_connections {
            warn!(
                target: "net::inbound_session",
                "No connection slots left for inbound, not listening"
            );
            return Ok(())
        }

        let acceptor = Acceptor::new(settings.clone());
        acceptor.clone().start(settings.inbound_port, executor.clone()).await?;
        *self.acceptor.lock().await = Some(acceptor.clone());

        self.accept_task.clone().start(
            self.clone().accept_loop(acceptor, executor.clone()),
            |result| async move {
                match result {
                    Ok(()) | Err(Error::ServiceStopped) => {}
                    Err(e) => error!(target: "net::inbound_session", "Accept loop failed: {}", e),
                }
            },
            Error::ServiceStopped,
            executor,
        );

        Ok(())
    }

    pub async fn stop(&self) {
        self.accept_task.clone().stop().await;
        if let Some(acceptor) = self.acceptor.lock().await.take() {
            acceptor.stop().await;
        }
    }

    async fn accept_loop(self: Arc<Self>, acceptor: AcceptorPtr, executor: ExecutorPtr) -> Result<()> {
        let sub = acceptor.subscribe().await;

        loop {
            let channel = sub.receive().await;
            let p2p = self.p2p();
            let settings = p2p.settings();

            debug!(
                target: "net::inbound_session",
                "Accepted connection from {}", channel.address()
            );

            // Gate before the handshake is even attempted
            if p2p.connections_count().await >= settings.connection_limit ||
                p2p.connected(&channel.address().ip).await ||
                is_blacklisted(channel.address(), &settings)
            {
                info!(
                    target: "net::inbound_session",
                    "Rejecting connection from {}", channel.address()
                );
                channel.stop(Error::ChannelDropped).await;
                continue
            }

            executor
                .spawn(self.clone().register_inbound(channel, executor.clone()))
                .detach();
        }
    }

    /// Register one accepted channel, bounded by the germination window
    /// plus the handshake timeout.
    async fn register_inbound(self: Arc<Self>, channel: ChannelPtr, executor: ExecutorPtr) {
        let settings = self.p2p().settings();
        let bound = (settings.channel_germination_seconds + settings.channel_handshake_seconds)
            as u64;

        let result = timeout(
            Duration::from_secs(bound),
            self.clone().register_channel(channel.clone(), executor),
        )
        .await;

        if let Err(e) = result {
            debug!(
                target: "net::inbound_session",
                "Inbound {} failed registration: {}", channel.address(), e
            );
            channel.stop(e).await;
        }
    }
}

#[async_trait]
impl Session for InboundSession {
    fn p2p(&self) -> P2pPtr {
        self.p2p.upgrade().unwrap()
    }

    fn type_id(&self) -> SessionBitFlag {
        SESSION_INBOUND
    }
}
