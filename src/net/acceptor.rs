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

use log::{error, info, warn};
use smol::net::TcpListener;

use crate::{
    system::{sleep, ExecutorPtr, StoppableTask, StoppableTaskPtr, Subscriber, SubscriberPtr, Subscription},
    Error, Result,
};

use super::{
    channel::{Channel, ChannelPtr},
    message::NetAddr,
    settings::SettingsPtr,
};

/// Atomic pointer to the acceptor.
pub type AcceptorPtr = Arc<Acceptor>;

/// Listens on the configured inbound port and publishes every accepted
/// socket, wrapped in a channel, to subscribers.
pub struct Acceptor {
    channel_subscriber: SubscriberPtr<ChannelPtr>,
    task: StoppableTaskPtr,
    settings: SettingsPtr,
}

impl Acceptor {
    pub fn new(settings: SettingsPtr) -> AcceptorPtr {
        Arc::new(Self {
            channel_subscriber: Subscriber::new(),
            task: StoppableTask::new(),
            settings,
        })
    }

    /// Bind the port and launch the accept loop. Bind failures are
    /// surfaced to the caller.
    pub async fn start(self: Arc<Self>, port: u16, executor: ExecutorPtr) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!(target: "net::acceptor", "Accepting inbound connections on port {}", port);

        self.task.clone().start(
            self.clone().accept_loop(listener),
            |result| async move {
                match result {
                    Ok(()) | Err(Error::ServiceStopped) => {}
                    Err(e) => error!(target: "net::acceptor", "Accept loop failed: {}", e),
                }
            },
            Error::ServiceStopped,
            executor,
        );

        Ok(())
    }

    pub async fn stop(&self) {
        self.task.clone().stop().await;
    }

    /// Subscribe to accepted channels.
    pub async fn subscribe(&self) -> Subscription<ChannelPtr> {
        self.channel_subscriber.clone().subscribe().await
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let _ = stream.set_nodelay(true);
                    let address = NetAddr::from_socket_addr(peer_addr, 0);
                    let channel =
                        Channel::new(stream, address, self.settings.clone()).await;
                    self.channel_subscriber.notify(channel).await;
                }
                Err(e) => {
                    // Transient accept failures (fd exhaustion) must not
                    // kill the listener
                    warn!(target: "net::acceptor", "Failed accepting connection: {}", e);
                    sleep(1).await;
                }
            }
        }
    }
}
