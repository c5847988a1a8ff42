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

use crate::{
    system::{sleep, ExecutorPtr},
    Error, Result,
};

use super::{
    super::{channel::ChannelPtr, connector::Connector, p2p::P2p, p2p::P2pPtr},
    Session, SessionBitFlag, SESSION_MANUAL,
};

pub type ManualSessionPtr = Arc<ManualSession>;

/// Base seconds of the linear backoff between manual dial attempts.
const CONNECT_BACKOFF_SECONDS: u64 = 5;

/// Dials user-requested targets. Every `connect` retries up to the
/// configured attempt limit (zero retries forever) and resolves exactly
/// once, with the promoted channel or the final error.
pub struct ManualSession {
    p2p: Weak<P2p>,
}

impl ManualSession {
    pub fn new(p2p: Weak<P2p>) -> ManualSessionPtr {
        Arc::new(Self { p2p })
    }

    pub async fn start(self: Arc<Self>) -> Result<()> {
        debug!(target: "net::manual_session", "Manual session ready");
        Ok(())
    }

    /// Dial `host:port` until a channel is promoted or the attempt limit
    /// is exhausted.
    pub async fn connect(
        self: Arc<Self>,
        host: &str,
        port: u16,
        executor: ExecutorPtr,
    ) -> Result<ChannelPtr> {
        let p2p = self.p2p();
        let settings = p2p.settings();
        let connector = Connector::new(settings.clone());
        let mut attempts = 0u32;

        loop {
            if p2p.is_stopped().await {
                return Err(Error::ServiceStopped)
            }

            attempts += 1;
            info!(
                target: "net::manual_session",
                "Connecting to {}:{} (attempt {})", host, port, attempts
            );

            match self.clone().try_connect(&connector, host, port, executor.clone()).await {
                Ok(channel) => {
                    info!(target: "net::manual_session", "Connected to {}:{}", host, port);
                    return Ok(channel)
                }
                Err(e) => {
                    warn!(
                        target: "net::manual_session",
                        "Failed connecting to {}:{}: {}", host, port, e
                    );

                    if settings.manual_attempt_limit != 0 &&
                        attempts >= settings.manual_attempt_limit
                    {
                        return Err(e)
                    }

                    sleep(CONNECT_BACKOFF_SECONDS * attempts as u64).await;
                }
            }
        }
    }

    /// Dial a configured peer URL.
    pub async fn connect_url(
        self: Arc<Self>,
        url: &Url,
        executor: ExecutorPtr,
    ) -> Result<ChannelPtr> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::BadStream("peer URL without host".into()))?
            .to_string();
        let port = url.port().ok_or_else(|| Error::BadStream("peer URL without port".into()))?;

        self.connect(&host, port, executor).await
    }

    async fn try_connect(
        self: Arc<Self>,
        connector: &Connector,
        host: &str,
        port: u16,
        executor: ExecutorPtr,
    ) -> Result<ChannelPtr> {
        let channel = connector.connect(host, port).await?;
        self.register_channel(channel.clone(), executor).await?;
        Ok(channel)
    }
}

#[async_trait]
impl Session for ManualSession {
    fn p2p(&self) -> P2pPtr {
        self.p2p.upgrade().unwrap()
    }

    fn type_id(&self) -> SessionBitFlag {
        SESSION_MANUAL
    }
}
