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

use std::{future::Future, sync::Arc};

use log::debug;
use smol::lock::Mutex;

use crate::{system::ExecutorPtr, Result};

use super::super::channel::ChannelPtr;

pub type ProtocolJobsManagerPtr = Arc<ProtocolJobsManager>;

/// Supervises the detached tasks of one protocol instance. All spawned
/// tasks are cancelled exactly once when the channel stops.
pub struct ProtocolJobsManager {
    name: &'static str,
    channel: ChannelPtr,
    tasks: Mutex<Vec<smol::Task<Result<()>>>>,
}

impl ProtocolJobsManager {
    pub fn new(name: &'static str, channel: ChannelPtr) -> ProtocolJobsManagerPtr {
        Arc::new(Self { name, channel, tasks: Mutex::new(vec![]) })
    }

    /// Begin watching the channel for its stop event.
    pub fn start(self: Arc<Self>, executor: ExecutorPtr) {
        executor.clone().spawn(self.handle_stop()).detach()
    }

    /// Spawn a protocol task under this manager's supervision.
    pub async fn spawn<F>(&self, future: F, executor: ExecutorPtr)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.lock().await.push(executor.spawn(future))
    }

    async fn handle_stop(self: Arc<Self>) {
        match self.channel.subscribe_stop().await {
            Ok(stop_sub) => {
                stop_sub.receive().await;
            }
            // Channel is already stopped
            Err(_) => {}
        }

        self.close_all_tasks().await
    }

    async fn close_all_tasks(self: Arc<Self>) {
        debug!(
            target: "net::protocol_jobs_manager",
            "Stopping {} tasks for {}", self.name, self.channel.address()
        );

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            task.cancel().await;
        }
    }
}
