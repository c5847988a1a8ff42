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

use std::{any::Any, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use darkfi_serial::deserialize;
use log::debug;
use smol::lock::Mutex;

use crate::{
    system::{Subscriber, SubscriberPtr, Subscription},
    Error, Result,
};

use super::message::Message;

/// A message plus the error status of its delivery.
pub type MessageResult<M> = Result<Arc<M>>;

/// Subscription to a single message type on one channel. `receive()`
/// resolves with the next message of that type in wire order, or with the
/// error the channel stopped with.
pub struct MessageSubscription<M: Message> {
    sub: Subscription<MessageResult<M>>,
}

impl<M: Message> MessageSubscription<M> {
    pub async fn receive(&self) -> MessageResult<M> {
        self.sub.receive().await
    }

    pub async fn unsubscribe(&self) {
        self.sub.unsubscribe().await
    }
}

/// Type-erased interface so dispatchers for different message types can
/// share one table.
#[async_trait]
trait MessageDispatcherInterface: Send + Sync {
    async fn trigger(&self, payload: &[u8]);

    async fn trigger_error(&self, err: Error);

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

struct MessageDispatcher<M: Message> {
    sub: SubscriberPtr<MessageResult<M>>,
}

impl<M: Message> MessageDispatcher<M> {
    fn new() -> Self {
        Self { sub: Subscriber::new() }
    }
}

#[async_trait]
impl<M: Message> MessageDispatcherInterface for MessageDispatcher<M> {
    async fn trigger(&self, payload: &[u8]) {
        match deserialize::<M>(payload) {
            Ok(message) => self.sub.notify(Ok(Arc::new(message))).await,
            Err(e) => {
                debug!(
                    target: "net::message_subscriber",
                    "Discarding malformed '{}' payload: {}", M::name(), e
                );
                self.sub.notify(Err(Error::BadStream("malformed payload".to_string()))).await
            }
        }
    }

    async fn trigger_error(&self, err: Error) {
        self.sub.notify(Err(err)).await
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Routes raw payloads received on a channel to typed subscriptions,
/// keyed by the wire command.
pub struct MessageSubsystem {
    dispatchers: Mutex<HashMap<&'static str, Arc<dyn MessageDispatcherInterface>>>,
}

impl MessageSubsystem {
    pub fn new() -> Self {
        Self { dispatchers: Mutex::new(HashMap::new()) }
    }

    /// Enable dispatch for the message type. Must happen before the first
    /// `subscribe` for that type.
    pub async fn add_dispatch<M: Message>(&self) {
        self.dispatchers.lock().await.insert(M::name(), Arc::new(MessageDispatcher::<M>::new()));
    }

    pub async fn subscribe<M: Message>(&self) -> Result<MessageSubscription<M>> {
        let dispatcher = self.dispatchers.lock().await.get(M::name()).cloned();

        let Some(dispatcher) = dispatcher else { return Err(Error::OperationFailed) };

        match dispatcher.as_any().downcast::<MessageDispatcher<M>>() {
            Ok(dispatcher) => Ok(MessageSubscription { sub: dispatcher.sub.clone().subscribe().await }),
            Err(_) => Err(Error::OperationFailed),
        }
    }

    /// Decode and deliver a received payload. Returns false when no
    /// dispatcher is registered for the command.
    pub async fn notify(&self, command: &str, payload: &[u8]) -> bool {
        let dispatcher = self.dispatchers.lock().await.get(command).cloned();

        match dispatcher {
            Some(dispatcher) => {
                dispatcher.trigger(payload).await;
                true
            }
            None => false,
        }
    }

    /// Deliver an error to every subscription of every message type.
    /// Used when the channel stops so readers wake up exactly once.
    pub async fn trigger_error(&self, err: Error) {
        let dispatchers: Vec<_> = self.dispatchers.lock().await.values().cloned().collect();
        for dispatcher in dispatchers {
            dispatcher.trigger_error(err.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::message::PingMessage;
    use darkfi_serial::serialize;

    #[test]
    fn dispatch_and_error_paths() {
        smol::block_on(async {
            let subsystem = MessageSubsystem::new();
            subsystem.add_dispatch::<PingMessage>().await;

            let sub = subsystem.subscribe::<PingMessage>().await.unwrap();

            let delivered =
                subsystem.notify("ping", &serialize(&PingMessage { nonce: 42 })).await;
            assert!(delivered);
            assert_eq!(sub.receive().await.unwrap().nonce, 42);

            // No dispatcher registered for this command
            assert!(!subsystem.notify("pong", &[]).await);

            subsystem.trigger_error(Error::ChannelStopped).await;
            assert!(matches!(sub.receive().await, Err(Error::ChannelStopped)));
        });
    }
}
