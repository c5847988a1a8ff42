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

use std::{collections::HashMap, sync::Arc};

use rand::{rngs::OsRng, Rng};
use smol::lock::Mutex;

pub type SubscriberPtr<T> = Arc<Subscriber<T>>;
pub type SubscriptionId = u64;

/// One registration on a [`Subscriber`]. Every `receive()` call resolves
/// with the next value published by the parent.
pub struct Subscription<T> {
    id: SubscriptionId,
    recv_queue: smol::channel::Receiver<T>,
    parent: SubscriberPtr<T>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Receive the next value. Panics if the parent subscriber was dropped
    /// while we are still registered, which is a programming error.
    pub async fn receive(&self) -> T {
        match self.recv_queue.recv().await {
            Ok(message) => message,
            Err(e) => panic!("Subscription::receive() recv_queue failed: {e}"),
        }
    }

    /// Remove this registration from the parent subscriber.
    pub async fn unsubscribe(&self) {
        self.parent.clone().unsubscribe(self.id).await
    }
}

/// A simple broadcast system. Subscribers register with `subscribe()` and
/// consume values with `Subscription::receive()`; producers push values to
/// every registered subscription with `notify()`.
pub struct Subscriber<T> {
    subs: Mutex<HashMap<SubscriptionId, smol::channel::Sender<T>>>,
}

impl<T: Clone + Send + 'static> Subscriber<T> {
    pub fn new() -> SubscriberPtr<T> {
        Arc::new(Self { subs: Mutex::new(HashMap::new()) })
    }

    pub async fn subscribe(self: SubscriberPtr<T>) -> Subscription<T> {
        let (sender, recv_queue) = smol::channel::unbounded();
        let id = OsRng.gen();

        self.subs.lock().await.insert(id, sender);

        Subscription { id, recv_queue, parent: self }
    }

    pub async fn unsubscribe(self: SubscriberPtr<T>, sub_id: SubscriptionId) {
        self.subs.lock().await.remove(&sub_id);
    }

    /// Publish a value to every registered subscription.
    pub async fn notify(&self, message_result: T) {
        for sub in self.subs.lock().await.values() {
            let _ = sub.send(message_result.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_reaches_all_subscriptions() {
        smol::block_on(async {
            let subscriber: SubscriberPtr<u32> = Subscriber::new();
            let sub1 = subscriber.clone().subscribe().await;
            let sub2 = subscriber.clone().subscribe().await;

            subscriber.notify(110).await;
            assert_eq!(sub1.receive().await, 110);
            assert_eq!(sub2.receive().await, 110);

            sub2.unsubscribe().await;
            subscriber.notify(4).await;
            assert_eq!(sub1.receive().await, 4);
            assert_eq!(subscriber.subs.lock().await.len(), 1);
        });
    }
}
