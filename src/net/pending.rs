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

use std::{collections::HashSet, sync::Arc};

use smol::lock::Mutex;

/// Atomic pointer to the pending-handshake registry.
pub type PendingPtr = Arc<Pending>;

/// Nonces of handshakes currently in flight. Every dial registers the
/// nonce it sends in its `version` message here; a received `version`
/// carrying a registered nonce means the remote end is ourselves.
pub struct Pending {
    nonces: Mutex<HashSet<u64>>,
}

impl Pending {
    pub fn new() -> PendingPtr {
        Arc::new(Self { nonces: Mutex::new(HashSet::new()) })
    }

    /// Register a handshake nonce. Returns false if it was already
    /// registered.
    pub async fn store(&self, nonce: u64) -> bool {
        self.nonces.lock().await.insert(nonce)
    }

    pub async fn remove(&self, nonce: u64) {
        self.nonces.lock().await.remove(&nonce);
    }

    pub async fn contains(&self, nonce: u64) -> bool {
        self.nonces.lock().await.contains(&nonce)
    }

    pub async fn count(&self) -> usize {
        self.nonces.lock().await.len()
    }

    pub async fn clear(&self) {
        self.nonces.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_lifecycle() {
        smol::block_on(async {
            let pending = Pending::new();

            assert!(pending.store(11).await);
            assert!(!pending.store(11).await);
            assert!(pending.contains(11).await);
            assert_eq!(pending.count().await, 1);

            pending.remove(11).await;
            assert!(!pending.contains(11).await);
            assert_eq!(pending.count().await, 0);
        });
    }
}
