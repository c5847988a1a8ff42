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

/// Accepts inbound socket connections
pub mod acceptor;
pub use acceptor::{Acceptor, AcceptorPtr};

/// A single peer connection
pub mod channel;
pub use channel::{Channel, ChannelInfo, ChannelPtr};

/// Registry of live, promoted channels
pub mod connections;
pub use connections::{Connections, ConnectionsPtr};

/// Dials outbound socket connections
pub mod connector;
pub use connector::Connector;

/// Bounded, persisted pool of known peer addresses
pub mod hosts;
pub use hosts::{Hosts, HostsPtr};

/// Wire framing and the protocol messages
pub mod message;
pub use message::{Message, NetAddr};

/// Routes received payloads to typed subscriptions
pub mod message_subscriber;
pub use message_subscriber::{MessageSubscription, MessageSubsystem};

/// The top-level network coordinator
pub mod p2p;
pub use p2p::{ChannelSubscription, P2p, P2pPtr};

/// Registry of in-flight handshake nonces
pub mod pending;
pub use pending::{Pending, PendingPtr};

/// Per-channel protocol state machines
pub mod protocol;
pub use protocol::{
    register_default_protocols, ProtocolBase, ProtocolBasePtr, ProtocolJobsManager,
    ProtocolJobsManagerPtr, ProtocolRegistry,
};

/// Channel factories: manual, seed, inbound, outbound
pub mod session;
pub use session::{
    Session, SessionBitFlag, SESSION_ALL, SESSION_DEFAULT, SESSION_INBOUND, SESSION_MANUAL,
    SESSION_OUTBOUND, SESSION_SEED,
};

/// Network configuration
pub mod settings;
pub use settings::{Settings, SettingsPtr};

#[cfg(test)]
mod tests;
