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

/// Main result type used throughout the codebase.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type used throughout the codebase.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The coordinator or one of its registries has been stopped
    #[error("Service stopped")]
    ServiceStopped,

    /// Generic failure of a lifecycle operation (bad state, invalid input)
    #[error("Operation failed")]
    OperationFailed,

    /// The host pool has no address to hand out
    #[error("Address not found")]
    AddressNotFound,

    /// Another live channel already occupies this remote IP
    #[error("Address already in use")]
    AddressInUse,

    /// The connection limit has been reached
    #[error("Resource limit reached")]
    ResourceLimit,

    /// Handshake rejected, the remote end is ourselves
    #[error("Accept failed")]
    AcceptFailed,

    /// A channel timer fired (handshake, inactivity, expiration, ping)
    #[error("Channel timed out")]
    ChannelTimeout,

    /// The channel was stopped
    #[error("Channel stopped")]
    ChannelStopped,

    /// The channel was dropped before promotion
    #[error("Channel dropped")]
    ChannelDropped,

    /// Seeding finished without yielding any usable address
    #[error("Peer throttling")]
    PeerThrottling,

    /// Malformed data on the wire or in a persisted file
    #[error("Bad stream: {0}")]
    BadStream(String),

    /// I/O failure (sockets, hosts file)
    #[error("I/O error: {0:?}")]
    Io(std::io::ErrorKind),

    /// Logger initialization failure
    #[error("Failed setting the logger")]
    SetLoggerError,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.kind())
    }
}

impl From<log::SetLoggerError> for Error {
    fn from(_err: log::SetLoggerError) -> Self {
        Self::SetLoggerError
    }
}
