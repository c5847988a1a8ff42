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
    io::{Read, Write},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use darkfi_serial::{Decodable, Encodable, SerialDecodable, SerialEncodable, VarInt};
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use sha2::{Digest, Sha256};
use url::Url;

use crate::{util::time::unix_timestamp, Error, Result};

/// Protocol version implemented by this node
pub const PROTOCOL_VERSION: u32 = 70015;
/// Earliest protocol version that understands address gossip
pub const ADDRS_MIN_VERSION: u32 = 31402;
/// Service bit advertised by full network nodes
pub const NODE_NETWORK: u64 = 1;

/// Bytes reserved for the command field in the packet header
pub const COMMAND_SIZE: usize = 12;
/// Packet header: magic + command + length + checksum
pub const HEADER_SIZE: usize = 24;
/// Hard cap on a single packet's payload
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;
/// Upper bound on entries in a single `addr` message
pub const MAX_ADDRS_PER_MESSAGE: usize = 1000;

/// Serialized size of a [`NetAddr`] record
pub const ADDR_RECORD_SIZE: usize = 31;

const ADDR_VARIANT_IPV4: u8 = 4;
const ADDR_VARIANT_IPV6: u8 = 6;

/// A peer endpoint as stored in the host pool and exchanged in address
/// gossip. Two addresses are equal when their IP and port are equal;
/// services and last-seen are advisory.
#[derive(Debug, Clone)]
pub struct NetAddr {
    pub ip: IpAddr,
    pub port: u16,
    pub services: u64,
    pub last_seen: u32,
}

impl NetAddr {
    pub fn new(ip: IpAddr, port: u16, services: u64) -> Self {
        Self { ip, port, services, last_seen: unix_timestamp() as u32 }
    }

    pub fn from_socket_addr(addr: SocketAddr, services: u64) -> Self {
        Self::new(addr.ip(), addr.port(), services)
    }

    /// Build an address from a `tcp://ip:port` URL. The host part must be
    /// an IP literal.
    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url.host_str().ok_or_else(|| Error::BadStream("URL without host".into()))?;
        let ip: IpAddr =
            host.parse().map_err(|_| Error::BadStream("URL host is not an IP".into()))?;
        let port = url.port().ok_or_else(|| Error::BadStream("URL without port".into()))?;
        Ok(Self::new(ip, port, 0))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// An address we could conceivably dial.
    pub fn is_valid(&self) -> bool {
        self.port != 0 && !self.ip.is_unspecified()
    }

    fn ip_bytes(&self) -> [u8; 16] {
        match self.ip {
            IpAddr::V4(ip) => ip.to_ipv6_mapped().octets(),
            IpAddr::V6(ip) => ip.octets(),
        }
    }
}

impl PartialEq for NetAddr {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Eq for NetAddr {}

impl std::hash::Hash for NetAddr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

impl std::fmt::Display for NetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

// Fixed record layout: variant, 16-byte IP, port, services, last-seen.
// The same encoding is used on the wire and in the hosts file.
impl Encodable for NetAddr {
    fn encode<S: Write>(&self, s: &mut S) -> std::io::Result<usize> {
        let mut len = 0;
        let variant = match self.ip {
            IpAddr::V4(_) => ADDR_VARIANT_IPV4,
            IpAddr::V6(_) => ADDR_VARIANT_IPV6,
        };
        len += variant.encode(s)?;
        s.write_all(&self.ip_bytes())?;
        len += 16;
        len += self.port.encode(s)?;
        len += self.services.encode(s)?;
        len += self.last_seen.encode(s)?;
        Ok(len)
    }
}

impl Decodable for NetAddr {
    fn decode<D: Read>(d: &mut D) -> std::io::Result<Self> {
        let variant = u8::decode(d)?;
        let mut ip_bytes = [0u8; 16];
        d.read_exact(&mut ip_bytes)?;

        let ip = match variant {
            ADDR_VARIANT_IPV4 => {
                let mut v4 = [0u8; 4];
                v4.copy_from_slice(&ip_bytes[12..]);
                IpAddr::V4(Ipv4Addr::from(v4))
            }
            ADDR_VARIANT_IPV6 => IpAddr::V6(Ipv6Addr::from(ip_bytes)),
            _ => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "unknown address variant",
                ))
            }
        };

        let port = u16::decode(d)?;
        let services = u64::decode(d)?;
        let last_seen = u32::decode(d)?;

        Ok(Self { ip, port, services, last_seen })
    }
}

/// Generic message template.
pub trait Message: 'static + Encodable + Decodable + Send + Sync {
    fn name() -> &'static str;
}

/// First message on every channel; negotiates the protocol session.
#[derive(Debug, Clone, SerialEncodable, SerialDecodable)]
pub struct VersionMessage {
    /// Protocol version of the sender
    pub version: u32,
    /// Service bits of the sender
    pub services: u64,
    /// Sender's clock
    pub timestamp: u64,
    /// Address the sender sees us at
    pub addr_recv: NetAddr,
    /// Sender's own advertised address
    pub addr_from: NetAddr,
    /// Random value identifying this handshake, used for
    /// self-connection detection
    pub nonce: u64,
    pub user_agent: String,
    /// Height of the sender's best chain
    pub start_height: u32,
    /// Whether the sender wants transactions relayed to it
    pub relay: bool,
}

impl Message for VersionMessage {
    fn name() -> &'static str {
        "version"
    }
}

/// Acknowledges a received `version`.
#[derive(Debug, Clone)]
pub struct VerackMessage {}

impl Encodable for VerackMessage {
    fn encode<S: Write>(&self, _s: &mut S) -> std::io::Result<usize> {
        Ok(0)
    }
}

impl Decodable for VerackMessage {
    fn decode<D: Read>(_d: &mut D) -> std::io::Result<Self> {
        Ok(Self {})
    }
}

impl Message for VerackMessage {
    fn name() -> &'static str {
        "verack"
    }
}

/// Keep-alive probe.
#[derive(Debug, Clone, SerialEncodable, SerialDecodable)]
pub struct PingMessage {
    pub nonce: u64,
}

impl Message for PingMessage {
    fn name() -> &'static str {
        "ping"
    }
}

/// Keep-alive reply, echoes the ping nonce.
#[derive(Debug, Clone, SerialEncodable, SerialDecodable)]
pub struct PongMessage {
    pub nonce: u64,
}

impl Message for PongMessage {
    fn name() -> &'static str {
        "pong"
    }
}

/// Requests a sample of the remote's host pool.
#[derive(Debug, Clone)]
pub struct GetAddrsMessage {}

impl Encodable for GetAddrsMessage {
    fn encode<S: Write>(&self, _s: &mut S) -> std::io::Result<usize> {
        Ok(0)
    }
}

impl Decodable for GetAddrsMessage {
    fn decode<D: Read>(_d: &mut D) -> std::io::Result<Self> {
        Ok(Self {})
    }
}

impl Message for GetAddrsMessage {
    fn name() -> &'static str {
        "getaddr"
    }
}

/// A batch of gossiped peer addresses.
#[derive(Debug, Clone)]
pub struct AddrsMessage {
    pub addrs: Vec<NetAddr>,
}

impl Encodable for AddrsMessage {
    fn encode<S: Write>(&self, s: &mut S) -> std::io::Result<usize> {
        self.addrs.encode(s)
    }
}

// Records are fixed-size, so a single undecodable entry is skipped without
// poisoning the remainder of the message.
impl Decodable for AddrsMessage {
    fn decode<D: Read>(d: &mut D) -> std::io::Result<Self> {
        let count = VarInt::decode(d)?.0 as usize;
        if count > MAX_ADDRS_PER_MESSAGE * 8 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unreasonable addr count",
            ))
        }

        let mut addrs = Vec::with_capacity(std::cmp::min(count, MAX_ADDRS_PER_MESSAGE));
        for _ in 0..count {
            let mut record = [0u8; ADDR_RECORD_SIZE];
            d.read_exact(&mut record)?;
            if let Ok(addr) = NetAddr::decode(&mut &record[..]) {
                addrs.push(addr);
            }
        }

        Ok(Self { addrs })
    }
}

impl Message for AddrsMessage {
    fn name() -> &'static str {
        "addr"
    }
}

/// One framed unit on the wire: command plus raw payload.
#[derive(Debug, Clone)]
pub struct Packet {
    pub command: String,
    pub payload: Vec<u8>,
}

/// First four bytes of the double-SHA256 of the payload.
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(Sha256::digest(payload));
    let mut ret = [0u8; 4];
    ret.copy_from_slice(&digest[..4]);
    ret
}

/// Read and verify one framed packet from the stream.
pub async fn read_packet<R: AsyncRead + Unpin + Send>(stream: &mut R, magic: u32) -> Result<Packet> {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await?;

    let mut word = [0u8; 4];
    word.copy_from_slice(&header[0..4]);
    if u32::from_le_bytes(word) != magic {
        return Err(Error::BadStream("invalid magic".into()))
    }

    let command_bytes = &header[4..4 + COMMAND_SIZE];
    let command_end = command_bytes.iter().position(|b| *b == 0).unwrap_or(COMMAND_SIZE);
    let command = std::str::from_utf8(&command_bytes[..command_end])
        .map_err(|_| Error::BadStream("malformed command".into()))?
        .to_string();

    word.copy_from_slice(&header[16..20]);
    let length = u32::from_le_bytes(word) as usize;
    if length > MAX_PAYLOAD_SIZE {
        return Err(Error::BadStream("oversized payload".into()))
    }

    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload).await?;

    if checksum(&payload) != header[20..24] {
        return Err(Error::BadStream("checksum mismatch".into()))
    }

    Ok(Packet { command, payload })
}

/// Frame and send one packet over the stream.
pub async fn send_packet<W: AsyncWrite + Unpin + Send>(
    stream: &mut W,
    magic: u32,
    packet: &Packet,
) -> Result<()> {
    if packet.command.is_empty() || packet.command.len() > COMMAND_SIZE {
        return Err(Error::BadStream("invalid command length".into()))
    }
    if packet.payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::BadStream("oversized payload".into()))
    }

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&magic.to_le_bytes());
    header[4..4 + packet.command.len()].copy_from_slice(packet.command.as_bytes());
    header[16..20].copy_from_slice(&(packet.payload.len() as u32).to_le_bytes());
    header[20..24].copy_from_slice(&checksum(&packet.payload));

    stream.write_all(&header).await?;
    stream.write_all(&packet.payload).await?;
    stream.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkfi_serial::{deserialize, serialize};

    const MAGIC: u32 = 0xd9b4_bef9;

    fn testaddr(last_octet: u8, port: u16) -> NetAddr {
        NetAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), port, NODE_NETWORK)
    }

    #[test]
    fn netaddr_record_layout() {
        let addr = testaddr(7, 8333);
        let encoded = serialize(&addr);
        assert_eq!(encoded.len(), ADDR_RECORD_SIZE);

        let decoded: NetAddr = deserialize(&encoded).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(decoded.services, NODE_NETWORK);
        assert_eq!(decoded.last_seen, addr.last_seen);
    }

    #[test]
    fn netaddr_equality_ignores_metadata() {
        let mut a = testaddr(1, 8333);
        let mut b = testaddr(1, 8333);
        a.services = 0;
        b.services = NODE_NETWORK;
        b.last_seen = 0;
        assert_eq!(a, b);
        assert_ne!(testaddr(1, 8333), testaddr(1, 8334));
        assert_ne!(testaddr(1, 8333), testaddr(2, 8333));
    }

    #[test]
    fn addrs_decode_skips_bad_records() {
        let good = testaddr(1, 8333);
        let mut payload = serialize(&VarInt(2));
        payload.extend_from_slice(&serialize(&good));
        let mut bad = serialize(&good);
        bad[0] = 9; // unknown variant
        payload.extend_from_slice(&bad);

        let message: AddrsMessage = deserialize(&payload).unwrap();
        assert_eq!(message.addrs, vec![good]);
    }

    #[test]
    fn packet_roundtrip() {
        smol::block_on(async {
            let ping = PingMessage { nonce: 777 };
            let sent = Packet { command: "ping".to_string(), payload: serialize(&ping) };

            let mut wire = futures::io::Cursor::new(vec![]);
            send_packet(&mut wire, MAGIC, &sent).await.unwrap();

            wire.set_position(0);
            let received = read_packet(&mut wire, MAGIC).await.unwrap();
            assert_eq!(received.command, "ping");
            let decoded: PingMessage = deserialize(&received.payload).unwrap();
            assert_eq!(decoded.nonce, 777);
        });
    }

    #[test]
    fn packet_bad_magic_rejected() {
        smol::block_on(async {
            let sent = Packet { command: "verack".to_string(), payload: vec![] };
            let mut wire = futures::io::Cursor::new(vec![]);
            send_packet(&mut wire, MAGIC, &sent).await.unwrap();

            wire.set_position(0);
            let result = read_packet(&mut wire, 0x0709_110b).await;
            assert!(matches!(result, Err(Error::BadStream(_))));
        });
    }

    #[test]
    fn packet_bad_checksum_rejected() {
        smol::block_on(async {
            let ping = PingMessage { nonce: 1 };
            let sent = Packet { command: "ping".to_string(), payload: serialize(&ping) };
            let mut wire = futures::io::Cursor::new(vec![]);
            send_packet(&mut wire, MAGIC, &sent).await.unwrap();

            let mut bytes = wire.into_inner();
            let last = bytes.len() - 1;
            bytes[last] ^= 0xff;

            let mut wire = futures::io::Cursor::new(bytes);
            let result = read_packet(&mut wire, MAGIC).await;
            assert!(matches!(result, Err(Error::BadStream(_))));
        });
    }
}
