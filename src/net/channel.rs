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

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use darkfi_serial::serialize;
use futures::{
    io::{ReadHalf, WriteHalf},
    AsyncReadExt,
};
use log::{debug, info};
use smol::{lock::Mutex, net::TcpStream};

use crate::{
    system::{
        sleep, ExecutorPtr, StoppableTask, StoppableTaskPtr, Subscriber, SubscriberPtr,
        Subscription,
    },
    util::time::unix_timestamp,
    Error, Result,
};

use super::{
    message,
    message::{Message, NetAddr, Packet, VersionMessage},
    message_subscriber::{MessageSubscription, MessageSubsystem},
    settings::SettingsPtr,
};

/// Atomic pointer to a channel.
pub type ChannelPtr = Arc<Channel>;

/// Seconds between lifetime-timer checks.
const TIMER_TICK_SECONDS: u64 = 5;

/// Remote peer state learned during the version handshake.
#[derive(Debug, Clone, Default)]
pub struct ChannelInfo {
    /// Negotiated protocol version
    pub version: u32,
    /// Remote service bits
    pub services: u64,
    /// Remote chain height at handshake time
    pub start_height: u32,
    /// Handshake nonce the remote sent us
    pub nonce: u64,
}

/// One established peer connection: a framed transport plus per-peer
/// state, timers, and message dispatch.
pub struct Channel {
    reader: Mutex<ReadHalf<TcpStream>>,
    writer: Mutex<WriteHalf<TcpStream>>,
    address: NetAddr,
    message_subsystem: MessageSubsystem,
    /// Raw packets whose command has no registered dispatcher
    packet_subscriber: SubscriberPtr<Packet>,
    /// Receives the stop code, exactly once
    stop_subscriber: SubscriberPtr<Error>,
    /// Fires when nothing has been sent for the revival period
    revival_subscriber: SubscriberPtr<()>,
    receive_task: StoppableTaskPtr,
    stopped: AtomicBool,
    stop_code: Mutex<Option<Error>>,
    info: Mutex<ChannelInfo>,
    last_activity: AtomicU64,
    last_send: AtomicU64,
    settings: SettingsPtr,
}

impl Channel {
    /// Wrap a freshly accepted or connected stream. The channel is inert
    /// until [`Channel::start`] launches its receive loop.
    pub async fn new(stream: TcpStream, address: NetAddr, settings: SettingsPtr) -> ChannelPtr {
        let (reader, writer) = stream.split();

        Arc::new(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            address,
            message_subsystem: MessageSubsystem::new(),
            packet_subscriber: Subscriber::new(),
            stop_subscriber: Subscriber::new(),
            revival_subscriber: Subscriber::new(),
            receive_task: StoppableTask::new(),
            stopped: AtomicBool::new(false),
            stop_code: Mutex::new(None),
            info: Mutex::new(ChannelInfo::default()),
            last_activity: AtomicU64::new(unix_timestamp()),
            last_send: AtomicU64::new(unix_timestamp()),
            settings,
        })
    }

    /// Launch the receive loop on the executor.
    pub fn start(self: Arc<Self>, executor: ExecutorPtr) {
        let self_ = self.clone();
        self.receive_task.clone().start(
            self.clone().main_receive_loop(),
            move |result| self_.handle_stop(result),
            Error::ChannelStopped,
            executor,
        );
    }

    /// Stop the channel with the given code. Attached protocols and stop
    /// subscribers are notified exactly once; repeated calls are no-ops.
    pub async fn stop(self: Arc<Self>, reason: Error) {
        if self.stopped.load(Ordering::SeqCst) {
            return
        }

        *self.stop_code.lock().await = Some(reason);
        self.receive_task.clone().stop().await;

        // The receive loop never ran, so its stop handler won't either
        if !self.stopped.load(Ordering::SeqCst) {
            self.clone().handle_stop(Ok(())).await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Frame and send a message to the peer.
    pub async fn send<M: Message>(&self, message: &M) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::ChannelStopped)
        }

        debug!(target: "net::channel", "Sending '{}' to {}", M::name(), self.address);

        let packet = Packet { command: M::name().to_string(), payload: serialize(message) };
        let writer = &mut *self.writer.lock().await;
        message::send_packet(writer, self.settings.magic, &packet).await?;

        self.last_send.store(unix_timestamp(), Ordering::SeqCst);
        Ok(())
    }

    /// Subscribe to a message type. The dispatcher for it must have been
    /// added on the message subsystem beforehand.
    pub async fn subscribe_msg<M: Message>(&self) -> Result<MessageSubscription<M>> {
        self.message_subsystem.subscribe::<M>().await
    }

    /// Subscribe to the channel's stop code.
    pub async fn subscribe_stop(&self) -> Result<Subscription<Error>> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::ChannelStopped)
        }

        Ok(self.stop_subscriber.clone().subscribe().await)
    }

    /// Subscribe to packets no protocol has claimed.
    pub async fn subscribe_packet(&self) -> Subscription<Packet> {
        self.packet_subscriber.clone().subscribe().await
    }

    /// Subscribe to revival events (send-side quiescence).
    pub async fn subscribe_revival(&self) -> Subscription<()> {
        self.revival_subscriber.clone().subscribe().await
    }

    pub fn message_subsystem(&self) -> &MessageSubsystem {
        &self.message_subsystem
    }

    pub fn address(&self) -> &NetAddr {
        &self.address
    }

    pub async fn remote_info(&self) -> ChannelInfo {
        self.info.lock().await.clone()
    }

    /// Record what the peer told us in its version message.
    pub async fn set_remote_info(&self, version: &VersionMessage) {
        let mut info = self.info.lock().await;
        info.version = version.version;
        info.services = version.services;
        info.start_height = version.start_height;
        info.nonce = version.nonce;
    }

    /// Arm the inactivity, expiration and revival timers. Called once the
    /// channel is promoted into the connection registry.
    pub fn start_timers(self: Arc<Self>, executor: ExecutorPtr) {
        let now = unix_timestamp();
        self.last_activity.store(now, Ordering::SeqCst);
        self.last_send.store(now, Ordering::SeqCst);
        executor.clone().spawn(self.lifetime_loop(now)).detach();
    }

    /// Periodic lifetime checks for a promoted channel. Ends itself when
    /// the channel stops.
    async fn lifetime_loop(self: Arc<Self>, promoted_at: u64) {
        let stop_sub = match self.subscribe_stop().await {
            Ok(sub) => sub,
            Err(_) => return,
        };

        let inactivity = self.settings.channel_inactivity_minutes as u64 * 60;
        let expiration = self.settings.channel_expiration_minutes as u64 * 60;
        let revival = self.settings.channel_revival_minutes as u64 * 60;

        let ticker = async {
            loop {
                sleep(TIMER_TICK_SECONDS).await;

                if self.stopped.load(Ordering::SeqCst) {
                    return
                }

                let now = unix_timestamp();

                if expiration > 0 && now.saturating_sub(promoted_at) >= expiration {
                    info!(target: "net::channel", "Channel {} expired, rotating", self.address);
                    self.clone().stop(Error::ChannelTimeout).await;
                    return
                }

                let idle = now.saturating_sub(self.last_activity.load(Ordering::SeqCst));
                if inactivity > 0 && idle >= inactivity {
                    info!(target: "net::channel", "Channel {} inactive for {}s, stopping", self.address, idle);
                    self.clone().stop(Error::ChannelTimeout).await;
                    return
                }

                let quiet = now.saturating_sub(self.last_send.load(Ordering::SeqCst));
                if revival > 0 && quiet >= revival {
                    debug!(target: "net::channel", "Channel {} revival fired", self.address);
                    self.last_send.store(now, Ordering::SeqCst);
                    self.revival_subscriber.notify(()).await;
                }
            }
        };

        let stopped = async {
            stop_sub.receive().await;
        };

        smol::future::or(ticker, stopped).await;
    }

    /// Read framed packets off the wire and deliver them to dispatchers.
    /// Undispatched commands are relayed raw to packet subscribers.
    async fn main_receive_loop(self: Arc<Self>) -> Result<()> {
        loop {
            let packet = {
                let reader = &mut *self.reader.lock().await;
                message::read_packet(reader, self.settings.magic).await?
            };

            self.last_activity.store(unix_timestamp(), Ordering::SeqCst);
            debug!(target: "net::channel", "Received '{}' from {}", packet.command, self.address);

            let dispatched =
                self.message_subsystem.notify(&packet.command, &packet.payload).await;

            if !dispatched {
                debug!(
                    target: "net::channel",
                    "No dispatcher for '{}', relaying raw packet", packet.command
                );
                self.packet_subscriber.notify(packet).await;
            }
        }
    }

    /// Runs exactly once, whatever ends the channel first: a transport
    /// error, a protocol calling `stop`, or coordinator shutdown.
    async fn handle_stop(self: Arc<Self>, result: Result<()>) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return
        }

        let reason = match self.stop_code.lock().await.take() {
            Some(code) => code,
            None => match result {
                Ok(()) => Error::ChannelStopped,
                Err(e) => e,
            },
        };

        debug!(target: "net::channel", "Channel {} stopped: {}", self.address, reason);

        self.message_subsystem.trigger_error(Error::ChannelStopped).await;
        self.stop_subscriber.notify(reason).await;
    }
}
