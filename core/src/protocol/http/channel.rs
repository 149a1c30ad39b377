/*
 * channel.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, an asynchronous HTTP client engine.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Channel: one HTTP/1.1 connection (plain TCP, TLS or any other transport) plus the state the
//! client keeps for it between requests.
//!
//! A channel is owned by exactly one party at a time: the I/O task running a request, or the
//! pool while idle. Other parties (the response future, timeout tasks, `cancel` callers) hold the
//! shared `ChannelHandle`, through which they can close the channel; the owner's pending read or
//! write then fails promptly.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::net::{BoxedTransport, Connector};
use crate::pool::ConnectionPermit;

const READ_CHUNK: usize = 8192;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Shared view of a channel: identity, open/closed flag and the discard marker.
#[derive(Debug)]
pub struct ChannelHandle {
    id: u64,
    closed: AtomicBool,
    discard: AtomicBool,
    notify: Notify,
}

impl ChannelHandle {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            closed: AtomicBool::new(false),
            discard: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Close the channel. The owner's in-flight I/O fails and the transport is dropped.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::trace!(channel = self.id, "channel closed");
            self.notify.notify_waiters();
        }
    }

    /// Never return this channel to the pool.
    pub fn mark_discard(&self) {
        self.discard.store(true, Ordering::Release);
    }

    pub fn is_discarded(&self) -> bool {
        self.discard.load(Ordering::Acquire)
    }

    /// Resolves once the channel is closed.
    pub async fn closed(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_open() {
                return;
            }
            notified.await;
        }
    }
}

/// Connection-scoped authentication state.
#[derive(Debug, Default, Clone)]
pub struct ChannelAuth {
    /// A connection-scoped Authorization (NTLM, Negotiate) was already sent on this channel.
    pub authorization_sent: bool,
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "channel closed")
}

pub struct Channel {
    handle: Arc<ChannelHandle>,
    transport: BoxedTransport,
    secure: bool,
    partition_key: String,
    pub(crate) read_buf: BytesMut,
    pub(crate) auth: ChannelAuth,
    permit: Option<ConnectionPermit>,
    idle_since: Instant,
}

impl Channel {
    pub fn new(
        transport: BoxedTransport,
        secure: bool,
        partition_key: impl Into<String>,
        permit: Option<ConnectionPermit>,
    ) -> Self {
        let handle = ChannelHandle::new();
        tracing::trace!(channel = handle.id, "channel opened");
        Self {
            handle,
            transport,
            secure,
            partition_key: partition_key.into(),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            auth: ChannelAuth::default(),
            permit,
            idle_since: Instant::now(),
        }
    }

    pub fn handle(&self) -> &Arc<ChannelHandle> {
        &self.handle
    }

    pub fn id(&self) -> u64 {
        self.handle.id
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// TLS sits between the channel and the socket.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn holds_permit(&self) -> bool {
        self.permit.is_some()
    }

    pub(crate) fn mark_idle(&mut self) {
        self.idle_since = Instant::now();
    }

    pub fn idle_since(&self) -> Instant {
        self.idle_since
    }

    pub fn close(&self) {
        self.handle.close();
    }

    /// Direct access to the transport for zero-copy body transfers.
    pub(crate) fn transport_mut(&mut self) -> &mut BoxedTransport {
        &mut self.transport
    }

    /// Read more bytes into `read_buf`. Returns 0 at end of stream.
    pub(crate) async fn read_more(&mut self) -> io::Result<usize> {
        if !self.is_open() {
            return Err(closed_error());
        }
        self.read_buf.reserve(READ_CHUNK);
        let handle = Arc::clone(&self.handle);
        tokio::select! {
            n = self.transport.read_buf(&mut self.read_buf) => n,
            _ = handle.closed() => Err(closed_error()),
        }
    }

    /// Write and flush `data`.
    pub(crate) async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if !self.is_open() {
            return Err(closed_error());
        }
        let handle = Arc::clone(&self.handle);
        let transport = &mut self.transport;
        tokio::select! {
            r = async {
                transport.write_all(data).await?;
                transport.flush().await
            } => r,
            _ = handle.closed() => Err(closed_error()),
        }
    }

    /// Flush bytes written directly through `transport_mut`.
    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        let handle = Arc::clone(&self.handle);
        tokio::select! {
            r = self.transport.flush() => r,
            _ = handle.closed() => Err(closed_error()),
        }
    }

    /// Replace the transport with a TLS session over it (after a proxy CONNECT).
    pub(crate) async fn upgrade_tls(self, connector: &dyn Connector, host: &str) -> io::Result<Channel> {
        let Channel {
            handle,
            transport,
            partition_key,
            read_buf,
            auth,
            permit,
            idle_since,
            ..
        } = self;
        let result = tokio::select! {
            r = connector.upgrade_tls(transport, host) => r,
            _ = handle.closed() => Err(closed_error()),
        };
        match result {
            Ok(transport) => Ok(Channel {
                handle,
                transport,
                secure: true,
                partition_key,
                read_buf,
                auth,
                permit,
                idle_since,
            }),
            Err(e) => {
                handle.close();
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.handle.id)
            .field("open", &self.is_open())
            .field("secure", &self.secure)
            .field("partition_key", &self.partition_key)
            .finish()
    }
}
