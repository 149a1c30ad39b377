/*
 * pool.rs
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

//! Idle connection pool and connection slot accounting.
//!
//! `ChannelPool` stores idle keep-alive channels by partition key. `ChannelManager` sits in front
//! of it and hands out `ConnectionPermit`s for new connections when `max_connections` or
//! `max_connections_per_host` are configured; a channel carries its permit until it is dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;

use crate::config::ClientConfig;
use crate::error::{HttpError, Result};
use crate::protocol::http::channel::Channel;

/// Storage for idle channels.
pub trait ChannelPool: Send + Sync {
    /// Take an idle, open channel for `partition_key`.
    fn poll(&self, partition_key: &str) -> Option<Channel>;

    /// Store an idle channel. Returns the channel back when the pool refuses it.
    fn offer(&self, channel: Channel) -> std::result::Result<(), Channel>;

    /// Remove a specific idle channel. Returns true if it was pooled.
    fn remove_all(&self, channel_id: u64) -> bool;

    /// Drop every idle channel of a partition.
    fn flush_partition(&self, partition_key: &str);

    /// Number of idle channels held.
    fn idle_count(&self) -> usize;

    /// Close all idle channels and refuse further offers.
    fn close(&self);
}

/// Pool that never keeps anything; every request opens a new connection.
#[derive(Debug, Default)]
pub struct NoopChannelPool;

impl ChannelPool for NoopChannelPool {
    fn poll(&self, _partition_key: &str) -> Option<Channel> {
        None
    }

    fn offer(&self, channel: Channel) -> std::result::Result<(), Channel> {
        Err(channel)
    }

    fn remove_all(&self, _channel_id: u64) -> bool {
        false
    }

    fn flush_partition(&self, _partition_key: &str) {}

    fn idle_count(&self) -> usize {
        0
    }

    fn close(&self) {}
}

/// In-memory pool with an idle timeout, swept by a background reaper task.
pub struct DefaultChannelPool {
    idle_timeout: Duration,
    partitions: Mutex<HashMap<String, VecDeque<Channel>>>,
    closed: AtomicBool,
    reaper: Mutex<Option<AbortHandle>>,
}

impl DefaultChannelPool {
    pub fn new(idle_timeout: Duration) -> Arc<Self> {
        let pool = Arc::new(Self {
            idle_timeout,
            partitions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            reaper: Mutex::new(None),
        });
        pool.start_reaper();
        pool
    }

    /// Sweep periodically while a runtime is available; without one, stale channels are still
    /// skipped by `poll`.
    fn start_reaper(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = (self.idle_timeout / 2).max(Duration::from_millis(100));
        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(pool) => pool.expire_idle(),
                    None => return,
                }
            }
        });
        *self.reaper.lock().unwrap_or_else(PoisonError::into_inner) = Some(task.abort_handle());
    }

    fn is_usable(&self, channel: &Channel) -> bool {
        channel.is_open()
            && !channel.handle().is_discarded()
            && channel.idle_since().elapsed() < self.idle_timeout
    }

    /// Close channels idle for longer than the idle timeout.
    pub fn expire_idle(&self) {
        let mut partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut expired = 0;
        for queue in partitions.values_mut() {
            queue.retain(|channel| {
                let keep = self.is_usable(channel);
                if !keep {
                    channel.close();
                    expired += 1;
                }
                keep
            });
        }
        partitions.retain(|_, queue| !queue.is_empty());
        if expired > 0 {
            tracing::debug!(expired, "closed idle channels");
        }
    }
}

impl ChannelPool for DefaultChannelPool {
    fn poll(&self, partition_key: &str) -> Option<Channel> {
        let mut partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = partitions.get_mut(partition_key)?;
        // Most recently used first
        while let Some(channel) = queue.pop_back() {
            if self.is_usable(&channel) {
                return Some(channel);
            }
            channel.close();
        }
        None
    }

    fn offer(&self, mut channel: Channel) -> std::result::Result<(), Channel> {
        if self.closed.load(Ordering::Acquire) || !channel.is_open() || channel.handle().is_discarded() {
            return Err(channel);
        }
        channel.mark_idle();
        tracing::trace!(channel = channel.id(), key = channel.partition_key(), "channel offered to pool");
        let mut partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        partitions
            .entry(channel.partition_key().to_string())
            .or_default()
            .push_back(channel);
        Ok(())
    }

    fn remove_all(&self, channel_id: u64) -> bool {
        let mut partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        for queue in partitions.values_mut() {
            if let Some(pos) = queue.iter().position(|c| c.id() == channel_id) {
                if let Some(channel) = queue.remove(pos) {
                    channel.close();
                    removed = true;
                }
            }
        }
        partitions.retain(|_, queue| !queue.is_empty());
        removed
    }

    fn flush_partition(&self, partition_key: &str) {
        let removed = self
            .partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(partition_key);
        for channel in removed.into_iter().flatten() {
            channel.close();
        }
    }

    fn idle_count(&self) -> usize {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(VecDeque::len)
            .sum()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(reaper) = self.reaper.lock().unwrap_or_else(PoisonError::into_inner).take() {
            reaper.abort();
        }
        let drained: Vec<Channel> = self
            .partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .flat_map(|(_, queue)| queue)
            .collect();
        for channel in drained {
            channel.close();
        }
    }
}

impl Drop for DefaultChannelPool {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            reaper.abort();
        }
    }
}

/// Slot for one open connection. Released when dropped.
#[derive(Debug)]
pub struct ConnectionPermit {
    _global: Option<OwnedSemaphorePermit>,
    _per_host: Option<OwnedSemaphorePermit>,
}

/// Pool access plus connection limits.
pub struct ChannelManager {
    pool: Arc<dyn ChannelPool>,
    max_connections: Option<usize>,
    global: Option<Arc<Semaphore>>,
    max_connections_per_host: Option<usize>,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    closed: AtomicBool,
}

impl ChannelManager {
    pub fn new(config: &ClientConfig, pool: Arc<dyn ChannelPool>) -> Self {
        Self {
            pool,
            max_connections: config.max_connections,
            global: config.max_connections.map(|n| Arc::new(Semaphore::new(n))),
            max_connections_per_host: config.max_connections_per_host,
            per_host: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &Arc<dyn ChannelPool> {
        &self.pool
    }

    pub fn poll(&self, partition_key: &str) -> Option<Channel> {
        if self.is_closed() {
            return None;
        }
        let channel = self.pool.poll(partition_key)?;
        tracing::debug!(channel = channel.id(), key = partition_key, "using pooled channel");
        Some(channel)
    }

    /// Reserve a slot for a new connection to `partition_key`.
    pub fn preempt_channel(&self, partition_key: &str) -> Result<ConnectionPermit> {
        if self.is_closed() {
            return Err(HttpError::Closed);
        }
        let global = match &self.global {
            Some(sem) => Some(Arc::clone(sem).try_acquire_owned().map_err(|_| {
                HttpError::TooManyConnections(format!(
                    "too many connections: {}",
                    self.max_connections.unwrap_or_default()
                ))
            })?),
            None => None,
        };
        let per_host = match self.max_connections_per_host {
            Some(max) => {
                let sem = {
                    let mut per_host = self.per_host.lock().unwrap_or_else(PoisonError::into_inner);
                    // a host with every permit back holds no state
                    per_host.retain(|_, sem| sem.available_permits() < max);
                    Arc::clone(
                        per_host
                            .entry(partition_key.to_string())
                            .or_insert_with(|| Arc::new(Semaphore::new(max))),
                    )
                };
                Some(sem.try_acquire_owned().map_err(|_| {
                    HttpError::TooManyConnections(format!(
                        "too many connections per host {}: {}",
                        partition_key, max
                    ))
                })?)
            }
            None => None,
        };
        Ok(ConnectionPermit {
            _global: global,
            _per_host: per_host,
        })
    }

    /// Return a channel after a keep-alive exchange. Returns false (and closes it) when refused.
    pub fn offer(&self, channel: Channel) -> bool {
        if self.is_closed() {
            channel.close();
            return false;
        }
        match self.pool.offer(channel) {
            Ok(()) => true,
            Err(channel) => {
                channel.close();
                false
            }
        }
    }

    pub fn close_channel(&self, channel: Channel) {
        tracing::trace!(channel = channel.id(), "closing channel");
        channel.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.pool.close();
        }
    }
}
