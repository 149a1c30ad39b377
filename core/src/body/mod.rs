/*
 * mod.rs
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

//! Request body abstractions.
//!
//! A `Body` is a sequence of bytes with a (possibly unknown) length, read incrementally by the
//! request writer. `read` never blocks waiting for data: a body with nothing available yet returns
//! `BodyState::Suspend` and exposes a resume signal the writer waits on. A `RandomAccessBody` can
//! additionally copy a byte range straight to the transport, which the writer uses when no TLS
//! layer sits between it and the socket.
//!
//! Bodies are single-use; a `BodyGenerator` (or the request's body source) creates a fresh one for
//! every write attempt so that replays resend the same bytes.

mod memory;
mod feedable;
pub(crate) mod file;
mod stream;

pub use self::memory::{ByteArrayBodyGenerator, BytesBody};
pub use self::feedable::{FeedListener, FeedableBody, FeedableBodyGenerator};
pub use self::file::{FileBody, FileBodyGenerator};
pub use self::stream::{InputStreamBody, InputStreamBodyGenerator};

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::runtime::RuntimeFlavor;
use tokio::sync::Notify;

/// Outcome of a `Body::read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    /// This many bytes were written into the buffer (may be zero only for a zero-length buffer).
    Continue(usize),
    /// No data available yet, but more will come; wait for the resume signal.
    Suspend,
    /// End of body.
    Stop,
}

/// A request body read sequentially by the writer.
pub trait Body: Send {
    /// Length in bytes, or a negative value when unknown (sent chunked).
    fn content_length(&self) -> i64;

    /// Fill `buf` with the next bytes of the body.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<BodyState>;

    /// Release files and buffers. Idempotent.
    fn close(&mut self) -> io::Result<()>;

    /// Random-access view of this body, if it supports direct transfer.
    fn as_random_access(&mut self) -> Option<&mut dyn RandomAccessBody> {
        None
    }

    /// Notified whenever a suspended body has more data.
    fn resume_signal(&self) -> Option<Arc<Notify>> {
        None
    }

    /// True when the body emits its own chunked transfer-coding framing.
    fn is_chunk_framed(&self) -> bool {
        false
    }

    /// True when `read` may block on file or stream I/O.
    fn is_blocking(&self) -> bool {
        false
    }
}

/// A body that can write a byte range directly to the transport.
#[async_trait]
pub trait RandomAccessBody: Body {
    /// Write up to `count` bytes starting at `position` to `target`; returns bytes written
    /// (0 at end of body).
    async fn transfer_to(
        &mut self,
        position: u64,
        count: u64,
        target: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> io::Result<u64>;
}

/// Creates a fresh body for each write attempt.
pub trait BodyGenerator: Send + Sync {
    fn create_body(&self) -> io::Result<Box<dyn Body>>;
}

/// Closes the body when dropped so that every exit path of a write attempt releases it.
pub struct BodyGuard {
    body: Box<dyn Body>,
}

impl BodyGuard {
    pub fn new(body: Box<dyn Body>) -> Self {
        Self { body }
    }

    pub fn body(&mut self) -> &mut dyn Body {
        self.body.as_mut()
    }

    pub fn content_length(&self) -> i64 {
        self.body.content_length()
    }
}

impl Drop for BodyGuard {
    fn drop(&mut self) {
        if let Err(e) = self.body.close() {
            tracing::warn!(error = %e, "failed to close request body");
        }
    }
}

/// Run blocking body I/O without stalling the other tasks on this worker.
///
/// `block_in_place` is only available on the multi-threaded runtime; a current-thread runtime has
/// no other worker to hand its tasks to, so there the closure runs inline.
pub(crate) fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Drain a body into memory (tests and small bodies only).
pub fn read_to_end(body: &mut dyn Body, buffer_size: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        match body.read(&mut buf)? {
            BodyState::Continue(n) => out.extend_from_slice(&buf[..n]),
            BodyState::Suspend => {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "body suspended before end",
                ))
            }
            BodyState::Stop => return Ok(out),
        }
    }
}
