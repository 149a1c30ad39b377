/*
 * feedable.rs
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

//! Push body: the application feeds buffers after the request has started.
//!
//! Fed parts go onto an unbounded queue shared with the body. When the queue runs dry before the
//! last part, `read` returns `BodyState::Suspend` and the writer parks on the resume signal until
//! the next `feed`. With chunk framing enabled the body emits the chunked transfer-coding itself:
//! a hex size line per part, CRLF after its data, and `0\r\n\r\n` after the last part.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Buf, Bytes};
use tokio::sync::Notify;

use super::{Body, BodyGenerator, BodyState};

/// Told about every feed, e.g. to wake a transport writer that is not using the resume signal.
pub trait FeedListener: Send + Sync {
    fn on_content_added(&self);

    fn on_error(&self, _error: &io::Error) {}
}

struct BodyPart {
    buffer: Bytes,
    is_last: bool,
}

struct FeedQueue {
    parts: Mutex<VecDeque<BodyPart>>,
    last_fed: AtomicBool,
    resume: Arc<Notify>,
    listener: Mutex<Option<Arc<dyn FeedListener>>>,
}

impl FeedQueue {
    fn parts(&self) -> MutexGuard<'_, VecDeque<BodyPart>> {
        self.parts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> Option<Arc<dyn FeedListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Generator for a body fed incrementally with `feed`.
#[derive(Clone)]
pub struct FeedableBodyGenerator {
    queue: Arc<FeedQueue>,
    chunk_framing: bool,
}

impl Default for FeedableBodyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedableBodyGenerator {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(FeedQueue {
                parts: Mutex::new(VecDeque::new()),
                last_fed: AtomicBool::new(false),
                resume: Arc::new(Notify::new()),
                listener: Mutex::new(None),
            }),
            chunk_framing: false,
        }
    }

    /// Emit chunked transfer-coding framing from the body itself.
    pub fn with_chunk_framing(mut self, framing: bool) -> Self {
        self.chunk_framing = framing;
        self
    }

    pub fn set_listener(&self, listener: Arc<dyn FeedListener>) {
        *self
            .queue
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Queue `buffer`; `is_last` ends the body. Feeding after the last part is an error.
    pub fn feed(&self, buffer: impl Into<Bytes>, is_last: bool) -> io::Result<()> {
        if self.queue.last_fed.load(Ordering::Acquire) {
            let err = io::Error::new(io::ErrorKind::InvalidInput, "body already finished");
            if let Some(listener) = self.queue.listener() {
                listener.on_error(&err);
            }
            return Err(err);
        }
        if is_last {
            self.queue.last_fed.store(true, Ordering::Release);
        }
        self.queue.parts().push_back(BodyPart {
            buffer: buffer.into(),
            is_last,
        });
        self.queue.resume.notify_one();
        if let Some(listener) = self.queue.listener() {
            listener.on_content_added();
        }
        Ok(())
    }
}

impl BodyGenerator for FeedableBodyGenerator {
    fn create_body(&self) -> io::Result<Box<dyn Body>> {
        Ok(Box::new(FeedableBody {
            queue: self.queue.clone(),
            chunk_framing: self.chunk_framing,
            state: PushState::Ongoing,
            staged: VecDeque::new(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushState {
    /// Taking parts from the queue.
    Ongoing,
    /// Last part dequeued; staged bytes still draining.
    Closing,
    Finished,
}

/// Body side of a `FeedableBodyGenerator`.
pub struct FeedableBody {
    queue: Arc<FeedQueue>,
    chunk_framing: bool,
    state: PushState,
    /// Bytes taken off the queue (framing included) not yet copied out.
    staged: VecDeque<Bytes>,
}

impl FeedableBody {
    fn stage(&mut self, part: BodyPart) {
        if self.chunk_framing {
            if !part.buffer.is_empty() {
                self.staged
                    .push_back(Bytes::from(format!("{:x}\r\n", part.buffer.len())));
                self.staged.push_back(part.buffer);
                self.staged.push_back(Bytes::from_static(b"\r\n"));
            }
            if part.is_last {
                self.staged.push_back(Bytes::from_static(b"0\r\n\r\n"));
            }
        } else if !part.buffer.is_empty() {
            self.staged.push_back(part.buffer);
        }
        if part.is_last {
            self.state = PushState::Closing;
        }
    }
}

impl Body for FeedableBody {
    fn content_length(&self) -> i64 {
        -1
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<BodyState> {
        let mut written = 0;
        while written < buf.len() {
            if let Some(front) = self.staged.front_mut() {
                let n = front.len().min(buf.len() - written);
                buf[written..written + n].copy_from_slice(&front[..n]);
                front.advance(n);
                if front.is_empty() {
                    self.staged.pop_front();
                }
                written += n;
                continue;
            }
            match self.state {
                PushState::Finished => break,
                PushState::Closing => {
                    self.state = PushState::Finished;
                    break;
                }
                PushState::Ongoing => {}
            }
            let part = self.queue.parts().pop_front();
            match part {
                Some(part) if part.buffer.is_empty() && !part.is_last => continue,
                Some(part) => self.stage(part),
                None => break,
            }
        }
        if written > 0 {
            return Ok(BodyState::Continue(written));
        }
        match self.state {
            PushState::Finished => Ok(BodyState::Stop),
            PushState::Closing if self.staged.is_empty() => {
                self.state = PushState::Finished;
                Ok(BodyState::Stop)
            }
            _ if buf.is_empty() => Ok(BodyState::Continue(0)),
            _ => Ok(BodyState::Suspend),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.staged.clear();
        self.state = PushState::Finished;
        Ok(())
    }

    fn resume_signal(&self) -> Option<Arc<Notify>> {
        Some(self.queue.resume.clone())
    }

    fn is_chunk_framed(&self) -> bool {
        self.chunk_framing
    }
}
