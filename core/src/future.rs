/*
 * future.rs
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

//! Per-request state machine and completion handle.
//!
//! A `ResponseFuture` is shared by the I/O task driving the request, the timeout tasks and any
//! number of callers. Exactly one of `done`, `abort` and `cancel` completes it; whichever wins the
//! compare-and-set on the completion flag invokes the handler's terminal callback, stores the
//! result and releases waiters. Later callers are no-ops.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{GetError, HttpError};
use crate::protocol::http::channel::ChannelHandle;
use crate::protocol::http::handler::AsyncHandler;
use crate::protocol::http::request::Request;
use crate::timeout::{TimeoutTarget, TimeoutsHolder};
use crate::uri;

/// Connection state of the current attempt, separate from the terminal gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No live channel yet.
    New,
    /// A pooled channel was attached.
    Pooled,
    /// A previous attempt failed recoverably and the request is being replayed.
    Reconnected,
    /// The channel was forcibly closed.
    Closed,
}

type Outcome<T> = std::result::Result<T, Arc<HttpError>>;

struct Shared<T> {
    handler: Mutex<Box<dyn AsyncHandler<Output = T>>>,
    request: Mutex<Request>,
    completed: AtomicBool,
    cancelled: AtomicBool,
    in_auth: AtomicBool,
    in_proxy_auth: AtomicBool,
    status_received: AtomicBool,
    dont_write_body: AtomicBool,
    retry: AtomicUsize,
    max_retry: usize,
    redirect_count: AtomicUsize,
    state: Mutex<ChannelState>,
    channel: Mutex<Option<Arc<ChannelHandle>>>,
    timeouts: Mutex<Option<TimeoutsHolder>>,
    touched: Mutex<Instant>,
    result: OnceLock<Outcome<T>>,
    latch: watch::Sender<bool>,
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    fn lock_handler(&self) -> std::sync::MutexGuard<'_, Box<dyn AsyncHandler<Output = T>>> {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_timeouts(&self) {
        if let Some(mut timeouts) = self.timeouts.lock().unwrap_or_else(PoisonError::into_inner).take() {
            timeouts.cancel();
        }
    }

    fn try_complete(&self) -> bool {
        self.completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn attached_channel(&self) -> Option<Arc<ChannelHandle>> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn release(&self, outcome: Outcome<T>) {
        let _ = self.result.set(outcome);
        self.latch.send_replace(true);
    }

    fn abort(&self, error: HttpError) {
        self.cancel_timeouts();
        if !self.try_complete() {
            return;
        }
        tracing::debug!(error = %error, "aborting request");
        self.lock_handler().on_throwable(&error);
        if let Some(channel) = self.attached_channel() {
            channel.close();
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ChannelState::Closed;
        self.release(Err(Arc::new(error)));
    }
}

impl<T: Clone + Send + Sync + 'static> TimeoutTarget for Shared<T> {
    fn is_done(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    fn last_touch(&self) -> Instant {
        *self.touched.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timeout_target(&self) -> String {
        uri::authority_form(self.request.lock().unwrap_or_else(PoisonError::into_inner).url())
    }

    fn abort_with(&self, error: HttpError) {
        self.abort(error);
    }
}

/// Handle to an in-flight request. Cheap to clone; all clones share the same state.
pub struct ResponseFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResponseFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ResponseFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("done", &self.shared.completed.load(Ordering::Acquire))
            .field("cancelled", &self.shared.cancelled.load(Ordering::Acquire))
            .field("retry", &self.shared.retry.load(Ordering::Acquire))
            .field("redirects", &self.shared.redirect_count.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> ResponseFuture<T> {
    pub(crate) fn new(
        request: Request,
        handler: Box<dyn AsyncHandler<Output = T>>,
        max_retry: usize,
    ) -> Self {
        let (latch, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                handler: Mutex::new(handler),
                request: Mutex::new(request),
                completed: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                in_auth: AtomicBool::new(false),
                in_proxy_auth: AtomicBool::new(false),
                status_received: AtomicBool::new(false),
                dont_write_body: AtomicBool::new(false),
                retry: AtomicUsize::new(0),
                max_retry,
                redirect_count: AtomicUsize::new(0),
                state: Mutex::new(ChannelState::New),
                channel: Mutex::new(None),
                timeouts: Mutex::new(None),
                touched: Mutex::new(Instant::now()),
                result: OnceLock::new(),
                latch,
            }),
        }
    }

    /// A future that has already failed (request rejected before dispatch).
    pub(crate) fn failed(
        request: Request,
        handler: Box<dyn AsyncHandler<Output = T>>,
        error: HttpError,
    ) -> Self {
        let future = Self::new(request, handler, 0);
        future.abort(error);
        future
    }

    /// The request as currently being executed (after filters, redirects and auth rewrites).
    pub fn request(&self) -> Request {
        self.shared.request.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set_request(&self, request: Request) {
        *self.shared.request.lock().unwrap_or_else(PoisonError::into_inner) = request;
    }

    /// Run `f` with exclusive access to the handler. Must not call back into `done`, `abort` or
    /// `cancel`.
    pub(crate) fn with_handler<R>(&self, f: impl FnOnce(&mut dyn AsyncHandler<Output = T>) -> R) -> R {
        let mut handler = self.shared.lock_handler();
        f(handler.as_mut())
    }

    /// Completed by any of `done`, `abort` or `cancel`.
    pub fn is_done(&self) -> bool {
        self.shared.completed.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: ChannelState) {
        *self.shared.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn retry_count(&self) -> usize {
        self.shared.retry.load(Ordering::Acquire)
    }

    pub(crate) fn increment_retry(&self) -> usize {
        self.shared.retry.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn max_retry(&self) -> usize {
        self.shared.max_retry
    }

    pub fn redirect_count(&self) -> usize {
        self.shared.redirect_count.load(Ordering::Acquire)
    }

    pub(crate) fn increment_redirect(&self) -> usize {
        self.shared.redirect_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_in_auth(&self) -> bool {
        self.shared.in_auth.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_auth(&self, in_auth: bool) {
        self.shared.in_auth.store(in_auth, Ordering::Release);
    }

    pub fn is_in_proxy_auth(&self) -> bool {
        self.shared.in_proxy_auth.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_proxy_auth(&self, in_auth: bool) {
        self.shared.in_proxy_auth.store(in_auth, Ordering::Release);
    }

    pub(crate) fn is_status_received(&self) -> bool {
        self.shared.status_received.load(Ordering::Acquire)
    }

    pub(crate) fn set_status_received(&self, received: bool) {
        self.shared.status_received.store(received, Ordering::Release);
    }

    /// Body held back until the server answers `Expect: 100-continue`.
    pub(crate) fn is_dont_write_body(&self) -> bool {
        self.shared.dont_write_body.load(Ordering::Acquire)
    }

    pub(crate) fn set_dont_write_body(&self, hold: bool) {
        self.shared.dont_write_body.store(hold, Ordering::Release);
    }

    /// Associate the channel of the current attempt (None when it is released).
    pub(crate) fn attach_channel(&self, channel: Option<Arc<ChannelHandle>>) {
        let closed_after_cancel = {
            let mut slot = self.shared.channel.lock().unwrap_or_else(PoisonError::into_inner);
            *slot = channel;
            self.is_cancelled()
        };
        if closed_after_cancel {
            if let Some(channel) = self.shared.attached_channel() {
                channel.mark_discard();
                channel.close();
            }
        }
    }

    pub fn channel(&self) -> Option<Arc<ChannelHandle>> {
        self.shared.attached_channel()
    }

    /// Record read progress; pushes back the read timeout.
    pub(crate) fn touch(&self) {
        *self.shared.touched.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Schedule the request and read timeouts. Only the first call per future has an effect.
    pub(crate) fn schedule_timeouts(&self, request_timeout: Option<Duration>, read_timeout: Option<Duration>) {
        if self.is_done() {
            return;
        }
        let mut slot = self.shared.timeouts.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let target: Arc<dyn TimeoutTarget> = self.shared.clone();
        let weak: Weak<dyn TimeoutTarget> = Arc::downgrade(&target);
        let holder = TimeoutsHolder::schedule(weak, request_timeout, read_timeout);
        if !holder.is_empty() {
            *slot = Some(holder);
        }
    }

    pub(crate) fn cancel_timeouts(&self) {
        self.shared.cancel_timeouts();
    }

    /// Whether a failed attempt may be retried transparently.
    ///
    /// An attached channel that is still open on a plaintext connection disqualifies the replay.
    pub fn can_be_replayed(&self) -> bool {
        if self.is_done() || self.is_cancelled() || self.is_in_auth() {
            return false;
        }
        if self.retry_count() >= self.shared.max_retry {
            return false;
        }
        let open_plaintext = self
            .shared
            .attached_channel()
            .map(|channel| channel.is_open())
            .unwrap_or(false)
            && !uri::is_secure(self.request().url());
        !open_plaintext
    }

    /// Complete successfully: the handler's `on_completed` result becomes the outcome.
    pub fn done(&self) {
        self.shared.cancel_timeouts();
        if !self.shared.try_complete() {
            return;
        }
        let outcome = {
            let mut handler = self.shared.lock_handler();
            match handler.on_completed() {
                Ok(value) => Ok(value),
                Err(error) => {
                    tracing::warn!(error = %error, "completion handler failed");
                    handler.on_throwable(&error);
                    Err(Arc::new(error))
                }
            }
        };
        self.shared.release(outcome);
    }

    /// Complete with `error`, closing the attached channel.
    pub fn abort(&self, error: HttpError) {
        self.shared.abort(error);
    }

    /// Cancel the request. Returns false if it had already completed.
    pub fn cancel(&self) -> bool {
        self.shared.cancel_timeouts();
        if !self.shared.try_complete() {
            return false;
        }
        self.shared.cancelled.store(true, Ordering::Release);
        if let Some(channel) = self.shared.attached_channel() {
            channel.mark_discard();
            channel.close();
        }
        tracing::debug!("request cancelled");
        let error = HttpError::Cancelled;
        self.shared.lock_handler().on_throwable(&error);
        self.shared.release(Err(Arc::new(error)));
        true
    }

    /// Outcome, if already completed.
    pub fn try_get(&self) -> Option<std::result::Result<T, GetError>> {
        self.shared.result.get().map(|outcome| match outcome {
            Ok(value) => Ok(value.clone()),
            Err(error) => Err(GetError::Execution(Arc::clone(error))),
        })
    }

    /// Wait for completion.
    pub async fn get(&self) -> std::result::Result<T, GetError> {
        let mut latch = self.shared.latch.subscribe();
        // The sender lives in `shared`, so the channel cannot close while we hold it.
        let _ = latch.wait_for(|released| *released).await;
        self.try_get()
            .unwrap_or_else(|| Err(GetError::Execution(Arc::new(HttpError::Cancelled))))
    }

    /// Wait at most `timeout`. Giving up leaves the request running.
    pub async fn get_timeout(&self, timeout: Duration) -> std::result::Result<T, GetError> {
        tokio::time::timeout(timeout, self.get())
            .await
            .unwrap_or(Err(GetError::WaitTimeout(timeout)))
    }
}
