/*
 * timeout.rs
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

//! Request and read timeouts.
//!
//! Each future gets at most one request-timeout task and one read-timeout task. The tasks hold
//! only a weak reference to the future and are aborted when the future completes or is dropped.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::{HttpError, TimeoutKind};

/// What a timeout task needs from the future it guards.
pub(crate) trait TimeoutTarget: Send + Sync + 'static {
    fn is_done(&self) -> bool;

    /// Time of the last read progress on the attached channel.
    fn last_touch(&self) -> Instant;

    /// Authority used in timeout messages.
    fn timeout_target(&self) -> String;

    fn abort_with(&self, error: HttpError);
}

/// Abort handles of the scheduled timeout tasks.
#[derive(Debug, Default)]
pub(crate) struct TimeoutsHolder {
    request: Option<AbortHandle>,
    read: Option<AbortHandle>,
}

impl TimeoutsHolder {
    /// Schedule the request timeout and, when shorter than the request timeout, the read timeout.
    pub(crate) fn schedule(
        target: Weak<dyn TimeoutTarget>,
        request_timeout: Option<Duration>,
        read_timeout: Option<Duration>,
    ) -> Self {
        let mut holder = TimeoutsHolder::default();
        if let Some(after) = request_timeout {
            let weak = Weak::clone(&target);
            holder.request = Some(tokio::spawn(request_timeout_task(weak, after)).abort_handle());
        }
        let read_timeout = match (read_timeout, request_timeout) {
            (Some(read), Some(request)) if read < request => Some(read),
            (Some(read), None) => Some(read),
            _ => None,
        };
        if let Some(after) = read_timeout {
            holder.read = Some(tokio::spawn(read_timeout_task(target, after)).abort_handle());
        }
        holder
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.request.is_none() && self.read.is_none()
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(task) = self.request.take() {
            task.abort();
        }
        if let Some(task) = self.read.take() {
            task.abort();
        }
    }
}

impl Drop for TimeoutsHolder {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn request_timeout_task(target: Weak<dyn TimeoutTarget>, after: Duration) {
    tokio::time::sleep(after).await;
    let Some(target) = target.upgrade() else {
        return;
    };
    if target.is_done() {
        return;
    }
    let error = HttpError::Timeout {
        kind: TimeoutKind::Request,
        target: target.timeout_target(),
        after,
    };
    tracing::debug!(error = %error, "request timed out");
    target.abort_with(error);
}

/// Fires when no read progress happened for `after`; otherwise sleeps until the next deadline.
async fn read_timeout_task(target: Weak<dyn TimeoutTarget>, after: Duration) {
    let mut deadline = Instant::now() + after;
    loop {
        tokio::time::sleep_until(deadline).await;
        let Some(target) = target.upgrade() else {
            return;
        };
        if target.is_done() {
            return;
        }
        let next = target.last_touch() + after;
        if next <= Instant::now() {
            let error = HttpError::Timeout {
                kind: TimeoutKind::Read,
                target: target.timeout_target(),
                after,
            };
            tracing::debug!(error = %error, "read timed out");
            target.abort_with(error);
            return;
        }
        deadline = next;
    }
}
