/*
 * error.rs
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

//! Error taxonomy for the client.
//!
//! Every failure that is not recovered internally (by retry or replay) reaches the caller exactly
//! once: through `AsyncHandler::on_throwable` and through the `ResponseFuture::get` result.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Which timer expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Whole-request deadline measured from dispatch.
    Request,
    /// No bytes read from the connection for the configured read timeout.
    Read,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Request => f.write_str("Request timeout"),
            TimeoutKind::Read => f.write_str("Read timeout"),
        }
    }
}

/// Errors produced while executing a request.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Request rejected before dispatch (bad URL, method/scheme mismatch, closed client).
    #[error("invalid request: {0}")]
    Validation(String),

    /// Connect, write or read failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{kind} to {target} after {} ms", .after.as_millis())]
    Timeout {
        kind: TimeoutKind,
        target: String,
        after: Duration,
    },

    /// Malformed response from the peer.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("too many connections: {0}")]
    TooManyConnections(String),

    #[error("maximum redirect reached: {0}")]
    MaxRedirects(usize),

    /// A request, response or I/O exception filter failed.
    #[error("filter error: {0}")]
    Filter(String),

    /// The async handler reported a failure from `on_completed`.
    #[error("handler error: {0}")]
    Handler(String),

    /// The client was closed before or while the request ran.
    #[error("client is closed")]
    Closed,

    /// An authorization header could not be computed.
    #[error("authentication error: {0}")]
    Auth(String),
}

impl HttpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Timeout { .. })
    }

    pub fn timeout_kind(&self) -> Option<TimeoutKind> {
        match self {
            HttpError::Timeout { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, HttpError::Cancelled)
    }

    pub fn is_io(&self) -> bool {
        matches!(self, HttpError::Io(_))
    }

    /// Connection closed by the peer before a complete response.
    pub(crate) fn remotely_closed() -> Self {
        HttpError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "remotely closed",
        ))
    }
}

pub type Result<T> = std::result::Result<T, HttpError>;

/// Error returned to callers waiting on a `ResponseFuture`.
#[derive(Debug, Clone, Error)]
pub enum GetError {
    /// The request finished with this cause.
    #[error("execution failed: {0}")]
    Execution(Arc<HttpError>),

    /// The wait gave up; the request itself is still in flight.
    #[error("timed out after {0:?} waiting for the response")]
    WaitTimeout(Duration),
}

impl GetError {
    /// Underlying request failure, if this is an execution error.
    pub fn cause(&self) -> Option<&HttpError> {
        match self {
            GetError::Execution(e) => Some(e),
            GetError::WaitTimeout(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_kind_and_target() {
        let e = HttpError::Timeout {
            kind: TimeoutKind::Request,
            target: "localhost:8080".into(),
            after: Duration::from_millis(100),
        };
        assert_eq!(e.to_string(), "Request timeout to localhost:8080 after 100 ms");
        assert_eq!(e.timeout_kind(), Some(TimeoutKind::Request));
        assert!(!e.is_cancelled());
    }

    #[test]
    fn wait_timeout_is_not_a_request_timeout() {
        let e = GetError::WaitTimeout(Duration::from_secs(1));
        assert!(e.cause().is_none());
        let e = GetError::Execution(Arc::new(HttpError::Cancelled));
        assert!(e.cause().map(HttpError::is_cancelled).unwrap_or(false));
    }

    #[test]
    fn io_errors_convert() {
        let e: HttpError = io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(e.is_io());
    }
}
