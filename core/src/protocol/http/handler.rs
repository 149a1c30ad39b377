/*
 * handler.rs
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

//! Async response handler: callbacks driven by the request sender as the response arrives.
//!
//! Flow for a successful exchange:
//! 1. `on_status_received`
//! 2. `on_headers_received`
//! 3. `on_body_part_received` (×n, the final part has `is_last` set)
//! 4. `on_completed`
//!
//! Any of the first three may return `HandlerState::Abort`, which stops reading, closes the
//! connection and completes the future with whatever `on_completed` returns. Failures are reported
//! once through `on_throwable`. Interim responses consumed by the client (100 Continue, auth
//! challenges that are answered, redirects that are followed) never reach the handler.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Version};
use url::Url;

use crate::error::{HttpError, Result};
use crate::protocol::http::request::Request;
use crate::protocol::http::response::Response;

/// Returned by streaming callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Continue,
    Abort,
}

/// Status line of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponseStatus {
    pub code: u16,
    pub reason: String,
    pub version: Version,
    /// URL of the request this response answers.
    pub uri: Url,
}

impl HttpResponseStatus {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Body bytes: owned copy or a shared slice of the connection's read buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyPartData {
    Eager(Vec<u8>),
    Lazy(Bytes),
}

/// One piece of the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBodyPart {
    pub data: BodyPartData,
    pub is_last: bool,
    /// The connection will be closed rather than pooled after this response.
    pub close_connection: bool,
}

impl ResponseBodyPart {
    pub fn new(data: Bytes, lazy: bool, is_last: bool, close_connection: bool) -> Self {
        let data = if lazy {
            BodyPartData::Lazy(data)
        } else {
            BodyPartData::Eager(data.to_vec())
        };
        Self {
            data,
            is_last,
            close_connection,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            BodyPartData::Eager(v) => v,
            BodyPartData::Lazy(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        match self.data {
            BodyPartData::Eager(v) => Bytes::from(v),
            BodyPartData::Lazy(b) => b,
        }
    }
}

/// Receives the events of one request. Called from the I/O task, and from timer or caller tasks
/// for `on_throwable`, never concurrently.
pub trait AsyncHandler: Send {
    type Output: Clone + Send + Sync + 'static;

    fn on_status_received(&mut self, status: &HttpResponseStatus) -> HandlerState;

    fn on_headers_received(&mut self, headers: &HeaderMap) -> HandlerState;

    fn on_body_part_received(&mut self, part: ResponseBodyPart) -> HandlerState;

    /// Request body progress: `amount` just written, `current` so far, `total` (-1 if unknown).
    fn on_content_write_progress(&mut self, _amount: u64, _current: u64, _total: i64) -> HandlerState {
        HandlerState::Continue
    }

    /// The response is complete (or a callback aborted it). An error becomes the future's result.
    fn on_completed(&mut self) -> Result<Self::Output>;

    /// The request failed or was cancelled.
    fn on_throwable(&mut self, error: &HttpError);

    /// A pooled connection was picked for the request.
    fn on_connection_pooled(&mut self) {}

    /// A new connection is being opened.
    fn on_connection_open(&mut self) {}

    /// The connection went back to the pool after the response.
    fn on_connection_offered(&mut self) {}

    fn on_request_send(&mut self, _request: &Request) {}

    /// The request is about to be replayed after a recoverable failure.
    fn on_retry(&mut self) {}

    /// Protocol-upgrade handlers (WebSocket) pair only with `ws`/`wss` URLs.
    fn is_upgrade_handler(&self) -> bool {
        false
    }
}

/// Default handler: accumulates the whole response into a `Response`.
#[derive(Debug, Default)]
pub struct CompletionHandler {
    status: Option<HttpResponseStatus>,
    headers: HeaderMap,
    body: BytesMut,
}

impl CompletionHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AsyncHandler for CompletionHandler {
    type Output = Response;

    fn on_status_received(&mut self, status: &HttpResponseStatus) -> HandlerState {
        self.status = Some(status.clone());
        HandlerState::Continue
    }

    fn on_headers_received(&mut self, headers: &HeaderMap) -> HandlerState {
        self.headers = headers.clone();
        HandlerState::Continue
    }

    fn on_body_part_received(&mut self, part: ResponseBodyPart) -> HandlerState {
        self.body.extend_from_slice(part.bytes());
        HandlerState::Continue
    }

    fn on_completed(&mut self) -> Result<Response> {
        let status = self
            .status
            .take()
            .ok_or_else(|| HttpError::Protocol("response completed without a status".into()))?;
        Ok(Response::new(
            status,
            std::mem::take(&mut self.headers),
            std::mem::take(&mut self.body).freeze(),
        ))
    }

    fn on_throwable(&mut self, error: &HttpError) {
        tracing::debug!(error = %error, "request failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_part_variants() {
        let lazy = ResponseBodyPart::new(Bytes::from_static(b"abc"), true, false, false);
        let eager = ResponseBodyPart::new(Bytes::from_static(b"abc"), false, true, true);
        assert!(matches!(lazy.data, BodyPartData::Lazy(_)));
        assert!(matches!(eager.data, BodyPartData::Eager(_)));
        assert_eq!(lazy.bytes(), eager.bytes());
        assert_eq!(eager.len(), 3);
        assert_eq!(&eager.into_bytes()[..], b"abc");
    }

    #[test]
    fn completion_handler_builds_response() {
        let mut handler = CompletionHandler::new();
        let status = HttpResponseStatus {
            code: 201,
            reason: "Created".into(),
            version: Version::HTTP_11,
            uri: Url::parse("http://example.com/x").unwrap(),
        };
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/plain".parse().unwrap());
        assert_eq!(handler.on_status_received(&status), HandlerState::Continue);
        handler.on_headers_received(&headers);
        handler.on_body_part_received(ResponseBodyPart::new(Bytes::from_static(b"he"), true, false, false));
        handler.on_body_part_received(ResponseBodyPart::new(Bytes::from_static(b"llo"), false, true, false));
        let response = handler.on_completed().unwrap();
        assert_eq!(response.status(), 201);
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(response.text(), "hello");
    }

    #[test]
    fn completion_without_status_fails() {
        assert!(CompletionHandler::new().on_completed().is_err());
    }
}
