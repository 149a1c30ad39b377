/*
 * writer.rs
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

//! Wire request construction and the request body write pump.

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use http::header::{
    HeaderValue, ACCEPT, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, EXPECT, HOST,
    PROXY_AUTHORIZATION, TRANSFER_ENCODING, USER_AGENT,
};
use http::{HeaderMap, Method};

use super::RequestSender;
use crate::auth;
use crate::body::{run_blocking, BodyGuard, BodyState};
use crate::config::ProxyServer;
use crate::error::{HttpError, Result};
use crate::future::ResponseFuture;
use crate::protocol::http::channel::Channel;
use crate::protocol::http::h1::{encode_chunk, encode_request_head, LAST_CHUNK};
use crate::protocol::http::handler::HandlerState;
use crate::protocol::http::request::{Request, RequestBody};
use crate::uri;

/// Serialized head plus the body to stream after it.
pub(crate) struct WireRequest {
    pub head: BytesMut,
    pub body: Option<BodyGuard>,
    /// The body waits for `100 Continue`.
    pub expect_continue: bool,
}

/// How a body write ended without an I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyWrite {
    Complete,
    /// The handler returned `Abort` from a progress callback.
    Aborted,
    /// The future completed (timeout, cancel) while writing.
    Stopped,
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| HttpError::Validation(format!("invalid header value: {}", value)))
}

/// True if any `name` header lists `token`.
pub(crate) fn has_token(headers: &HeaderMap, name: http::header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "channel closed")
}

fn length_mismatch(declared: i64, actual: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("request body produced {} bytes but declared Content-Length {}", actual, declared),
    )
}

impl RequestSender {
    /// Build the head for `request` on `channel` and open its body.
    pub(crate) fn build_wire_request<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        request: &Request,
        channel: &mut Channel,
        proxy: Option<&ProxyServer>,
    ) -> Result<WireRequest> {
        let url = request.url();
        let method = request.method();
        let forward_via_proxy = proxy.is_some() && !uri::is_secure(url);
        let mut headers = request.headers().clone();

        if !headers.contains_key(HOST) {
            headers.insert(HOST, header_value(&uri::host_header(url, request.virtual_host()))?);
        }
        if !headers.contains_key(USER_AGENT) && !self.config.user_agent.is_empty() {
            headers.insert(USER_AGENT, header_value(&self.config.user_agent)?);
        }
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        }
        if !headers.contains_key(CONNECTION) {
            let value = if self.config.keep_alive { "keep-alive" } else { "close" };
            headers.insert(CONNECTION, HeaderValue::from_static(value));
        }

        let opened = request.body().open(request.content_type()).map_err(HttpError::Io)?;
        let body = match opened {
            Some(opened) => {
                if let Some(content_type) = opened.content_type {
                    let multipart = matches!(request.body(), RequestBody::Multipart(_));
                    if multipart || !headers.contains_key(CONTENT_TYPE) {
                        headers.insert(CONTENT_TYPE, header_value(&content_type)?);
                    }
                }
                let length = opened.body.content_length();
                if length >= 0 {
                    headers.remove(TRANSFER_ENCODING);
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(length as u64));
                } else {
                    headers.remove(CONTENT_LENGTH);
                    headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                }
                Some(BodyGuard::new(opened.body))
            }
            None => {
                let needs_length = matches!(*method, Method::POST | Method::PUT | Method::PATCH);
                if needs_length && !headers.contains_key(CONTENT_LENGTH) {
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(0u64));
                }
                None
            }
        };
        let expect_continue = body.is_some()
            && headers
                .get(EXPECT)
                .and_then(|v| v.to_str().ok())
                .map_or(false, |v| v.trim().eq_ignore_ascii_case("100-continue"));

        if let Some(realm) = request.realm().or(self.config.realm.as_ref()) {
            if !headers.contains_key(AUTHORIZATION) {
                let realm_uri = uri::realm_uri(url, realm.use_absolute_uri, realm.omit_query);
                if let Some(value) = auth::per_request_authorization(realm, method.as_str(), &realm_uri) {
                    headers.insert(AUTHORIZATION, header_value(&value)?);
                }
            }
            if realm.scheme.is_connection_scoped() {
                if !channel.auth.authorization_sent && !headers.contains_key(AUTHORIZATION) {
                    let value = auth::per_connection_authorization(
                        realm,
                        uri::host(url),
                        self.config.spnego_engine.as_deref(),
                    )?;
                    if let Some(value) = value {
                        headers.insert(AUTHORIZATION, header_value(&value)?);
                    }
                }
                if headers.contains_key(AUTHORIZATION) {
                    channel.auth.authorization_sent = true;
                }
            }
        }
        if forward_via_proxy && !headers.contains_key(PROXY_AUTHORIZATION) {
            if let Some(realm) = proxy.and_then(|p| p.realm.as_ref()) {
                let target = uri::request_target(url, true);
                if let Some(value) = auth::per_request_authorization(realm, method.as_str(), &target) {
                    headers.insert(PROXY_AUTHORIZATION, header_value(&value)?);
                }
            }
        }

        let target = uri::request_target(url, forward_via_proxy);
        let head = encode_request_head(method, &target, &headers);
        tracing::trace!(method = %method, target = %target, channel = channel.id(), "writing request");
        future.set_dont_write_body(false);
        Ok(WireRequest {
            head,
            body,
            expect_continue,
        })
    }

    /// Stream `body` to `channel`, with chunked framing when its length is unknown.
    pub(crate) async fn write_body<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        channel: &mut Channel,
        guard: &mut BodyGuard,
    ) -> io::Result<BodyWrite> {
        let total = guard.content_length();
        let handle = Arc::clone(channel.handle());
        let mut written: u64 = 0;

        let zero_copy = total >= 0 && !channel.is_secure() && !self.config.disable_zero_copy;
        if zero_copy {
            if let Some(body) = guard.body().as_random_access() {
                loop {
                    if future.is_done() {
                        return Ok(BodyWrite::Stopped);
                    }
                    if !handle.is_open() {
                        return Err(closed_error());
                    }
                    let count = self.config.chunk_size as u64;
                    let n = tokio::select! {
                        r = body.transfer_to(written, count, channel.transport_mut()) => r?,
                        _ = handle.closed() => return Err(closed_error()),
                    };
                    if n == 0 {
                        break;
                    }
                    written += n;
                    if written > total as u64 {
                        return Err(length_mismatch(total, written));
                    }
                    let state = future.with_handler(|h| h.on_content_write_progress(n, written, total));
                    if state == HandlerState::Abort {
                        return Ok(BodyWrite::Aborted);
                    }
                }
                if written != total as u64 {
                    return Err(length_mismatch(total, written));
                }
                channel.flush().await?;
                return Ok(BodyWrite::Complete);
            }
        }

        let chunked = total < 0 && !guard.body().is_chunk_framed();
        let blocking = guard.body().is_blocking();
        let mut buf = vec![0u8; self.config.chunk_size];
        loop {
            if future.is_done() {
                return Ok(BodyWrite::Stopped);
            }
            let state = if blocking {
                run_blocking(|| guard.body().read(&mut buf))?
            } else {
                guard.body().read(&mut buf)?
            };
            match state {
                BodyState::Continue(0) => tokio::task::yield_now().await,
                BodyState::Continue(n) => {
                    if total >= 0 && written + n as u64 > total as u64 {
                        return Err(length_mismatch(total, written + n as u64));
                    }
                    if chunked {
                        channel.write_all(&encode_chunk(&buf[..n])).await?;
                    } else {
                        channel.write_all(&buf[..n]).await?;
                    }
                    written += n as u64;
                    let state =
                        future.with_handler(|h| h.on_content_write_progress(n as u64, written, total));
                    if state == HandlerState::Abort {
                        return Ok(BodyWrite::Aborted);
                    }
                }
                BodyState::Suspend => match guard.body().resume_signal() {
                    Some(signal) => {
                        tokio::select! {
                            _ = signal.notified() => {}
                            _ = handle.closed() => return Err(closed_error()),
                        }
                    }
                    None => tokio::task::yield_now().await,
                },
                BodyState::Stop => {
                    if total >= 0 && written != total as u64 {
                        return Err(length_mismatch(total, written));
                    }
                    if chunked {
                        channel.write_all(LAST_CHUNK).await?;
                    }
                    return Ok(BodyWrite::Complete);
                }
            }
        }
    }
}
