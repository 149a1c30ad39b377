/*
 * exchange.rs
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

//! One request/response exchange on a channel, with the interceptors that may turn the response
//! into another request: interim 1xx, 401/407 challenges, redirects and response filters.

use std::collections::VecDeque;
use std::io;

use bytes::Bytes;
use http::header::{
    HeaderName, HeaderValue, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST,
    LOCATION, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, WWW_AUTHENTICATE,
};
use http::{HeaderMap, Method, Version};

use super::writer::{has_token, BodyWrite};
use super::{AttemptError, RequestSender, Step};
use crate::auth::{self, ntlm, AuthScheme};
use crate::body::BodyGuard;
use crate::config::ProxyServer;
use crate::error::{HttpError, Result};
use crate::filter::{self, FilterContext};
use crate::future::ResponseFuture;
use crate::protocol::http::channel::Channel;
use crate::protocol::http::h1::{BodyMode, H1ResponseHandler, ParseState, ResponseParser};
use crate::protocol::http::handler::{AsyncHandler, HandlerState, HttpResponseStatus, ResponseBodyPart};
use crate::protocol::http::request::{Request, RequestBody};
use crate::uri;

/// Parser callbacks collected for the sender to consume.
#[derive(Default)]
struct Events {
    status: Option<(Version, u16, String)>,
    headers: HeaderMap,
    chunks: VecDeque<Bytes>,
    complete: bool,
}

impl H1ResponseHandler for Events {
    fn status(&mut self, version: Version, code: u16, reason: &str) {
        self.status = Some((version, code, reason.to_string()));
    }

    fn header(&mut self, name: &str, value: &str) {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_bytes(value.as_bytes())) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::trace!(name, "skipping unrepresentable response header"),
        }
    }

    fn body_chunk(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.chunks.push_back(data);
        }
    }

    fn complete(&mut self) {
        self.complete = true;
    }
}

/// Why reading a response stopped.
pub(super) enum ReadError {
    Io(io::Error),
    /// The peer closed the connection mid-response.
    Eof,
    Protocol(io::Error),
}

/// Pulls one response off a channel.
pub(super) struct ResponseReader {
    parser: ResponseParser,
    events: Events,
}

impl ResponseReader {
    pub(super) fn new() -> Self {
        Self {
            parser: ResponseParser::new(),
            events: Events::default(),
        }
    }

    /// Read until the status line and headers are parsed.
    pub(super) async fn read_head<T: Clone + Send + Sync + 'static>(
        &mut self,
        channel: &mut Channel,
        future: &ResponseFuture<T>,
    ) -> std::result::Result<(Version, u16, String), ReadError> {
        loop {
            self.parser
                .receive(&mut channel.read_buf, &mut self.events)
                .map_err(ReadError::Protocol)?;
            if self.parser.state() == ParseState::HeadersComplete {
                return self.events.status.take().ok_or_else(|| {
                    ReadError::Protocol(io::Error::new(io::ErrorKind::InvalidData, "missing status line"))
                });
            }
            match channel.read_more().await {
                Ok(0) => return Err(ReadError::Eof),
                Ok(_) => future.touch(),
                Err(e) => return Err(ReadError::Io(e)),
            }
        }
    }

    pub(super) fn take_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.events.headers)
    }

    pub(super) fn start_body(&mut self, mode: BodyMode) {
        self.parser.set_body_mode(mode, &mut self.events);
    }

    /// Next body chunk, or `None` once the response is complete.
    pub(super) async fn next_chunk<T: Clone + Send + Sync + 'static>(
        &mut self,
        channel: &mut Channel,
        future: &ResponseFuture<T>,
    ) -> std::result::Result<Option<Bytes>, ReadError> {
        loop {
            if let Some(chunk) = self.events.chunks.pop_front() {
                return Ok(Some(chunk));
            }
            if self.events.complete {
                return Ok(None);
            }
            self.parser
                .receive(&mut channel.read_buf, &mut self.events)
                .map_err(ReadError::Protocol)?;
            if !self.events.chunks.is_empty() || self.events.complete {
                continue;
            }
            match channel.read_more().await {
                Ok(0) => self.parser.eof(&mut self.events).map_err(|_| ReadError::Eof)?,
                Ok(_) => future.touch(),
                Err(e) => return Err(ReadError::Io(e)),
            }
        }
    }

    /// Discard the rest of the body.
    pub(super) async fn drain<T: Clone + Send + Sync + 'static>(
        &mut self,
        channel: &mut Channel,
        future: &ResponseFuture<T>,
    ) -> std::result::Result<(), ReadError> {
        while self.next_chunk(channel, future).await?.is_some() {}
        Ok(())
    }

    /// Ready for the next head after an interim response.
    pub(super) fn reset(&mut self) {
        self.parser.reset();
        self.events = Events::default();
    }
}

/// Redirect codes the client follows.
fn is_redirect(code: u16) -> bool {
    matches!(code, 301 | 302 | 303 | 307 | 308)
}

impl RequestSender {
    /// Write `request` on `channel` and process the response.
    pub(super) async fn exchange<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        mut channel: Channel,
        request: &Request,
        proxy: Option<&ProxyServer>,
    ) -> std::result::Result<Step, AttemptError> {
        let wire = match self.build_wire_request(future, request, &mut channel, proxy) {
            Ok(wire) => wire,
            Err(error) => return Err(AttemptError::Fatal(error, Some(channel))),
        };
        let mut body = wire.body;
        future.with_handler(|h| h.on_request_send(request));
        future.touch();
        if let Err(e) = channel.write_all(&wire.head).await {
            return Err(AttemptError::Io(HttpError::Io(e), Some(channel)));
        }
        if wire.expect_continue {
            future.set_dont_write_body(true);
        } else if let Some(guard) = body.take() {
            match self.send_body(future, &mut channel, guard).await {
                Ok(true) => {}
                Ok(false) => {
                    self.channels.close_channel(channel);
                    return Ok(Step::Done);
                }
                Err(e) => return Err(AttemptError::Io(HttpError::Io(e), Some(channel))),
            }
        }

        let mut reader = ResponseReader::new();
        let (version, code, reason) = loop {
            let (version, code, reason) = match reader.read_head(&mut channel, future).await {
                Ok(head) => head,
                Err(e) => return Err(self.read_failed(future, e, channel)),
            };
            match code {
                100 => {
                    tracing::trace!("100 Continue");
                    if let Some(guard) = body.take() {
                        future.set_dont_write_body(false);
                        match self.send_body(future, &mut channel, guard).await {
                            Ok(true) => {}
                            Ok(false) => {
                                self.channels.close_channel(channel);
                                return Ok(Step::Done);
                            }
                            Err(e) => return Err(AttemptError::Io(HttpError::Io(e), Some(channel))),
                        }
                    }
                    reader.reset();
                }
                102..=199 => reader.reset(),
                _ => break (version, code, reason),
            }
        };

        future.set_status_received(true);
        let headers = reader.take_headers();
        let mode = match BodyMode::for_response(request.method(), code, &headers) {
            Ok(mode) => mode,
            Err(e) => return Err(AttemptError::Fatal(HttpError::Protocol(e.to_string()), Some(channel))),
        };
        reader.start_body(mode);
        // A body still held back means the server answered without reading it.
        let keep_alive = body.is_none() && code != 101 && self.is_keep_alive(request, version, &headers, mode);
        drop(body);
        let status = HttpResponseStatus {
            code,
            reason,
            version,
            uri: request.url().clone(),
        };
        tracing::debug!(code, url = %request.url(), keep_alive, "response received");

        if code == 401 || code == 407 {
            match self.auth_challenge(future, request, proxy, code, &headers) {
                Ok(Some(next)) => {
                    return self.replay_with(future, channel, reader, keep_alive, true, next).await;
                }
                Ok(None) => {}
                Err(error) => return Err(AttemptError::Fatal(error, Some(channel))),
            }
        }

        if is_redirect(code) {
            match self.redirect(future, request, code, &headers) {
                Ok(Some((next, same_base))) => {
                    return self.replay_with(future, channel, reader, keep_alive, same_base, next).await;
                }
                Ok(None) => {}
                Err(error) => return Err(AttemptError::Fatal(error, Some(channel))),
            }
        }

        if !self.config.response_filters.is_empty() {
            let mut ctx = FilterContext::new(request.clone());
            ctx.response_status = Some(status.clone());
            ctx.response_headers = Some(headers.clone());
            let ctx = match filter::apply(self.config.response_filters.iter(), ctx, |f, ctx| f.filter(ctx)) {
                Ok(ctx) => ctx,
                Err(error) => return Err(AttemptError::Fatal(error, Some(channel))),
            };
            if ctx.replay_request {
                tracing::debug!(url = %ctx.request.url(), "response filter replays request");
                let same_base = uri::same_base(request.url(), ctx.request.url());
                return self
                    .replay_with(future, channel, reader, keep_alive, same_base, ctx.request)
                    .await;
            }
        }

        self.deliver(future, channel, reader, status, headers, keep_alive).await
    }

    /// Write the body, returning false when the exchange must stop (handler abort or completed
    /// future). The channel is already closed in that case.
    async fn send_body<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        channel: &mut Channel,
        mut guard: BodyGuard,
    ) -> io::Result<bool> {
        match self.write_body(future, channel, &mut guard).await? {
            BodyWrite::Complete => Ok(true),
            BodyWrite::Aborted => {
                tracing::debug!("handler aborted request body write");
                channel.handle().mark_discard();
                channel.close();
                future.attach_channel(None);
                future.done();
                Ok(false)
            }
            BodyWrite::Stopped => {
                channel.close();
                Ok(false)
            }
        }
    }

    /// Whether the channel can serve another request after this response.
    fn is_keep_alive(&self, request: &Request, version: Version, headers: &HeaderMap, mode: BodyMode) -> bool {
        if !self.config.keep_alive || has_token(request.headers(), CONNECTION, "close") {
            return false;
        }
        if mode == BodyMode::UntilClose {
            return false;
        }
        match version {
            Version::HTTP_11 => !has_token(headers, CONNECTION, "close"),
            Version::HTTP_10 => has_token(headers, CONNECTION, "keep-alive"),
            _ => false,
        }
    }

    /// Map a read failure: before a status arrives it may be retried, afterwards it may not.
    pub(super) fn read_failed<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        error: ReadError,
        channel: Channel,
    ) -> AttemptError {
        let after_status = future.is_status_received();
        match error {
            ReadError::Protocol(e) => AttemptError::Fatal(HttpError::Protocol(e.to_string()), Some(channel)),
            ReadError::Eof if after_status => AttemptError::Fatal(
                HttpError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before response was complete",
                )),
                Some(channel),
            ),
            ReadError::Eof => AttemptError::Io(HttpError::remotely_closed(), Some(channel)),
            ReadError::Io(e) if after_status => AttemptError::Fatal(HttpError::Io(e), Some(channel)),
            ReadError::Io(e) => AttemptError::Io(HttpError::Io(e), Some(channel)),
        }
    }

    /// The request answering a 401 or 407 challenge, if the client can answer it.
    fn auth_challenge<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        request: &Request,
        proxy: Option<&ProxyServer>,
        code: u16,
        headers: &HeaderMap,
    ) -> Result<Option<Request>> {
        let for_proxy = code == 407;
        let realm = if for_proxy {
            proxy.and_then(|p| p.realm.as_ref())
        } else {
            request.realm().or(self.config.realm.as_ref())
        };
        let realm = match realm {
            Some(realm) => realm,
            None => {
                tracing::debug!(code, "no realm to answer challenge");
                return Ok(None);
            }
        };
        let already = if for_proxy {
            future.is_in_proxy_auth()
        } else {
            future.is_in_auth()
        };
        if already {
            tracing::debug!(code, "authentication already attempted");
            return Ok(None);
        }
        let (challenge_header, auth_header) = if for_proxy {
            (PROXY_AUTHENTICATE, PROXY_AUTHORIZATION)
        } else {
            (WWW_AUTHENTICATE, AUTHORIZATION)
        };
        let challenge = match auth::find_challenge(headers, challenge_header.as_str(), realm.scheme) {
            Some(challenge) => challenge,
            None => {
                tracing::debug!(code, scheme = realm.scheme.challenge_name(), "no matching challenge");
                return Ok(None);
            }
        };
        let set_in_auth = |value: bool| {
            if for_proxy {
                future.set_in_proxy_auth(value);
            } else {
                future.set_in_auth(value);
            }
        };
        set_in_auth(true);

        let mut builder = request.to_builder();
        let next_realm = match realm.scheme {
            AuthScheme::Basic => {
                if realm.use_preemptive_auth {
                    tracing::debug!("preemptive Basic credentials were rejected");
                    return Ok(None);
                }
                realm.clone().preemptive(true)
            }
            AuthScheme::Digest => realm.with_digest_challenge(challenge),
            AuthScheme::Ntlm => {
                match ntlm::challenge_token(challenge) {
                    None => {
                        builder.header(auth_header.as_str(), &format!("NTLM {}", ntlm::TYPE1_MESSAGE));
                        // The Type 3 round is still to come.
                        set_in_auth(false);
                    }
                    Some(token) => {
                        let engine = self
                            .config
                            .ntlm_engine
                            .as_deref()
                            .ok_or_else(|| HttpError::Auth("NTLM challenge without an NTLM engine".into()))?;
                        let type2 = ntlm::Type2Message::parse(token).map_err(|e| HttpError::Auth(e.to_string()))?;
                        let type3 = engine
                            .type3_message(realm, &type2)
                            .map_err(|e| HttpError::Auth(e.to_string()))?;
                        builder.header(auth_header.as_str(), &format!("NTLM {}", type3));
                    }
                }
                realm.clone().preemptive(true)
            }
            AuthScheme::Spnego | AuthScheme::Kerberos => {
                let engine = self
                    .config
                    .spnego_engine
                    .as_deref()
                    .ok_or_else(|| HttpError::Auth("Negotiate challenge without an SPNEGO engine".into()))?;
                let host = match proxy {
                    Some(proxy) if for_proxy => proxy.host.as_str(),
                    _ => request.virtual_host().unwrap_or_else(|| uri::host(request.url())),
                };
                let token = engine.generate_token(host).map_err(|e| HttpError::Auth(e.to_string()))?;
                builder.header(auth_header.as_str(), &format!("Negotiate {}", token));
                realm.clone()
            }
        };
        match proxy {
            Some(proxy) if for_proxy => {
                builder.proxy_server(proxy.clone().realm(next_realm));
            }
            _ => {
                builder.realm(next_realm);
            }
        }
        tracing::debug!(code, scheme = realm.scheme.challenge_name(), url = %request.url(), "answering challenge");
        builder.build().map(Some)
    }

    /// The request following a redirect and whether it stays on the same origin.
    fn redirect<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        request: &Request,
        code: u16,
        headers: &HeaderMap,
    ) -> Result<Option<(Request, bool)>> {
        if !request.follow_redirect().unwrap_or(self.config.follow_redirect) {
            return Ok(None);
        }
        let location = match headers.get(LOCATION).and_then(|v| v.to_str().ok()) {
            Some(location) => location.trim(),
            None => return Ok(None),
        };
        if future.redirect_count() >= self.config.max_redirects {
            return Err(HttpError::MaxRedirects(self.config.max_redirects));
        }
        future.increment_redirect();

        let current = request.url();
        let mut target = current
            .join(location)
            .map_err(|e| HttpError::Protocol(format!("invalid Location {}: {}", location, e)))?;
        if uri::is_web_socket(current) {
            let scheme = if uri::is_secure(&target) { "wss" } else { "ws" };
            let _ = target.set_scheme(scheme);
        }
        if target == *current {
            return Ok(None);
        }

        let switch_to_get = matches!(code, 301 | 303) || (code == 302 && !self.config.strict_302_handling);
        let same_base = uri::same_base(current, &target);
        let mut builder = request.to_builder();
        builder.url(target.as_str());
        builder.remove_header(HOST.as_str());
        builder.remove_header(CONTENT_LENGTH.as_str());
        if switch_to_get {
            let method = request.method();
            if *method != Method::GET && *method != Method::HEAD {
                builder.method(Method::GET);
            }
            builder.body(RequestBody::Empty);
            builder.remove_header(CONTENT_TYPE.as_str());
        }
        let ntlm = request
            .realm()
            .or(self.config.realm.as_ref())
            .map_or(false, |realm| realm.scheme == AuthScheme::Ntlm);
        if ntlm {
            builder.remove_header(AUTHORIZATION.as_str());
        }
        if !same_base {
            builder.clear_virtual_host();
        }
        future.set_in_auth(false);
        future.set_in_proxy_auth(false);
        tracing::debug!(code, from = %current, to = %target, "following redirect");
        builder.build().map(|next| Some((next, same_base)))
    }

    /// Make `next` the current request and end the attempt, keeping the drained channel when it
    /// can carry the next request.
    async fn replay_with<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        mut channel: Channel,
        mut reader: ResponseReader,
        keep_alive: bool,
        same_base: bool,
        next: Request,
    ) -> std::result::Result<Step, AttemptError> {
        future.set_request(next);
        future.set_status_received(false);
        future.touch();
        if keep_alive && reader.drain(&mut channel, future).await.is_ok() {
            if same_base {
                return Ok(Step::Next(Some(channel)));
            }
            future.attach_channel(None);
            self.offer(future, channel);
            return Ok(Step::Next(None));
        }
        future.attach_channel(None);
        self.channels.close_channel(channel);
        Ok(Step::Next(None))
    }

    /// Hand the response to the handler, then pool or close the channel and complete the future.
    pub(super) async fn deliver<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        mut channel: Channel,
        mut reader: ResponseReader,
        status: HttpResponseStatus,
        headers: HeaderMap,
        keep_alive: bool,
    ) -> std::result::Result<Step, AttemptError> {
        match self.notify(future, &channel, |h| h.on_status_received(&status)) {
            Some(HandlerState::Continue) => {}
            Some(HandlerState::Abort) => return Ok(self.abort_by_handler(future, channel)),
            None => return Ok(self.discard(channel)),
        }
        match self.notify(future, &channel, |h| h.on_headers_received(&headers)) {
            Some(HandlerState::Continue) => {}
            Some(HandlerState::Abort) => return Ok(self.abort_by_handler(future, channel)),
            None => return Ok(self.discard(channel)),
        }
        let lazy = self.config.lazy_body_parts;
        let close = !keep_alive;
        loop {
            let chunk = match reader.next_chunk(&mut channel, future).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => return Err(self.read_failed(future, e, channel)),
            };
            let part = ResponseBodyPart::new(chunk, lazy, false, close);
            match self.notify(future, &channel, |h| h.on_body_part_received(part)) {
                Some(HandlerState::Continue) => {}
                Some(HandlerState::Abort) => return Ok(self.abort_by_handler(future, channel)),
                None => return Ok(self.discard(channel)),
            }
        }
        let last = ResponseBodyPart::new(Bytes::new(), lazy, true, close);
        match self.notify(future, &channel, |h| h.on_body_part_received(last)) {
            Some(HandlerState::Continue) => {}
            Some(HandlerState::Abort) => return Ok(self.abort_by_handler(future, channel)),
            None => return Ok(self.discard(channel)),
        }
        future.attach_channel(None);
        if keep_alive && !future.is_done() {
            self.offer(future, channel);
        } else {
            self.channels.close_channel(channel);
        }
        future.done();
        Ok(Step::Done)
    }

    /// Run a handler callback unless the request already completed or the channel was marked for
    /// discard (a cancel). Checked under the handler lock, so nothing reaches the handler after its
    /// terminal callback.
    fn notify<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        channel: &Channel,
        f: impl FnOnce(&mut dyn AsyncHandler<Output = T>) -> HandlerState,
    ) -> Option<HandlerState> {
        let handle = channel.handle();
        future.with_handler(|h| {
            if future.is_done() || handle.is_discarded() {
                None
            } else {
                Some(f(h))
            }
        })
    }

    /// Drop whatever the channel still holds for a request that is no longer listening.
    fn discard(&self, channel: Channel) -> Step {
        tracing::debug!(channel = channel.id(), "discarding response of completed request");
        channel.handle().mark_discard();
        self.channels.close_channel(channel);
        Step::Done
    }

    fn abort_by_handler<T: Clone + Send + Sync + 'static>(&self, future: &ResponseFuture<T>, channel: Channel) -> Step {
        tracing::debug!(channel = channel.id(), "handler aborted response processing");
        channel.handle().mark_discard();
        future.attach_channel(None);
        self.channels.close_channel(channel);
        future.done();
        Step::Done
    }

    fn offer<T: Clone + Send + Sync + 'static>(&self, future: &ResponseFuture<T>, channel: Channel) {
        let id = channel.id();
        if self.channels.offer(channel) {
            tracing::trace!(channel = id, "channel returned to pool");
            future.with_handler(|h| h.on_connection_offered());
        }
    }
}
