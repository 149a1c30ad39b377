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

//! Request execution: validation, channel acquisition, writing, reading, and the retry and
//! replay decisions around them.
//!
//! `execute` validates synchronously and spawns one I/O task per request. The task runs attempts
//! until the future completes: each attempt acquires a channel (pooled, new, or tunnelled through
//! a proxy), writes the request and processes the response. Auth challenges, redirects, response
//! filters and recoverable I/O failures end an attempt with the next request to send.

mod exchange;
mod proxy;
mod writer;

use std::io;
use std::sync::Arc;

use crate::config::{ClientConfig, ProxyServer};
use crate::error::{HttpError, Result};
use crate::filter::{self, FilterContext};
use crate::future::{ChannelState, ResponseFuture};
use crate::net::{ConnectTarget, Connector};
use crate::pool::ChannelManager;
use crate::protocol::http::channel::Channel;
use crate::protocol::http::handler::AsyncHandler;
use crate::protocol::http::request::Request;
use crate::uri;

/// What the I/O task does after an attempt.
pub(crate) enum Step {
    /// The future is complete.
    Done,
    /// Send the future's current request again, on this channel if given.
    Next(Option<Channel>),
    /// Complete the future with this error.
    Fail(HttpError),
}

/// Failure of an attempt, with the channel if the attempt still owned one.
pub(crate) enum AttemptError {
    /// Transport failure before a response status arrived; subject to the retry policy.
    Io(HttpError, Option<Channel>),
    /// Never retried.
    Fatal(HttpError, Option<Channel>),
}

/// A usable channel, or the request was answered while acquiring one (a refused CONNECT).
pub(crate) enum Obtained {
    Channel(Channel),
    Delivered,
}

/// Drives requests over channels from the `ChannelManager`.
pub struct RequestSender {
    config: Arc<ClientConfig>,
    channels: Arc<ChannelManager>,
    connector: Arc<dyn Connector>,
}

impl RequestSender {
    pub fn new(config: Arc<ClientConfig>, channels: Arc<ChannelManager>, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            channels,
            connector,
        }
    }

    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    pub fn is_closed(&self) -> bool {
        self.channels.is_closed()
    }

    /// Start executing `request`. Validation and request-filter failures are reported through the
    /// handler and an already-completed future; everything else happens on a spawned task.
    pub fn execute<H>(self: &Arc<Self>, request: Request, handler: H) -> ResponseFuture<H::Output>
    where
        H: AsyncHandler + 'static,
    {
        let upgrade = handler.is_upgrade_handler();
        let handler: Box<dyn AsyncHandler<Output = H::Output>> = Box::new(handler);
        if self.is_closed() {
            return ResponseFuture::failed(request, handler, HttpError::Closed);
        }
        if let Err(error) = validate(&request, upgrade) {
            tracing::debug!(error = %error, "request rejected");
            return ResponseFuture::failed(request, handler, error);
        }
        let filtered = filter::apply(
            self.config.request_filters.iter(),
            FilterContext::new(request.clone()),
            |f, ctx| f.filter(ctx),
        );
        let request = match filtered {
            Ok(ctx) => ctx.request,
            Err(error) => return ResponseFuture::failed(request, handler, error),
        };
        let future = ResponseFuture::new(request, handler, self.config.max_request_retry);
        tokio::spawn(Arc::clone(self).drive(future.clone()));
        future
    }

    async fn drive<T: Clone + Send + Sync + 'static>(self: Arc<Self>, future: ResponseFuture<T>) {
        let mut reuse: Option<Channel> = None;
        loop {
            if future.is_done() {
                if let Some(channel) = reuse.take() {
                    self.channels.close_channel(channel);
                }
                return;
            }
            match self.attempt(&future, reuse.take()).await {
                Step::Done => return,
                Step::Next(channel) => reuse = channel,
                Step::Fail(error) => {
                    future.abort(error);
                    return;
                }
            }
        }
    }

    async fn attempt<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        reused: Option<Channel>,
    ) -> Step {
        let request = future.request();
        let proxy = self.proxy_for(&request);
        future.schedule_timeouts(
            request.request_timeout().or(self.config.request_timeout),
            request.read_timeout().or(self.config.read_timeout),
        );
        let key = self.partition_key(&request, proxy.as_ref());
        let channel = match reused {
            Some(channel) => channel,
            None => match self.obtain_channel(future, &request, proxy.as_ref(), &key).await {
                Ok(Obtained::Channel(channel)) => channel,
                Ok(Obtained::Delivered) => return Step::Done,
                Err(error) => return self.attempt_failed(future, error),
            },
        };
        future.attach_channel(Some(Arc::clone(channel.handle())));
        match self.exchange(future, channel, &request, proxy.as_ref()).await {
            Ok(step) => step,
            Err(error) => self.attempt_failed(future, error),
        }
    }

    fn attempt_failed<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        error: AttemptError,
    ) -> Step {
        match error {
            AttemptError::Io(error, channel) => self.recover(future, error, channel),
            AttemptError::Fatal(error, channel) => {
                if let Some(channel) = channel {
                    self.channels.close_channel(channel);
                }
                if future.is_done() {
                    Step::Done
                } else {
                    Step::Fail(error)
                }
            }
        }
    }

    /// Recoverable transport failure: run the I/O exception filters if any, otherwise retry
    /// within the budget. The failed channel is closed first.
    fn recover<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        error: HttpError,
        channel: Option<Channel>,
    ) -> Step {
        if let Some(channel) = channel {
            self.channels.close_channel(channel);
        }
        if future.is_done() {
            return Step::Done;
        }
        if !self.config.io_exception_filters.is_empty() {
            return self.apply_io_exception_filters(future, error);
        }
        self.retry(future, error)
    }

    fn apply_io_exception_filters<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        error: HttpError,
    ) -> Step {
        let error = Arc::new(error);
        let mut ctx = FilterContext::new(future.request());
        ctx.io_error = Some(Arc::clone(&error));
        let ctx = match filter::apply(self.config.io_exception_filters.iter(), ctx, |f, ctx| f.filter(ctx)) {
            Ok(ctx) => ctx,
            Err(filter_error) => return Step::Fail(filter_error),
        };
        if ctx.replay_request && !self.is_closed() && future.can_be_replayed() {
            tracing::debug!(url = %ctx.request.url(), "replaying request after I/O error");
            future.increment_retry();
            future.set_request(ctx.request);
            future.set_state(ChannelState::New);
            future.set_status_received(false);
            future.touch();
            future.with_handler(|h| h.on_retry());
            return Step::Next(None);
        }
        drop(ctx);
        let error = Arc::try_unwrap(error)
            .unwrap_or_else(|shared| HttpError::Io(io::Error::new(io::ErrorKind::Other, shared.to_string())));
        Step::Fail(error)
    }

    fn retry<T: Clone + Send + Sync + 'static>(&self, future: &ResponseFuture<T>, error: HttpError) -> Step {
        if !self.is_closed() && future.can_be_replayed() {
            let attempt = future.increment_retry();
            tracing::debug!(attempt, error = %error, url = %future.request().url(), "retrying request");
            future.set_state(ChannelState::Reconnected);
            future.set_status_received(false);
            future.set_in_auth(false);
            future.set_dont_write_body(false);
            future.with_handler(|h| h.on_retry());
            Step::Next(None)
        } else {
            tracing::debug!(error = %error, "unable to recover request");
            Step::Fail(error)
        }
    }

    /// Proxy for this request, unless the target host bypasses it.
    fn proxy_for(&self, request: &Request) -> Option<ProxyServer> {
        request
            .proxy_server()
            .or(self.config.proxy_server.as_ref())
            .filter(|proxy| !proxy.is_ignored_for_host(uri::host(request.url())))
            .cloned()
    }

    fn partition_key(&self, request: &Request, proxy: Option<&ProxyServer>) -> String {
        request
            .partition_key()
            .map(str::to_string)
            .unwrap_or_else(|| uri::partition_key(request.url(), proxy))
    }

    fn poll_channel<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        key: &str,
    ) -> Option<Channel> {
        future.with_handler(|h| h.on_connection_pooled());
        let channel = self.channels.poll(key)?;
        future.set_state(ChannelState::Pooled);
        Some(channel)
    }

    async fn obtain_channel<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        request: &Request,
        proxy: Option<&ProxyServer>,
        key: &str,
    ) -> std::result::Result<Obtained, AttemptError> {
        let url = request.url();
        let tunnel = proxy.filter(|_| uri::is_secure(url));
        let polls = if tunnel.is_some() { 3 } else { 1 };
        for _ in 0..polls {
            if let Some(channel) = self.poll_channel(future, key) {
                return Ok(Obtained::Channel(channel));
            }
        }

        let permit = self
            .channels
            .preempt_channel(key)
            .map_err(|e| AttemptError::Fatal(e, None))?;
        future.with_handler(|h| h.on_connection_open());
        let target = match proxy {
            Some(proxy) => ConnectTarget {
                host: proxy.host.clone(),
                port: proxy.port,
                secure: false,
                address: None,
            },
            None => ConnectTarget {
                host: uri::host(url).to_string(),
                port: uri::port_or_default(url),
                secure: uri::is_secure(url),
                address: request.address(),
            },
        };
        tracing::debug!(host = %target.host, port = target.port, secure = target.secure, "opening connection");
        let transport = self
            .connector
            .connect(&target)
            .await
            .map_err(|e| AttemptError::Io(HttpError::Io(e), None))?;
        let channel = Channel::new(transport, target.secure, key, Some(permit));
        match tunnel {
            Some(proxy) => {
                future.attach_channel(Some(Arc::clone(channel.handle())));
                self.open_tunnel(future, channel, request, proxy).await
            }
            None => Ok(Obtained::Channel(channel)),
        }
    }

    /// Close all pooled channels and refuse new requests.
    pub fn close(&self) {
        self.channels.close();
    }
}

/// Scheme, method and handler compatibility.
fn validate(request: &Request, upgrade_handler: bool) -> Result<()> {
    let url = request.url();
    if !uri::is_supported_scheme(url) {
        return Err(HttpError::Validation(format!("unsupported scheme: {}", url.scheme())));
    }
    let web_socket = uri::is_web_socket(url);
    if web_socket && !(upgrade_handler && *request.method() == http::Method::GET) {
        return Err(HttpError::Validation(
            "WebSocket URLs require a GET request with an upgrade handler".into(),
        ));
    }
    if upgrade_handler && !web_socket {
        return Err(HttpError::Validation(
            "upgrade handlers require a ws or wss URL".into(),
        ));
    }
    Ok(())
}
