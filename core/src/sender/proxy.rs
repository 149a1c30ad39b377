/*
 * proxy.rs
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

//! CONNECT tunnels through an HTTP proxy for secure targets.

use http::header::{HeaderValue, HOST, PROXY_AUTHORIZATION, USER_AGENT};
use http::{HeaderMap, Method};

use super::exchange::ResponseReader;
use super::{AttemptError, Obtained, RequestSender};
use crate::auth::{self, AuthScheme};
use crate::config::ProxyServer;
use crate::error::HttpError;
use crate::future::ResponseFuture;
use crate::protocol::http::channel::Channel;
use crate::protocol::http::h1::{encode_request_head, BodyMode};
use crate::protocol::http::handler::HttpResponseStatus;
use crate::protocol::http::request::Request;
use crate::uri;

/// Head of the CONNECT request for `request` through `proxy`.
pub(crate) fn connect_head(request: &Request, proxy: &ProxyServer, user_agent: &str) -> bytes::BytesMut {
    let authority = uri::authority_form(request.url());
    let mut headers = HeaderMap::new();
    if let Ok(host) = HeaderValue::from_str(&authority) {
        headers.insert(HOST, host);
    }
    headers.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
    if let Ok(agent) = HeaderValue::from_str(user_agent) {
        if !user_agent.is_empty() {
            headers.insert(USER_AGENT, agent);
        }
    }
    if let Some(realm) = proxy.realm.as_ref().filter(|r| r.scheme == AuthScheme::Basic) {
        let value = auth::basic_authorization(&realm.principal, &realm.password);
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(PROXY_AUTHORIZATION, value);
        }
    }
    encode_request_head(&Method::CONNECT, &authority, &headers)
}

impl RequestSender {
    /// Establish a tunnel on a fresh proxy channel and start TLS to the target through it.
    /// A refused CONNECT is delivered to the handler as the response.
    pub(super) async fn open_tunnel<T: Clone + Send + Sync + 'static>(
        &self,
        future: &ResponseFuture<T>,
        mut channel: Channel,
        request: &Request,
        proxy: &ProxyServer,
    ) -> std::result::Result<Obtained, AttemptError> {
        let head = connect_head(request, proxy, &self.config.user_agent);
        tracing::debug!(proxy = %proxy.authority(), target = %uri::authority_form(request.url()), "opening tunnel");
        future.touch();
        if let Err(e) = channel.write_all(&head).await {
            return Err(AttemptError::Io(HttpError::Io(e), Some(channel)));
        }

        let mut reader = ResponseReader::new();
        let (version, code, reason) = match reader.read_head(&mut channel, future).await {
            Ok(head) => head,
            Err(e) => return Err(self.read_failed(future, e, channel)),
        };
        if (200..300).contains(&code) {
            tracing::debug!(code, "tunnel established");
            return match channel.upgrade_tls(self.connector.as_ref(), uri::host(request.url())).await {
                Ok(channel) => Ok(Obtained::Channel(channel)),
                Err(e) => Err(AttemptError::Io(HttpError::Io(e), None)),
            };
        }

        tracing::debug!(code, proxy = %proxy.authority(), "proxy refused tunnel");
        future.set_status_received(true);
        let headers = reader.take_headers();
        let mode = match BodyMode::for_response(&Method::GET, code, &headers) {
            Ok(mode) => mode,
            Err(e) => return Err(AttemptError::Fatal(HttpError::Protocol(e.to_string()), Some(channel))),
        };
        reader.start_body(mode);
        let status = HttpResponseStatus {
            code,
            reason,
            version,
            uri: request.url().clone(),
        };
        self.deliver(future, channel, reader, status, headers, false).await?;
        Ok(Obtained::Delivered)
    }
}
