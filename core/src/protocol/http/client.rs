/*
 * client.rs
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

//! HTTP client facade: owns the config, the channel pool and the request sender.

use std::sync::Arc;

use http::Method;

use crate::config::ClientConfig;
use crate::future::ResponseFuture;
use crate::net::{Connector, TcpConnector};
use crate::pool::{ChannelManager, ChannelPool, DefaultChannelPool, NoopChannelPool};
use crate::protocol::http::handler::{AsyncHandler, CompletionHandler};
use crate::protocol::http::request::{Request, RequestBuilder};
use crate::protocol::http::response::Response;
use crate::sender::RequestSender;

/// Asynchronous HTTP client. Cheap to clone; clones share the pool.
///
/// Must be created inside a tokio runtime: the pool reaper and request tasks are spawned on it.
#[derive(Clone)]
pub struct HttpClient {
    sender: Arc<RequestSender>,
}

impl HttpClient {
    /// Client with TCP/TLS connections and an idle pool when keep-alive is enabled.
    pub fn new(config: ClientConfig) -> Self {
        let connector = Arc::new(TcpConnector::new(config.connect_timeout));
        Self::with_connector(config, connector)
    }

    /// Client opening transports through `connector`.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let pool: Arc<dyn ChannelPool> = if config.keep_alive {
            DefaultChannelPool::new(config.pooled_connection_idle_timeout)
        } else {
            Arc::new(NoopChannelPool)
        };
        Self::with_pool(config, connector, pool)
    }

    pub fn with_pool(config: ClientConfig, connector: Arc<dyn Connector>, pool: Arc<dyn ChannelPool>) -> Self {
        let channels = Arc::new(ChannelManager::new(&config, pool));
        let sender = Arc::new(RequestSender::new(Arc::new(config), channels, connector));
        Self { sender }
    }

    pub fn config(&self) -> &ClientConfig {
        self.sender.config()
    }

    /// Execute `request`, streaming the response into `handler`.
    pub fn execute<H>(&self, request: Request, handler: H) -> ResponseFuture<H::Output>
    where
        H: AsyncHandler + 'static,
    {
        self.sender.execute(request, handler)
    }

    /// Execute `request`, buffering the whole response.
    pub fn execute_request(&self, request: Request) -> ResponseFuture<Response> {
        self.execute(request, CompletionHandler::new())
    }

    pub fn prepare_get(&self, url: &str) -> RequestBuilder {
        RequestBuilder::new(Method::GET, url)
    }

    pub fn prepare_post(&self, url: &str) -> RequestBuilder {
        RequestBuilder::new(Method::POST, url)
    }

    /// Number of idle pooled channels.
    pub fn idle_channels(&self) -> usize {
        self.sender.channels().pool().idle_count()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Close pooled channels and reject further requests.
    pub fn close(&self) {
        self.sender.close();
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use crate::error::GetError;

    #[tokio::test]
    async fn closed_client_rejects_requests() {
        let client = HttpClient::new(ClientConfig::default());
        client.close();
        let request = client.prepare_get("http://example.com/").build().unwrap();
        let future = client.execute_request(request);
        assert!(future.is_done());
        match future.get().await {
            Err(GetError::Execution(e)) => assert!(matches!(*e, HttpError::Closed)),
            other => panic!("unexpected outcome: {:?}", other.map(|r| r.status())),
        }
    }

    #[tokio::test]
    async fn unsupported_scheme_fails_fast() {
        let client = HttpClient::new(ClientConfig::default());
        let request = client.prepare_get("ftp://example.com/").build().unwrap();
        let future = client.execute_request(request);
        assert!(matches!(future.try_get(), Some(Err(_))));
    }
}
