/*
 * config.rs
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

//! Client configuration: immutable once the client is built, shared by `Arc`.
//!
//! Nothing here is read from the environment; every default lives in `Default`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{NtlmEngine, Realm, SpnegoEngine};
use crate::filter::{IoExceptionFilter, RequestFilter, ResponseFilter};

/// An HTTP proxy. Plain targets are forwarded in absolute form; secure targets go through CONNECT.
#[derive(Debug, Clone)]
pub struct ProxyServer {
    pub host: String,
    pub port: u16,
    /// Credentials for Proxy-Authorization.
    pub realm: Option<Realm>,
    /// Hosts reached directly. A leading `*.` or `.` matches any subdomain.
    pub non_proxy_hosts: Vec<String>,
}

impl ProxyServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            realm: None,
            non_proxy_hosts: Vec::new(),
        }
    }

    pub fn realm(mut self, realm: Realm) -> Self {
        self.realm = Some(realm);
        self
    }

    pub fn non_proxy_host(mut self, host: impl Into<String>) -> Self {
        self.non_proxy_hosts.push(host.into());
        self
    }

    /// True if `host` must bypass this proxy.
    pub fn is_ignored_for_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.non_proxy_hosts.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();
            if let Some(suffix) = pattern.strip_prefix('*') {
                host.ends_with(suffix)
            } else if pattern.starts_with('.') {
                host.ends_with(&pattern)
            } else {
                host == pattern
            }
        })
    }

    /// `host:port` used in partition keys and CONNECT logging.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for `HttpClient`.
#[derive(Clone)]
pub struct ClientConfig {
    /// TCP connect (and TLS handshake) timeout.
    pub connect_timeout: Duration,

    /// Whole-request deadline; `None` disables it. Overridable per request.
    pub request_timeout: Option<Duration>,

    /// Maximum silence on the connection while waiting for the response; `None` disables it.
    pub read_timeout: Option<Duration>,

    /// How long an idle connection may sit in the pool.
    pub pooled_connection_idle_timeout: Duration,

    /// Maximum open connections overall (`None` = unbounded).
    pub max_connections: Option<usize>,

    /// Maximum open connections per partition key (`None` = unbounded).
    pub max_connections_per_host: Option<usize>,

    /// Transparent replays allowed after recoverable I/O failures.
    pub max_request_retry: usize,

    pub max_redirects: usize,

    /// Follow 30x responses. Overridable per request.
    pub follow_redirect: bool,

    /// Keep the method and body on 302, as 307 does.
    pub strict_302_handling: bool,

    /// Pool connections after complete responses.
    pub keep_alive: bool,

    pub user_agent: String,

    pub proxy_server: Option<ProxyServer>,

    /// Default credentials for requests that carry none.
    pub realm: Option<Realm>,

    /// Never hand a random-access body the raw transport.
    pub disable_zero_copy: bool,

    /// Deliver body parts as shared slices of the read buffer instead of owned copies.
    pub lazy_body_parts: bool,

    /// Request body write buffer size.
    pub chunk_size: usize,

    pub request_filters: Vec<Arc<dyn RequestFilter>>,
    pub response_filters: Vec<Arc<dyn ResponseFilter>>,
    pub io_exception_filters: Vec<Arc<dyn IoExceptionFilter>>,

    /// Type 3 message generator for NTLM challenges.
    pub ntlm_engine: Option<Arc<dyn NtlmEngine>>,

    /// Token generator for Negotiate (SPNEGO / Kerberos).
    pub spnego_engine: Option<Arc<dyn SpnegoEngine>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Some(Duration::from_secs(60)),
            read_timeout: Some(Duration::from_secs(60)),
            pooled_connection_idle_timeout: Duration::from_secs(60),
            max_connections: None,
            max_connections_per_host: None,
            max_request_retry: 5,
            max_redirects: 5,
            follow_redirect: false,
            strict_302_handling: false,
            keep_alive: true,
            user_agent: format!("Corriere/{}", env!("CARGO_PKG_VERSION")),
            proxy_server: None,
            realm: None,
            disable_zero_copy: false,
            lazy_body_parts: true,
            chunk_size: 8192,
            request_filters: Vec::new(),
            response_filters: Vec::new(),
            io_exception_filters: Vec::new(),
            ntlm_engine: None,
            spnego_engine: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("pooled_connection_idle_timeout", &self.pooled_connection_idle_timeout)
            .field("max_connections", &self.max_connections)
            .field("max_connections_per_host", &self.max_connections_per_host)
            .field("max_request_retry", &self.max_request_retry)
            .field("max_redirects", &self.max_redirects)
            .field("follow_redirect", &self.follow_redirect)
            .field("strict_302_handling", &self.strict_302_handling)
            .field("keep_alive", &self.keep_alive)
            .field("user_agent", &self.user_agent)
            .field("proxy_server", &self.proxy_server)
            .field("realm", &self.realm)
            .field("disable_zero_copy", &self.disable_zero_copy)
            .field("lazy_body_parts", &self.lazy_body_parts)
            .field("chunk_size", &self.chunk_size)
            .field("request_filters", &self.request_filters.len())
            .field("response_filters", &self.response_filters.len())
            .field("io_exception_filters", &self.io_exception_filters.len())
            .field("ntlm_engine", &self.ntlm_engine.is_some())
            .field("spnego_engine", &self.spnego_engine.is_some())
            .finish()
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn pooled_connection_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pooled_connection_idle_timeout = timeout;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn max_connections_per_host(mut self, max: usize) -> Self {
        self.max_connections_per_host = Some(max);
        self
    }

    pub fn max_request_retry(mut self, retries: usize) -> Self {
        self.max_request_retry = retries;
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn follow_redirect(mut self, follow: bool) -> Self {
        self.follow_redirect = follow;
        self
    }

    pub fn strict_302_handling(mut self, strict: bool) -> Self {
        self.strict_302_handling = strict;
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn proxy_server(mut self, proxy: ProxyServer) -> Self {
        self.proxy_server = Some(proxy);
        self
    }

    pub fn realm(mut self, realm: Realm) -> Self {
        self.realm = Some(realm);
        self
    }

    pub fn disable_zero_copy(mut self, disable: bool) -> Self {
        self.disable_zero_copy = disable;
        self
    }

    pub fn lazy_body_parts(mut self, lazy: bool) -> Self {
        self.lazy_body_parts = lazy;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn request_filter(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.request_filters.push(filter);
        self
    }

    pub fn response_filter(mut self, filter: Arc<dyn ResponseFilter>) -> Self {
        self.response_filters.push(filter);
        self
    }

    pub fn io_exception_filter(mut self, filter: Arc<dyn IoExceptionFilter>) -> Self {
        self.io_exception_filters.push(filter);
        self
    }

    pub fn ntlm_engine(mut self, engine: Arc<dyn NtlmEngine>) -> Self {
        self.ntlm_engine = Some(engine);
        self
    }

    pub fn spnego_engine(mut self, engine: Arc<dyn SpnegoEngine>) -> Self {
        self.spnego_engine = Some(engine);
        self
    }
}
