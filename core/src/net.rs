/*
 * net.rs
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

//! Transport establishment: name resolution, TCP connect with timeout, rustls handshakes.
//!
//! The request sender only sees `Connector` and boxed `Transport`s, so tests (and embedders with
//! their own event loop) can substitute in-memory or custom transports.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::client::ClientConfig;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::TlsConnector;

/// A bidirectional byte stream a channel can run HTTP over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

pub type BoxedTransport = Box<dyn Transport>;

/// Where to connect.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    /// Wrap the connection in TLS for `host`.
    pub secure: bool,
    /// Skip name resolution and connect to this address.
    pub address: Option<IpAddr>,
}

/// Resolves a host name to socket addresses.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by the system resolver via tokio.
#[derive(Debug, Default)]
pub struct SystemResolver;

#[async_trait]
impl NameResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}", host),
            ));
        }
        Ok(addrs)
    }
}

/// Opens transports for the request sender.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new transport to `target`, performing the TLS handshake when `target.secure`.
    async fn connect(&self, target: &ConnectTarget) -> io::Result<BoxedTransport>;

    /// Wrap an established transport (a CONNECT tunnel) in TLS for `host`.
    async fn upgrade_tls(&self, transport: BoxedTransport, host: &str) -> io::Result<BoxedTransport>;
}

/// Build a root certificate store: platform native certs first, then webpki-roots as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    if let Ok(certs) = rustls_native_certs::load_native_certs() {
        for cert in certs {
            let _ = root_store.add(cert);
        }
    }
    if root_store.is_empty() {
        root_store.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    }
    root_store
}

/// TLS client config for HTTP/1.1 (ALPN `http/1.1`).
pub fn http_client_config() -> Arc<ClientConfig> {
    let mut config = ClientConfig::builder()
        .with_root_certificates(build_root_store())
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}

fn server_name(host: &str) -> io::Result<ServerName<'static>> {
    ServerName::try_from(host)
        .map(|name| name.to_owned())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid host name"))
}

/// TCP connector with optional TLS.
pub struct TcpConnector {
    resolver: Arc<dyn NameResolver>,
    connect_timeout: Duration,
    tls: TlsConnector,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self::with_resolver(connect_timeout, Arc::new(SystemResolver))
    }

    pub fn with_resolver(connect_timeout: Duration, resolver: Arc<dyn NameResolver>) -> Self {
        Self {
            resolver,
            connect_timeout,
            tls: TlsConnector::from(http_client_config()),
        }
    }

    pub fn with_tls_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls = TlsConnector::from(config);
        self
    }

    async fn connect_tcp(&self, target: &ConnectTarget) -> io::Result<TcpStream> {
        let addrs = match target.address {
            Some(ip) => vec![SocketAddr::new(ip, target.port)],
            None => self.resolver.resolve(&target.host, target.port).await?,
        };
        let mut last_err = None;
        for addr in addrs {
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(tcp)) => {
                    let _ = tcp.set_nodelay(true);
                    return Ok(tcp);
                }
                Ok(Err(e)) => {
                    tracing::debug!(%addr, error = %e, "connect failed");
                    last_err = Some(e);
                }
                Err(_) => {
                    tracing::debug!(%addr, "connect timed out");
                    last_err = Some(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out after {:?}", addr, self.connect_timeout),
                    ));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {}", target.host))
        }))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, target: &ConnectTarget) -> io::Result<BoxedTransport> {
        let tcp = self.connect_tcp(target).await?;
        if !target.secure {
            return Ok(Box::new(tcp));
        }
        let name = server_name(&target.host)?;
        let tls = timeout(self.connect_timeout, self.tls.connect(name, tcp))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"))?
            .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e))?;
        Ok(Box::new(tls))
    }

    async fn upgrade_tls(&self, transport: BoxedTransport, host: &str) -> io::Result<BoxedTransport> {
        let name = server_name(host)?;
        let tls = self
            .tls
            .connect(name, transport)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e))?;
        Ok(Box::new(tls))
    }
}
