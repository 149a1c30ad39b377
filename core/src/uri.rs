/*
 * uri.rs
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

//! Request URL helpers: schemes, default ports, request targets, Host header values, pool
//! partition keys and form encoding. Parsing itself is done by the `url` crate.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::config::ProxyServer;

/// Form component safe set: everything but alphanumerics and `-_.*` is encoded.
const FORM_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'*');

/// True for `https` and `wss`.
pub fn is_secure(url: &Url) -> bool {
    matches!(url.scheme(), "https" | "wss")
}

/// True for `ws` and `wss`.
pub fn is_web_socket(url: &Url) -> bool {
    matches!(url.scheme(), "ws" | "wss")
}

/// True for the schemes the client can dispatch.
pub fn is_supported_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https" | "ws" | "wss")
}

/// Explicit port, or 443 for secure schemes and 80 otherwise.
pub fn port_or_default(url: &Url) -> u16 {
    url.port_or_known_default()
        .unwrap_or(if is_secure(url) { 443 } else { 80 })
}

/// Host without IPv6 brackets.
pub fn host(url: &Url) -> &str {
    url.host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
        .unwrap_or("")
}

/// `scheme://host:port`, the origin used for same-base comparisons.
pub fn base_url(url: &Url) -> String {
    format!("{}://{}:{}", url.scheme(), host(url), port_or_default(url))
}

/// Same scheme, host and port.
pub fn same_base(a: &Url, b: &Url) -> bool {
    base_url(a) == base_url(b)
}

/// `host:port`, as written in a CONNECT request line.
pub fn authority_form(url: &Url) -> String {
    match url.host() {
        Some(url::Host::Ipv6(addr)) => format!("[{}]:{}", addr, port_or_default(url)),
        _ => format!("{}:{}", host(url), port_or_default(url)),
    }
}

/// Request-line target: origin form (`/path?query`) or, for proxy forwarding, absolute form.
pub fn request_target(url: &Url, absolute: bool) -> String {
    if absolute {
        let mut url = url.clone();
        url.set_fragment(None);
        return url.to_string();
    }
    let path = if url.path().is_empty() { "/" } else { url.path() };
    match url.query() {
        Some(q) if !q.is_empty() => format!("{}?{}", path, q),
        _ => path.to_string(),
    }
}

/// Host header: virtual host if set, else the host with the port only when it is explicit.
pub fn host_header(url: &Url, virtual_host: Option<&str>) -> String {
    if let Some(vhost) = virtual_host {
        return vhost.to_string();
    }
    let host = match url.host() {
        Some(url::Host::Ipv6(addr)) => format!("[{}]", addr),
        _ => host(url).to_string(),
    };
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}

/// URI sent in a Digest header: path (plus query unless omitted) or the absolute URL.
pub fn realm_uri(url: &Url, use_absolute: bool, omit_query: bool) -> String {
    if use_absolute {
        let mut url = url.clone();
        url.set_fragment(None);
        if omit_query {
            url.set_query(None);
        }
        return url.to_string();
    }
    let target = request_target(url, false);
    if omit_query {
        target.split('?').next().unwrap_or("/").to_string()
    } else {
        target
    }
}

/// Pool partition key: `scheme://host:port`, suffixed with the proxy when one is used.
pub fn partition_key(url: &Url, proxy: Option<&ProxyServer>) -> String {
    let base = base_url(url);
    match proxy {
        Some(p) => format!("{} via {}", base, p.authority()),
        None => base,
    }
}

/// `application/x-www-form-urlencoded` body for the given parameters.
pub fn form_urlencode(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(name, value)| format!("{}={}", encode_form_component(name), encode_form_component(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode_form_component(s: &str) -> String {
    utf8_percent_encode(s, FORM_COMPONENT)
        .to_string()
        .replace("%20", "+")
}
