/*
 * request.rs
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

//! HTTP request: method, URL, headers, body and per-request overrides of the client config.
//!
//! Built via `RequestBuilder`; requests are immutable once built and cheap to clone, so filters and
//! redirect handling derive new ones through `to_builder`.

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method};
use url::Url;

use crate::auth::Realm;
use crate::body::{Body, BodyGenerator, BytesBody, FileBody};
use crate::config::ProxyServer;
use crate::error::{HttpError, Result};
use crate::multipart::{new_multipart_body, Part};
use crate::uri;

/// Request payload.
#[derive(Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Encoded with the request charset (only UTF-8 is produced).
    Text(String),
    Bytes(Bytes),
    Generator(Arc<dyn BodyGenerator>),
    Multipart(Vec<Part>),
    /// Sent as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
    File(PathBuf),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Text(s) => write!(f, "Text({} chars)", s.len()),
            RequestBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            RequestBody::Generator(_) => f.write_str("Generator"),
            RequestBody::Multipart(parts) => f.debug_tuple("Multipart").field(parts).finish(),
            RequestBody::Form(params) => f.debug_tuple("Form").field(params).finish(),
            RequestBody::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// Body ready for writing plus the Content-Type it implies, if any.
pub(crate) struct OpenedBody {
    pub body: Box<dyn Body>,
    pub content_type: Option<String>,
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// Open a fresh body for one attempt. `content_type` is the request's Content-Type header.
    pub(crate) fn open(&self, content_type: Option<&str>) -> io::Result<Option<OpenedBody>> {
        let opened = match self {
            RequestBody::Empty => return Ok(None),
            RequestBody::Text(s) => OpenedBody {
                body: Box::new(BytesBody::new(Bytes::copy_from_slice(s.as_bytes()))),
                content_type: None,
            },
            RequestBody::Bytes(b) => OpenedBody {
                body: Box::new(BytesBody::new(b.clone())),
                content_type: None,
            },
            RequestBody::Generator(generator) => OpenedBody {
                body: generator.create_body()?,
                content_type: None,
            },
            RequestBody::Multipart(parts) => {
                let body = new_multipart_body(parts.clone(), content_type);
                let content_type = Some(body.content_type().to_string());
                OpenedBody {
                    body: Box::new(body),
                    content_type,
                }
            }
            RequestBody::Form(params) => OpenedBody {
                body: Box::new(BytesBody::new(uri::form_urlencode(params))),
                content_type: Some("application/x-www-form-urlencoded".to_string()),
            },
            RequestBody::File(path) => OpenedBody {
                body: Box::new(FileBody::new(path.clone())?),
                content_type: None,
            },
        };
        Ok(Some(opened))
    }
}

/// An HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: RequestBody,
    charset: Option<String>,
    realm: Option<Realm>,
    proxy_server: Option<ProxyServer>,
    request_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    virtual_host: Option<String>,
    partition_key: Option<String>,
    follow_redirect: Option<bool>,
    address: Option<IpAddr>,
}

impl Request {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn realm(&self) -> Option<&Realm> {
        self.realm.as_ref()
    }

    pub fn proxy_server(&self) -> Option<&ProxyServer> {
        self.proxy_server.as_ref()
    }

    /// Overrides the client's request timeout when set.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Overrides the client's read timeout when set.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn virtual_host(&self) -> Option<&str> {
        self.virtual_host.as_deref()
    }

    pub fn partition_key(&self) -> Option<&str> {
        self.partition_key.as_deref()
    }

    pub fn follow_redirect(&self) -> Option<bool> {
        self.follow_redirect
    }

    /// Pre-resolved address to connect to instead of resolving the URL host.
    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    pub(crate) fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    /// Request-line target, e.g. `/search?q=x`.
    pub fn target(&self) -> String {
        uri::request_target(&self.url, false)
    }

    pub fn to_builder(&self) -> RequestBuilder {
        RequestBuilder {
            method: self.method.clone(),
            url: self.url.to_string(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            charset: self.charset.clone(),
            realm: self.realm.clone(),
            proxy_server: self.proxy_server.clone(),
            request_timeout: self.request_timeout,
            read_timeout: self.read_timeout,
            virtual_host: self.virtual_host.clone(),
            partition_key: self.partition_key.clone(),
            follow_redirect: self.follow_redirect,
            address: self.address,
            error: None,
        }
    }
}

/// Mutable request builder.
///
/// Invalid header names or values are remembered and reported by `build`.
pub struct RequestBuilder {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: RequestBody,
    charset: Option<String>,
    realm: Option<Realm>,
    proxy_server: Option<ProxyServer>,
    request_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    virtual_host: Option<String>,
    partition_key: Option<String>,
    follow_redirect: Option<bool>,
    address: Option<IpAddr>,
    error: Option<String>,
}

impl RequestBuilder {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            charset: None,
            realm: None,
            proxy_server: None,
            request_timeout: None,
            read_timeout: None,
            virtual_host: None,
            partition_key: None,
            follow_redirect: None,
            address: None,
            error: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    pub fn url(&mut self, url: impl Into<String>) -> &mut Self {
        self.url = url.into();
        self
    }

    fn parse_header(&mut self, name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
        let name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(n) => n,
            Err(_) => {
                self.error.get_or_insert_with(|| format!("invalid header name: {}", name));
                return None;
            }
        };
        match HeaderValue::from_str(value) {
            Ok(v) => Some((name, v)),
            Err(_) => {
                self.error.get_or_insert_with(|| format!("invalid value for header {}", name));
                None
            }
        }
    }

    /// Set a header, replacing any existing values.
    pub fn header(&mut self, name: &str, value: &str) -> &mut Self {
        if let Some((name, value)) = self.parse_header(name, value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Append a header value.
    pub fn add_header(&mut self, name: &str, value: &str) -> &mut Self {
        if let Some((name, value)) = self.parse_header(name, value) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        self.headers.remove(name);
        self
    }

    pub fn headers(&mut self, headers: HeaderMap) -> &mut Self {
        self.headers = headers;
        self
    }

    pub fn body(&mut self, body: RequestBody) -> &mut Self {
        self.body = body;
        self
    }

    pub fn text_body(&mut self, text: impl Into<String>) -> &mut Self {
        self.body(RequestBody::Text(text.into()))
    }

    pub fn bytes_body(&mut self, data: impl Into<Bytes>) -> &mut Self {
        self.body(RequestBody::Bytes(data.into()))
    }

    pub fn generator_body(&mut self, generator: Arc<dyn BodyGenerator>) -> &mut Self {
        self.body(RequestBody::Generator(generator))
    }

    pub fn file_body(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.body(RequestBody::File(path.into()))
    }

    /// Append a multipart part, switching the body to multipart if needed.
    pub fn part(&mut self, part: Part) -> &mut Self {
        match &mut self.body {
            RequestBody::Multipart(parts) => parts.push(part),
            _ => self.body = RequestBody::Multipart(vec![part]),
        }
        self
    }

    /// Append a form parameter, switching the body to a form if needed.
    pub fn form_param(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let param = (name.into(), value.into());
        match &mut self.body {
            RequestBody::Form(params) => params.push(param),
            _ => self.body = RequestBody::Form(vec![param]),
        }
        self
    }

    pub fn charset(&mut self, charset: impl Into<String>) -> &mut Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn realm(&mut self, realm: Realm) -> &mut Self {
        self.realm = Some(realm);
        self
    }

    pub fn proxy_server(&mut self, proxy: ProxyServer) -> &mut Self {
        self.proxy_server = Some(proxy);
        self
    }

    pub fn request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn read_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn virtual_host(&mut self, host: impl Into<String>) -> &mut Self {
        self.virtual_host = Some(host.into());
        self
    }

    pub fn clear_virtual_host(&mut self) -> &mut Self {
        self.virtual_host = None;
        self
    }

    pub fn partition_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn follow_redirect(&mut self, follow: bool) -> &mut Self {
        self.follow_redirect = Some(follow);
        self
    }

    pub fn address(&mut self, address: IpAddr) -> &mut Self {
        self.address = Some(address);
        self
    }

    /// Validate and build. The URL must be absolute with a host.
    pub fn build(&self) -> Result<Request> {
        if let Some(err) = &self.error {
            return Err(HttpError::Validation(err.clone()));
        }
        let url = Url::parse(&self.url)
            .map_err(|e| HttpError::Validation(format!("invalid URL {}: {}", self.url, e)))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(HttpError::Validation(format!("URL has no host: {}", self.url)));
        }
        Ok(Request {
            method: self.method.clone(),
            url,
            headers: self.headers.clone(),
            body: self.body.clone(),
            charset: self.charset.clone(),
            realm: self.realm.clone(),
            proxy_server: self.proxy_server.clone(),
            request_timeout: self.request_timeout,
            read_timeout: self.read_timeout,
            virtual_host: self.virtual_host.clone(),
            partition_key: self.partition_key.clone(),
            follow_redirect: self.follow_redirect,
            address: self.address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::read_to_end;

    #[test]
    fn builds_request() {
        let request = RequestBuilder::post("http://example.com/a?b=c")
            .header("X-One", "1")
            .add_header("X-Many", "a")
            .add_header("X-Many", "b")
            .text_body("hello")
            .build()
            .unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.target(), "/a?b=c");
        assert_eq!(request.header("x-one"), Some("1"));
        assert_eq!(request.headers().get_all("x-many").iter().count(), 2);
        assert!(matches!(request.body(), RequestBody::Text(_)));
    }

    #[test]
    fn invalid_inputs_fail_at_build() {
        assert!(RequestBuilder::get("not a url").build().is_err());
        assert!(RequestBuilder::get("http://example.com/")
            .header("bad header", "x")
            .build()
            .is_err());
        assert!(RequestBuilder::get("http://example.com/")
            .header("x", "line\nbreak")
            .build()
            .is_err());
    }

    #[test]
    fn to_builder_round_trips_overrides() {
        let request = RequestBuilder::get("http://example.com/")
            .virtual_host("vhost")
            .follow_redirect(true)
            .request_timeout(Duration::from_secs(3))
            .build()
            .unwrap();
        let copy = request.to_builder().header("x", "y").build().unwrap();
        assert_eq!(copy.virtual_host(), Some("vhost"));
        assert_eq!(copy.follow_redirect(), Some(true));
        assert_eq!(copy.request_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(copy.header("x"), Some("y"));
    }

    #[test]
    fn form_body_opens_urlencoded() {
        let request = RequestBuilder::post("http://example.com/")
            .form_param("a", "1 2")
            .form_param("b", "x")
            .build()
            .unwrap();
        let mut opened = request.body().open(None).unwrap().unwrap();
        assert_eq!(
            opened.content_type.as_deref(),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(read_to_end(opened.body.as_mut(), 16).unwrap(), b"a=1+2&b=x");
    }

    #[test]
    fn multipart_body_reports_content_type() {
        let request = RequestBuilder::post("http://example.com/")
            .part(Part::string("field", "value"))
            .build()
            .unwrap();
        let opened = request.body().open(request.content_type()).unwrap().unwrap();
        assert!(opened
            .content_type
            .unwrap()
            .starts_with("multipart/form-data; boundary="));
        assert!(opened.body.content_length() > 0);
    }

    #[test]
    fn empty_body_opens_nothing() {
        let request = RequestBuilder::get("http://example.com/").build().unwrap();
        assert!(request.body().open(None).unwrap().is_none());
    }
}
