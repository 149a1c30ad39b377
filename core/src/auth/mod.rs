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

//! HTTP authentication: realms and Authorization / Proxy-Authorization header values.
//!
//! Basic and Digest headers are computed per request from the realm. NTLM and Negotiate are
//! handshakes bound to a physical connection, so their first header is sent only on the first
//! request of each connection (tracked on the channel, not on the request).

pub mod digest;
pub mod negotiate;
pub mod ntlm;

pub use negotiate::SpnegoEngine;
pub use ntlm::NtlmEngine;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http::HeaderMap;

use crate::error::{HttpError, Result};

/// Authentication scheme of a realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Digest,
    Ntlm,
    Spnego,
    Kerberos,
}

impl AuthScheme {
    /// Challenge token in WWW-Authenticate / Proxy-Authenticate.
    pub fn challenge_name(&self) -> &'static str {
        match self {
            AuthScheme::Basic => "Basic",
            AuthScheme::Digest => "Digest",
            AuthScheme::Ntlm => "NTLM",
            AuthScheme::Spnego | AuthScheme::Kerberos => "Negotiate",
        }
    }

    /// Handshake bound to a connection rather than a request.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(self, AuthScheme::Ntlm | AuthScheme::Spnego | AuthScheme::Kerberos)
    }
}

/// Credentials plus scheme state (Digest nonce and friends).
#[derive(Debug, Clone)]
pub struct Realm {
    pub principal: String,
    pub password: String,
    pub scheme: AuthScheme,
    /// Send credentials without waiting for a challenge.
    pub use_preemptive_auth: bool,
    pub realm_name: Option<String>,
    pub nonce: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    pub qop: Option<String>,
    pub nc: String,
    pub cnonce: Option<String>,
    /// Send the absolute URL as the Digest `uri`.
    pub use_absolute_uri: bool,
    /// Drop the query from the Digest `uri`.
    pub omit_query: bool,
    pub ntlm_domain: String,
    pub ntlm_host: String,
}

impl Realm {
    fn new(scheme: AuthScheme, principal: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            password: password.into(),
            scheme,
            use_preemptive_auth: false,
            realm_name: None,
            nonce: None,
            opaque: None,
            algorithm: None,
            qop: None,
            nc: "00000001".into(),
            cnonce: None,
            use_absolute_uri: false,
            omit_query: false,
            ntlm_domain: String::new(),
            ntlm_host: "localhost".into(),
        }
    }

    /// Basic credentials, sent preemptively.
    pub fn basic(principal: impl Into<String>, password: impl Into<String>) -> Self {
        let mut realm = Self::new(AuthScheme::Basic, principal, password);
        realm.use_preemptive_auth = true;
        realm
    }

    /// Digest credentials; the first request waits for the server's challenge.
    pub fn digest(principal: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(AuthScheme::Digest, principal, password)
    }

    pub fn ntlm(principal: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(AuthScheme::Ntlm, principal, password)
    }

    /// Negotiate with tokens from the configured SPNEGO engine.
    pub fn spnego() -> Self {
        Self::new(AuthScheme::Spnego, "", "")
    }

    pub fn kerberos() -> Self {
        Self::new(AuthScheme::Kerberos, "", "")
    }

    pub fn preemptive(mut self, preemptive: bool) -> Self {
        self.use_preemptive_auth = preemptive;
        self
    }

    pub fn ntlm_domain(mut self, domain: impl Into<String>) -> Self {
        self.ntlm_domain = domain.into();
        self
    }

    pub fn ntlm_host(mut self, host: impl Into<String>) -> Self {
        self.ntlm_host = host.into();
        self
    }

    pub fn use_absolute_uri(mut self, absolute: bool) -> Self {
        self.use_absolute_uri = absolute;
        self
    }

    pub fn omit_query(mut self, omit: bool) -> Self {
        self.omit_query = omit;
        self
    }

    /// Copy of this realm primed from a Digest challenge, to be sent preemptively.
    pub fn with_digest_challenge(&self, challenge: &str) -> Realm {
        let parsed = digest::DigestChallenge::parse(challenge);
        let mut realm = self.clone();
        realm.scheme = AuthScheme::Digest;
        realm.use_preemptive_auth = true;
        realm.realm_name = parsed.realm;
        realm.nonce = parsed.nonce;
        realm.opaque = parsed.opaque;
        realm.algorithm = parsed.algorithm;
        realm.qop = parsed.qop;
        realm.nc = "00000001".into();
        realm.cnonce = Some(digest::new_cnonce());
        realm
    }
}

/// `Basic base64(user:password)`.
pub fn basic_authorization(principal: &str, password: &str) -> String {
    format!(
        "Basic {}",
        BASE64.encode(format!("{}:{}", principal, password))
    )
}

/// Header computed for every request: preemptive Basic, or Digest once a nonce is known.
pub fn per_request_authorization(realm: &Realm, method: &str, uri: &str) -> Option<String> {
    if !realm.use_preemptive_auth {
        return None;
    }
    match realm.scheme {
        AuthScheme::Basic => Some(basic_authorization(&realm.principal, &realm.password)),
        AuthScheme::Digest => realm
            .nonce
            .as_ref()
            .filter(|n| !n.is_empty())
            .map(|_| digest::authorization(realm, method, uri)),
        AuthScheme::Ntlm | AuthScheme::Spnego | AuthScheme::Kerberos => None,
    }
}

/// Header sent only on the first request of a connection: NTLM Type 1 or a Negotiate token.
pub fn per_connection_authorization(
    realm: &Realm,
    host: &str,
    spnego: Option<&dyn SpnegoEngine>,
) -> Result<Option<String>> {
    if !realm.use_preemptive_auth {
        return Ok(None);
    }
    match realm.scheme {
        AuthScheme::Ntlm => Ok(Some(format!("NTLM {}", ntlm::TYPE1_MESSAGE))),
        AuthScheme::Spnego | AuthScheme::Kerberos => {
            let engine = spnego.ok_or_else(|| {
                HttpError::Auth("Negotiate realm without an SPNEGO engine".into())
            })?;
            let token = engine
                .generate_token(host)
                .map_err(|e| HttpError::Auth(e.to_string()))?;
            Ok(Some(format!("Negotiate {}", token)))
        }
        AuthScheme::Basic | AuthScheme::Digest => Ok(None),
    }
}

/// First challenge header value whose scheme token matches `scheme`.
pub fn find_challenge<'a>(headers: &'a HeaderMap, header: &str, scheme: AuthScheme) -> Option<&'a str> {
    let name = scheme.challenge_name();
    headers
        .get_all(header)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| {
            let token = v.split_whitespace().next().unwrap_or("");
            token.eq_ignore_ascii_case(name)
        })
}
