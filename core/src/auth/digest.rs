/*
 * digest.rs
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

//! HTTP Digest access authentication (RFC 2617): MD5 and MD5-sess, qop `auth` and `auth-int`.

use md5::{Digest, Md5};
use rand::RngCore;

use super::Realm;

/// Parameters of a `Digest` challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: Option<String>,
    pub nonce: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    /// Chosen qop: `auth` when offered, else `auth-int`, else none.
    pub qop: Option<String>,
    pub stale: bool,
}

impl DigestChallenge {
    pub fn parse(header: &str) -> Self {
        let mut challenge = DigestChallenge::default();
        let params = header
            .trim()
            .strip_prefix("Digest")
            .or_else(|| header.trim().strip_prefix("digest"))
            .unwrap_or(header);
        for (name, value) in parse_params(params) {
            match name.to_ascii_lowercase().as_str() {
                "realm" => challenge.realm = Some(value),
                "nonce" => challenge.nonce = Some(value),
                "opaque" => challenge.opaque = Some(value),
                "algorithm" => challenge.algorithm = Some(value),
                "qop" => challenge.qop = choose_qop(&value),
                "stale" => challenge.stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }
        challenge
    }
}

fn choose_qop(offered: &str) -> Option<String> {
    let options: Vec<&str> = offered.split(',').map(str::trim).collect();
    if options.iter().any(|q| q.eq_ignore_ascii_case("auth")) {
        Some("auth".into())
    } else if options.iter().any(|q| q.eq_ignore_ascii_case("auth-int")) {
        Some("auth-int".into())
    } else {
        None
    }
}

/// `name=value` pairs separated by commas; quoted values may contain commas and escapes.
fn parse_params(s: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut chars = s.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            name.push(c);
            chars.next();
        }
        if name.trim().is_empty() {
            break;
        }
        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        _ => value.push(c),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                value = value.trim().to_string();
            }
        }
        out.push((name.trim().to_string(), value));
        if chars.peek().is_none() {
            break;
        }
    }
    out
}

pub(crate) fn md5_hex(data: &[u8]) -> String {
    let digest = Md5::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 16 random bytes, hex encoded.
pub fn new_cnonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// The `response` directive for `realm` (which must carry a nonce and cnonce when qop is set).
pub fn response(realm: &Realm, method: &str, uri: &str, cnonce: &str) -> String {
    let realm_name = realm.realm_name.as_deref().unwrap_or("");
    let nonce = realm.nonce.as_deref().unwrap_or("");
    let mut ha1 = md5_hex(format!("{}:{}:{}", realm.principal, realm_name, realm.password).as_bytes());
    if realm
        .algorithm
        .as_deref()
        .map(|a| a.eq_ignore_ascii_case("MD5-sess"))
        .unwrap_or(false)
    {
        ha1 = md5_hex(format!("{}:{}:{}", ha1, nonce, cnonce).as_bytes());
    }
    let ha2 = match realm.qop.as_deref() {
        Some("auth-int") => md5_hex(format!("{}:{}:{}", method, uri, md5_hex(b"")).as_bytes()),
        _ => md5_hex(format!("{}:{}", method, uri).as_bytes()),
    };
    match realm.qop.as_deref() {
        Some(qop) => md5_hex(
            format!("{}:{}:{}:{}:{}:{}", ha1, nonce, realm.nc, cnonce, qop, ha2).as_bytes(),
        ),
        None => md5_hex(format!("{}:{}:{}", ha1, nonce, ha2).as_bytes()),
    }
}

/// Full `Digest ...` header value.
pub fn authorization(realm: &Realm, method: &str, uri: &str) -> String {
    let cnonce = realm.cnonce.clone().unwrap_or_else(new_cnonce);
    let response = response(realm, method, uri, &cnonce);

    let mut fields = vec![
        format!("username=\"{}\"", realm.principal),
        format!("realm=\"{}\"", realm.realm_name.as_deref().unwrap_or("")),
        format!("nonce=\"{}\"", realm.nonce.as_deref().unwrap_or("")),
        format!("uri=\"{}\"", uri),
    ];
    if let Some(algorithm) = realm.algorithm.as_deref().filter(|a| !a.is_empty()) {
        fields.push(format!("algorithm={}", algorithm));
    }
    fields.push(format!("response=\"{}\"", response));
    if let Some(opaque) = realm.opaque.as_deref().filter(|o| !o.is_empty()) {
        fields.push(format!("opaque=\"{}\"", opaque));
    }
    if let Some(qop) = realm.qop.as_deref().filter(|q| !q.is_empty()) {
        fields.push(format!("qop={}", qop));
        fields.push(format!("nc={}", realm.nc));
        fields.push(format!("cnonce=\"{}\"", cnonce));
    }
    format!("Digest {}", fields.join(", "))
}
