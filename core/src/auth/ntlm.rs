/*
 * ntlm.rs
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

//! NTLM over HTTP.
//!
//! The client opens the handshake with a fixed Type 1 (negotiate) message, decodes the server's
//! Type 2 (challenge) and hands it to a pluggable `NtlmEngine` for the Type 3 response.

use std::io;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::Realm;

/// Base64 Type 1 message: Unicode, OEM, request target, NTLM, always sign, NTLM2 key, 128-bit, 56-bit.
pub const TYPE1_MESSAGE: &str = "TlRMTVNTUAABAAAAAYIIogAAAAAoAAAAAAAAACgAAAAFASgKAAAADw==";

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

/// Decoded Type 2 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type2Message {
    pub flags: u32,
    pub challenge: [u8; 8],
    pub target: Option<Vec<u8>>,
    pub target_info: Option<Vec<u8>>,
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn u16_at(data: &[u8], offset: usize) -> io::Result<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| invalid("NTLM message truncated"))
}

fn u32_at(data: &[u8], offset: usize) -> io::Result<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| invalid("NTLM message truncated"))
}

/// Contents of the security buffer whose descriptor starts at `offset`.
fn security_buffer(data: &[u8], offset: usize) -> io::Result<Option<Vec<u8>>> {
    let len = u16_at(data, offset)? as usize;
    if len == 0 {
        return Ok(None);
    }
    let start = u32_at(data, offset + 4)? as usize;
    data.get(start..start + len)
        .map(|b| Some(b.to_vec()))
        .ok_or_else(|| invalid("NTLM security buffer out of range"))
}

impl Type2Message {
    /// Decode the base64 token that follows `NTLM ` in the challenge header.
    pub fn parse(token: &str) -> io::Result<Self> {
        let data = BASE64
            .decode(token.trim())
            .map_err(|_| invalid("NTLM challenge is not base64"))?;
        if data.len() < 32 || &data[..8] != SIGNATURE {
            return Err(invalid("not an NTLM message"));
        }
        if u32_at(&data, 8)? != 2 {
            return Err(invalid("not an NTLM Type 2 message"));
        }
        let mut challenge = [0u8; 8];
        challenge.copy_from_slice(&data[24..32]);
        let target_info = if data.len() >= 48 {
            security_buffer(&data, 40)?
        } else {
            None
        };
        Ok(Self {
            flags: u32_at(&data, 20)?,
            challenge,
            target: security_buffer(&data, 12)?,
            target_info,
        })
    }
}

/// Computes Type 3 (authenticate) messages.
pub trait NtlmEngine: Send + Sync {
    /// Base64 Type 3 message answering `challenge` with the realm's credentials.
    fn type3_message(&self, realm: &Realm, challenge: &Type2Message) -> io::Result<String>;
}

/// The token after `NTLM ` in a challenge header, if any.
pub fn challenge_token(header: &str) -> Option<&str> {
    let (scheme, rest) = header.trim().split_once(' ')?;
    let rest = rest.trim();
    if scheme.eq_ignore_ascii_case("NTLM") && !rest.is_empty() {
        Some(rest)
    } else {
        None
    }
}
