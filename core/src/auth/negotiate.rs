/*
 * negotiate.rs
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

//! Negotiate (SPNEGO / Kerberos). Token generation belongs to the platform GSS layer, so it is
//! supplied by the embedder through `SpnegoEngine`.

use std::io;

/// Produces base64 SPNEGO tokens for a service host.
pub trait SpnegoEngine: Send + Sync {
    fn generate_token(&self, host: &str) -> io::Result<String>;
}

/// Engine returning a fixed token (pre-obtained tickets, tests).
#[derive(Debug, Clone)]
pub struct StaticSpnegoEngine {
    token: String,
}

impl StaticSpnegoEngine {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl SpnegoEngine for StaticSpnegoEngine {
    fn generate_token(&self, _host: &str) -> io::Result<String> {
        Ok(self.token.clone())
    }
}
