/*
 * lib.rs
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

//! Corriere core: asynchronous HTTP/1.1 client engine.
//!
//! - `protocol::http`: requests, responses, the async handler callbacks, the HTTP/1.1 wire codec and the client facade.
//! - `sender`: request lifecycle (connect or reuse, write, read, retry, redirect, auth replay, proxy tunnels).
//! - `future`: the per-request state machine and completion handle.
//! - `body` / `multipart`: streaming request bodies (memory, file, input stream, feedable, multipart/form-data).
//! - `pool`: idle connection pool and connection slot accounting.
//! - `auth`: Basic, Digest, NTLM and Negotiate authorization headers.

pub mod auth;
pub mod body;
pub mod config;
pub mod error;
pub mod filter;
pub mod future;
pub mod multipart;
pub mod net;
pub mod pool;
pub mod protocol;
pub mod sender;
pub mod timeout;
pub mod uri;

pub use auth::{AuthScheme, Realm};
pub use config::{ClientConfig, ProxyServer};
pub use error::{GetError, HttpError, Result, TimeoutKind};
pub use future::{ChannelState, ResponseFuture};
pub use protocol::http::{
    AsyncHandler, CompletionHandler, HandlerState, HttpClient, HttpResponseStatus, Request,
    RequestBody, RequestBuilder, Response, ResponseBodyPart,
};
