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

//! HTTP/1.1 client surface.
//!
//! - `Request` / `RequestBuilder`: immutable request values and their builder.
//! - `AsyncHandler`: status, headers and body parts pushed to the caller as they arrive.
//! - `h1`: push-parsed response codec and request head encoding. Buffers are `bytes` types
//!   (`BytesMut` for the read buffer, `Bytes` for body slices).
//! - `channel`: one transport plus its read buffer and per-connection auth state.
//! - `HttpClient`: the facade wiring config, pool, connector and request sender.

pub mod channel;
pub mod client;
pub mod h1;
pub mod handler;
pub mod request;
pub mod response;

pub use channel::{Channel, ChannelHandle};
pub use client::HttpClient;
pub use h1::H1ResponseHandler;
pub use handler::{
    AsyncHandler, BodyPartData, CompletionHandler, HandlerState, HttpResponseStatus, ResponseBodyPart,
};
pub use request::{Request, RequestBody, RequestBuilder};
pub use response::Response;
