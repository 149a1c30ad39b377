/*
 * encoder.rs
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

//! HTTP/1.1 request serialization: request head and chunked transfer coding.

use bytes::{BufMut, BytesMut};
use http::{HeaderMap, Method};

/// Terminates a chunk's data.
pub const CHUNK_END: &[u8] = b"\r\n";

/// Zero-length chunk with an empty trailer section.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Request line, header fields and the blank line that ends the head.
pub fn encode_request_head(method: &Method, target: &str, headers: &HeaderMap) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_slice(method.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(target.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");
    for (name, value) in headers {
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
    buf
}

/// Chunk size line for `len` bytes of data.
pub fn chunk_header(len: usize) -> Vec<u8> {
    format!("{:x}\r\n", len).into_bytes()
}

/// One complete chunk (size line, data, CRLF). Empty data yields nothing, never a last-chunk.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut out = chunk_header(data.len());
    out.extend_from_slice(data);
    out.extend_from_slice(CHUNK_END);
    out
}
