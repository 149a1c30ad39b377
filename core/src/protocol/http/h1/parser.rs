/*
 * parser.rs
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

//! HTTP/1.1 response push parser: status line, headers, body (Content-Length, chunked or until close).

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, Method, Version};
use std::io;

/// Callback for HTTP/1.1 response events. The exchange collects these into status, headers and body parts.
pub trait H1ResponseHandler {
    fn status(&mut self, version: Version, code: u16, reason: &str);
    fn header(&mut self, name: &str, value: &str);
    fn body_chunk(&mut self, data: Bytes);
    fn trailer(&mut self, _name: &str, _value: &str) {}
    fn complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Idle,
    StatusLine,
    Headers,
    /// Headers done; the caller must call set_body_mode() before feeding more bytes.
    HeadersComplete,
    Body,
    ChunkSize,
    ChunkData,
    ChunkDataEnd,
    ChunkTrailer,
}

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    None,
    Length(u64),
    Chunked,
    UntilClose,
}

impl BodyMode {
    /// Body framing for a response to `method` (RFC 9112 section 6.3).
    pub fn for_response(method: &Method, code: u16, headers: &HeaderMap) -> io::Result<BodyMode> {
        if *method == Method::HEAD || (100..200).contains(&code) || code == 204 || code == 304 {
            return Ok(BodyMode::None);
        }
        if *method == Method::CONNECT && (200..300).contains(&code) {
            return Ok(BodyMode::None);
        }
        let chunked = headers
            .get_all(http::header::TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        if chunked {
            return Ok(BodyMode::Chunked);
        }
        match headers.get(http::header::CONTENT_LENGTH) {
            Some(v) => v
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(BodyMode::Length)
                .ok_or_else(|| invalid("invalid Content-Length")),
            None => Ok(BodyMode::UntilClose),
        }
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Push parser for HTTP/1.1 response. Feed bytes via `receive`; handler is invoked as complete tokens are parsed.
#[derive(Debug)]
pub struct ResponseParser {
    state: ParseState,
    mode: BodyMode,
    bytes_received: u64,
    chunk_remaining: u64,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::StatusLine,
            mode: BodyMode::None,
            bytes_received: 0,
            chunk_remaining: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn body_mode(&self) -> BodyMode {
        self.mode
    }

    /// True once the whole message (head and body) has been parsed.
    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Idle
    }

    /// Ready for the next response head (after an interim 1xx or on a reused connection).
    pub fn reset(&mut self) {
        self.state = ParseState::StatusLine;
        self.mode = BodyMode::None;
        self.bytes_received = 0;
        self.chunk_remaining = 0;
    }

    fn find_crlf(buf: &[u8]) -> Option<usize> {
        buf.windows(2).position(|w| w == b"\r\n")
    }

    /// Split off one CRLF-terminated line, returned without the CRLF.
    fn take_line(buf: &mut BytesMut) -> Option<BytesMut> {
        let end = Self::find_crlf(buf)?;
        let mut line = buf.split_to(end + 2);
        line.truncate(end);
        Some(line)
    }

    fn parse_status_line<H: H1ResponseHandler>(line: &[u8], handler: &mut H) -> io::Result<()> {
        let line = std::str::from_utf8(line).map_err(|_| invalid("invalid status line UTF-8"))?;
        // HTTP/1.1 200 OK or HTTP/1.1 200
        let mut parts = line.splitn(3, ' ');
        let version = match parts.next() {
            Some("HTTP/1.1") => Version::HTTP_11,
            Some("HTTP/1.0") => Version::HTTP_10,
            _ => return Err(invalid("invalid status line")),
        };
        let code = parts
            .next()
            .filter(|s| s.len() == 3)
            .and_then(|s| s.parse::<u16>().ok())
            .filter(|c| (100..600).contains(c))
            .ok_or_else(|| invalid("invalid status code"))?;
        let reason = parts.next().unwrap_or("").trim();
        handler.status(version, code, reason);
        Ok(())
    }

    fn parse_field(line: &[u8]) -> io::Result<Option<(&str, &str)>> {
        let line = std::str::from_utf8(line).map_err(|_| invalid("invalid header UTF-8"))?;
        Ok(line
            .split_once(':')
            .map(|(name, value)| (name.trim(), value.trim())))
    }

    /// Consume and parse as much as possible from buf. Handler is called for each complete token.
    /// Partial data remains in buf.
    pub fn receive<H: H1ResponseHandler>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> Result<(), io::Error> {
        while !buf.is_empty() {
            match self.state {
                ParseState::StatusLine => {
                    // Tolerate stray CRLFs between messages
                    if buf.starts_with(b"\r\n") {
                        buf.advance(2);
                        continue;
                    }
                    let line = match Self::take_line(buf) {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    Self::parse_status_line(&line, handler)?;
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let line = match Self::take_line(buf) {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    if line.is_empty() {
                        self.state = ParseState::HeadersComplete;
                        return Ok(());
                    }
                    if let Some((name, value)) = Self::parse_field(&line)? {
                        handler.header(name, value);
                    }
                }
                ParseState::HeadersComplete => return Ok(()),
                ParseState::Body => match self.mode {
                    BodyMode::Length(length) => {
                        let remaining = (length - self.bytes_received) as usize;
                        let to_read = remaining.min(buf.len());
                        if to_read > 0 {
                            handler.body_chunk(buf.split_to(to_read).freeze());
                            self.bytes_received += to_read as u64;
                        }
                        if self.bytes_received >= length {
                            self.finish(handler);
                        }
                    }
                    _ => {
                        // Read until close: deliver all available
                        handler.body_chunk(buf.split().freeze());
                        return Ok(());
                    }
                },
                ParseState::ChunkSize => {
                    let line = match Self::take_line(buf) {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    let line = std::str::from_utf8(&line).map_err(|_| invalid("invalid chunk size"))?;
                    let hex = line.split(';').next().unwrap_or(line).trim();
                    self.chunk_remaining =
                        u64::from_str_radix(hex, 16).map_err(|_| invalid("invalid chunk size"))?;
                    self.state = if self.chunk_remaining == 0 {
                        ParseState::ChunkTrailer
                    } else {
                        ParseState::ChunkData
                    };
                }
                ParseState::ChunkData => {
                    let to_read = (self.chunk_remaining.min(buf.len() as u64)) as usize;
                    if to_read > 0 {
                        handler.body_chunk(buf.split_to(to_read).freeze());
                        self.chunk_remaining -= to_read as u64;
                    }
                    if self.chunk_remaining > 0 {
                        return Ok(());
                    }
                    self.state = ParseState::ChunkDataEnd;
                }
                ParseState::ChunkDataEnd => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(invalid("missing CRLF after chunk data"));
                    }
                    buf.advance(2);
                    self.state = ParseState::ChunkSize;
                }
                ParseState::ChunkTrailer => {
                    let line = match Self::take_line(buf) {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    if line.is_empty() {
                        self.finish(handler);
                    } else if let Some((name, value)) = Self::parse_field(&line)? {
                        handler.trailer(name, value);
                    }
                }
                ParseState::Idle => return Ok(()),
            }
        }
        Ok(())
    }

    fn finish<H: H1ResponseHandler>(&mut self, handler: &mut H) {
        handler.complete();
        self.state = ParseState::Idle;
    }

    /// Called after the head is parsed (state HeadersComplete). A body-less message completes at once.
    pub fn set_body_mode<H: H1ResponseHandler>(&mut self, mode: BodyMode, handler: &mut H) {
        if self.state != ParseState::HeadersComplete {
            return;
        }
        self.mode = mode;
        self.bytes_received = 0;
        match mode {
            BodyMode::None | BodyMode::Length(0) => self.finish(handler),
            BodyMode::Length(_) | BodyMode::UntilClose => self.state = ParseState::Body,
            BodyMode::Chunked => self.state = ParseState::ChunkSize,
        }
    }

    /// The peer closed the connection. Completes a read-until-close body; anything else is truncated.
    pub fn eof<H: H1ResponseHandler>(&mut self, handler: &mut H) -> io::Result<()> {
        match (self.state, self.mode) {
            (ParseState::Idle, _) => Ok(()),
            (ParseState::Body, BodyMode::UntilClose) => {
                self.finish(handler);
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response was complete",
            )),
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect {
        status: Option<(Version, u16, String)>,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        trailers: usize,
        complete: bool,
    }

    impl H1ResponseHandler for Collect {
        fn status(&mut self, version: Version, code: u16, reason: &str) {
            self.status = Some((version, code, reason.to_string()));
        }
        fn header(&mut self, name: &str, value: &str) {
            self.headers.push((name.to_string(), value.to_string()));
        }
        fn body_chunk(&mut self, data: Bytes) {
            self.body.extend_from_slice(&data);
        }
        fn trailer(&mut self, _name: &str, _value: &str) {
            self.trailers += 1;
        }
        fn complete(&mut self) {
            self.complete = true;
        }
    }

    /// Feed `input` one byte at a time, switching to `mode` once the head is parsed.
    fn parse_bytewise(input: &[u8], mode: BodyMode) -> Collect {
        let mut parser = ResponseParser::new();
        let mut handler = Collect::default();
        let mut buf = BytesMut::new();
        for b in input {
            buf.extend_from_slice(&[*b]);
            parser.receive(&mut buf, &mut handler).unwrap();
            if parser.state() == ParseState::HeadersComplete {
                parser.set_body_mode(mode, &mut handler);
                parser.receive(&mut buf, &mut handler).unwrap();
            }
        }
        handler
    }

    #[test]
    fn content_length_body() {
        let h = parse_bytewise(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-A: b\r\n\r\nhello",
            BodyMode::Length(5),
        );
        assert_eq!(h.status, Some((Version::HTTP_11, 200, "OK".to_string())));
        assert_eq!(h.headers.len(), 2);
        assert_eq!(h.body, b"hello");
        assert!(h.complete);
    }

    #[test]
    fn chunked_body_with_trailer() {
        let h = parse_bytewise(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-T: 1\r\n\r\n",
            BodyMode::Chunked,
        );
        assert_eq!(h.body, b"hello world");
        assert_eq!(h.trailers, 1);
        assert!(h.complete);
    }

    #[test]
    fn status_without_reason() {
        let h = parse_bytewise(b"HTTP/1.0 204\r\n\r\n", BodyMode::None);
        assert_eq!(h.status, Some((Version::HTTP_10, 204, String::new())));
        assert!(h.complete);
    }

    #[test]
    fn malformed_input_is_rejected() {
        let mut parser = ResponseParser::new();
        let mut handler = Collect::default();
        let mut buf = BytesMut::from(&b"SPDY/3 200 OK\r\n"[..]);
        assert!(parser.receive(&mut buf, &mut handler).is_err());

        let mut parser = ResponseParser::new();
        let mut buf = BytesMut::from(&b"HTTP/1.1 2000 OK\r\n"[..]);
        assert!(parser.receive(&mut buf, &mut handler).is_err());

        let mut parser = ResponseParser::new();
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\n\r\nzz\r\n"[..]);
        parser.receive(&mut buf, &mut handler).unwrap();
        parser.set_body_mode(BodyMode::Chunked, &mut handler);
        assert!(parser.receive(&mut buf, &mut handler).is_err());
    }

    #[test]
    fn until_close_completes_on_eof() {
        let mut parser = ResponseParser::new();
        let mut handler = Collect::default();
        let mut buf = BytesMut::from(&b"HTTP/1.0 200 OK\r\n\r\npartial"[..]);
        parser.receive(&mut buf, &mut handler).unwrap();
        parser.set_body_mode(BodyMode::UntilClose, &mut handler);
        parser.receive(&mut buf, &mut handler).unwrap();
        assert!(!handler.complete);
        parser.eof(&mut handler).unwrap();
        assert!(handler.complete);
        assert_eq!(handler.body, b"partial");
    }

    #[test]
    fn truncated_length_body_fails_on_eof() {
        let mut parser = ResponseParser::new();
        let mut handler = Collect::default();
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\n\r\nab"[..]);
        parser.receive(&mut buf, &mut handler).unwrap();
        parser.set_body_mode(BodyMode::Length(10), &mut handler);
        parser.receive(&mut buf, &mut handler).unwrap();
        assert_eq!(
            parser.eof(&mut handler).unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn body_modes() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            BodyMode::for_response(&Method::HEAD, 200, &headers).unwrap(),
            BodyMode::None
        );
        assert_eq!(
            BodyMode::for_response(&Method::GET, 304, &headers).unwrap(),
            BodyMode::None
        );
        assert_eq!(
            BodyMode::for_response(&Method::GET, 200, &headers).unwrap(),
            BodyMode::UntilClose
        );
        headers.insert("content-length", "12".parse().unwrap());
        assert_eq!(
            BodyMode::for_response(&Method::GET, 200, &headers).unwrap(),
            BodyMode::Length(12)
        );
        headers.insert("transfer-encoding", "gzip, chunked".parse().unwrap());
        assert_eq!(
            BodyMode::for_response(&Method::GET, 200, &headers).unwrap(),
            BodyMode::Chunked
        );
        headers.remove("transfer-encoding");
        headers.insert("content-length", "x".parse().unwrap());
        assert!(BodyMode::for_response(&Method::GET, 200, &headers).is_err());
    }
}
