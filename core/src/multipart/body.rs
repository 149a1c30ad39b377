/*
 * body.rs
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

//! Streaming `multipart/form-data` body.
//!
//! A cursor walks every part through START (boundary and headers), MIDDLE (data) and END (the
//! trailing CRLF), then emits the closing boundary. At any moment at most one of the pending
//! in-memory bytes or the open file/stream is active; a file is opened only when its part reaches
//! MIDDLE and is dropped as soon as it is exhausted.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::part::{Part, PartSource, CRLF};
use crate::body::{run_blocking, Body, BodyState, RandomAccessBody};

const TRANSFER_BUFFER: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartLocation {
    Start,
    Middle,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Part(usize, PartLocation),
    MessageEnd,
    Done,
}

enum OpenContent {
    File { file: File, remaining: u64 },
    // a file part handed over to `transfer_to`
    AsyncFile { file: tokio::fs::File, remaining: u64 },
    Stream {
        reader: Box<dyn Read + Send>,
        remaining: Option<u64>,
    },
}

impl OpenContent {
    /// 0 means the content is exhausted.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            OpenContent::File { file, remaining } => {
                let want = (*remaining).min(buf.len() as u64) as usize;
                if want == 0 {
                    return Ok(0);
                }
                let n = file.read(&mut buf[..want])?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file part shorter than its declared length",
                    ));
                }
                *remaining -= n as u64;
                Ok(n)
            }
            OpenContent::AsyncFile { .. } => Err(io::Error::new(
                io::ErrorKind::Other,
                "file part is being transferred asynchronously",
            )),
            OpenContent::Stream { reader, remaining } => {
                let want = match remaining {
                    Some(r) => (*r).min(buf.len() as u64) as usize,
                    None => buf.len(),
                };
                if want == 0 {
                    return Ok(0);
                }
                let n = loop {
                    match reader.read(&mut buf[..want]) {
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        other => break other?,
                    }
                };
                match remaining {
                    Some(r) if n == 0 => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("stream part ended {} bytes early", r),
                        ))
                    }
                    Some(r) => *r -= n as u64,
                    None => {}
                }
                Ok(n)
            }
        }
    }
}

/// Random-access body over an ordered list of parts.
pub struct MultipartBody {
    parts: Vec<Part>,
    boundary: Bytes,
    content_type: String,
    content_length: i64,
    cursor: Cursor,
    pending: Bytes,
    open: Option<OpenContent>,
    transferred: u64,
}

impl MultipartBody {
    pub fn new(parts: Vec<Part>, boundary: impl Into<Bytes>, content_type: String) -> Self {
        let boundary = boundary.into();
        let content_length = compute_content_length(&parts, &boundary);
        let cursor = if parts.is_empty() {
            Cursor::MessageEnd
        } else {
            Cursor::Part(0, PartLocation::Start)
        };
        Self {
            parts,
            boundary,
            content_type,
            content_length,
            cursor,
            pending: Bytes::new(),
            open: None,
            transferred: 0,
        }
    }

    /// Content-Type header value, boundary included.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn boundary(&self) -> &[u8] {
        &self.boundary
    }

    /// Bytes emitted so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    fn message_end(&self) -> Bytes {
        let mut end = Vec::with_capacity(self.boundary.len() + 6);
        end.extend_from_slice(b"--");
        end.extend_from_slice(&self.boundary);
        end.extend_from_slice(b"--");
        end.extend_from_slice(CRLF);
        Bytes::from(end)
    }

    /// Move the cursor one step; only called with nothing pending and nothing open.
    fn advance(&mut self) -> io::Result<()> {
        match self.cursor {
            Cursor::Part(i, PartLocation::Start) => {
                self.pending = Bytes::from(self.parts[i].pre_content(&self.boundary));
                self.cursor = Cursor::Part(i, PartLocation::Middle);
            }
            Cursor::Part(i, PartLocation::Middle) => {
                self.cursor = Cursor::Part(i, PartLocation::End);
                self.open_content(i)?;
            }
            Cursor::Part(i, PartLocation::End) => {
                self.pending = Bytes::from_static(self.parts[i].post_content());
                self.cursor = if i + 1 < self.parts.len() {
                    Cursor::Part(i + 1, PartLocation::Start)
                } else {
                    Cursor::MessageEnd
                };
            }
            Cursor::MessageEnd => {
                self.pending = self.message_end();
                self.cursor = Cursor::Done;
            }
            Cursor::Done => {}
        }
        Ok(())
    }

    fn open_content(&mut self, index: usize) -> io::Result<()> {
        let part = &self.parts[index];
        if let Some(data) = part.memory_data() {
            self.pending = data;
            return Ok(());
        }
        match part.source() {
            PartSource::File { path, length } => {
                // zero-length files are never opened
                if *length == 0 {
                    return Ok(());
                }
                let mut file = File::open(path)?;
                file.seek(SeekFrom::Start(0))?;
                self.open = Some(OpenContent::File {
                    file,
                    remaining: *length,
                });
            }
            PartSource::InputStreamSupplier { supplier, length } => {
                if *length == 0 {
                    return Ok(());
                }
                let reader = (supplier.as_ref())()?;
                self.open = Some(OpenContent::Stream {
                    reader,
                    remaining: u64::try_from(*length).ok(),
                });
            }
            PartSource::Text(_) | PartSource::ByteArray(_) => {}
        }
        Ok(())
    }

    /// Copy as many bytes as fit into `buf`; 0 only at the end of the body.
    ///
    /// With `stop_at_file`, returns early once a file part is open so the caller can read it
    /// asynchronously; a 0 return then means the end only if nothing is open.
    fn fill(&mut self, buf: &mut [u8], stop_at_file: bool) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len() - written);
                buf[written..written + n].copy_from_slice(&self.pending[..n]);
                self.pending.advance(n);
                written += n;
                continue;
            }
            if let Some(open) = self.open.as_mut() {
                if stop_at_file && open.is_file() {
                    break;
                }
                let n = open.read(&mut buf[written..])?;
                if n == 0 {
                    self.open = None;
                } else {
                    written += n;
                }
                continue;
            }
            if self.cursor == Cursor::Done {
                break;
            }
            self.advance()?;
        }
        self.transferred += written as u64;
        Ok(written)
    }

    /// Read the open file part through tokio; 0 once it is exhausted (and closed).
    async fn read_file_part(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(OpenContent::File { file, remaining }) = self.open.take() {
            self.open = Some(OpenContent::AsyncFile {
                file: tokio::fs::File::from_std(file),
                remaining,
            });
        }
        let (file, remaining) = match self.open.as_mut() {
            Some(OpenContent::AsyncFile { file, remaining }) => (file, remaining),
            _ => return Ok(0),
        };
        let want = (*remaining).min(buf.len() as u64) as usize;
        if want == 0 {
            self.open = None;
            return Ok(0);
        }
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file part shorter than its declared length",
            ));
        }
        *remaining -= n as u64;
        self.transferred += n as u64;
        Ok(n)
    }
}

impl OpenContent {
    fn is_file(&self) -> bool {
        matches!(self, OpenContent::File { .. } | OpenContent::AsyncFile { .. })
    }
}

/// Sum of every part's length plus the closing boundary, or -1 if any part length is unknown.
pub(crate) fn compute_content_length(parts: &[Part], boundary: &[u8]) -> i64 {
    let mut total = 0i64;
    for part in parts {
        let len = part.length(boundary);
        if len < 0 {
            return -1;
        }
        total += len;
    }
    total + boundary.len() as i64 + 6
}

impl Body for MultipartBody {
    fn content_length(&self) -> i64 {
        self.content_length
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<BodyState> {
        if buf.is_empty() {
            return Ok(BodyState::Continue(0));
        }
        match self.fill(buf, false)? {
            0 => Ok(BodyState::Stop),
            n => Ok(BodyState::Continue(n)),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = None;
        self.pending = Bytes::new();
        self.cursor = Cursor::Done;
        Ok(())
    }

    fn is_blocking(&self) -> bool {
        self.parts.iter().any(|part| {
            matches!(
                part.source(),
                PartSource::File { .. } | PartSource::InputStreamSupplier { .. }
            )
        })
    }

    fn as_random_access(&mut self) -> Option<&mut dyn RandomAccessBody> {
        Some(self)
    }
}

#[async_trait]
impl RandomAccessBody for MultipartBody {
    /// Sequential: `position` must equal the bytes already emitted.
    async fn transfer_to(
        &mut self,
        position: u64,
        count: u64,
        target: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> io::Result<u64> {
        if position != self.transferred {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "multipart transfer must resume at {} (asked for {})",
                    self.transferred, position
                ),
            ));
        }
        let mut buf = vec![0u8; (count.min(TRANSFER_BUFFER as u64) as usize).max(1)];
        let mut total = 0u64;
        while total < count {
            let want = ((count - total) as usize).min(buf.len());
            let n = if self.open.as_ref().map_or(false, OpenContent::is_file) {
                self.read_file_part(&mut buf[..want]).await?
            } else {
                // stream parts are plain `Read`s and opening a file touches the filesystem
                run_blocking(|| self.fill(&mut buf[..want], true))?
            };
            if n == 0 {
                if self.open.is_some() || self.cursor != Cursor::Done || !self.pending.is_empty() {
                    continue;
                }
                break;
            }
            target.write_all(&buf[..n]).await?;
            total += n as u64;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::read_to_end;
    use crate::multipart::part::StreamSupplier;
    use std::io::Write;
    use std::sync::Arc;

    fn temp_file(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    fn supplier(data: &'static [u8]) -> StreamSupplier {
        Arc::new(move || Ok::<Box<dyn Read + Send>, io::Error>(Box::new(io::Cursor::new(data))))
    }

    fn parts(file: &tempfile::NamedTempFile) -> Vec<Part> {
        vec![
            Part::string("greeting", "hello"),
            Part::file("upload", file.path()).unwrap(),
            Part::bytes("raw", vec![0u8, 1, 2, 3, 4]),
            Part::input_stream(
                "stream",
                6,
                supplier(b"stream"),
            ),
        ]
    }

    #[test]
    fn drains_to_declared_length_for_any_buffer_size() {
        let file = temp_file(b"file contents here");
        let reference = {
            let mut body = MultipartBody::new(parts(&file), "BOUNDARY", String::new());
            read_to_end(&mut body, 4096).unwrap()
        };
        for size in 1..64 {
            let mut body = MultipartBody::new(parts(&file), "BOUNDARY", String::new());
            let out = read_to_end(&mut body, size).unwrap();
            assert_eq!(out.len() as i64, body.content_length(), "buffer size {}", size);
            assert_eq!(out, reference);
        }
        let text = String::from_utf8_lossy(&reference);
        assert!(text.starts_with("--BOUNDARY\r\nContent-Disposition: form-data; name=\"greeting\""));
        assert!(text.contains("\r\n\r\nfile contents here\r\n--BOUNDARY\r\n"));
        assert!(text.ends_with("stream\r\n--BOUNDARY--\r\n"));
    }

    #[tokio::test]
    async fn transfers_to_declared_length_for_any_count() {
        let file = temp_file(b"0123456789abcdef");
        for count in [1u64, 2, 7, 64, 4096] {
            let mut body = MultipartBody::new(parts(&file), "B", String::new());
            let mut out = Vec::new();
            let mut position = 0;
            loop {
                let n = body.transfer_to(position, count, &mut out).await.unwrap();
                if n == 0 {
                    break;
                }
                position += n;
            }
            assert_eq!(out.len() as i64, body.content_length());
        }
    }

    #[tokio::test]
    async fn transfer_rejects_out_of_order_position() {
        let mut body = MultipartBody::new(vec![Part::string("k", "v")], "B", String::new());
        let mut out = Vec::new();
        assert!(body.transfer_to(5, 10, &mut out).await.is_err());
    }

    #[test]
    fn empty_file_part_emits_framing_only() {
        let empty = temp_file(b"");
        let parts = vec![Part::string("k", "v"), Part::file("f", empty.path()).unwrap()];
        let expected = parts[0].length(b"XYZ") + parts[1].length(b"XYZ") + "--XYZ--\r\n".len() as i64;
        let mut body = MultipartBody::new(parts.clone(), "XYZ", String::new());
        assert_eq!(body.content_length(), expected);
        let out = read_to_end(&mut body, 1).unwrap();
        assert_eq!(out.len() as i64, expected);
        let mut framing = parts[1].pre_content(b"XYZ");
        framing.extend_from_slice(b"\r\n--XYZ--\r\n");
        assert!(out.ends_with(&framing));
    }

    #[test]
    fn unknown_length_part_makes_body_unknown() {
        let parts = vec![Part::input_stream(
            "s",
            -1,
            supplier(b"abc"),
        )];
        let mut body = MultipartBody::new(parts, "B", String::new());
        assert_eq!(body.content_length(), -1);
        let out = read_to_end(&mut body, 2).unwrap();
        assert!(String::from_utf8_lossy(&out).contains("\r\n\r\nabc\r\n--B--\r\n"));
    }

    #[test]
    fn close_is_idempotent_and_stops() {
        let file = temp_file(b"data");
        let mut body = MultipartBody::new(parts(&file), "B", String::new());
        let mut buf = [0u8; 10];
        assert!(matches!(body.read(&mut buf).unwrap(), BodyState::Continue(10)));
        body.close().unwrap();
        body.close().unwrap();
        assert_eq!(body.read(&mut buf).unwrap(), BodyState::Stop);
    }

    #[tokio::test]
    async fn transfer_reads_file_parts_asynchronously() {
        let file = temp_file(b"file bytes");
        let mut reference = MultipartBody::new(parts(&file), "B", String::new());
        let expected = read_to_end(&mut reference, 7).unwrap();
        let mut body = MultipartBody::new(parts(&file), "B", String::new());
        assert!(body.is_blocking());
        let mut out = Vec::new();
        let mut position = 0;
        loop {
            let n = body.transfer_to(position, 5, &mut out).await.unwrap();
            if n == 0 {
                break;
            }
            position += n;
        }
        assert_eq!(out, expected);
        let in_memory = MultipartBody::new(vec![Part::string("k", "v")], "B", String::new());
        assert!(!in_memory.is_blocking());
    }

    #[test]
    fn short_stream_is_an_error() {
        let parts = vec![Part::input_stream(
            "s",
            10,
            supplier(b"abc"),
        )];
        let mut body = MultipartBody::new(parts, "B", String::new());
        assert!(read_to_end(&mut body, 64).is_err());
    }
}
