/*
 * memory.rs
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

//! In-memory bodies.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{Body, BodyGenerator, BodyState, RandomAccessBody};

/// Body over a shared byte buffer.
pub struct BytesBody {
    data: Bytes,
    position: usize,
}

impl BytesBody {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
        }
    }
}

impl Body for BytesBody {
    fn content_length(&self) -> i64 {
        self.data.len() as i64
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<BodyState> {
        let remaining = &self.data[self.position..];
        if remaining.is_empty() {
            return Ok(BodyState::Stop);
        }
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(BodyState::Continue(n))
    }

    fn close(&mut self) -> io::Result<()> {
        self.position = self.data.len();
        Ok(())
    }

    fn as_random_access(&mut self) -> Option<&mut dyn RandomAccessBody> {
        Some(self)
    }
}

#[async_trait]
impl RandomAccessBody for BytesBody {
    async fn transfer_to(
        &mut self,
        position: u64,
        count: u64,
        target: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> io::Result<u64> {
        let start = (position as usize).min(self.data.len());
        let end = start.saturating_add(count as usize).min(self.data.len());
        if start == end {
            return Ok(0);
        }
        target.write_all(&self.data[start..end]).await?;
        self.position = end;
        Ok((end - start) as u64)
    }
}

/// Generator handing out views of the same buffer.
#[derive(Debug, Clone)]
pub struct ByteArrayBodyGenerator {
    data: Bytes,
}

impl ByteArrayBodyGenerator {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl BodyGenerator for ByteArrayBodyGenerator {
    fn create_body(&self) -> io::Result<Box<dyn Body>> {
        Ok(Box::new(BytesBody::new(self.data.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::read_to_end;

    #[test]
    fn reads_in_small_pieces() {
        let mut body = BytesBody::new(&b"hello world"[..]);
        assert_eq!(body.content_length(), 11);
        assert_eq!(read_to_end(&mut body, 3).unwrap(), b"hello world");
        assert_eq!(body.read(&mut [0u8; 4]).unwrap(), BodyState::Stop);
    }

    #[tokio::test]
    async fn transfers_ranges() {
        let mut body = BytesBody::new(&b"0123456789"[..]);
        let mut out = Vec::new();
        let n = body.transfer_to(2, 5, &mut out).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(out, b"23456");
        assert_eq!(body.transfer_to(10, 5, &mut out).await.unwrap(), 0);
    }

    #[test]
    fn generator_replays() {
        let generator = ByteArrayBodyGenerator::new(&b"abc"[..]);
        for _ in 0..2 {
            let mut body = generator.create_body().unwrap();
            assert_eq!(read_to_end(body.as_mut(), 8).unwrap(), b"abc");
        }
    }
}
