/*
 * file.rs
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

//! File-backed bodies. The file is validated up front and opened lazily on first read.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite};

use super::{Body, BodyGenerator, BodyState, RandomAccessBody};

/// Check that `path` is an existing, readable regular file and return its length.
pub(crate) fn validate_file(path: &Path) -> io::Result<u64> {
    let meta = std::fs::metadata(path).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("file {} is not readable: {}", path.display(), e),
        )
    })?;
    if !meta.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ));
    }
    File::open(path).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("file {} is not readable: {}", path.display(), e),
        )
    })?;
    Ok(meta.len())
}

/// Body over a region of a file.
pub struct FileBody {
    path: PathBuf,
    start: u64,
    length: u64,
    read: u64,
    file: Option<File>,
    // async handle used by `transfer_to`, with the body offset it is positioned at
    transfer: Option<(tokio::fs::File, u64)>,
}

impl FileBody {
    /// Whole file.
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let length = validate_file(&path)?;
        Ok(Self {
            path,
            start: 0,
            length,
            read: 0,
            file: None,
            transfer: None,
        })
    }

    /// `length` bytes starting at `start`, clamped to the file size.
    pub fn region(path: impl Into<PathBuf>, start: u64, length: u64) -> io::Result<Self> {
        let path = path.into();
        let file_len = validate_file(&path)?;
        let start = start.min(file_len);
        Ok(Self {
            path,
            start,
            length: length.min(file_len - start),
            read: 0,
            file: None,
            transfer: None,
        })
    }

    fn open(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            let mut file = File::open(&self.path)?;
            file.seek(SeekFrom::Start(self.start + self.read))?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "file not open"))
    }
}

impl Body for FileBody {
    fn content_length(&self) -> i64 {
        self.length as i64
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<BodyState> {
        let remaining = self.length - self.read;
        if remaining == 0 {
            self.file = None;
            return Ok(BodyState::Stop);
        }
        let want = (remaining as usize).min(buf.len());
        let file = self.open()?;
        let n = file.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shorter than its declared length",
            ));
        }
        self.read += n as u64;
        Ok(BodyState::Continue(n))
    }

    fn close(&mut self) -> io::Result<()> {
        self.file = None;
        self.transfer = None;
        Ok(())
    }

    fn is_blocking(&self) -> bool {
        true
    }

    fn as_random_access(&mut self) -> Option<&mut dyn RandomAccessBody> {
        Some(self)
    }
}

#[async_trait]
impl RandomAccessBody for FileBody {
    async fn transfer_to(
        &mut self,
        position: u64,
        count: u64,
        target: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> io::Result<u64> {
        if position >= self.length {
            return Ok(0);
        }
        let count = count.min(self.length - position);
        let mut file = match self.transfer.take() {
            Some((file, at)) if at == position => file,
            Some((mut file, _)) => {
                file.seek(SeekFrom::Start(self.start + position)).await?;
                file
            }
            None => {
                let mut file = tokio::fs::File::open(&self.path).await?;
                file.seek(SeekFrom::Start(self.start + position)).await?;
                file
            }
        };
        let mut limited = (&mut file).take(count);
        let n = tokio::io::copy(&mut limited, target).await?;
        if n < count {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shorter than its declared length",
            ));
        }
        self.read = position + n;
        if self.read < self.length {
            self.transfer = Some((file, self.read));
        }
        Ok(n)
    }
}

/// Generator for file bodies; each attempt reopens the file.
#[derive(Debug, Clone)]
pub struct FileBodyGenerator {
    path: PathBuf,
    region: Option<(u64, u64)>,
}

impl FileBodyGenerator {
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        validate_file(&path)?;
        Ok(Self { path, region: None })
    }

    pub fn region(path: impl Into<PathBuf>, start: u64, length: u64) -> io::Result<Self> {
        let path = path.into();
        validate_file(&path)?;
        Ok(Self {
            path,
            region: Some((start, length)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BodyGenerator for FileBodyGenerator {
    fn create_body(&self) -> io::Result<Box<dyn Body>> {
        let body = match self.region {
            Some((start, length)) => FileBody::region(&self.path, start, length)?,
            None => FileBody::new(&self.path)?,
        };
        Ok(Box::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::read_to_end;
    use std::io::Write;

    fn temp_file(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn missing_file_is_invalid_input() {
        let err = FileBody::new("/definitely/not/here.bin").err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn directory_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileBody::new(dir.path()).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn reads_whole_file_and_region() {
        let f = temp_file(b"abcdefghij");
        let mut body = FileBody::new(f.path()).unwrap();
        assert_eq!(body.content_length(), 10);
        assert_eq!(read_to_end(&mut body, 1).unwrap(), b"abcdefghij");

        let mut region = FileBody::region(f.path(), 3, 4).unwrap();
        assert_eq!(region.content_length(), 4);
        assert_eq!(read_to_end(&mut region, 3).unwrap(), b"defg");
        region.close().unwrap();
        region.close().unwrap();
    }

    #[tokio::test]
    async fn transfer_region_to_writer() {
        let f = temp_file(b"abcdefghij");
        let mut body = FileBody::region(f.path(), 2, 6).unwrap();
        let mut out = Vec::new();
        let mut position = 0;
        loop {
            let n = body.transfer_to(position, 4, &mut out).await.unwrap();
            if n == 0 {
                break;
            }
            position += n;
        }
        assert_eq!(out, b"cdefgh");
        assert!(body.transfer.is_none());
    }

    #[tokio::test]
    async fn transfer_keeps_one_handle_between_calls() {
        let f = temp_file(b"abcdefghij");
        let mut body = FileBody::new(f.path()).unwrap();
        let mut out = Vec::new();
        assert_eq!(body.transfer_to(0, 4, &mut out).await.unwrap(), 4);
        assert!(matches!(body.transfer, Some((_, 4))));
        // a non-sequential position reuses the handle with a seek
        assert_eq!(body.transfer_to(2, 3, &mut out).await.unwrap(), 3);
        assert_eq!(out, b"abcdcde");
        body.close().unwrap();
        assert!(body.transfer.is_none());
    }
}
