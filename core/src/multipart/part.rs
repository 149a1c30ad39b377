/*
 * part.rs
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

//! Multipart parts and their framing bytes.

use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::body::file::validate_file;

pub(crate) const CRLF: &[u8] = b"\r\n";

/// Opens a fresh input stream for an `InputStreamSupplier` part.
pub type StreamSupplier = Arc<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

/// Where a part's data comes from.
#[derive(Clone)]
pub enum PartSource {
    Text(String),
    ByteArray(Bytes),
    File { path: PathBuf, length: u64 },
    InputStreamSupplier { supplier: StreamSupplier, length: i64 },
}

impl fmt::Debug for PartSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartSource::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            PartSource::ByteArray(b) => f.debug_tuple("ByteArray").field(&b.len()).finish(),
            PartSource::File { path, length } => f
                .debug_struct("File")
                .field("path", path)
                .field("length", length)
                .finish(),
            PartSource::InputStreamSupplier { length, .. } => f
                .debug_struct("InputStreamSupplier")
                .field("length", length)
                .finish(),
        }
    }
}

/// One part of a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct Part {
    name: String,
    source: PartSource,
    content_type: Option<String>,
    charset: Option<String>,
    transfer_encoding: Option<String>,
    content_id: Option<String>,
    disposition_type: Option<String>,
    file_name: Option<String>,
    custom_headers: Vec<(String, String)>,
}

impl Part {
    fn with_source(name: impl Into<String>, source: PartSource) -> Self {
        Self {
            name: name.into(),
            source,
            content_type: None,
            charset: None,
            transfer_encoding: None,
            content_id: None,
            disposition_type: None,
            file_name: None,
            custom_headers: Vec::new(),
        }
    }

    /// Text part: `text/plain; charset=UTF-8`, 8bit.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut part = Self::with_source(name, PartSource::Text(value.into()));
        part.content_type = Some("text/plain".into());
        part.charset = Some("UTF-8".into());
        part.transfer_encoding = Some("8bit".into());
        part
    }

    /// Binary part: `application/octet-stream`, binary.
    pub fn bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let mut part = Self::with_source(name, PartSource::ByteArray(data.into()));
        part.content_type = Some("application/octet-stream".into());
        part.transfer_encoding = Some("binary".into());
        part
    }

    /// File part. Fails with `InvalidInput` if the file is missing, not regular or unreadable.
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let length = validate_file(&path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        let mut part = Self::with_source(name, PartSource::File { path, length });
        part.content_type = Some("application/octet-stream".into());
        part.transfer_encoding = Some("binary".into());
        part.file_name = file_name;
        Ok(part)
    }

    /// Part whose data is read from a stream opened on demand; `length` < 0 if unknown.
    pub fn input_stream(name: impl Into<String>, length: i64, supplier: StreamSupplier) -> Self {
        let mut part =
            Self::with_source(name, PartSource::InputStreamSupplier { supplier, length });
        part.content_type = Some("application/octet-stream".into());
        part.transfer_encoding = Some("binary".into());
        part
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn charset(mut self, charset: Option<String>) -> Self {
        self.charset = charset;
        self
    }

    pub fn transfer_encoding(mut self, encoding: Option<String>) -> Self {
        self.transfer_encoding = encoding;
        self
    }

    pub fn content_id(mut self, id: impl Into<String>) -> Self {
        self.content_id = Some(id.into());
        self
    }

    /// Disposition type, `form-data` by default.
    pub fn disposition_type(mut self, disposition: impl Into<String>) -> Self {
        self.disposition_type = Some(disposition.into());
        self
    }

    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &PartSource {
        &self.source
    }

    pub fn file_path(&self) -> Option<&Path> {
        match &self.source {
            PartSource::File { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Data length, or -1 if unknown.
    pub fn data_length(&self) -> i64 {
        match &self.source {
            PartSource::Text(s) => s.len() as i64,
            PartSource::ByteArray(b) => b.len() as i64,
            PartSource::File { length, .. } => *length as i64,
            PartSource::InputStreamSupplier { length, .. } => {
                if *length < 0 {
                    -1
                } else {
                    *length
                }
            }
        }
    }

    /// Boundary line and part headers, up to and including the blank line.
    pub fn pre_content(&self, boundary: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(b"--");
        out.extend_from_slice(boundary);

        out.extend_from_slice(CRLF);
        out.extend_from_slice(b"Content-Disposition: ");
        out.extend_from_slice(
            self.disposition_type
                .as_deref()
                .unwrap_or("form-data")
                .as_bytes(),
        );
        out.extend_from_slice(b"; name=\"");
        out.extend_from_slice(self.name.as_bytes());
        out.push(b'"');
        if let Some(file_name) = &self.file_name {
            out.extend_from_slice(b"; filename=\"");
            out.extend_from_slice(file_name.as_bytes());
            out.push(b'"');
        }

        if let Some(content_type) = &self.content_type {
            out.extend_from_slice(CRLF);
            out.extend_from_slice(b"Content-Type: ");
            out.extend_from_slice(content_type.as_bytes());
            if let Some(charset) = &self.charset {
                out.extend_from_slice(b"; charset=");
                out.extend_from_slice(charset.as_bytes());
            }
        }
        if let Some(encoding) = &self.transfer_encoding {
            out.extend_from_slice(CRLF);
            out.extend_from_slice(b"Content-Transfer-Encoding: ");
            out.extend_from_slice(encoding.as_bytes());
        }
        if let Some(id) = &self.content_id {
            out.extend_from_slice(CRLF);
            out.extend_from_slice(b"Content-ID: ");
            out.extend_from_slice(id.as_bytes());
        }
        for (name, value) in &self.custom_headers {
            out.extend_from_slice(CRLF);
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
        }
        out.extend_from_slice(CRLF);
        out.extend_from_slice(CRLF);
        out
    }

    /// Bytes after the data.
    pub fn post_content(&self) -> &'static [u8] {
        CRLF
    }

    /// Framing plus data, or -1 if the data length is unknown.
    pub fn length(&self, boundary: &[u8]) -> i64 {
        let data = self.data_length();
        if data < 0 {
            return -1;
        }
        self.pre_content(boundary).len() as i64 + data + self.post_content().len() as i64
    }

    /// In-memory data, for text and byte-array parts.
    pub(crate) fn memory_data(&self) -> Option<Bytes> {
        match &self.source {
            PartSource::Text(s) => Some(Bytes::from(s.clone())),
            PartSource::ByteArray(b) => Some(b.clone()),
            _ => None,
        }
    }
}
