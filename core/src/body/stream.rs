/*
 * stream.rs
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

//! Bodies read from a `std::io::Read` source. Without a declared length they are sent chunked; with
//! one, exactly that many bytes are emitted and a stream that ends early is an error.

use std::io::{self, Read};
use std::sync::Mutex;

use super::{Body, BodyGenerator, BodyState};

/// Body that reads an input stream until it ends.
pub struct InputStreamBody {
    reader: Option<Box<dyn Read + Send>>,
    length: i64,
    remaining: Option<u64>,
}

impl InputStreamBody {
    pub fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader: Some(reader),
            length: -1,
            remaining: None,
        }
    }

    /// Stream whose length is known in advance (sent with Content-Length).
    pub fn with_length(reader: Box<dyn Read + Send>, length: u64) -> Self {
        Self {
            reader: Some(reader),
            length: length as i64,
            remaining: Some(length),
        }
    }
}

impl Body for InputStreamBody {
    fn content_length(&self) -> i64 {
        self.length
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<BodyState> {
        let reader = match self.reader.as_mut() {
            Some(r) => r,
            None => return Ok(BodyState::Stop),
        };
        if buf.is_empty() {
            return Ok(BodyState::Continue(0));
        }
        let want = match self.remaining {
            Some(0) => {
                self.reader = None;
                return Ok(BodyState::Stop);
            }
            Some(r) => r.min(buf.len() as u64) as usize,
            None => buf.len(),
        };
        let n = loop {
            match reader.read(&mut buf[..want]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other?,
            }
        };
        match self.remaining.as_mut() {
            Some(r) if n == 0 => {
                let missing = *r;
                self.reader = None;
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("input stream ended {} bytes short of its declared length", missing),
                ))
            }
            Some(r) => {
                *r -= n as u64;
                Ok(BodyState::Continue(n))
            }
            None if n == 0 => {
                self.reader = None;
                Ok(BodyState::Stop)
            }
            None => Ok(BodyState::Continue(n)),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.reader = None;
        Ok(())
    }

    fn is_blocking(&self) -> bool {
        true
    }
}

/// One-shot generator: the stream cannot be rewound, so only the first attempt gets it.
pub struct InputStreamBodyGenerator {
    reader: Mutex<Option<Box<dyn Read + Send>>>,
}

impl InputStreamBodyGenerator {
    pub fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader: Mutex::new(Some(reader)),
        }
    }
}

impl BodyGenerator for InputStreamBodyGenerator {
    fn create_body(&self) -> io::Result<Box<dyn Body>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "input stream lock poisoned"))?
            .take();
        match reader {
            Some(r) => Ok(Box::new(InputStreamBody::new(r))),
            None => {
                tracing::warn!("input stream body already consumed; it cannot be replayed");
                Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "input stream body already consumed",
                ))
            }
        }
    }
}
