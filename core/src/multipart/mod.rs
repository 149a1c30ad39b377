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

//! `multipart/form-data` request bodies (RFC 7578).

mod body;
mod part;

pub use body::MultipartBody;
pub use part::{Part, PartSource, StreamSupplier};

use rand::Rng;

const BOUNDARY_CHARS: &[u8] = b"-_1234567890abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Random boundary of 30 to 40 characters.
pub fn generate_boundary() -> String {
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(30..=40);
    (0..len)
        .map(|_| BOUNDARY_CHARS[rng.gen_range(0..BOUNDARY_CHARS.len())] as char)
        .collect()
}

/// Boundary parameter of a Content-Type value, if present.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Build the body for `parts`. An existing Content-Type carrying a boundary is kept as is; one
/// without gets a generated boundary appended; with none, `multipart/form-data` is used.
pub fn new_multipart_body(parts: Vec<Part>, content_type: Option<&str>) -> MultipartBody {
    let (boundary, content_type) = match content_type {
        Some(ct) => match boundary_from_content_type(ct) {
            Some(boundary) => (boundary, ct.to_string()),
            None => {
                let boundary = generate_boundary();
                let ct = format!("{}; boundary={}", ct.trim_end_matches(';').trim(), boundary);
                (boundary, ct)
            }
        },
        None => {
            let boundary = generate_boundary();
            let ct = format!("multipart/form-data; boundary={}", boundary);
            (boundary, ct)
        }
    };
    MultipartBody::new(parts, boundary, content_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{read_to_end, Body};

    #[test]
    fn boundaries_are_well_formed() {
        for _ in 0..50 {
            let b = generate_boundary();
            assert!((30..=40).contains(&b.len()));
            assert!(b.bytes().all(|c| BOUNDARY_CHARS.contains(&c)));
        }
    }

    #[test]
    fn default_content_type() {
        let body = new_multipart_body(vec![Part::string("a", "b")], None);
        let boundary = String::from_utf8(body.boundary().to_vec()).unwrap();
        assert_eq!(
            body.content_type(),
            format!("multipart/form-data; boundary={}", boundary)
        );
    }

    #[test]
    fn existing_boundary_is_reused() {
        let mut body = new_multipart_body(
            vec![Part::string("a", "b")],
            Some("multipart/related; boundary=\"abc123\""),
        );
        assert_eq!(body.boundary(), b"abc123");
        assert_eq!(body.content_type(), "multipart/related; boundary=\"abc123\"");
        let out = read_to_end(&mut body, 7).unwrap();
        assert!(out.starts_with(b"--abc123\r\n"));
        assert!(out.ends_with(b"--abc123--\r\n"));
    }

    #[test]
    fn boundary_appended_to_bare_content_type() {
        let body = new_multipart_body(vec![], Some("multipart/mixed"));
        assert!(body.content_type().starts_with("multipart/mixed; boundary="));
        assert_eq!(body.content_length(), body.boundary().len() as i64 + 6);
    }
}
