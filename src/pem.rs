// Copyright 2020 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Minimal PEM encode/decode for the two labels this crate emits:
//! `CERTIFICATE` and `PRIVATE KEY`.
//!
//! `rustls`/`rcgen` both ship their own PEM helpers, but neither reproduces
//! the exact byte layout the spec pins down (64-column wrap, no trailing
//! newline after `-----END ...-----`), so this is hand-rolled rather than
//! borrowed.

const WRAP_COLUMN: usize = 64;

pub(crate) fn encode(label: &str, der: &[u8]) -> String {
    let body = base64_encode(der);
    let mut out = String::with_capacity(body.len() + body.len() / WRAP_COLUMN + 64);
    out.push_str("-----BEGIN ");
    out.push_str(label);
    out.push_str("-----\n");
    for chunk in body.as_bytes().chunks(WRAP_COLUMN) {
        out.push_str(std::str::from_utf8(chunk).expect("base64 alphabet is ASCII"));
        out.push('\n');
    }
    out.push_str("-----END ");
    out.push_str(label);
    out.push_str("-----");
    out
}

/// Decode the DER payload out of a PEM blob, ignoring the label.
pub(crate) fn decode(pem: &str) -> Result<Vec<u8>, DecodeError> {
    let mut body = String::new();
    let mut in_body = false;
    for line in pem.lines() {
        let line = line.trim();
        if line.starts_with("-----BEGIN") {
            in_body = true;
            continue;
        }
        if line.starts_with("-----END") {
            in_body = false;
            continue;
        }
        if in_body {
            body.push_str(line);
        }
    }
    if body.is_empty() {
        return Err(DecodeError::NoPemBlock);
    }
    base64_decode(&body).ok_or(DecodeError::BadBase64)
}

#[derive(Debug, err_derive::Error)]
pub(crate) enum DecodeError {
    #[error(display = "no PEM block found")]
    NoPemBlock,
    #[error(display = "malformed base64 body")]
    BadBase64,
}

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() + 2) / 3 * 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);
        let n = (b0 as u32) << 16 | (b1 as u32) << 8 | b2 as u32;
        out.push(ALPHABET[(n >> 18 & 0x3f) as usize] as char);
        out.push(ALPHABET[(n >> 12 & 0x3f) as usize] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(n >> 6 & 0x3f) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[(n & 0x3f) as usize] as char
        } else {
            '='
        });
    }
    out
}

fn base64_decode(body: &str) -> Option<Vec<u8>> {
    let bytes = body.as_bytes();
    if bytes.len() % 4 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(bytes.len() / 4 * 3);
    for chunk in bytes.chunks(4) {
        let mut vals = [0u32; 4];
        let mut pad = 0;
        for (i, &b) in chunk.iter().enumerate() {
            vals[i] = match b {
                b'=' => {
                    pad += 1;
                    0
                }
                _ => decode_char(b)? as u32,
            };
        }
        let n = vals[0] << 18 | vals[1] << 12 | vals[2] << 6 | vals[3];
        out.push((n >> 16 & 0xff) as u8);
        if pad < 2 {
            out.push((n >> 8 & 0xff) as u8);
        }
        if pad < 1 {
            out.push((n & 0xff) as u8);
        }
    }
    Some(out)
}

fn decode_char(b: u8) -> Option<u8> {
    ALPHABET.iter().position(|&c| c == b).map(|p| p as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let der = b"hello world, this is some der-shaped bytes".to_vec();
        let pem = encode("CERTIFICATE", &der);
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pem.ends_with("-----END CERTIFICATE-----"));
        assert!(!pem.ends_with('\n'));
        assert_eq!(decode(&pem).unwrap(), der);
    }

    #[test]
    fn wraps_at_64_columns() {
        let der = vec![0xAB; 200];
        let pem = encode("PRIVATE KEY", &der);
        for line in pem.lines() {
            if line.starts_with("-----") {
                continue;
            }
            assert!(line.len() <= 64);
        }
    }
}
