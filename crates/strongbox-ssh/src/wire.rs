//! SSH binary wire encoding (RFC 4251 §5).
//!
//! Only the three data types used by key blobs and the OpenSSH private-key
//! container are needed:
//!
//! - `uint32`: four bytes, big-endian.
//! - `string`: a `uint32` length followed by that many bytes.
//! - `mpint`: a `string` holding a two's-complement big-endian integer.
//!   Non-negative values whose first byte has the high bit set get a
//!   leading zero byte; zero is the empty string.
//!
//! [`WireReader`] never panics on truncated or oversized input: every read
//! is bounds-checked and failures surface as [`SshError::Import`].

use crate::error::{Result, SshError};

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Append-only buffer of wire-encoded fields.
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Raw bytes with no length prefix.
    pub fn put_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Length-prefixed byte string.
    pub fn put_string(&mut self, bytes: &[u8]) -> &mut Self {
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        self.put_u32(len);
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn put_str(&mut self, s: &str) -> &mut Self {
        self.put_string(s.as_bytes())
    }

    /// Non-negative integer from its unsigned big-endian magnitude.
    pub fn put_mpint(&mut self, magnitude: &[u8]) -> &mut Self {
        let first_nonzero = magnitude
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(magnitude.len());
        let trimmed = &magnitude[first_nonzero..];

        match trimmed.first() {
            Some(&high) if high & 0x80 != 0 => {
                let len = u32::try_from(trimmed.len() + 1).unwrap_or(u32::MAX);
                self.put_u32(len);
                self.buf.push(0);
                self.buf.extend_from_slice(trimmed);
            }
            _ => {
                self.put_string(trimmed);
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Cursor over wire-encoded fields.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Everything not yet consumed.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Exactly `len` raw bytes.
    pub fn read_raw(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(SshError::import(format!(
                "truncated {field}: need {len} bytes, {} left",
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_u32(&mut self, field: &str) -> Result<u32> {
        let bytes = self.read_raw(4, field)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_string(&mut self, field: &str) -> Result<&'a [u8]> {
        let len = self.read_u32(field)? as usize;
        self.read_raw(len, field)
    }

    /// A `string` that must be UTF-8.
    pub fn read_str(&mut self, field: &str) -> Result<&'a str> {
        let bytes = self.read_string(field)?;
        std::str::from_utf8(bytes)
            .map_err(|_| SshError::import(format!("{field} is not valid utf-8")))
    }

    /// A non-negative `mpint`, returned as its unsigned big-endian
    /// magnitude without the sign-padding byte.
    pub fn read_mpint(&mut self, field: &str) -> Result<&'a [u8]> {
        let bytes = self.read_string(field)?;
        match bytes.first() {
            Some(&high) if high & 0x80 != 0 => {
                Err(SshError::import(format!("{field} is a negative mpint")))
            }
            Some(0) => Ok(&bytes[1..]),
            _ => Ok(bytes),
        }
    }

    /// Fail unless the whole buffer was consumed.
    pub fn finish(&self, what: &str) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(SshError::import(format!(
                "{} trailing bytes after {what}",
                self.remaining()
            )))
        }
    }
}
