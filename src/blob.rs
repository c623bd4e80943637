//! Length-prefixed binary serialization used for all wire messages.
//!
//! Primitive contracts:
//! - fixed-width integers are little-endian in their natural width
//! - booleans are a single byte, strictly 0 or 1
//! - strings are a `u32` length followed by that many raw bytes
//! - sequences are a `u64` count followed by the encoded elements
//! - optional values are a `bool` followed by the element iff present
//!
//! Every read returns a `Result`, so a short or malformed buffer rejects the
//! enclosing request before any state change happens.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlobError {
    #[error("unexpected end of data")]
    UnexpectedEnd,

    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("unexpected trailing bytes")]
    TrailingData,
}

/// Append-only buffer of encoded values.
#[derive(Debug, Default)]
pub struct BlobWriter {
    buf: Vec<u8>,
}

impl BlobWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn put_str(&mut self, value: &str) {
        self.put_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn put_str_seq(&mut self, values: &[String]) {
        self.put_u64(values.len() as u64);
        for value in values {
            self.put_str(value);
        }
    }
}

/// Cursor over an encoded buffer. Reads consume from the front.
#[derive(Debug)]
pub struct BlobReader<'a> {
    data: &'a [u8],
}

impl<'a> BlobReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn has_more(&self) -> bool {
        !self.data.is_empty()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], BlobError> {
        if self.data.len() < len {
            return Err(BlobError::UnexpectedEnd);
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    pub fn read_u8(&mut self) -> Result<u8, BlobError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, BlobError> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_u64(&mut self) -> Result<u64, BlobError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn read_i64(&mut self) -> Result<i64, BlobError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn read_bool(&mut self) -> Result<bool, BlobError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(BlobError::InvalidBool(other)),
        }
    }

    pub fn read_string(&mut self) -> Result<String, BlobError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| BlobError::InvalidUtf8)
    }

    pub fn read_str_seq(&mut self) -> Result<Vec<String>, BlobError> {
        let count = self.read_u64()?;
        let mut values = Vec::new();
        for _ in 0..count {
            values.push(self.read_string()?);
        }
        Ok(values)
    }
}
