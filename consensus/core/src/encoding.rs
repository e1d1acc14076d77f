//! Canonical binary encoding.
//!
//! Every hashed, signed or persisted artifact is defined against this form:
//! big-endian integers, `f64` as its IEEE-754 bit pattern in big-endian,
//! byte strings prefixed by a `u64` big-endian length, struct fields in
//! declared order, enum variants prefixed by a `u8` tag.

use thiserror::Error;
use uuid::Uuid;

use doin_hashes::{Hash, HASH_SIZE};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    #[error("invalid variant tag {0}")]
    InvalidTag(u8),

    #[error("declared length {0} exceeds remaining input {1}")]
    LengthExceedsInput(u64, usize),

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("{0} trailing bytes after decoding")]
    TrailingBytes(usize),
}

pub type EncodeResult<T> = std::result::Result<T, EncodeError>;

pub trait CanonicalEncode {
    fn encode(&self, writer: &mut CanonicalWriter);

    fn canonical_bytes(&self) -> Vec<u8> {
        let mut writer = CanonicalWriter::new();
        self.encode(&mut writer);
        writer.finish()
    }
}

pub trait CanonicalDecode: Sized {
    fn decode(reader: &mut CanonicalReader<'_>) -> EncodeResult<Self>;

    /// Decodes a value from `bytes`, requiring the input to be fully consumed.
    fn from_canonical_bytes(bytes: &[u8]) -> EncodeResult<Self> {
        let mut reader = CanonicalReader::new(bytes);
        let value = Self::decode(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

#[derive(Default)]
pub struct CanonicalWriter {
    buf: Vec<u8>,
}

impl CanonicalWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_f64(&mut self, v: f64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
        self
    }

    pub fn write_bool(&mut self, v: bool) -> &mut Self {
        self.write_u8(v as u8)
    }

    pub fn write_len(&mut self, len: usize) -> &mut Self {
        self.write_u64(len as u64)
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.write_len(bytes.len()).write_raw(bytes)
    }

    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.write_var_bytes(s.as_bytes())
    }

    pub fn write_hash(&mut self, hash: Hash) -> &mut Self {
        self.write_raw(hash.as_bytes())
    }

    pub fn write_uuid(&mut self, id: Uuid) -> &mut Self {
        self.write_raw(id.as_bytes())
    }
}

pub struct CanonicalReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> CanonicalReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Errors unless the input was fully consumed.
    pub fn finish(&self) -> EncodeResult<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(EncodeError::TrailingBytes(n)),
        }
    }

    fn take(&mut self, n: usize) -> EncodeResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(EncodeError::UnexpectedEof(self.pos));
        }
        let seg = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(seg)
    }

    pub fn read_u8(&mut self) -> EncodeResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> EncodeResult<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> EncodeResult<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> EncodeResult<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_f64(&mut self) -> EncodeResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_bool(&mut self) -> EncodeResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_len(&mut self) -> EncodeResult<usize> {
        let len = self.read_u64()?;
        if len > self.remaining() as u64 {
            return Err(EncodeError::LengthExceedsInput(len, self.remaining()));
        }
        Ok(len as usize)
    }

    pub fn read_raw(&mut self, n: usize) -> EncodeResult<&'a [u8]> {
        self.take(n)
    }

    pub fn read_var_bytes(&mut self) -> EncodeResult<Vec<u8>> {
        let len = self.read_len()?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_str(&mut self) -> EncodeResult<String> {
        let bytes = self.read_var_bytes()?;
        String::from_utf8(bytes).map_err(|_| EncodeError::InvalidUtf8)
    }

    pub fn read_hash(&mut self) -> EncodeResult<Hash> {
        let bytes = self.take(HASH_SIZE)?;
        Ok(Hash::from_slice(bytes).expect("take returned exactly HASH_SIZE bytes"))
    }

    pub fn read_uuid(&mut self) -> EncodeResult<Uuid> {
        let bytes: [u8; 16] = self.take(16)?.try_into().unwrap();
        Ok(Uuid::from_bytes(bytes))
    }
}
