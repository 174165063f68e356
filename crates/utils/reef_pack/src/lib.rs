//! Fixed binary packing of intra-cluster control messages.
//!
//! All multibyte integers are big-endian; strings are length-prefixed with
//! a `u16`. The packed size of any message is computable a priori
//! ([`Packable::packed_size`]) and writers reserve exactly that much.

// ----------------------------------------------------------------------------

pub const SIZEOF_I64: usize = 8;
pub const SIZEOF_U32: usize = 4;
pub const SIZEOF_U16: usize = 2;

/// Length prefix of a packed string.
pub const SIZEOF_LEN: usize = SIZEOF_U16;

/// Packed size of a string: length prefix plus the utf-8 bytes.
#[inline]
pub fn packed_str_len(s: &str) -> usize {
    SIZEOF_LEN + s.len()
}

// ----------------------------------------------------------------------------

/// On failure to decode a packed message.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PackError {
    #[error("unexpected end of buffer (offset {offset}, need {need}, have {have})")]
    Eof {
        offset: usize,
        need: usize,
        have: usize,
    },

    #[error("packed string at offset {0} is not valid utf-8")]
    Utf8(usize),
}

/// A message with an exactly known packed representation.
pub trait Packable {
    fn pack(&self, packer: &mut BytePack);

    /// Must equal the number of bytes [`Self::pack`] writes.
    fn packed_size(&self) -> usize;
}

/// Inverse of [`Packable`].
pub trait Unpackable: Sized {
    fn unpack(unpacker: &mut ByteUnpack<'_>) -> Result<Self, PackError>;
}

// ----------------------------------------------------------------------------

/// Append-only packer over a pre-sized byte buffer.
#[derive(Default)]
pub struct BytePack {
    buf: Vec<u8>,
}

impl BytePack {
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Reuse a scratch buffer (cleared first).
    #[inline]
    pub fn with_buf(mut buf: Vec<u8>) -> Self {
        buf.clear();
        Self { buf }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn write_byte(&mut self, b: u8) {
        self.buf.push(b);
    }

    #[inline]
    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    #[inline]
    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    #[inline]
    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// `u16` length prefix followed by the utf-8 bytes.
    ///
    /// Daemon ids and object names are far below the 64 KiB prefix limit;
    /// anything larger is a caller bug surfaced in debug builds.
    #[inline]
    pub fn write_str(&mut self, s: &str) {
        debug_assert!(s.len() <= u16::MAX as usize, "string too long: {}", s.len());
        self.write_u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
    }

    #[inline]
    pub fn write_any(&mut self, msg: &impl Packable) {
        msg.pack(self);
    }

    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// ----------------------------------------------------------------------------

/// Cursor over a packed byte slice.
pub struct ByteUnpack<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> ByteUnpack<'a> {
    #[inline]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    /// Offset of the next unread byte.
    #[inline]
    pub fn offset(&self) -> usize {
        self.off
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.off
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PackError> {
        if self.remaining() < n {
            return Err(PackError::Eof {
                offset: self.off,
                need: n,
                have: self.remaining(),
            });
        }
        let out = &self.buf[self.off..self.off + n];
        self.off += n;
        Ok(out)
    }

    #[inline]
    pub fn read_byte(&mut self) -> Result<u8, PackError> {
        Ok(self.take(1)?[0])
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, PackError> {
        let b = self.take(SIZEOF_U16)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, PackError> {
        let b = self.take(SIZEOF_U32)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    #[inline]
    pub fn read_i64(&mut self) -> Result<i64, PackError> {
        let b = self.take(SIZEOF_I64)?;
        Ok(i64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_str(&mut self) -> Result<String, PackError> {
        let len = self.read_u16()? as usize;
        let at = self.off;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(|s| s.to_owned())
            .map_err(|_| PackError::Utf8(at))
    }

    #[inline]
    pub fn read_any<T: Unpackable>(&mut self) -> Result<T, PackError> {
        T::unpack(self)
    }
}

// ----------------------------------------------------------------------------
