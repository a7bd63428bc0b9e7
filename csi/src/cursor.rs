//! Bounds-checked reading of packed binary layouts.
//!
//! Every read checks the remaining length first and fails with
//! [`Error::NotEnoughBytes`] instead of reading past the buffer.

/// Error returned when a read would run past the end of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("not enough bytes: needed {needed} at offset {offset}, {remaining} left")]
pub struct Error {
    pub offset: usize,
    pub needed: usize,
    pub remaining: usize,
}

/// A forward-only reader over a byte slice.
///
/// ```
/// # use csi::cursor::Cursor;
/// let mut c = Cursor::new(&[0x34, 0x12, 0xff]);
/// assert_eq!(c.u16_le().unwrap(), 0x1234);
/// assert_eq!(c.u8().unwrap(), 0xff);
/// assert!(c.u8().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! read_int {
    ($name:ident, $ty:ty, $conv:ident) => {
        pub fn $name(&mut self) -> Result<$ty, Error> {
            self.array().map(<$ty>::$conv)
        }
    };
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Takes the next `n` bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < n {
            return Err(Error {
                offset: self.pos,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), Error> {
        self.bytes(n).map(|_| ())
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut out = [0; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, Error> {
        self.array::<1>().map(|[b]| b)
    }

    read_int!(u16_le, u16, from_le_bytes);
    read_int!(u32_le, u32, from_le_bytes);
    read_int!(u64_le, u64, from_le_bytes);
    read_int!(i16_le, i16, from_le_bytes);

    // netlink attributes are in host byte order
    read_int!(u16_ne, u16, from_ne_bytes);
    read_int!(u32_ne, u32, from_ne_bytes);
    read_int!(u64_ne, u64, from_ne_bytes);

    /// Returns everything that has not been read yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::Cursor;

    #[test]
    fn short_read_does_not_advance() {
        let mut c = Cursor::new(&[1, 2, 3]);
        let err = c.u32_le().unwrap_err();
        assert_eq!(err.needed, 4);
        assert_eq!(err.remaining, 3);
        assert_eq!(c.position(), 0);
        assert_eq!(c.u16_le().unwrap(), 0x0201);
        assert_eq!(c.rest(), &[3]);
        assert!(c.is_empty());
    }

    #[test]
    fn signed_little_endian() {
        let mut c = Cursor::new(&[0xfe, 0xff, 0x02, 0x00]);
        assert_eq!(c.i16_le().unwrap(), -2);
        assert_eq!(c.i16_le().unwrap(), 2);
    }
}
