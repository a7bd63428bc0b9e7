//! Netlink attribute encoding and parsing.
//!
//! Attributes are a 4-byte header (length, then type, both in host byte
//! order) followed by the payload, padded to a multiple of four bytes.
//! Nested attributes carry further attributes as their payload.

use csi::cursor::Cursor;
use macaddr::MacAddr6;

use crate::{Error, Result};

const HEADER_LEN: usize = 4;
const NLA_F_NESTED: u16 = 1 << 15;
const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
const TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

/// Room for attributes in a single request: one page minus the netlink and
/// generic netlink headers.
pub const MAX_ATTRS_LEN: usize = 4096 - 16 - 4;

const fn align(len: usize) -> usize {
    (len + 3) & !3
}

/// Serializes attributes into a bounded buffer.
///
/// ```
/// # use iwlctl::attr::{AttrWriter, Attrs};
/// let mut w = AttrWriter::new();
/// w.put_u32(3, 7).unwrap();
/// w.nest(271, |w| w.put_flag(1)).unwrap();
///
/// let mut attrs = Attrs::new(w.as_bytes());
/// assert_eq!(attrs.next().unwrap().uint().unwrap(), 7);
/// assert!(attrs.next().unwrap().nested().get(1).is_some());
/// ```
#[derive(Debug, Clone)]
pub struct AttrWriter {
    buf: Vec<u8>,
    capacity: usize,
}

impl Default for AttrWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl AttrWriter {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ATTRS_LEN)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            capacity,
        }
    }

    fn reserve(&mut self, len: usize) -> Result<()> {
        if self.buf.len() + align(len) > self.capacity {
            return Err(Error::MessageOverflow(self.capacity));
        }
        Ok(())
    }

    fn header(&mut self, kind: u16, len: usize) {
        self.buf.extend_from_slice(&(len as u16).to_ne_bytes());
        self.buf.extend_from_slice(&kind.to_ne_bytes());
    }

    fn pad(&mut self) {
        self.buf.resize(align(self.buf.len()), 0);
    }

    /// Appends an attribute with a raw payload.
    pub fn put(&mut self, kind: u16, payload: &[u8]) -> Result<()> {
        self.put_raw(kind, false, payload)
    }

    pub(crate) fn put_raw(&mut self, kind: u16, nested: bool, payload: &[u8]) -> Result<()> {
        let len = HEADER_LEN + payload.len();
        if len > u16::MAX as usize {
            return Err(Error::MessageOverflow(u16::MAX as usize));
        }
        self.reserve(len)?;
        let flags = if nested { NLA_F_NESTED } else { 0 };
        self.header(kind | flags, len);
        self.buf.extend_from_slice(payload);
        self.pad();
        Ok(())
    }

    pub fn put_flag(&mut self, kind: u16) -> Result<()> {
        self.put(kind, &[])
    }

    pub fn put_u8(&mut self, kind: u16, v: u8) -> Result<()> {
        self.put(kind, &[v])
    }

    pub fn put_u16(&mut self, kind: u16, v: u16) -> Result<()> {
        self.put(kind, &v.to_ne_bytes())
    }

    pub fn put_u32(&mut self, kind: u16, v: u32) -> Result<()> {
        self.put(kind, &v.to_ne_bytes())
    }

    pub fn put_u64(&mut self, kind: u16, v: u64) -> Result<()> {
        self.put(kind, &v.to_ne_bytes())
    }

    /// Appends a NUL-terminated string.
    pub fn put_str(&mut self, kind: u16, s: &str) -> Result<()> {
        let mut payload = Vec::with_capacity(s.len() + 1);
        payload.extend_from_slice(s.as_bytes());
        payload.push(0);
        self.put(kind, &payload)
    }

    pub fn put_mac(&mut self, kind: u16, mac: MacAddr6) -> Result<()> {
        self.put(kind, mac.as_bytes())
    }

    /// Appends a nested attribute whose contents are written by `f`.
    pub fn nest(&mut self, kind: u16, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        self.reserve(HEADER_LEN)?;
        let start = self.buf.len();
        self.header(kind | NLA_F_NESTED, HEADER_LEN);
        f(self)?;

        let len = self.buf.len() - start;
        if len > u16::MAX as usize {
            return Err(Error::MessageOverflow(u16::MAX as usize));
        }
        self.buf[start..start + 2].copy_from_slice(&(len as u16).to_ne_bytes());
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// One parsed attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr<'a> {
    pub kind: u16,
    pub nested: bool,
    pub payload: &'a [u8],
}

macro_rules! read_attr {
    ($name:ident, $ty:ty, $read:ident) => {
        pub fn $name(&self) -> Result<$ty> {
            let mut c = Cursor::new(self.payload);
            c.$read()
                .map_err(|e| Error::malformed(format!("attribute {}: {e}", self.kind)))
        }
    };
}

impl<'a> Attr<'a> {
    read_attr!(u8, u8, u8);
    read_attr!(u16, u16, u16_ne);
    read_attr!(u32, u32, u32_ne);
    read_attr!(u64, u64, u64_ne);

    /// Reads an unsigned integer of whatever width the payload has.
    pub fn uint(&self) -> Result<u64> {
        Ok(match self.payload.len() {
            1 => self.u8()? as u64,
            2 => self.u16()? as u64,
            4 => self.u32()? as u64,
            8 => self.u64()?,
            n => {
                return Err(Error::malformed(format!(
                    "attribute {}: {n} bytes is not an integer",
                    self.kind
                )))
            }
        })
    }

    /// Reads a string, dropping the NUL terminator if there is one.
    pub fn str(&self) -> Result<&'a str> {
        let b = self.payload;
        let b = b.split(|&c| c == 0).next().unwrap_or(b);
        std::str::from_utf8(b)
            .map_err(|e| Error::malformed(format!("attribute {}: {e}", self.kind)))
    }

    pub fn mac(&self) -> Result<MacAddr6> {
        let mut c = Cursor::new(self.payload);
        c.array::<6>()
            .map(MacAddr6::from)
            .map_err(|e| Error::malformed(format!("attribute {}: {e}", self.kind)))
    }

    /// Attributes nested inside this one.
    pub fn nested(&self) -> Attrs<'a> {
        Attrs::new(self.payload)
    }
}

/// Iterator over a buffer of attributes.
///
/// Iteration ends at the first truncated attribute.
#[derive(Debug, Clone)]
pub struct Attrs<'a> {
    buf: &'a [u8],
}

impl<'a> Attrs<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Finds the first attribute of the given type.
    pub fn get(&self, kind: u16) -> Option<Attr<'a>> {
        self.clone().find(|a| a.kind == kind)
    }
}

impl<'a> Iterator for Attrs<'a> {
    type Item = Attr<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut c = Cursor::new(self.buf);
        let len = c.u16_ne().ok()? as usize;
        let raw = c.u16_ne().ok()?;
        let payload = c.bytes(len.checked_sub(HEADER_LEN)?).ok()?;

        self.buf = self.buf.get(align(len)..).unwrap_or_default();
        Some(Attr {
            kind: raw & TYPE_MASK,
            nested: raw & NLA_F_NESTED != 0,
            payload,
        })
    }
}
