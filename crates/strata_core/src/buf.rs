//! Byte buffers shared by the on-disk formats.

use crate::error::{CoreError, CoreResult};
use std::ops::{Deref, Range};
use std::sync::Arc;
use strata_storage::MappedBytes;

/// An immutable, cheaply cloneable byte range.
///
/// Readonly segment structures are built over mapped files; tests and
/// freshly built structures use owned buffers.
#[derive(Debug, Clone)]
pub enum ByteView {
    /// Heap-owned bytes.
    Owned(Arc<Vec<u8>>, Range<usize>),
    /// A range of a mapped file.
    Mapped(MappedBytes),
}

impl ByteView {
    /// Wraps an owned buffer.
    pub fn owned(data: Vec<u8>) -> Self {
        let len = data.len();
        Self::Owned(Arc::new(data), 0..len)
    }

    /// Returns a sub-range.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentCorruption`] if the range is out of bounds.
    pub fn slice(&self, range: Range<usize>) -> CoreResult<Self> {
        if range.start > range.end || range.end > self.len() {
            return Err(CoreError::segment_corruption(format!(
                "range {range:?} exceeds {} bytes",
                self.len()
            )));
        }
        Ok(match self {
            Self::Owned(data, base) => {
                Self::Owned(Arc::clone(data), base.start + range.start..base.start + range.end)
            }
            Self::Mapped(bytes) => Self::Mapped(bytes.slice(range)?),
        })
    }
}

impl Deref for ByteView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Owned(data, range) => &data[range.clone()],
            Self::Mapped(bytes) => bytes,
        }
    }
}

impl AsRef<[u8]> for ByteView {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl From<MappedBytes> for ByteView {
    fn from(bytes: MappedBytes) -> Self {
        Self::Mapped(bytes)
    }
}

/// Little-endian cursor over a header or manifest.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, pos: 0, what }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn bytes(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&e| e <= self.data.len());
        let Some(end) = end else {
            return Err(CoreError::segment_corruption(format!("{} too short", self.what)));
        };
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn u16(&mut self) -> CoreResult<u16> {
        self.array().map(u16::from_le_bytes)
    }

    pub(crate) fn u32(&mut self) -> CoreResult<u32> {
        self.array().map(u32::from_le_bytes)
    }

    pub(crate) fn u64(&mut self) -> CoreResult<u64> {
        self.array().map(u64::from_le_bytes)
    }

    pub(crate) fn i64(&mut self) -> CoreResult<i64> {
        self.array().map(i64::from_le_bytes)
    }

    /// Checks a 4-byte magic followed by a `u16` version no newer than `max`.
    pub(crate) fn magic_version(&mut self, magic: &[u8; 4], max: u16) -> CoreResult<u16> {
        if self.bytes(4)? != magic {
            return Err(CoreError::segment_corruption(format!("invalid {} magic", self.what)));
        }
        let version = self.u16()?;
        if version == 0 || version > max {
            return Err(CoreError::invalid_format(format!(
                "unsupported {} version: {version}",
                self.what
            )));
        }
        Ok(version)
    }
}

/// Verifies a trailing crc32 over everything before it and returns the body.
pub(crate) fn split_checksummed(data: &[u8]) -> CoreResult<&[u8]> {
    if data.len() < 4 {
        return Err(CoreError::segment_corruption("checksummed file too short"));
    }
    let (body, tail) = data.split_at(data.len() - 4);
    let mut expected = [0u8; 4];
    expected.copy_from_slice(tail);
    let expected = u32::from_le_bytes(expected);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(CoreError::ChecksumMismatch { expected, actual });
    }
    Ok(body)
}

/// Appends a crc32 of the current contents.
pub(crate) fn append_checksum(buf: &mut Vec<u8>) {
    let crc = crc32fast::hash(buf);
    buf.extend_from_slice(&crc.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_slice() {
        let view = ByteView::owned((0u8..10).collect());
        let sub = view.slice(2..6).unwrap();
        assert_eq!(&*sub, &[2, 3, 4, 5]);
        assert_eq!(&*sub.slice(1..3).unwrap(), &[3, 4]);
        assert!(sub.slice(3..9).is_err());
    }

    #[test]
    fn reader_bounds() {
        let data = [1u8, 0, 2, 0, 0, 0];
        let mut r = Reader::new(&data, "header");
        assert_eq!(r.u16().unwrap(), 1);
        assert_eq!(r.u32().unwrap(), 2);
        assert!(r.u8().is_err());
    }

    #[test]
    fn checksum_detects_flip() {
        let mut buf = b"payload".to_vec();
        append_checksum(&mut buf);
        assert_eq!(split_checksummed(&buf).unwrap(), b"payload");
        buf[0] ^= 1;
        assert!(matches!(
            split_checksummed(&buf),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }
}
