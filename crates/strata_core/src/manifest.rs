//! Table manifest: the ordered segment list.

use crate::buf::{append_checksum, split_checksummed, Reader};
use crate::error::{CoreError, CoreResult};
use crate::types::{SegmentId, SegmentKind};

/// Magic bytes for manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"STMF";

/// Current manifest version.
pub const MANIFEST_VERSION: u16 = 1;

/// One segment as recorded in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentEntry {
    /// Physical kind, which selects the directory prefix.
    pub kind: SegmentKind,
    /// Segment id (directory sequence number).
    pub id: SegmentId,
}

impl SegmentEntry {
    /// Returns the segment directory name, e.g. `rd-000003`.
    #[must_use]
    pub fn dir_name(&self) -> String {
        segment_dir_name(self.kind, self.id)
    }
}

/// Formats a segment directory name.
#[must_use]
pub fn segment_dir_name(kind: SegmentKind, id: SegmentId) -> String {
    format!("{}-{:06}", kind.prefix(), id.as_u64())
}

/// Table manifest.
///
/// The manifest stores:
/// - The segment list in table order
/// - The next segment sequence number
/// - The generation of the last published segment swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Segments in id-space order.
    pub segments: Vec<SegmentEntry>,
    /// Next segment id to assign.
    pub next_segment_id: u64,
    /// Generation at the time of the last save.
    pub generation: u64,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    /// Creates a new empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
            next_segment_id: 1,
            generation: 0,
        }
    }

    /// Allocates a fresh segment id.
    pub fn allocate_segment_id(&mut self) -> SegmentId {
        let id = SegmentId::new(self.next_segment_id);
        self.next_segment_id += 1;
        id
    }

    /// Encodes the manifest to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + self.segments.len() * 9);
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.next_segment_id.to_le_bytes());
        buf.extend_from_slice(&self.generation.to_le_bytes());

        let count = u32::try_from(self.segments.len()).unwrap_or(u32::MAX);
        buf.extend_from_slice(&count.to_le_bytes());
        for entry in &self.segments {
            buf.push(entry.kind as u8);
            buf.extend_from_slice(&entry.id.as_u64().to_le_bytes());
        }

        append_checksum(&mut buf);
        buf
    }

    /// Decodes a manifest from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error on bad magic, unsupported version, truncation or
    /// checksum mismatch.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let body = split_checksummed(data)?;
        let mut r = Reader::new(body, "manifest");
        r.magic_version(&MANIFEST_MAGIC, MANIFEST_VERSION)?;
        let next_segment_id = r.u64()?;
        let generation = r.u64()?;
        let count = r.u32()? as usize;

        let mut segments = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let tag = r.u8()?;
            let kind = SegmentKind::from_u8(tag)
                .ok_or_else(|| CoreError::invalid_format(format!("unknown segment kind {tag}")))?;
            let id = SegmentId::new(r.u64()?);
            if id.as_u64() >= next_segment_id {
                return Err(CoreError::invalid_format(format!(
                    "segment {id} not below next id {next_segment_id}"
                )));
            }
            segments.push(SegmentEntry { kind, id });
        }

        Ok(Self {
            segments,
            next_segment_id,
            generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode() {
        let mut manifest = Manifest::new();
        let a = manifest.allocate_segment_id();
        let b = manifest.allocate_segment_id();
        manifest.segments.push(SegmentEntry {
            kind: SegmentKind::Readonly,
            id: a,
        });
        manifest.segments.push(SegmentEntry {
            kind: SegmentKind::Writable,
            id: b,
        });
        manifest.generation = 4;

        let decoded = Manifest::decode(&manifest.encode()).unwrap();
        assert_eq!(decoded, manifest);
        assert_eq!(decoded.segments[0].dir_name(), "rd-000001");
        assert_eq!(decoded.segments[1].dir_name(), "wr-000002");
    }

    #[test]
    fn invalid_magic() {
        let mut data = Manifest::new().encode();
        data[0] = b'X';
        // checksum catches it first
        assert!(Manifest::decode(&data).is_err());
    }

    #[test]
    fn truncated() {
        let data = Manifest::new().encode();
        assert!(Manifest::decode(&data[..6]).is_err());
    }
}
