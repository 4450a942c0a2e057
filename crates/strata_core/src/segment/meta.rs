//! Segment descriptor file.

use crate::buf::{append_checksum, split_checksummed, Reader};
use crate::error::{CoreError, CoreResult};
use crate::types::{SegmentId, SegmentKind};
use std::path::Path;
use strata_storage::write_atomic;

/// File holding the descriptor inside a segment directory.
pub const META_FILE: &str = "segment.meta";

const META_MAGIC: [u8; 4] = *b"STSG";
const META_VERSION: u16 = 1;

/// Identity and row count of a segment, as recorded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMeta {
    /// Segment kind.
    pub kind: SegmentKind,
    /// Segment id.
    pub id: SegmentId,
    /// Rows held, deleted ones included. Writable segments record zero and
    /// derive the count from their stores.
    pub rows: u64,
}

impl SegmentMeta {
    /// Serializes the descriptor with a trailing checksum.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        out.extend_from_slice(&META_MAGIC);
        out.extend_from_slice(&META_VERSION.to_le_bytes());
        out.push(self.kind as u8);
        out.push(0);
        out.extend_from_slice(&self.id.as_u64().to_le_bytes());
        out.extend_from_slice(&self.rows.to_le_bytes());
        append_checksum(&mut out);
        out
    }

    /// Parses a descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error on bad magic, version, kind or checksum.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let body = split_checksummed(data)?;
        let mut r = Reader::new(body, "segment meta");
        r.magic_version(&META_MAGIC, META_VERSION)?;
        let tag = r.u8()?;
        let kind = SegmentKind::from_u8(tag)
            .ok_or_else(|| CoreError::segment_corruption(format!("unknown segment kind {tag}")))?;
        r.u8()?;
        let id = SegmentId::new(r.u64()?);
        let rows = r.u64()?;
        Ok(Self { kind, id, rows })
    }

    /// Writes the descriptor into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, dir: &Path, sync: bool) -> CoreResult<()> {
        write_atomic(&dir.join(META_FILE), &self.encode(), sync)?;
        Ok(())
    }

    /// Reads the descriptor of `dir` and checks it names the expected segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, corrupted or describes
    /// another segment.
    pub fn load(dir: &Path, kind: SegmentKind, id: SegmentId) -> CoreResult<Self> {
        let meta = Self::decode(&std::fs::read(dir.join(META_FILE))?)?;
        if meta.kind != kind || meta.id != id {
            return Err(CoreError::segment_corruption(format!(
                "{} describes {} segment {}, expected {kind} segment {id}",
                dir.display(),
                meta.kind,
                meta.id
            )));
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_and_load() {
        let dir = tempdir().unwrap();
        let meta = SegmentMeta {
            kind: SegmentKind::Readonly,
            id: SegmentId::new(12),
            rows: 3,
        };
        meta.save(dir.path(), false).unwrap();
        assert_eq!(
            SegmentMeta::load(dir.path(), SegmentKind::Readonly, SegmentId::new(12)).unwrap(),
            meta
        );
        assert!(SegmentMeta::load(dir.path(), SegmentKind::Writable, SegmentId::new(12)).is_err());
    }

    #[test]
    fn checksum_guards() {
        let mut data = SegmentMeta {
            kind: SegmentKind::Writable,
            id: SegmentId::new(1),
            rows: 0,
        }
        .encode();
        data[8] ^= 0xff;
        assert!(SegmentMeta::decode(&data).is_err());
    }
}
