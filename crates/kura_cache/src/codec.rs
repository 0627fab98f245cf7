//! Binary encoding of cache entries.
//!
//! Layout of an encoded blob:
//!
//! ```text
//! +-------+----------------+-------+------------------+---------+
//! | magic | schema version | flags | BLAKE3(payload)  | payload |
//! | 4 B   | u32 LE         | 1 B   | 32 B             | ...     |
//! +-------+----------------+-------+------------------+---------+
//! ```
//!
//! The payload is the rkyv archive of a [`CacheEntry`], zlib-compressed when
//! the compressed flag is set.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use rkyv::util::AlignedVec;

use crate::entry::{CacheEntry, SCHEMA_VERSION};
use crate::CacheError;

const MAGIC: [u8; 4] = *b"KURA";
const FLAG_COMPRESSED: u8 = 0b0000_0001;
const CHECKSUM_LEN: usize = 32;
const HEADER_LEN: usize = 4 + 4 + 1 + CHECKSUM_LEN;

/// Encodes and decodes [`CacheEntry`] values.
#[derive(Debug, Clone, Copy)]
pub struct EntryCodec {
    compression: bool,
}

impl EntryCodec {
    /// Creates a codec; `compression` controls how new blobs are written.
    pub fn new(compression: bool) -> Self {
        Self { compression }
    }

    /// Returns whether new blobs are compressed.
    pub fn compression(&self) -> bool {
        self.compression
    }

    /// Encodes an entry into a blob.
    pub fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, CacheError> {
        let archived = rkyv::to_bytes::<rkyv::rancor::Error>(entry)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let (flags, payload) = if self.compression {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&archived)
                .map_err(|e| CacheError::Serialization(e.to_string()))?;
            let compressed = encoder
                .finish()
                .map_err(|e| CacheError::Serialization(e.to_string()))?;
            (FLAG_COMPRESSED, compressed)
        } else {
            (0, archived.to_vec())
        };

        let mut blob = Vec::with_capacity(HEADER_LEN + payload.len());
        blob.extend_from_slice(&MAGIC);
        blob.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
        blob.push(flags);
        blob.extend_from_slice(blake3::hash(&payload).as_bytes());
        blob.extend_from_slice(&payload);
        Ok(blob)
    }

    /// Decodes a blob written by any codec instance.
    ///
    /// Compressed and uncompressed blobs are both accepted regardless of
    /// this codec's own setting. Anything malformed, from another schema
    /// version, or failing its checksum is reported as
    /// [`CacheError::CorruptEntry`].
    pub fn decode(&self, blob: &[u8]) -> Result<CacheEntry, CacheError> {
        if blob.len() < HEADER_LEN {
            return Err(CacheError::corrupted("blob shorter than header"));
        }
        if blob[..4] != MAGIC {
            return Err(CacheError::corrupted("bad magic bytes"));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&blob[4..8]);
        let version = u32::from_le_bytes(version);
        if version != SCHEMA_VERSION {
            return Err(CacheError::corrupted(format!(
                "schema version {version}, expected {SCHEMA_VERSION}"
            )));
        }

        let flags = blob[8];
        let checksum = &blob[9..HEADER_LEN];
        let payload = &blob[HEADER_LEN..];
        if blake3::hash(payload).as_bytes() != checksum {
            return Err(CacheError::corrupted("checksum mismatch"));
        }

        let mut archived = AlignedVec::<16>::new();
        if flags & FLAG_COMPRESSED != 0 {
            let mut inflated = Vec::new();
            ZlibDecoder::new(payload)
                .read_to_end(&mut inflated)
                .map_err(|e| CacheError::corrupted(format!("decompression failed: {e}")))?;
            archived.extend_from_slice(&inflated);
        } else {
            archived.extend_from_slice(payload);
        }

        let entry = rkyv::from_bytes::<CacheEntry, rkyv::rancor::Error>(&archived)
            .map_err(|e| CacheError::corrupted(e.to_string()))?;

        if !entry.is_current() {
            return Err(CacheError::corrupted(format!(
                "entry schema version {}, expected {SCHEMA_VERSION}",
                entry.schema_version
            )));
        }
        Ok(entry)
    }
}

impl Default for EntryCodec {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::ExternalDependency;
    use crate::entry::TransformedOutput;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn sample_entry() -> CacheEntry {
        CacheEntry::new(
            TransformedOutput::new("\"use strict\";\nvar a = 1;")
                .with_map(r#"{"version":3,"mappings":"AAAA"}"#),
            vec![ExternalDependency {
                path: ".kurarc".to_string(),
                fingerprint: "ab".repeat(32),
            }],
        )
    }

    #[rstest]
    #[case::compressed(true)]
    #[case::uncompressed(false)]
    fn test_encode_decode(#[case] compression: bool) {
        let codec = EntryCodec::new(compression);
        let entry = sample_entry();

        let blob = codec.encode(&entry).unwrap();
        assert_eq!(&blob[..4], b"KURA");
        assert_eq!(blob[8] & FLAG_COMPRESSED != 0, compression);
        assert_eq!(codec.decode(&blob).unwrap(), entry);
    }

    #[test]
    fn test_decode_accepts_either_compression_setting() {
        let entry = sample_entry();
        let compressed = EntryCodec::new(true).encode(&entry).unwrap();
        let plain = EntryCodec::new(false).encode(&entry).unwrap();

        assert_eq!(EntryCodec::new(false).decode(&compressed).unwrap(), entry);
        assert_eq!(EntryCodec::new(true).decode(&plain).unwrap(), entry);
    }

    #[test]
    fn test_compression_shrinks_repetitive_output() {
        let entry = CacheEntry::new(TransformedOutput::new("x = 1;\n".repeat(2_000)), vec![]);
        let compressed = EntryCodec::new(true).encode(&entry).unwrap();
        let plain = EntryCodec::new(false).encode(&entry).unwrap();
        assert!(compressed.len() < plain.len());
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::truncated_header(b"KURA\x01\x00".to_vec())]
    #[case::garbage(vec![0x5a; 128])]
    fn test_decode_rejects_malformed(#[case] blob: Vec<u8>) {
        let result = EntryCodec::default().decode(&blob);
        assert!(matches!(result, Err(CacheError::CorruptEntry(_))));
    }

    #[test]
    fn test_decode_rejects_flipped_payload_byte() {
        let codec = EntryCodec::new(false);
        let mut blob = codec.encode(&sample_entry()).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;

        assert!(matches!(codec.decode(&blob), Err(CacheError::CorruptEntry(_))));
    }

    #[test]
    fn test_decode_rejects_other_schema_version() {
        let codec = EntryCodec::new(true);
        let mut blob = codec.encode(&sample_entry()).unwrap();
        blob[4..8].copy_from_slice(&(SCHEMA_VERSION + 1).to_le_bytes());

        let err = codec.decode(&blob).unwrap_err();
        assert!(err.to_string().contains("schema version"));
    }
}
