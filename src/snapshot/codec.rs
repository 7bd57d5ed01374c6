//! Self-describing binary snapshot format (spec §6.2).
//!
//! Layout:
//!
//! ```text
//! magic:                 u32  0x4D4C4442 ("MLDB")
//! version:               u8   0x01
//! capture_timestamp_ms:  i64
//! shard_count:           u32
//! capacity_per_shard:    u32
//! total_entries:         u32
//! entries[total_entries]:
//!   shard_index:         u32
//!   key_len:             u32
//!   key:                 [u8; key_len]
//!   value_len:           u32
//!   value:               [u8; value_len]
//!   has_expiration:      u8   (0 or 1)
//!   expiration_millis:   i64  (present only if has_expiration == 1)
//! crc32:                u32  (of every byte above)
//! ```
//!
//! All multi-byte integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, StoreError};

pub const MAGIC: u32 = 0x4D4C4442;
pub const VERSION: u8 = 0x01;

/// One live key/value pair plus the shard it belongs to and its optional
/// expiration, as captured at a single instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub shard_index: u32,
    pub key: Bytes,
    pub value: Bytes,
    pub expires_at_millis: Option<i64>,
}

/// A whole-store point-in-time image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotImage {
    pub capture_timestamp_millis: i64,
    pub shard_count: u32,
    pub capacity_per_shard: u32,
    pub entries: Vec<SnapshotEntry>,
}

impl SnapshotImage {
    pub fn total_entries(&self) -> u32 {
        self.entries.len() as u32
    }
}

/// Serializes `image` into the on-disk binary format, including its CRC32
/// trailer.
pub fn encode(image: &SnapshotImage) -> Bytes {
    let mut buf = BytesMut::new();

    buf.put_u32(MAGIC);
    buf.put_u8(VERSION);
    buf.put_i64(image.capture_timestamp_millis);
    buf.put_u32(image.shard_count);
    buf.put_u32(image.capacity_per_shard);
    buf.put_u32(image.total_entries());

    for entry in &image.entries {
        buf.put_u32(entry.shard_index);
        buf.put_u32(entry.key.len() as u32);
        buf.put_slice(&entry.key);
        buf.put_u32(entry.value.len() as u32);
        buf.put_slice(&entry.value);
        match entry.expires_at_millis {
            Some(millis) => {
                buf.put_u8(1);
                buf.put_i64(millis);
            }
            None => buf.put_u8(0),
        }
    }

    let crc = crc32fast::hash(&buf);
    buf.put_u32(crc);

    buf.freeze()
}

/// Parses the binary format written by [`encode`], validating the magic
/// number, version byte, and (when present) the CRC32 trailer.
///
/// The trailer is optional per the format: a file whose byte count matches
/// the header-declared entries exactly, with nothing left over, is accepted
/// without one.
pub fn decode(bytes: &[u8]) -> Result<SnapshotImage> {
    let total_len = bytes.len();
    let mut cursor = bytes;

    let magic = read_u32(&mut cursor)?;
    if magic != MAGIC {
        return Err(StoreError::DecodeError(format!(
            "bad magic: expected {MAGIC:#010x}, found {magic:#010x}"
        )));
    }

    let version = read_u8(&mut cursor)?;
    if version != VERSION {
        return Err(StoreError::IncompatibleVersion { found: version });
    }

    let capture_timestamp_millis = read_i64(&mut cursor)?;
    let shard_count = read_u32(&mut cursor)?;
    let capacity_per_shard = read_u32(&mut cursor)?;
    let total_entries = read_u32(&mut cursor)?;

    let mut entries = Vec::with_capacity(total_entries as usize);
    for _ in 0..total_entries {
        let shard_index = read_u32(&mut cursor)?;
        if shard_index >= shard_count {
            return Err(StoreError::DecodeError(format!(
                "entry shard_index {shard_index} out of range for shard_count {shard_count}"
            )));
        }

        let key_len = read_u32(&mut cursor)? as usize;
        let key = read_bytes(&mut cursor, key_len)?;

        let value_len = read_u32(&mut cursor)? as usize;
        let value = read_bytes(&mut cursor, value_len)?;

        let has_expiration = read_u8(&mut cursor)?;
        let expires_at_millis = match has_expiration {
            0 => None,
            1 => Some(read_i64(&mut cursor)?),
            other => {
                return Err(StoreError::DecodeError(format!(
                    "invalid has_expiration flag: {other}"
                )))
            }
        };

        entries.push(SnapshotEntry {
            shard_index,
            key,
            value,
            expires_at_millis,
        });
    }

    let consumed = total_len - cursor.len();
    match cursor.len() {
        0 => {}
        4 => {
            let expected_crc = crc32fast::hash(&bytes[..consumed]);
            let found_crc = read_u32(&mut cursor)?;
            if expected_crc != found_crc {
                return Err(StoreError::DecodeError(format!(
                    "CRC32 mismatch: expected {expected_crc:#010x}, found {found_crc:#010x}"
                )));
            }
        }
        _ => {
            return Err(StoreError::DecodeError(
                "trailing bytes after last entry".into(),
            ))
        }
    }

    Ok(SnapshotImage {
        capture_timestamp_millis,
        shard_count,
        capacity_per_shard,
        entries,
    })
}

fn read_u8(cursor: &mut &[u8]) -> Result<u8> {
    if cursor.remaining() < 1 {
        return Err(StoreError::DecodeError("unexpected end of snapshot".into()));
    }
    Ok(cursor.get_u8())
}

fn read_u32(cursor: &mut &[u8]) -> Result<u32> {
    if cursor.remaining() < 4 {
        return Err(StoreError::DecodeError("unexpected end of snapshot".into()));
    }
    Ok(cursor.get_u32())
}

fn read_i64(cursor: &mut &[u8]) -> Result<i64> {
    if cursor.remaining() < 8 {
        return Err(StoreError::DecodeError("unexpected end of snapshot".into()));
    }
    Ok(cursor.get_i64())
}

fn read_bytes(cursor: &mut &[u8], len: usize) -> Result<Bytes> {
    if cursor.remaining() < len {
        return Err(StoreError::DecodeError("unexpected end of snapshot".into()));
    }
    Ok(cursor.copy_to_bytes(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> SnapshotImage {
        SnapshotImage {
            capture_timestamp_millis: 1_700_000_000_000,
            shard_count: 4,
            capacity_per_shard: 16,
            entries: vec![
                SnapshotEntry {
                    shard_index: 0,
                    key: Bytes::from_static(b"a"),
                    value: Bytes::from_static(b"1"),
                    expires_at_millis: None,
                },
                SnapshotEntry {
                    shard_index: 3,
                    key: Bytes::from_static(b"b"),
                    value: Bytes::from_static(b"2"),
                    expires_at_millis: Some(1_700_000_010_000),
                },
            ],
        }
    }

    #[test]
    fn round_trips_exactly() {
        let image = sample_image();
        let encoded = encode(&image);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = encode(&sample_image()).to_vec();
        bytes[0] ^= 0xFF;

        let err = decode(&bytes);
        assert!(matches!(err, Err(StoreError::DecodeError(_))));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut bytes = encode(&sample_image()).to_vec();
        bytes[4] = 0x99;

        let err = decode(&bytes);
        assert!(matches!(err, Err(StoreError::IncompatibleVersion { found: 0x99 })));
    }

    #[test]
    fn accepts_file_without_crc_trailer() {
        let image = sample_image();
        let mut encoded = encode(&image).to_vec();
        let crc_start = encoded.len() - 4;
        encoded.truncate(crc_start);

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn rejects_crc_mismatch() {
        let mut bytes = encode(&sample_image()).to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let err = decode(&bytes);
        assert!(matches!(err, Err(StoreError::DecodeError(_))));
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = encode(&sample_image());
        let truncated = &bytes[..bytes.len() - 10];
        assert!(decode(truncated).is_err());
    }

    #[test]
    fn rejects_out_of_range_shard_index() {
        let image = SnapshotImage {
            capture_timestamp_millis: 1_700_000_000_000,
            shard_count: 4,
            capacity_per_shard: 16,
            entries: vec![SnapshotEntry {
                shard_index: 4,
                key: Bytes::from_static(b"a"),
                value: Bytes::from_static(b"1"),
                expires_at_millis: None,
            }],
        };
        let encoded = encode(&image);
        assert!(matches!(decode(&encoded), Err(StoreError::DecodeError(_))));
    }

    #[test]
    fn empty_image_round_trips() {
        let image = SnapshotImage {
            capture_timestamp_millis: 0,
            shard_count: 1,
            capacity_per_shard: 4,
            entries: vec![],
        };
        let encoded = encode(&image);
        assert_eq!(decode(&encoded).unwrap(), image);
    }
}
