use std::fmt;

use kelpie_error::{KelpieError, Result};

use crate::reader::ByteReader;

/// A monotonic opaque identifier for the row an index entry points at.
///
/// The raw value 0 is the null id; negative values are reserved sentinels.
/// Insert and remove paths require a *normal* id (strictly positive).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct RecordId(i64);

/// Encoded width of a record id in key and value bytes.
pub const RECORD_ID_ENCODED_LEN: usize = 8;

impl RecordId {
    /// The null record id.
    #[must_use]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw value.
    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Whether this is the null id.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Whether this id may be stored in an index: neither null nor a
    /// reserved sentinel.
    #[must_use]
    pub const fn is_normal(self) -> bool {
        self.0 > 0
    }

    /// Append the order-preserving 8-byte encoding: big-endian with the
    /// sign bit flipped, so byte order equals id order and the field is
    /// fixed-width decodable from either end of a buffer.
    pub fn append_to(self, out: &mut Vec<u8>) {
        let flipped = (self.0 as u64) ^ (1 << 63);
        out.extend_from_slice(&flipped.to_be_bytes());
    }

    /// Decode a record id from the front of a reader.
    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let raw = reader.read_bytes(RECORD_ID_ENCODED_LEN)?;
        let mut be = [0u8; RECORD_ID_ENCODED_LEN];
        be.copy_from_slice(raw);
        let flipped = u64::from_be_bytes(be) ^ (1 << 63);
        #[allow(clippy::cast_possible_wrap)]
        let raw = flipped as i64;
        Ok(Self(raw))
    }

    /// Split `bytes` into the prefix and the record id encoded at its end.
    pub fn split_at_end(bytes: &[u8]) -> Result<(&[u8], Self)> {
        let Some(split) = bytes.len().checked_sub(RECORD_ID_ENCODED_LEN) else {
            return Err(KelpieError::InvalidKey {
                detail: format!(
                    "buffer of {} bytes too short to carry a record id",
                    bytes.len()
                ),
            });
        };
        let mut reader = ByteReader::new(&bytes[split..]);
        let loc = Self::read_from(&mut reader)?;
        Ok((&bytes[..split], loc))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(id: i64) -> Vec<u8> {
        let mut out = Vec::new();
        RecordId::new(id).append_to(&mut out);
        out
    }

    #[test]
    fn normality() {
        assert!(!RecordId::null().is_normal());
        assert!(RecordId::null().is_null());
        assert!(!RecordId::new(-5).is_normal());
        assert!(RecordId::new(1).is_normal());
    }

    #[test]
    fn round_trip_through_reader() {
        for raw in [i64::MIN, -1, 0, 1, 42, i64::MAX] {
            let bytes = encode(raw);
            assert_eq!(bytes.len(), RECORD_ID_ENCODED_LEN);
            let mut reader = ByteReader::new(&bytes);
            assert_eq!(RecordId::read_from(&mut reader).unwrap().raw(), raw);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn byte_order_matches_id_order() {
        let ids = [i64::MIN, -7, 0, 1, 2, 1000, i64::MAX];
        for w in ids.windows(2) {
            assert!(encode(w[0]) < encode(w[1]), "{} !< {}", w[0], w[1]);
        }
    }

    #[test]
    fn split_at_end_recovers_prefix_and_id() {
        let mut bytes = b"prefix".to_vec();
        RecordId::new(99).append_to(&mut bytes);
        let (prefix, loc) = RecordId::split_at_end(&bytes).unwrap();
        assert_eq!(prefix, b"prefix");
        assert_eq!(loc.raw(), 99);
    }

    #[test]
    fn split_at_end_rejects_short_buffers() {
        assert!(RecordId::split_at_end(&[1, 2, 3]).is_err());
    }
}
