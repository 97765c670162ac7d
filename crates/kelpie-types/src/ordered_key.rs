//! Order-preserving key encoding.
//!
//! A structured key becomes a byte string whose lexicographic order equals
//! the key's logical order under the index's column directions. Layout:
//!
//! ```text
//! [field 0][field 1]...[field n-1][discriminator][record id?]
//! ```
//!
//! Each field is a class byte followed by a class-specific payload;
//! descending columns complement every byte of the field. The
//! discriminator trailer positions the encoding at, strictly before, or
//! strictly after every legal key with the same field values. Class bytes
//! (and their complements) never collide with discriminator bytes, so a
//! key that is a field-prefix of another always sorts first and exclusive
//! encodings never equal a stored key.
//!
//! What the encoding erases (the 32-vs-64-bit width of numeric fields)
//! travels separately as [`TypeBits`]; full decoding needs both.

use crate::key::{IndexKey, KeyOrdering};
use crate::record_id::RecordId;
use crate::type_bits::TypeBits;
use crate::value::FieldValue;
use kelpie_error::{KelpieError, Result};

/// Positions an encoded key relative to legal entries with the same
/// logical value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discriminator {
    /// Strictly before every entry with this value.
    ExclusiveBefore,
    /// At the value itself; the only discriminator stored keys carry.
    Inclusive,
    /// Strictly after every entry with this value.
    ExclusiveAfter,
}

const DISC_EXCLUSIVE_BEFORE: u8 = 0x01;
const DISC_INCLUSIVE: u8 = 0x02;
const DISC_EXCLUSIVE_AFTER: u8 = 0xFE;

// Class bytes start at 0x0A so every class byte and every complemented
// class byte (>= 0xC3) sorts above all discriminator bytes except
// kExclusiveAfter, which must sort above them all.
const CLASS_NULL: u8 = 0x0A;
const CLASS_NUMERIC: u8 = 0x14;
const CLASS_FLOAT: u8 = 0x1E;
const CLASS_TEXT: u8 = 0x28;
const CLASS_BYTES: u8 = 0x32;
const CLASS_BOOL: u8 = 0x3C;

const SIGN_BIT: u64 = 1 << 63;

impl Discriminator {
    const fn byte(self) -> u8 {
        match self {
            Self::ExclusiveBefore => DISC_EXCLUSIVE_BEFORE,
            Self::Inclusive => DISC_INCLUSIVE,
            Self::ExclusiveAfter => DISC_EXCLUSIVE_AFTER,
        }
    }
}

/// An encoded key: the byte string plus the type-bits side channel
/// produced while encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedKey {
    bytes: Vec<u8>,
    type_bits: TypeBits,
}

impl OrderedKey {
    /// Encode with the inclusive discriminator: the form stored as unique
    /// index keys and compared against cursor positions.
    #[must_use]
    pub fn encode(key: &IndexKey, ordering: KeyOrdering) -> Self {
        Self::encode_with_discriminator(key, ordering, Discriminator::Inclusive)
    }

    /// Encode with an explicit discriminator, for seeks and end-bounds.
    #[must_use]
    pub fn encode_with_discriminator(
        key: &IndexKey,
        ordering: KeyOrdering,
        discriminator: Discriminator,
    ) -> Self {
        let mut bytes = Vec::with_capacity(16 * key.len() + 1);
        let mut type_bits = TypeBits::new();
        for (i, value) in key.values().enumerate() {
            let start = bytes.len();
            encode_field(&mut bytes, &mut type_bits, value);
            if ordering.is_descending(i) {
                for b in &mut bytes[start..] {
                    *b = !*b;
                }
            }
        }
        bytes.push(discriminator.byte());
        Self { bytes, type_bits }
    }

    /// Encode inclusively and append the record id: the form stored as
    /// standard index keys and carried in unique index values.
    #[must_use]
    pub fn encode_with_record_id(key: &IndexKey, ordering: KeyOrdering, loc: RecordId) -> Self {
        let mut encoded = Self::encode(key, ordering);
        loc.append_to(&mut encoded.bytes);
        encoded
    }

    /// The encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encoded length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty (only true for a default value).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The type-bits recorded while encoding.
    #[must_use]
    pub fn type_bits(&self) -> &TypeBits {
        &self.type_bits
    }

    /// Consume into the raw buffer.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

fn encode_field(out: &mut Vec<u8>, type_bits: &mut TypeBits, value: &FieldValue) {
    match value {
        FieldValue::Null => out.push(CLASS_NULL),
        FieldValue::I32(v) => {
            out.push(CLASS_NUMERIC);
            push_int(out, i64::from(*v));
            type_bits.push(true);
        }
        FieldValue::I64(v) => {
            out.push(CLASS_NUMERIC);
            push_int(out, *v);
            type_bits.push(false);
        }
        FieldValue::F64(v) if v.is_nan() => out.push(CLASS_NULL),
        FieldValue::F64(v) => {
            out.push(CLASS_FLOAT);
            push_float(out, *v);
        }
        FieldValue::Text(s) => {
            out.push(CLASS_TEXT);
            push_escaped(out, s.as_bytes());
        }
        FieldValue::Bytes(b) => {
            out.push(CLASS_BYTES);
            push_escaped(out, b);
        }
        FieldValue::Bool(b) => {
            out.push(CLASS_BOOL);
            out.push(u8::from(*b));
        }
    }
}

#[allow(clippy::cast_sign_loss)]
fn push_int(out: &mut Vec<u8>, v: i64) {
    out.extend_from_slice(&((v as u64) ^ SIGN_BIT).to_be_bytes());
}

/// IEEE-754 total-order transform: non-negative floats get the sign bit
/// set; negative floats are complemented. Matches `f64::total_cmp`.
fn push_float(out: &mut Vec<u8>, v: f64) {
    let bits = v.to_bits();
    let enc = if bits & SIGN_BIT == 0 { bits ^ SIGN_BIT } else { !bits };
    out.extend_from_slice(&enc.to_be_bytes());
}

/// Body bytes with `0x00` escaped as `0x00 0xFF`, closed by `0x00 0x00`.
/// Keeps variable-length fields self-delimiting and order-preserving.
fn push_escaped(out: &mut Vec<u8>, body: &[u8]) {
    for &b in body {
        out.push(b);
        if b == 0 {
            out.push(0xFF);
        }
    }
    out.push(0);
    out.push(0);
}

/// Decode an inclusive, record-id-free encoding back to a structured key.
///
/// `type_bits` must be the side channel produced when the key was encoded
/// (or the all-zeros value when it was elided). Fails with
/// [`KelpieError::InvalidKey`] on any malformed input.
pub fn decode_key(bytes: &[u8], ordering: KeyOrdering, type_bits: &TypeBits) -> Result<IndexKey> {
    let mut values: Vec<FieldValue> = Vec::new();
    let mut pos = 0usize;
    let mut numeric_idx = 0usize;

    loop {
        let Some(&raw) = bytes.get(pos) else {
            return Err(invalid("missing discriminator trailer"));
        };
        match raw {
            DISC_INCLUSIVE => {
                if pos + 1 != bytes.len() {
                    return Err(invalid("bytes after discriminator"));
                }
                return Ok(IndexKey::from_values(values));
            }
            DISC_EXCLUSIVE_BEFORE | DISC_EXCLUSIVE_AFTER => {
                return Err(invalid("exclusive discriminator in stored key"));
            }
            _ => {}
        }

        let field_idx = values.len();
        let descending = ordering.is_descending(field_idx);
        let class = if descending { !raw } else { raw };
        pos += 1;

        let value = match class {
            CLASS_NULL => FieldValue::Null,
            CLASS_NUMERIC => {
                let raw64 = read_u64(bytes, &mut pos, descending)? ^ SIGN_BIT;
                #[allow(clippy::cast_possible_wrap)]
                let v = raw64 as i64;
                numeric_idx += 1;
                if type_bits.bit(numeric_idx - 1) {
                    let narrow = i32::try_from(v).map_err(|_| {
                        invalid("type bits claim a 32-bit value out of range")
                    })?;
                    FieldValue::I32(narrow)
                } else {
                    FieldValue::I64(v)
                }
            }
            CLASS_FLOAT => {
                let enc = read_u64(bytes, &mut pos, descending)?;
                let bits = if enc & SIGN_BIT != 0 { enc ^ SIGN_BIT } else { !enc };
                FieldValue::F64(f64::from_bits(bits))
            }
            CLASS_TEXT => {
                let body = read_escaped(bytes, &mut pos, descending)?;
                let text = String::from_utf8(body)
                    .map_err(|_| invalid("text field is not valid UTF-8"))?;
                FieldValue::Text(text)
            }
            CLASS_BYTES => FieldValue::Bytes(read_escaped(bytes, &mut pos, descending)?),
            CLASS_BOOL => {
                let b = read_byte(bytes, &mut pos, descending)?;
                match b {
                    0 => FieldValue::Bool(false),
                    1 => FieldValue::Bool(true),
                    _ => return Err(invalid("boolean payload out of range")),
                }
            }
            other => return Err(invalid(format!("unknown class byte 0x{other:02x}"))),
        };
        values.push(value);
    }
}

fn invalid(detail: impl Into<String>) -> KelpieError {
    KelpieError::InvalidKey {
        detail: detail.into(),
    }
}

fn read_byte(bytes: &[u8], pos: &mut usize, descending: bool) -> Result<u8> {
    let Some(&b) = bytes.get(*pos) else {
        return Err(invalid("truncated field payload"));
    };
    *pos += 1;
    Ok(if descending { !b } else { b })
}

fn read_u64(bytes: &[u8], pos: &mut usize, descending: bool) -> Result<u64> {
    let Some(raw) = bytes.get(*pos..*pos + 8) else {
        return Err(invalid("truncated 8-byte payload"));
    };
    *pos += 8;
    let mut be = [0u8; 8];
    for (dst, src) in be.iter_mut().zip(raw) {
        *dst = if descending { !*src } else { *src };
    }
    Ok(u64::from_be_bytes(be))
}

fn read_escaped(bytes: &[u8], pos: &mut usize, descending: bool) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let b = read_byte(bytes, pos, descending)?;
        if b != 0 {
            body.push(b);
            continue;
        }
        match read_byte(bytes, pos, descending)? {
            0x00 => return Ok(body),
            0xFF => body.push(0),
            _ => return Err(invalid("bad escape in variable-length field")),
        }
    }
}
