//! Order-preserving binary encoding of values.
//!
//! Each value encodes to a byte string whose unsigned lexicographic order
//! matches the logical value order, so primary keys and index keys can be
//! compared by the engine without decoding. Tag bytes are frozen.

use crate::document::{FieldBuffer, Value};
use crate::error::VellumError;
use smallvec::SmallVec;

// Kind tags, assigned in comparison order. Integers and doubles share
// one comparison rank, so they share one tag and interleave by value.
// The terminator closes arrays and documents and sits below every value
// tag so a strict prefix sorts first.
const TAG_TERM: u8 = 0x02;
const TAG_NULL: u8 = 0x05;
const TAG_BOOL: u8 = 0x10;
const TAG_NUM: u8 = 0x20;
const TAG_TEXT: u8 = 0x28;
const TAG_BLOB: u8 = 0x30;
const TAG_ARRAY: u8 = 0x38;
const TAG_DOC: u8 = 0x40;

// Tie-break classes following a numeric approximation. Integers whose
// nearest double is the approximation split around it; the double that
// is the approximation sits between them. Integer(n) therefore lands
// directly after Double(n), the pair SQL comparisons call equal.
const NUM_INT_BELOW: u8 = 0x10;
const NUM_DOUBLE: u8 = 0x20;
const NUM_INT_EQ: u8 = 0x30;
const NUM_INT_ABOVE: u8 = 0x40;

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

// Total-order preserving double mapping: negative values have all bits
// inverted, non-negative values have the sign bit flipped.
fn map_double(d: f64) -> u64 {
    let bits = d.to_bits();
    if bits >> 63 == 1 { !bits } else { bits ^ SIGN_BIT }
}

fn unmap_double(mapped: u64) -> f64 {
    let bits = if mapped >> 63 == 0 {
        !mapped
    } else {
        mapped ^ SIGN_BIT
    };
    f64::from_bits(bits)
}

/// Separator between the indexed value and the primary key in non-unique
/// index rows. No encoding starts with this byte.
pub const KEY_SEPARATOR: u8 = 0x00;

pub type KeyBuf = SmallVec<[u8; 64]>;

/// An encoded primary key or index key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EncodedKey {
    bytes: KeyBuf,
}

impl EncodedKey {
    pub fn from_value(value: &Value) -> EncodedKey {
        let mut out = KeyBuf::new();
        encode_value(value, &mut out);
        EncodedKey { bytes: out }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> EncodedKey {
        EncodedKey {
            bytes: bytes.into().into(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes.into_vec()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Appends the separator and another encoded key, producing a
    /// non-unique index row key.
    pub fn join(&self, pk: &EncodedKey) -> EncodedKey {
        let mut bytes = self.bytes.clone();
        bytes.push(KEY_SEPARATOR);
        bytes.extend_from_slice(&pk.bytes);
        EncodedKey { bytes }
    }
}

/// The smallest and largest encodings among the values SQL comparisons
/// call equal to `value`. Most classes hold one encoding; an integral
/// numeric pairs the double with the equal integer, double first, and
/// zero spans -0.0, 0.0 and the integer. Range bounds over indexes
/// anchor on these so a bound at `5` and a bound at `5.0` cover the same
/// rows.
pub fn class_anchors(value: &Value) -> (EncodedKey, EncodedKey) {
    match value {
        Value::Integer(0) => zero_class_anchors(),
        Value::Double(d) if *d == 0.0 => zero_class_anchors(),
        Value::Integer(i) => {
            let approx = *i as f64;
            if approx as i128 == *i as i128 {
                (
                    EncodedKey::from_value(&Value::Double(approx)),
                    EncodedKey::from_value(value),
                )
            } else {
                let key = EncodedKey::from_value(value);
                (key.clone(), key)
            }
        }
        Value::Double(d) => {
            let equal_int = d.fract() == 0.0
                && (-TWO_POW_63..TWO_POW_63).contains(d)
                && ((*d as i64) as f64).to_bits() == d.to_bits();
            if equal_int {
                (
                    EncodedKey::from_value(value),
                    EncodedKey::from_value(&Value::Integer(*d as i64)),
                )
            } else {
                let key = EncodedKey::from_value(value);
                (key.clone(), key)
            }
        }
        other => {
            let key = EncodedKey::from_value(other);
            (key.clone(), key)
        }
    }
}

fn zero_class_anchors() -> (EncodedKey, EncodedKey) {
    (
        EncodedKey::from_value(&Value::Double(-0.0)),
        EncodedKey::from_value(&Value::Integer(0)),
    )
}

/// The smallest key strictly greater than every key starting with
/// `prefix`, or `None` when the prefix is all `0xFF`.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut next = prefix.to_vec();
    for i in (0..next.len()).rev() {
        if next[i] != 0xFF {
            next[i] += 1;
            next.truncate(i + 1);
            return Some(next);
        }
    }
    None
}

/// Appends the encoding of `value` to `out`.
pub fn encode_value(value: &Value, out: &mut KeyBuf) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        Value::Integer(i) => {
            out.push(TAG_NUM);
            let approx = *i as f64;
            out.extend_from_slice(&map_double(approx).to_be_bytes());
            // The nearest double of an i64 is always integral and within
            // [-2^63, 2^63], so the i128 comparison is exact.
            match (*i as i128).cmp(&(approx as i128)) {
                std::cmp::Ordering::Less => {
                    out.push(NUM_INT_BELOW);
                    out.extend_from_slice(&((*i as u64) ^ SIGN_BIT).to_be_bytes());
                }
                std::cmp::Ordering::Equal => out.push(NUM_INT_EQ),
                std::cmp::Ordering::Greater => {
                    out.push(NUM_INT_ABOVE);
                    out.extend_from_slice(&((*i as u64) ^ SIGN_BIT).to_be_bytes());
                }
            }
        }
        Value::Double(d) => {
            out.push(TAG_NUM);
            out.extend_from_slice(&map_double(*d).to_be_bytes());
            out.push(NUM_DOUBLE);
        }
        Value::Text(s) => {
            out.push(TAG_TEXT);
            append_escaped(s.as_bytes(), out);
        }
        Value::Blob(b) => {
            out.push(TAG_BLOB);
            append_escaped(b, out);
        }
        Value::Array(items) => {
            out.push(TAG_ARRAY);
            for item in items {
                encode_value(item, out);
            }
            out.push(TAG_TERM);
        }
        Value::Document(doc) => {
            out.push(TAG_DOC);
            for (field, v) in doc.iter() {
                out.push(TAG_TEXT);
                append_escaped(field.as_bytes(), out);
                encode_value(v, out);
            }
            out.push(TAG_TERM);
        }
    }
}

fn append_escaped(bytes: &[u8], out: &mut KeyBuf) {
    for byte in bytes {
        if *byte == 0 {
            // Escape interior nulls so the terminator stays unambiguous.
            out.extend_from_slice(&[0x00, 0xFF]);
        } else {
            out.push(*byte);
        }
    }
    out.push(0x00);
}

/// Decodes a single encoded value, requiring the buffer to be fully
/// consumed.
pub fn decode_value(bytes: &[u8]) -> Result<Value, VellumError> {
    let (value, consumed) = decode_one(bytes)?;
    if consumed != bytes.len() {
        return Err(VellumError::Decode(format!(
            "trailing bytes after encoded value: {} of {}",
            bytes.len() - consumed,
            bytes.len()
        )));
    }
    Ok(value)
}

fn decode_one(bytes: &[u8]) -> Result<(Value, usize), VellumError> {
    let (&tag, rest) = bytes
        .split_first()
        .ok_or_else(|| VellumError::Decode("empty encoded value".into()))?;
    match tag {
        TAG_NULL => Ok((Value::Null, 1)),
        TAG_BOOL => match rest.first() {
            Some(0) => Ok((Value::Bool(false), 2)),
            Some(1) => Ok((Value::Bool(true), 2)),
            _ => Err(VellumError::Decode("malformed bool encoding".into())),
        },
        TAG_NUM => {
            let raw: [u8; 8] = rest
                .get(..8)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| VellumError::Decode("truncated numeric encoding".into()))?;
            let approx = unmap_double(u64::from_be_bytes(raw));
            match rest.get(8) {
                Some(&NUM_DOUBLE) => Ok((Value::Double(approx), 10)),
                Some(&NUM_INT_EQ) => {
                    if approx.fract() == 0.0 && (-TWO_POW_63..TWO_POW_63).contains(&approx) {
                        Ok((Value::Integer(approx as i64), 10))
                    } else {
                        Err(VellumError::Decode(
                            "integer encoding carries a non-integer approximation".into(),
                        ))
                    }
                }
                Some(&NUM_INT_BELOW) | Some(&NUM_INT_ABOVE) => {
                    let raw: [u8; 8] = rest
                        .get(9..17)
                        .and_then(|s| s.try_into().ok())
                        .ok_or_else(|| {
                            VellumError::Decode("truncated integer encoding".into())
                        })?;
                    let shifted = u64::from_be_bytes(raw) ^ SIGN_BIT;
                    Ok((Value::Integer(shifted as i64), 18))
                }
                Some(other) => Err(VellumError::Decode(format!(
                    "unknown numeric tie-break {other:#04x}"
                ))),
                None => Err(VellumError::Decode("truncated numeric encoding".into())),
            }
        }
        TAG_TEXT => {
            let (raw, consumed) = read_escaped(rest)?;
            let text = String::from_utf8(raw)
                .map_err(|_| VellumError::Decode("encoded text is not valid UTF-8".into()))?;
            Ok((Value::Text(text.into()), 1 + consumed))
        }
        TAG_BLOB => {
            let (raw, consumed) = read_escaped(rest)?;
            Ok((Value::Blob(raw), 1 + consumed))
        }
        TAG_ARRAY => {
            let mut items = Vec::new();
            let mut offset = 1;
            loop {
                match bytes.get(offset) {
                    Some(&TAG_TERM) => return Ok((Value::Array(items), offset + 1)),
                    Some(_) => {
                        let (item, consumed) = decode_one(&bytes[offset..])?;
                        items.push(item);
                        offset += consumed;
                    }
                    None => {
                        return Err(VellumError::Decode("unterminated array encoding".into()));
                    }
                }
            }
        }
        TAG_DOC => {
            let mut doc = FieldBuffer::new();
            let mut offset = 1;
            loop {
                match bytes.get(offset) {
                    Some(&TAG_TERM) => return Ok((Value::Document(doc), offset + 1)),
                    Some(&TAG_TEXT) => {
                        let (raw, consumed) = read_escaped(&bytes[offset + 1..])?;
                        let field = String::from_utf8(raw).map_err(|_| {
                            VellumError::Decode("encoded field name is not valid UTF-8".into())
                        })?;
                        offset += 1 + consumed;
                        let (value, consumed) = decode_one(&bytes[offset..])?;
                        doc.add(&field, value);
                        offset += consumed;
                    }
                    Some(other) => {
                        return Err(VellumError::Decode(format!(
                            "unexpected tag {other:#04x} inside document encoding"
                        )));
                    }
                    None => {
                        return Err(VellumError::Decode(
                            "unterminated document encoding".into(),
                        ));
                    }
                }
            }
        }
        other => Err(VellumError::Decode(format!(
            "unknown encoding tag {other:#04x}"
        ))),
    }
}

fn read_escaped(bytes: &[u8]) -> Result<(Vec<u8>, usize), VellumError> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            0x00 => {
                if bytes.get(i + 1) == Some(&0xFF) {
                    out.push(0x00);
                    i += 2;
                } else {
                    return Ok((out, i + 1));
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Err(VellumError::Decode(
        "unterminated text or blob encoding".into(),
    ))
}
