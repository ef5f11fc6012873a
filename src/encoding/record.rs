//! Self-describing record encoding for document payloads.
//!
//! Documents are stored as MessagePack maps of field name to value. The
//! decoded handle keeps the raw bytes and decodes on demand: iteration
//! walks the map lazily and field lookup skips over intervening values,
//! so reading one field of a wide document never materializes the rest.

use crate::document::{Document, FieldBuffer, Path, PathFragment, Value, get_in_value};
use crate::error::VellumError;
use compact_str::CompactString;
use rmp::Marker;
use rmp::decode::Bytes;
use std::fmt::Display;

fn enc_err(e: impl Display) -> VellumError {
    VellumError::Encode(e.to_string())
}

fn dec_err(e: impl Display) -> VellumError {
    VellumError::Decode(e.to_string())
}

/// Encodes a document into its record representation.
pub fn encode_document(doc: &dyn Document) -> Result<Vec<u8>, VellumError> {
    let fields: Vec<(CompactString, Value)> =
        doc.iter_fields().collect::<Result<_, VellumError>>()?;
    let mut buf = Vec::new();
    rmp::encode::write_map_len(&mut buf, fields.len() as u32).map_err(enc_err)?;
    for (field, value) in &fields {
        rmp::encode::write_str(&mut buf, field).map_err(enc_err)?;
        write_value(&mut buf, value)?;
    }
    Ok(buf)
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), VellumError> {
    match value {
        Value::Null => rmp::encode::write_nil(buf).map_err(enc_err)?,
        Value::Bool(b) => rmp::encode::write_bool(buf, *b).map_err(enc_err)?,
        Value::Integer(i) => {
            rmp::encode::write_sint(buf, *i).map_err(enc_err)?;
        }
        Value::Double(d) => {
            rmp::encode::write_f64(buf, *d).map_err(enc_err)?;
        }
        Value::Text(s) => rmp::encode::write_str(buf, s).map_err(enc_err)?,
        Value::Blob(b) => rmp::encode::write_bin(buf, b).map_err(enc_err)?,
        Value::Array(items) => {
            rmp::encode::write_array_len(buf, items.len() as u32).map_err(enc_err)?;
            for item in items {
                write_value(buf, item)?;
            }
        }
        Value::Document(doc) => {
            rmp::encode::write_map_len(buf, doc.len() as u32).map_err(enc_err)?;
            for (field, v) in doc.iter() {
                rmp::encode::write_str(buf, field).map_err(enc_err)?;
                write_value(buf, v)?;
            }
        }
    }
    Ok(())
}

/// A document handle over encoded record bytes. Wrapping is free; a
/// malformed buffer surfaces a decode error at the point of access.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedDocument {
    bytes: Vec<u8>,
}

impl EncodedDocument {
    pub fn new(bytes: Vec<u8>) -> EncodedDocument {
        EncodedDocument { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Eagerly decodes the whole record into a buffer.
    pub fn to_field_buffer(&self) -> Result<FieldBuffer, VellumError> {
        let mut buf = FieldBuffer::new();
        for entry in self.iter_fields() {
            let (field, value) = entry?;
            buf.add(&field, value);
        }
        Ok(buf)
    }

    /// Resolves `path` against the record.
    pub fn get_path(&self, path: &Path) -> Result<Value, VellumError> {
        let (first, rest) = path
            .fragments()
            .split_first()
            .ok_or(VellumError::FieldNotFound)?;
        let PathFragment::Field(name) = first else {
            return Err(VellumError::FieldNotFound);
        };
        let value = self.get(name)?;
        get_in_value(&value, rest)
    }
}

impl Document for EncodedDocument {
    fn iter_fields(
        &self,
    ) -> Box<dyn Iterator<Item = Result<(CompactString, Value), VellumError>> + '_> {
        let mut rd = Bytes::new(&self.bytes);
        let header = read_map_header(&mut rd);
        Box::new(RecordIter {
            rd,
            state: match header {
                Ok(len) => IterState::Fields(len),
                Err(e) => IterState::Failed(Some(e)),
            },
        })
    }

    fn get(&self, field: &str) -> Result<Value, VellumError> {
        let mut rd = Bytes::new(&self.bytes);
        let len = read_map_header(&mut rd)?;
        for _ in 0..len {
            let name = read_str_bytes(&mut rd)?;
            if name == field.as_bytes() {
                return read_value(&mut rd);
            }
            skip_value(&mut rd)?;
        }
        Err(VellumError::FieldNotFound)
    }
}

enum IterState {
    Fields(u32),
    Failed(Option<VellumError>),
}

struct RecordIter<'a> {
    rd: Bytes<'a>,
    state: IterState,
}

impl Iterator for RecordIter<'_> {
    type Item = Result<(CompactString, Value), VellumError>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.state {
            IterState::Failed(err) => err.take().map(Err),
            IterState::Fields(0) => None,
            IterState::Fields(remaining) => {
                *remaining -= 1;
                let entry = read_str_bytes(&mut self.rd)
                    .and_then(|name| {
                        std::str::from_utf8(name)
                            .map(CompactString::from)
                            .map_err(|_| {
                                VellumError::Decode("field name is not valid UTF-8".into())
                            })
                    })
                    .and_then(|field| Ok((field, read_value(&mut self.rd)?)));
                if entry.is_err() {
                    // Stop after the first decode failure.
                    self.state = IterState::Fields(0);
                    return Some(entry);
                }
                Some(entry)
            }
        }
    }
}

fn read_marker(rd: &mut Bytes<'_>) -> Result<Marker, VellumError> {
    rmp::decode::read_marker(rd).map_err(|_| VellumError::Decode("truncated record".into()))
}

fn take_bytes<'a>(rd: &mut Bytes<'a>, n: usize) -> Result<&'a [u8], VellumError> {
    let rem = rd.remaining_slice();
    if rem.len() < n {
        return Err(VellumError::Decode("truncated record".into()));
    }
    let (head, tail) = rem.split_at(n);
    *rd = Bytes::new(tail);
    Ok(head)
}

fn read_be<const N: usize>(rd: &mut Bytes<'_>) -> Result<[u8; N], VellumError> {
    let raw = take_bytes(rd, N)?;
    Ok(raw.try_into().expect("slice length checked"))
}

fn read_map_header(rd: &mut Bytes<'_>) -> Result<u32, VellumError> {
    match read_marker(rd)? {
        Marker::FixMap(len) => Ok(u32::from(len)),
        Marker::Map16 => Ok(u32::from(u16::from_be_bytes(read_be::<2>(rd)?))),
        Marker::Map32 => Ok(u32::from_be_bytes(read_be::<4>(rd)?)),
        other => Err(dec_err(format!(
            "record is not a map (marker {other:?})"
        ))),
    }
}

fn read_str_bytes<'a>(rd: &mut Bytes<'a>) -> Result<&'a [u8], VellumError> {
    let len = match read_marker(rd)? {
        Marker::FixStr(len) => usize::from(len),
        Marker::Str8 => usize::from(u8::from_be_bytes(read_be::<1>(rd)?)),
        Marker::Str16 => usize::from(u16::from_be_bytes(read_be::<2>(rd)?)),
        Marker::Str32 => u32::from_be_bytes(read_be::<4>(rd)?) as usize,
        other => {
            return Err(dec_err(format!(
                "expected a field name string, got marker {other:?}"
            )));
        }
    };
    take_bytes(rd, len)
}

fn read_value(rd: &mut Bytes<'_>) -> Result<Value, VellumError> {
    let marker = read_marker(rd)?;
    match marker {
        Marker::Null => Ok(Value::Null),
        Marker::True => Ok(Value::Bool(true)),
        Marker::False => Ok(Value::Bool(false)),
        Marker::FixPos(n) => Ok(Value::Integer(i64::from(n))),
        Marker::FixNeg(n) => Ok(Value::Integer(i64::from(n))),
        Marker::U8 => Ok(Value::Integer(i64::from(u8::from_be_bytes(read_be::<1>(rd)?)))),
        Marker::U16 => Ok(Value::Integer(i64::from(u16::from_be_bytes(read_be::<2>(rd)?)))),
        Marker::U32 => Ok(Value::Integer(i64::from(u32::from_be_bytes(read_be::<4>(rd)?)))),
        Marker::U64 => {
            let n = u64::from_be_bytes(read_be::<8>(rd)?);
            i64::try_from(n)
                .map(Value::Integer)
                .map_err(|_| VellumError::Decode("integer out of range".into()))
        }
        Marker::I8 => Ok(Value::Integer(i64::from(i8::from_be_bytes(read_be::<1>(rd)?)))),
        Marker::I16 => Ok(Value::Integer(i64::from(i16::from_be_bytes(read_be::<2>(rd)?)))),
        Marker::I32 => Ok(Value::Integer(i64::from(i32::from_be_bytes(read_be::<4>(rd)?)))),
        Marker::I64 => Ok(Value::Integer(i64::from_be_bytes(read_be::<8>(rd)?))),
        Marker::F32 => Ok(Value::Double(f64::from(f32::from_be_bytes(read_be::<4>(rd)?)))),
        Marker::F64 => Ok(Value::Double(f64::from_be_bytes(read_be::<8>(rd)?))),
        Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
            // Re-dispatch through the string reader by reconstructing the
            // length from the marker we already consumed.
            let len = match marker {
                Marker::FixStr(len) => usize::from(len),
                Marker::Str8 => usize::from(u8::from_be_bytes(read_be::<1>(rd)?)),
                Marker::Str16 => usize::from(u16::from_be_bytes(read_be::<2>(rd)?)),
                Marker::Str32 => u32::from_be_bytes(read_be::<4>(rd)?) as usize,
                _ => unreachable!(),
            };
            let raw = take_bytes(rd, len)?;
            std::str::from_utf8(raw)
                .map(|s| Value::Text(CompactString::from(s)))
                .map_err(|_| VellumError::Decode("text is not valid UTF-8".into()))
        }
        Marker::Bin8 => {
            let len = usize::from(u8::from_be_bytes(read_be::<1>(rd)?));
            Ok(Value::Blob(take_bytes(rd, len)?.to_vec()))
        }
        Marker::Bin16 => {
            let len = usize::from(u16::from_be_bytes(read_be::<2>(rd)?));
            Ok(Value::Blob(take_bytes(rd, len)?.to_vec()))
        }
        Marker::Bin32 => {
            let len = u32::from_be_bytes(read_be::<4>(rd)?) as usize;
            Ok(Value::Blob(take_bytes(rd, len)?.to_vec()))
        }
        Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => {
            let len = match marker {
                Marker::FixArray(len) => u32::from(len),
                Marker::Array16 => u32::from(u16::from_be_bytes(read_be::<2>(rd)?)),
                Marker::Array32 => u32::from_be_bytes(read_be::<4>(rd)?),
                _ => unreachable!(),
            };
            let mut items = Vec::with_capacity(len.min(1024) as usize);
            for _ in 0..len {
                items.push(read_value(rd)?);
            }
            Ok(Value::Array(items))
        }
        Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => {
            let len = match marker {
                Marker::FixMap(len) => u32::from(len),
                Marker::Map16 => u32::from(u16::from_be_bytes(read_be::<2>(rd)?)),
                Marker::Map32 => u32::from_be_bytes(read_be::<4>(rd)?),
                _ => unreachable!(),
            };
            let mut doc = FieldBuffer::new();
            for _ in 0..len {
                let name = read_str_bytes(rd)?;
                let field = std::str::from_utf8(name)
                    .map_err(|_| VellumError::Decode("field name is not valid UTF-8".into()))?
                    .to_owned();
                doc.add(&field, read_value(rd)?);
            }
            Ok(Value::Document(doc))
        }
        other => Err(dec_err(format!("unsupported record marker {other:?}"))),
    }
}

/// Skips one encoded value without materializing it.
fn skip_value(rd: &mut Bytes<'_>) -> Result<(), VellumError> {
    let marker = read_marker(rd)?;
    match marker {
        Marker::Null
        | Marker::True
        | Marker::False
        | Marker::FixPos(_)
        | Marker::FixNeg(_) => Ok(()),
        Marker::U8 | Marker::I8 => take_bytes(rd, 1).map(drop),
        Marker::U16 | Marker::I16 => take_bytes(rd, 2).map(drop),
        Marker::U32 | Marker::I32 | Marker::F32 => take_bytes(rd, 4).map(drop),
        Marker::U64 | Marker::I64 | Marker::F64 => take_bytes(rd, 8).map(drop),
        Marker::FixStr(len) => take_bytes(rd, usize::from(len)).map(drop),
        Marker::Str8 | Marker::Bin8 => {
            let len = usize::from(u8::from_be_bytes(read_be::<1>(rd)?));
            take_bytes(rd, len).map(drop)
        }
        Marker::Str16 | Marker::Bin16 => {
            let len = usize::from(u16::from_be_bytes(read_be::<2>(rd)?));
            take_bytes(rd, len).map(drop)
        }
        Marker::Str32 | Marker::Bin32 => {
            let len = u32::from_be_bytes(read_be::<4>(rd)?) as usize;
            take_bytes(rd, len).map(drop)
        }
        Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => {
            let len = match marker {
                Marker::FixArray(len) => u32::from(len),
                Marker::Array16 => u32::from(u16::from_be_bytes(read_be::<2>(rd)?)),
                Marker::Array32 => u32::from_be_bytes(read_be::<4>(rd)?),
                _ => unreachable!(),
            };
            for _ in 0..len {
                skip_value(rd)?;
            }
            Ok(())
        }
        Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => {
            let len = match marker {
                Marker::FixMap(len) => u32::from(len),
                Marker::Map16 => u32::from(u16::from_be_bytes(read_be::<2>(rd)?)),
                Marker::Map32 => u32::from_be_bytes(read_be::<4>(rd)?),
                _ => unreachable!(),
            };
            for _ in 0..len {
                skip_value(rd)?;
                skip_value(rd)?;
            }
            Ok(())
        }
        other => Err(dec_err(format!("unsupported record marker {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::{EncodedDocument, encode_document};
    use crate::document::{Document, FieldBuffer, Value};

    fn sample() -> FieldBuffer {
        let mut inner = FieldBuffer::new();
        inner.add("nested", Value::Bool(true));
        let mut buf = FieldBuffer::new();
        buf.add("a", Value::Integer(-42));
        buf.add("b", Value::text("hello"));
        buf.add("c", Value::Double(2.5));
        buf.add("d", Value::Blob(vec![1, 2, 3]));
        buf.add("e", Value::Array(vec![Value::Null, Value::Integer(7)]));
        buf.add("f", Value::Document(inner));
        buf
    }

    #[test]
    fn record_round_trips_in_field_order() {
        let source = sample();
        let bytes = encode_document(&source).unwrap();
        let decoded = EncodedDocument::new(bytes).to_field_buffer().unwrap();
        assert_eq!(source, decoded);
        let order: Vec<_> = decoded.iter().map(|(f, _)| f.to_string()).collect();
        assert_eq!(order, ["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn lazy_get_skips_intervening_values() {
        let bytes = encode_document(&sample()).unwrap();
        let doc = EncodedDocument::new(bytes);
        assert_eq!(doc.get("c").unwrap(), Value::Double(2.5));
        assert_eq!(
            doc.get("e").unwrap(),
            Value::Array(vec![Value::Null, Value::Integer(7)])
        );
        assert!(matches!(
            doc.get("missing"),
            Err(crate::error::VellumError::FieldNotFound)
        ));
    }

    #[test]
    fn malformed_buffer_fails_at_access_not_wrap() {
        let doc = EncodedDocument::new(vec![0xC1, 0xFF]);
        assert!(doc.get("a").is_err());
        let first = doc.iter_fields().next();
        assert!(matches!(first, Some(Err(_))));
    }

    #[test]
    fn integer_extremes_round_trip() {
        let mut buf = FieldBuffer::new();
        buf.add("min", Value::Integer(i64::MIN));
        buf.add("max", Value::Integer(i64::MAX));
        buf.add("zero", Value::Integer(0));
        let bytes = encode_document(&buf).unwrap();
        let decoded = EncodedDocument::new(bytes).to_field_buffer().unwrap();
        assert_eq!(buf, decoded);
    }
}
