//! Secondary index over one document path.
//!
//! Non-unique rows are keyed `encoded value ++ 0x00 ++ encoded pk`, which
//! groups equal values while tolerating variable-length encodings; unique
//! rows are keyed by the encoded value alone so a duplicate collides on
//! write. Both layouts store the encoded primary key as the row value.

use crate::catalog::IndexInfo;
use crate::document::Value;
use crate::encoding::key::{EncodedKey, KEY_SEPARATOR, class_anchors, prefix_successor};
use crate::engine::{ByteRange, Direction, EngineTx, Store};
use crate::error::VellumError;
use std::ops::Bound;

/// Value bounds for an index scan.
#[derive(Debug, Clone, Default)]
pub struct IndexRange {
    pub low: Option<(Value, bool)>,
    pub high: Option<(Value, bool)>,
}

impl IndexRange {
    pub fn all() -> IndexRange {
        IndexRange::default()
    }

    pub fn eq(value: Value) -> IndexRange {
        IndexRange {
            low: Some((value.clone(), true)),
            high: Some((value, true)),
        }
    }
}

pub struct Index<'a> {
    tx: &'a dyn EngineTx,
    info: IndexInfo,
}

impl<'a> Index<'a> {
    pub fn new(tx: &'a dyn EngineTx, info: IndexInfo) -> Index<'a> {
        Index { tx, info }
    }

    pub fn info(&self) -> &IndexInfo {
        &self.info
    }

    fn store(&self) -> Result<Box<dyn Store + 'a>, VellumError> {
        self.tx.store(&self.info.store_name())
    }

    /// Coerces `value` to the indexed kind, when the index is typed.
    fn coerce(&self, value: &Value) -> Result<Value, VellumError> {
        match self.info.kind {
            Some(kind) => value.convert_to(kind).map_err(|_| VellumError::TypeMismatch {
                expected: kind.to_string(),
                actual: value.kind().to_string(),
            }),
            None => Ok(value.clone()),
        }
    }

    pub fn set(&self, value: &Value, pk: &[u8]) -> Result<(), VellumError> {
        let value = self.coerce(value)?;
        let encoded = EncodedKey::from_value(&value);
        let store = self.store()?;
        if self.info.unique {
            // Scan the whole equality class, so an integer collides with
            // the equal double on an untyped index.
            let (low, high) = class_anchors(&value);
            let occupied = ByteRange::new(
                Bound::Included(low.into_vec()),
                Bound::Included(high.into_vec()),
            );
            if let Some(entry) = store.iter(occupied, Direction::Forward).next() {
                entry?;
                return Err(VellumError::DuplicateIndexValue {
                    index: self.info.name.clone(),
                });
            }
            store.put(encoded.as_slice(), pk)
        } else {
            let row = encoded.join(&EncodedKey::from_bytes(pk.to_vec()));
            store.put(row.as_slice(), pk)
        }
    }

    /// Removes one index row. Deleting an absent row is a no-op so the
    /// callers can mirror documents whose indexed field was missing.
    pub fn delete(&self, value: &Value, pk: &[u8]) -> Result<(), VellumError> {
        let value = self.coerce(value)?;
        let encoded = EncodedKey::from_value(&value);
        let store = self.store()?;
        let row = if self.info.unique {
            encoded
        } else {
            encoded.join(&EncodedKey::from_bytes(pk.to_vec()))
        };
        match store.delete(row.as_slice()) {
            Ok(()) | Err(VellumError::KeyNotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn ascend(&self, range: &IndexRange) -> Result<Vec<Vec<u8>>, VellumError> {
        self.scan(range, Direction::Forward)
    }

    pub fn descend(&self, range: &IndexRange) -> Result<Vec<Vec<u8>>, VellumError> {
        self.scan(range, Direction::Backward)
    }

    /// Primary keys of every row whose indexed value falls in `range`,
    /// in the requested key order.
    pub fn scan(
        &self,
        range: &IndexRange,
        direction: Direction,
    ) -> Result<Vec<Vec<u8>>, VellumError> {
        if self.info.kind.is_none()
            && let (Some((low, _)), Some((high, _))) = (&range.low, &range.high)
            && low.kind() != high.kind()
            && !(low.is_numeric() && high.is_numeric())
        {
            return Err(VellumError::TypeMismatch {
                expected: low.kind().to_string(),
                actual: high.kind().to_string(),
            });
        }

        let Some(byte_range) = self.byte_range(range)? else {
            return Ok(Vec::new());
        };
        let store = self.store()?;
        let mut pks = Vec::new();
        for entry in store.iter(byte_range, direction) {
            let (_, pk) = entry?;
            pks.push(pk);
        }
        Ok(pks)
    }

    /// Translates value bounds into engine key bounds. Returns `None` for
    /// ranges that cannot match any key.
    ///
    /// Bounds anchor on the whole equality class of their value: an
    /// inclusive bound starts at the class's smallest encoding and an
    /// exclusive bound clears its largest, so `>= 5` and `>= 5.0` select
    /// the same rows.
    fn byte_range(&self, range: &IndexRange) -> Result<Option<ByteRange>, VellumError> {
        let start = match &range.low {
            None => Bound::Unbounded,
            Some((value, inclusive)) => {
                let (low, high) = class_anchors(&self.coerce(value)?);
                if *inclusive {
                    Bound::Included(low.into_vec())
                } else if self.info.unique {
                    Bound::Excluded(high.into_vec())
                } else {
                    // Skip every row prefixed by a member of the class.
                    match prefix_successor(high.as_slice()) {
                        Some(next) => Bound::Included(next),
                        None => return Ok(None),
                    }
                }
            }
        };
        let end = match &range.high {
            None => Bound::Unbounded,
            Some((value, inclusive)) => {
                let (low, high) = class_anchors(&self.coerce(value)?);
                if !*inclusive {
                    Bound::Excluded(low.into_vec())
                } else if self.info.unique {
                    Bound::Included(high.into_vec())
                } else {
                    match prefix_successor(high.as_slice()) {
                        Some(next) => Bound::Excluded(next),
                        None => Bound::Unbounded,
                    }
                }
            }
        };
        Ok(Some(ByteRange::new(start, end)))
    }

    /// Drops and recreates the backing store.
    pub fn truncate(&self) -> Result<(), VellumError> {
        let name = self.info.store_name();
        self.tx.drop_store(&name)?;
        self.tx.create_store(&name)
    }
}

// The separator sits below every encoding tag, keeping grouped rows
// adjacent; assert the invariant once here.
const _: () = assert!(KEY_SEPARATOR == 0x00);
