//! Document CRUD over one table's backing store.
//!
//! Rows are keyed by the encoded primary key and carry the record-encoded
//! document as their value. Every mutation keeps the table's secondary
//! indexes in step within the surrounding transaction.

use crate::catalog::{Catalog, IndexInfo, TableInfo};
use crate::document::{Document, FieldBuffer, Value};
use crate::encoding::key::EncodedKey;
use crate::encoding::record::{EncodedDocument, encode_document};
use crate::engine::{ByteRange, Direction, EngineTx, Store};
use crate::error::VellumError;
use crate::storage::index::Index;

pub struct Table<'a> {
    tx: &'a dyn EngineTx,
    info: TableInfo,
    indexes: Vec<IndexInfo>,
}

impl<'a> Table<'a> {
    pub fn new(tx: &'a dyn EngineTx, info: TableInfo, indexes: Vec<IndexInfo>) -> Table<'a> {
        Table { tx, info, indexes }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    pub fn indexes(&self) -> &[IndexInfo] {
        &self.indexes
    }

    fn store(&self) -> Result<Box<dyn Store + 'a>, VellumError> {
        self.tx.store(&self.info.storage_id)
    }

    /// Validates and coerces a document against the table's constraints:
    /// typed fields are converted, defaults fill missing fields, and
    /// NOT NULL is enforced afterwards.
    pub fn validate_document(&self, doc: &dyn Document) -> Result<FieldBuffer, VellumError> {
        let mut buf = FieldBuffer::from_document(doc)?;
        for constraint in &self.info.field_constraints {
            match buf.get_path(&constraint.path) {
                Ok(value) => {
                    if value.is_null() {
                        if constraint.not_null {
                            return Err(self.not_null_violation(constraint));
                        }
                    } else if let Some(kind) = constraint.kind
                        && value.kind() != kind
                    {
                        let converted =
                            value.convert_to(kind).map_err(|_| VellumError::TypeMismatch {
                                expected: kind.to_string(),
                                actual: value.kind().to_string(),
                            })?;
                        buf.set_path(&constraint.path, converted)?;
                    }
                }
                Err(VellumError::FieldNotFound) => {
                    if let Some(default) = &constraint.default_value {
                        let value = match constraint.kind {
                            Some(kind) => default.convert_to(kind)?,
                            None => default.clone(),
                        };
                        buf.set_path(&constraint.path, value)?;
                    } else if constraint.not_null || constraint.primary_key {
                        return Err(self.not_null_violation(constraint));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(buf)
    }

    fn not_null_violation(&self, constraint: &crate::catalog::FieldConstraint) -> VellumError {
        VellumError::NotNullViolation {
            table: self.info.name.clone(),
            path: constraint.path.to_string(),
        }
    }

    /// Inserts a document and returns its key together with the stored
    /// (validated and coerced) form.
    pub fn insert(
        &mut self,
        doc: &dyn Document,
    ) -> Result<(EncodedKey, FieldBuffer), VellumError> {
        let buf = self.validate_document(doc)?;

        let key = match self.info.primary_key() {
            Some(constraint) => {
                let value = buf
                    .get_path(&constraint.path)
                    .map_err(|_| self.not_null_violation(constraint))?;
                let value = match constraint.kind {
                    Some(kind) => value.convert_to(kind)?,
                    None => value,
                };
                EncodedKey::from_value(&value)
            }
            None => {
                let next = self.info.last_key + 1;
                self.info.last_key = next;
                Catalog::new(self.tx).update_last_key(&self.info.name, next)?;
                EncodedKey::from_value(&Value::Integer(next))
            }
        };

        let store = self.store()?;
        if store.get(key.as_slice()).is_ok() {
            return Err(VellumError::DuplicateDocument {
                table: self.info.name.clone(),
                key: hex::encode(key.as_slice()),
            });
        }
        store.put(key.as_slice(), &encode_document(&buf)?)?;
        drop(store);

        self.write_index_rows(&buf, &key)?;
        Ok((key, buf))
    }

    /// Loads a document by key.
    pub fn get(&self, key: &[u8]) -> Result<EncodedDocument, VellumError> {
        match self.store()?.get(key) {
            Ok(payload) => Ok(EncodedDocument::new(payload)),
            Err(VellumError::KeyNotFound) => Err(VellumError::DocumentNotFound),
            Err(e) => Err(e),
        }
    }

    /// Replaces the document stored under `key`. The key must exist; the
    /// previous payload's index rows are removed before the new ones land.
    pub fn replace(&self, key: &[u8], doc: &dyn Document) -> Result<FieldBuffer, VellumError> {
        let old = self.get(key)?;
        self.delete_index_rows(&old, key)?;

        let buf = self.validate_document(doc)?;
        self.store()?.put(key, &encode_document(&buf)?)?;
        let encoded = EncodedKey::from_bytes(key.to_vec());
        self.write_index_rows(&buf, &encoded)?;
        Ok(buf)
    }

    /// Deletes the document stored under `key` and its index rows.
    pub fn delete(&self, key: &[u8]) -> Result<(), VellumError> {
        let old = self.get(key)?;
        self.delete_index_rows(&old, key)?;
        self.store()?.delete(key)
    }

    /// Drops and recreates the table's store and every index store.
    pub fn truncate(&mut self) -> Result<(), VellumError> {
        self.tx.drop_store(&self.info.storage_id)?;
        self.tx.create_store(&self.info.storage_id)?;
        for info in &self.indexes {
            Index::new(self.tx, info.clone()).truncate()?;
        }
        Ok(())
    }

    /// All rows in primary-key order.
    pub fn scan_all(&self) -> Result<Vec<(EncodedKey, EncodedDocument)>, VellumError> {
        self.scan(ByteRange::all(), Direction::Forward)
    }

    /// Rows within a primary-key range, in the requested order.
    pub fn scan(
        &self,
        range: ByteRange,
        direction: Direction,
    ) -> Result<Vec<(EncodedKey, EncodedDocument)>, VellumError> {
        let store = self.store()?;
        let mut rows = Vec::new();
        for entry in store.iter(range, direction) {
            let (key, payload) = entry?;
            rows.push((EncodedKey::from_bytes(key), EncodedDocument::new(payload)));
        }
        Ok(rows)
    }

    /// Writes one row into every index whose path resolves on `doc`.
    /// Documents without the indexed field simply have no index row.
    fn write_index_rows(&self, doc: &FieldBuffer, key: &EncodedKey) -> Result<(), VellumError> {
        for info in &self.indexes {
            if let Ok(value) = doc.get_path(&info.path) {
                Index::new(self.tx, info.clone()).set(&value, key.as_slice())?;
            }
        }
        Ok(())
    }

    fn delete_index_rows(&self, doc: &EncodedDocument, key: &[u8]) -> Result<(), VellumError> {
        let buf = doc.to_field_buffer()?;
        for info in &self.indexes {
            if let Ok(value) = buf.get_path(&info.path) {
                Index::new(self.tx, info.clone()).delete(&value, key)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::{Catalog, FieldConstraint, IndexInfo, TableInfo};
    use crate::document::{Document, FieldBuffer, Path, Value, ValueKind};
    use crate::encoding::key::EncodedKey;
    use crate::engine::{Engine, EngineTx, MemoryEngine};
    use crate::error::VellumError;
    use crate::storage::index::{Index, IndexRange};

    fn doc(pairs: &[(&str, Value)]) -> FieldBuffer {
        let mut buf = FieldBuffer::new();
        for (field, value) in pairs {
            buf.add(field, value.clone());
        }
        buf
    }

    fn setup(engine: &MemoryEngine, constraints: Vec<FieldConstraint>) -> Box<dyn EngineTx + '_> {
        let tx = engine.begin(true).unwrap();
        {
            let catalog = Catalog::new(tx.as_ref());
            catalog.bootstrap().unwrap();
            catalog
                .create_table(TableInfo::new("t", constraints))
                .unwrap();
        }
        tx
    }

    #[test]
    fn implicit_keys_count_up_from_one() {
        let engine = MemoryEngine::new();
        let tx = setup(&engine, vec![]);
        let catalog = Catalog::new(tx.as_ref());
        let mut table = catalog.table("t").unwrap();

        let (k1, _) = table.insert(&doc(&[("a", Value::Integer(10))])).unwrap();
        let (k2, _) = table.insert(&doc(&[("a", Value::Integer(20))])).unwrap();
        assert_eq!(k1, EncodedKey::from_value(&Value::Integer(1)));
        assert_eq!(k2, EncodedKey::from_value(&Value::Integer(2)));

        let loaded = table.get(k1.as_slice()).unwrap();
        assert_eq!(loaded.get("a").unwrap(), Value::Integer(10));
        // The counter survives in the catalog record.
        assert_eq!(catalog.get_table("t").unwrap().last_key, 2);
    }

    #[test]
    fn declared_primary_key_collision_is_a_duplicate_document() {
        let engine = MemoryEngine::new();
        let tx = setup(
            &engine,
            vec![FieldConstraint {
                path: Path::field("a"),
                kind: Some(ValueKind::Integer),
                primary_key: true,
                not_null: false,
                default_value: None,
            }],
        );
        let catalog = Catalog::new(tx.as_ref());
        let mut table = catalog.table("t").unwrap();

        table.insert(&doc(&[("a", Value::Integer(5))])).unwrap();
        assert!(matches!(
            table.insert(&doc(&[("a", Value::Integer(5))])),
            Err(VellumError::DuplicateDocument { .. })
        ));
        // A missing primary key cannot be inserted either.
        assert!(matches!(
            table.insert(&doc(&[("b", Value::Integer(1))])),
            Err(VellumError::NotNullViolation { .. })
        ));
    }

    #[test]
    fn constraints_coerce_default_and_enforce_not_null() {
        let engine = MemoryEngine::new();
        let tx = setup(
            &engine,
            vec![
                FieldConstraint {
                    path: Path::field("age"),
                    kind: Some(ValueKind::Integer),
                    primary_key: false,
                    not_null: true,
                    default_value: None,
                },
                FieldConstraint {
                    path: Path::field("active"),
                    kind: Some(ValueKind::Bool),
                    primary_key: false,
                    not_null: false,
                    default_value: Some(Value::Bool(true)),
                },
            ],
        );
        let catalog = Catalog::new(tx.as_ref());
        let mut table = catalog.table("t").unwrap();

        // Text coerces into the declared integer kind; the default fills in.
        let (key, stored) = table.insert(&doc(&[("age", Value::text("42"))])).unwrap();
        assert_eq!(stored.get_field("age"), Some(&Value::Integer(42)));
        assert_eq!(stored.get_field("active"), Some(&Value::Bool(true)));
        let loaded = table.get(key.as_slice()).unwrap();
        assert_eq!(loaded.get("active").unwrap(), Value::Bool(true));

        assert!(matches!(
            table.insert(&doc(&[("other", Value::Integer(1))])),
            Err(VellumError::NotNullViolation { .. })
        ));
        assert!(matches!(
            table.insert(&doc(&[("age", Value::Null)])),
            Err(VellumError::NotNullViolation { .. })
        ));
    }

    #[test]
    fn replace_rewrites_index_rows() {
        let engine = MemoryEngine::new();
        let tx = setup(&engine, vec![]);
        let catalog = Catalog::new(tx.as_ref());
        catalog
            .create_index(IndexInfo {
                name: "ix_a".into(),
                table: "t".into(),
                path: Path::field("a"),
                unique: false,
                kind: None,
                seq: 0,
            })
            .unwrap();
        let mut table = catalog.table("t").unwrap();

        let (key, _) = table.insert(&doc(&[("a", Value::Integer(1))])).unwrap();
        table
            .replace(key.as_slice(), &doc(&[("a", Value::Integer(2))]))
            .unwrap();

        let index = Index::new(tx.as_ref(), catalog.get_index("ix_a").unwrap());
        assert!(index.ascend(&IndexRange::eq(Value::Integer(1))).unwrap().is_empty());
        assert_eq!(
            index.ascend(&IndexRange::eq(Value::Integer(2))).unwrap(),
            vec![key.as_slice().to_vec()]
        );

        assert!(matches!(
            table.replace(
                EncodedKey::from_value(&Value::Integer(99)).as_slice(),
                &doc(&[("a", Value::Integer(3))])
            ),
            Err(VellumError::DocumentNotFound)
        ));
    }

    #[test]
    fn delete_removes_row_and_index_entries() {
        let engine = MemoryEngine::new();
        let tx = setup(&engine, vec![]);
        let catalog = Catalog::new(tx.as_ref());
        catalog
            .create_index(IndexInfo {
                name: "ix_a".into(),
                table: "t".into(),
                path: Path::field("a"),
                unique: false,
                kind: None,
                seq: 0,
            })
            .unwrap();
        let mut table = catalog.table("t").unwrap();
        let (key, _) = table.insert(&doc(&[("a", Value::Integer(1))])).unwrap();

        table.delete(key.as_slice()).unwrap();
        assert!(matches!(
            table.get(key.as_slice()),
            Err(VellumError::DocumentNotFound)
        ));
        assert!(matches!(
            table.delete(key.as_slice()),
            Err(VellumError::DocumentNotFound)
        ));
        let index = Index::new(tx.as_ref(), catalog.get_index("ix_a").unwrap());
        assert!(index.ascend(&IndexRange::all()).unwrap().is_empty());
    }

    #[test]
    fn scan_returns_rows_in_key_order() {
        let engine = MemoryEngine::new();
        let tx = setup(
            &engine,
            vec![FieldConstraint {
                path: Path::field("id"),
                kind: Some(ValueKind::Integer),
                primary_key: true,
                not_null: false,
                default_value: None,
            }],
        );
        let catalog = Catalog::new(tx.as_ref());
        let mut table = catalog.table("t").unwrap();
        for id in [3, 1, 2] {
            table.insert(&doc(&[("id", Value::Integer(id))])).unwrap();
        }
        let ids: Vec<_> = table
            .scan_all()
            .unwrap()
            .into_iter()
            .map(|(_, d)| d.get("id").unwrap())
            .collect();
        assert_eq!(
            ids,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
    }

    #[test]
    fn unique_index_violation_surfaces_through_insert() {
        let engine = MemoryEngine::new();
        let tx = setup(&engine, vec![]);
        let catalog = Catalog::new(tx.as_ref());
        catalog
            .create_index(IndexInfo {
                name: "ix_u".into(),
                table: "t".into(),
                path: Path::field("email"),
                unique: true,
                kind: None,
                seq: 0,
            })
            .unwrap();
        let mut table = catalog.table("t").unwrap();
        table.insert(&doc(&[("email", Value::text("a@x"))])).unwrap();
        assert!(matches!(
            table.insert(&doc(&[("email", Value::text("a@x"))])),
            Err(VellumError::DuplicateIndexValue { .. })
        ));
    }
}
