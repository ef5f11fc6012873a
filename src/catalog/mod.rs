//! The persisted catalog: authoritative definitions of tables and
//! indexes, stored in two reserved stores. Every DDL change goes through
//! here inside a write transaction and is unwound by rollback like any
//! other write.

use crate::document::{Path, Value, ValueKind};
use crate::engine::EngineTx;
use crate::error::VellumError;
use crate::storage::index::Index;
use crate::storage::table::Table;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const TABLES_STORE: &str = "__genji_tables";
pub const INDEXES_STORE: &str = "__genji_indexes";
pub const RESERVED_PREFIX: &str = "__genji_";

/// Key of the storage-id sequence inside the tables store. Table names
/// with the reserved prefix are rejected, so it cannot collide.
const STORE_SEQ_KEY: &[u8] = b"__genji_store_seq";

/// One declared constraint on a document path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConstraint {
    pub path: Path,
    pub kind: Option<ValueKind>,
    pub primary_key: bool,
    pub not_null: bool,
    pub default_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub field_constraints: Vec<FieldConstraint>,
    pub last_key: i64,
    pub storage_id: String,
}

impl TableInfo {
    pub fn new(name: &str, field_constraints: Vec<FieldConstraint>) -> TableInfo {
        TableInfo {
            name: name.to_string(),
            field_constraints,
            last_key: 0,
            storage_id: String::new(),
        }
    }

    pub fn primary_key(&self) -> Option<&FieldConstraint> {
        self.field_constraints.iter().find(|c| c.primary_key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub table: String,
    pub path: Path,
    pub unique: bool,
    pub kind: Option<ValueKind>,
    /// Creation order, used by the planner to break ties between
    /// candidate indexes.
    #[serde(default)]
    pub seq: u64,
}

impl IndexInfo {
    /// Name of the engine store backing this index.
    pub fn store_name(&self) -> String {
        format!("i{}", self.name)
    }
}

/// A borrowed catalog handle, valid for the duration of one transaction.
pub struct Catalog<'a> {
    tx: &'a dyn EngineTx,
}

fn encode_meta<T: Serialize>(value: &T) -> Result<Vec<u8>, VellumError> {
    rmp_serde::to_vec(value).map_err(|e| VellumError::Encode(e.to_string()))
}

fn decode_meta<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, VellumError> {
    rmp_serde::from_slice(bytes).map_err(|e| VellumError::Decode(e.to_string()))
}

impl<'a> Catalog<'a> {
    pub fn new(tx: &'a dyn EngineTx) -> Catalog<'a> {
        Catalog { tx }
    }

    pub fn tx(&self) -> &'a dyn EngineTx {
        self.tx
    }

    /// Creates the reserved stores when they are absent. Idempotent.
    pub fn bootstrap(&self) -> Result<(), VellumError> {
        for name in [TABLES_STORE, INDEXES_STORE] {
            match self.tx.create_store(name) {
                Ok(()) | Err(VellumError::StoreExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn next_seq(&self) -> Result<u64, VellumError> {
        let store = self.tx.store(TABLES_STORE)?;
        let seq: u64 = match store.get(STORE_SEQ_KEY) {
            Ok(bytes) => decode_meta(&bytes)?,
            Err(VellumError::KeyNotFound) => 0,
            Err(e) => return Err(e),
        };
        let next = seq + 1;
        store.put(STORE_SEQ_KEY, &encode_meta(&next)?)?;
        Ok(next)
    }

    pub fn create_table(&self, mut info: TableInfo) -> Result<TableInfo, VellumError> {
        if info.name.starts_with(RESERVED_PREFIX) {
            return Err(VellumError::Validation(format!(
                "table name '{}' uses the reserved prefix '{RESERVED_PREFIX}'",
                info.name
            )));
        }
        let store = self.tx.store(TABLES_STORE)?;
        if store.get(info.name.as_bytes()).is_ok() {
            return Err(VellumError::TableExists(info.name));
        }
        info.storage_id = format!("t{}", self.next_seq()?);
        self.tx.create_store(&info.storage_id)?;
        store.put(info.name.as_bytes(), &encode_meta(&info)?)?;
        info!(table = %info.name, storage_id = %info.storage_id, "created table");
        Ok(info)
    }

    pub fn get_table(&self, name: &str) -> Result<TableInfo, VellumError> {
        let store = self.tx.store(TABLES_STORE)?;
        match store.get(name.as_bytes()) {
            Ok(bytes) => decode_meta(&bytes),
            Err(VellumError::KeyNotFound) => Err(VellumError::TableNotFound(name.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Persists an updated table record (used for `last_key` bumps).
    pub fn put_table_record(&self, info: &TableInfo) -> Result<(), VellumError> {
        let store = self.tx.store(TABLES_STORE)?;
        if store.get(info.name.as_bytes()).is_err() {
            return Err(VellumError::TableNotFound(info.name.clone()));
        }
        store.put(info.name.as_bytes(), &encode_meta(info)?)
    }

    /// Bumps the implicit-key counter. The new value must be greater than
    /// the stored one.
    pub fn update_last_key(&self, table: &str, new_value: i64) -> Result<(), VellumError> {
        let mut info = self.get_table(table)?;
        if new_value <= info.last_key {
            return Err(VellumError::Validation(format!(
                "last_key must grow monotonically: {} -> {}",
                info.last_key, new_value
            )));
        }
        info.last_key = new_value;
        self.put_table_record(&info)
    }

    pub fn drop_table(&self, name: &str) -> Result<TableInfo, VellumError> {
        let info = self.get_table(name)?;
        for index in self.list_indexes(Some(name))? {
            self.drop_index(&index.name)?;
        }
        self.tx.store(TABLES_STORE)?.delete(name.as_bytes())?;
        self.tx.drop_store(&info.storage_id)?;
        info!(table = %name, "dropped table");
        Ok(info)
    }

    pub fn list_tables(&self) -> Result<Vec<String>, VellumError> {
        let store = self.tx.store(TABLES_STORE)?;
        let mut names = Vec::new();
        for entry in store.iter(crate::engine::ByteRange::all(), crate::engine::Direction::Forward)
        {
            let (key, _) = entry?;
            let name = String::from_utf8(key)
                .map_err(|_| VellumError::Decode("table name is not valid UTF-8".into()))?;
            if !name.starts_with(RESERVED_PREFIX) {
                names.push(name);
            }
        }
        Ok(names)
    }

    pub fn create_index(&self, mut info: IndexInfo) -> Result<(), VellumError> {
        let store = self.tx.store(INDEXES_STORE)?;
        let key = index_record_key(&info.name);
        if store.get(&key).is_ok() {
            return Err(VellumError::IndexExists(info.name));
        }
        // The table must exist before the index definition lands.
        let table_info = self.get_table(&info.table)?;
        info.seq = self.next_seq()?;
        self.tx.create_store(&info.store_name())?;
        store.put(&key, &encode_meta(&info)?)?;

        // Populate from the table right away so the index is usable in
        // this same transaction.
        let table = Table::new(self.tx, table_info, vec![info.clone()]);
        let index = Index::new(self.tx, info.clone());
        let mut populated = 0u64;
        for row in table.scan_all()? {
            let (key, doc) = row;
            if let Ok(value) = doc.get_path(&info.path) {
                index.set(&value, key.as_slice())?;
                populated += 1;
            }
        }
        info!(index = %info.name, table = %info.table, rows = populated, "created index");
        Ok(())
    }

    pub fn get_index(&self, name: &str) -> Result<IndexInfo, VellumError> {
        let store = self.tx.store(INDEXES_STORE)?;
        match store.get(&index_record_key(name)) {
            Ok(bytes) => decode_meta(&bytes),
            Err(VellumError::KeyNotFound) => Err(VellumError::IndexNotFound(name.to_string())),
            Err(e) => Err(e),
        }
    }

    pub fn drop_index(&self, name: &str) -> Result<IndexInfo, VellumError> {
        let info = self.get_index(name)?;
        self.tx.store(INDEXES_STORE)?.delete(&index_record_key(name))?;
        self.tx.drop_store(&info.store_name())?;
        info!(index = %name, "dropped index");
        Ok(info)
    }

    pub fn list_indexes(&self, table: Option<&str>) -> Result<Vec<IndexInfo>, VellumError> {
        let store = self.tx.store(INDEXES_STORE)?;
        let mut out = Vec::new();
        for entry in store.iter(crate::engine::ByteRange::all(), crate::engine::Direction::Forward)
        {
            let (_, bytes) = entry?;
            let info: IndexInfo = decode_meta(&bytes)?;
            if table.is_none_or(|t| info.table == t) {
                out.push(info);
            }
        }
        Ok(out)
    }

    /// Opens a table handle with its indexes loaded.
    pub fn table(&self, name: &str) -> Result<Table<'a>, VellumError> {
        let info = self.get_table(name)?;
        let indexes = self.list_indexes(Some(name))?;
        Ok(Table::new(self.tx, info, indexes))
    }

    /// Rebuilds one index, or every index when `name` is `None`.
    pub fn reindex(&self, name: Option<&str>) -> Result<(), VellumError> {
        let targets = match name {
            Some(n) => vec![self.get_index(n)?],
            None => self.list_indexes(None)?,
        };
        for info in targets {
            let index = Index::new(self.tx, info.clone());
            index.truncate()?;
            let table_info = self.get_table(&info.table)?;
            let table = Table::new(self.tx, table_info, Vec::new());
            for (key, doc) in table.scan_all()? {
                if let Ok(value) = doc.get_path(&info.path) {
                    index.set(&value, key.as_slice())?;
                }
            }
            info!(index = %info.name, "rebuilt index");
        }
        Ok(())
    }
}

fn index_record_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 1);
    key.push(b'i');
    key.extend_from_slice(name.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::{Catalog, FieldConstraint, IndexInfo, TableInfo};
    use crate::document::{Path, ValueKind};
    use crate::engine::{Engine, MemoryEngine};
    use crate::error::VellumError;

    fn constraints() -> Vec<FieldConstraint> {
        vec![FieldConstraint {
            path: Path::field("id"),
            kind: Some(ValueKind::Integer),
            primary_key: true,
            not_null: false,
            default_value: None,
        }]
    }

    #[test]
    fn create_and_get_table_round_trips() {
        let engine = MemoryEngine::new();
        let tx = engine.begin(true).unwrap();
        let catalog = Catalog::new(tx.as_ref());
        catalog.bootstrap().unwrap();

        let created = catalog
            .create_table(TableInfo::new("users", constraints()))
            .unwrap();
        assert_eq!(created.storage_id, "t1");

        let loaded = catalog.get_table("users").unwrap();
        assert_eq!(loaded, created);
        assert!(matches!(
            catalog.create_table(TableInfo::new("users", vec![])),
            Err(VellumError::TableExists(_))
        ));
        assert_eq!(catalog.list_tables().unwrap(), vec!["users"]);
    }

    #[test]
    fn storage_ids_are_unique_across_tables() {
        let engine = MemoryEngine::new();
        let tx = engine.begin(true).unwrap();
        let catalog = Catalog::new(tx.as_ref());
        catalog.bootstrap().unwrap();
        let a = catalog.create_table(TableInfo::new("a", vec![])).unwrap();
        let b = catalog.create_table(TableInfo::new("b", vec![])).unwrap();
        assert_ne!(a.storage_id, b.storage_id);
    }

    #[test]
    fn reserved_prefix_is_rejected() {
        let engine = MemoryEngine::new();
        let tx = engine.begin(true).unwrap();
        let catalog = Catalog::new(tx.as_ref());
        catalog.bootstrap().unwrap();
        assert!(matches!(
            catalog.create_table(TableInfo::new("__genji_evil", vec![])),
            Err(VellumError::Validation(_))
        ));
    }

    #[test]
    fn drop_table_cascades_over_indexes() {
        let engine = MemoryEngine::new();
        let tx = engine.begin(true).unwrap();
        let catalog = Catalog::new(tx.as_ref());
        catalog.bootstrap().unwrap();
        catalog.create_table(TableInfo::new("t", vec![])).unwrap();
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

        catalog.drop_table("t").unwrap();
        assert!(matches!(
            catalog.get_index("ix_a"),
            Err(VellumError::IndexNotFound(_))
        ));
        assert!(matches!(
            catalog.get_table("t"),
            Err(VellumError::TableNotFound(_))
        ));
    }

    #[test]
    fn update_last_key_is_monotonic() {
        let engine = MemoryEngine::new();
        let tx = engine.begin(true).unwrap();
        let catalog = Catalog::new(tx.as_ref());
        catalog.bootstrap().unwrap();
        catalog.create_table(TableInfo::new("t", vec![])).unwrap();
        catalog.update_last_key("t", 5).unwrap();
        assert_eq!(catalog.get_table("t").unwrap().last_key, 5);
        assert!(catalog.update_last_key("t", 5).is_err());
        assert!(catalog.update_last_key("t", 4).is_err());
    }
}
