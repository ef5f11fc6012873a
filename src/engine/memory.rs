//! In-memory engine backed by persistent ordered maps.
//!
//! A transaction works on a structurally shared snapshot of the whole
//! keyspace: `begin` clones the map in O(1), `commit` swaps the working
//! copy back in, and `rollback` just drops it, leaving the shared state
//! untouched byte for byte. A mutex serializes read-write transactions;
//! a second writer blocks until the first finishes.

use crate::engine::{ByteRange, Direction, Engine, EngineTx, KvIter, Store};
use crate::error::VellumError;
use im::OrdMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::cell::RefCell;
use std::ops::Bound;

type StoreMap = OrdMap<Vec<u8>, Vec<u8>>;
type Keyspace = OrdMap<String, StoreMap>;

#[derive(Default)]
pub struct MemoryEngine {
    state: RwLock<Keyspace>,
    writer: Mutex<()>,
}

impl MemoryEngine {
    pub fn new() -> MemoryEngine {
        MemoryEngine::default()
    }
}

impl Engine for MemoryEngine {
    fn begin(&self, writable: bool) -> Result<Box<dyn EngineTx + '_>, VellumError> {
        let guard = if writable {
            Some(self.writer.lock())
        } else {
            None
        };
        let working = self.state.read().clone();
        Ok(Box::new(MemoryTx {
            engine: self,
            working: RefCell::new(working),
            _writer: guard,
            writable,
        }))
    }
}

struct MemoryTx<'e> {
    engine: &'e MemoryEngine,
    working: RefCell<Keyspace>,
    _writer: Option<MutexGuard<'e, ()>>,
    writable: bool,
}

impl MemoryTx<'_> {
    fn require_writable(&self) -> Result<(), VellumError> {
        if self.writable {
            Ok(())
        } else {
            Err(VellumError::TxReadOnly)
        }
    }
}

impl EngineTx for MemoryTx<'_> {
    fn writable(&self) -> bool {
        self.writable
    }

    fn commit(self: Box<Self>) -> Result<(), VellumError> {
        let this = *self;
        if this.writable {
            *this.engine.state.write() = this.working.into_inner();
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), VellumError> {
        Ok(())
    }

    fn store(&self, name: &str) -> Result<Box<dyn Store + '_>, VellumError> {
        if !self.working.borrow().contains_key(name) {
            return Err(VellumError::StoreNotFound(name.to_string()));
        }
        Ok(Box::new(MemoryStore { tx: self, name: name.to_string() }))
    }

    fn create_store(&self, name: &str) -> Result<(), VellumError> {
        self.require_writable()?;
        let mut working = self.working.borrow_mut();
        if working.contains_key(name) {
            return Err(VellumError::StoreExists(name.to_string()));
        }
        working.insert(name.to_string(), StoreMap::new());
        Ok(())
    }

    fn drop_store(&self, name: &str) -> Result<(), VellumError> {
        self.require_writable()?;
        let mut working = self.working.borrow_mut();
        if working.remove(name).is_none() {
            return Err(VellumError::StoreNotFound(name.to_string()));
        }
        Ok(())
    }

    fn list_stores(&self, prefix: &str) -> Result<Vec<String>, VellumError> {
        Ok(self
            .working
            .borrow()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }
}

struct MemoryStore<'t, 'e> {
    tx: &'t MemoryTx<'e>,
    name: String,
}

impl MemoryStore<'_, '_> {
    fn snapshot(&self) -> Result<StoreMap, VellumError> {
        self.tx
            .working
            .borrow()
            .get(&self.name)
            .cloned()
            .ok_or_else(|| VellumError::StoreNotFound(self.name.clone()))
    }

    fn with_map<T>(
        &self,
        f: impl FnOnce(&mut StoreMap) -> Result<T, VellumError>,
    ) -> Result<T, VellumError> {
        let mut working = self.tx.working.borrow_mut();
        let map = working
            .get_mut(&self.name)
            .ok_or_else(|| VellumError::StoreNotFound(self.name.clone()))?;
        f(map)
    }
}

impl Store for MemoryStore<'_, '_> {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, VellumError> {
        self.tx
            .working
            .borrow()
            .get(&self.name)
            .ok_or_else(|| VellumError::StoreNotFound(self.name.clone()))?
            .get(key)
            .cloned()
            .ok_or(VellumError::KeyNotFound)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), VellumError> {
        self.tx.require_writable()?;
        self.with_map(|map| {
            map.insert(key.to_vec(), value.to_vec());
            Ok(())
        })
    }

    fn delete(&self, key: &[u8]) -> Result<(), VellumError> {
        self.tx.require_writable()?;
        self.with_map(|map| {
            map.remove(key).map(drop).ok_or(VellumError::KeyNotFound)
        })
    }

    fn iter(&self, range: ByteRange, direction: Direction) -> KvIter<'_> {
        // Iterate a snapshot of the store so writes issued while the
        // cursor is open do not shift it.
        let snapshot = match self.snapshot() {
            Ok(map) => map,
            Err(e) => return Box::new(std::iter::once(Err(e))),
        };
        let start: Bound<Vec<u8>> = range.start.clone();
        let end: Bound<Vec<u8>> = range.end.clone();
        let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = snapshot
            .range((start, end))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if direction == Direction::Backward {
            pairs.reverse();
        }
        Box::new(pairs.into_iter().map(Ok))
    }
}
