pub mod path;
pub mod value;

pub use path::{Path, PathFragment};
pub use value::{Value, ValueKind};

use crate::error::VellumError;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// The capability set every document source must provide: ordered field
/// iteration and lookup by field name. The storage key of a document
/// loaded from a table travels alongside it in the stream environment.
pub trait Document {
    fn iter_fields(
        &self,
    ) -> Box<dyn Iterator<Item = Result<(CompactString, Value), VellumError>> + '_>;

    /// Returns the value of the named field, or `FieldNotFound`.
    fn get(&self, field: &str) -> Result<Value, VellumError>;
}

/// A mutable in-memory document. Fields keep their insertion order and are
/// unique within one level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldBuffer {
    fields: Vec<(CompactString, Value)>,
}

impl FieldBuffer {
    pub fn new() -> FieldBuffer {
        FieldBuffer::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CompactString, &Value)> {
        self.fields.iter().map(|(f, v)| (f, v))
    }

    /// Appends a field. An existing field with the same name is replaced
    /// in place so field names stay unique within the buffer.
    pub fn add(&mut self, field: &str, value: Value) -> &mut Self {
        match self.fields.iter_mut().find(|(f, _)| f == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((CompactString::from(field), value)),
        }
        self
    }

    pub fn get_field(&self, field: &str) -> Option<&Value> {
        self.fields.iter().find(|(f, _)| f == field).map(|(_, v)| v)
    }

    fn get_field_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v)
    }

    /// Replaces an existing field, failing with `FieldNotFound` when it is
    /// absent.
    pub fn replace(&mut self, field: &str, value: Value) -> Result<(), VellumError> {
        match self.get_field_mut(field) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VellumError::FieldNotFound),
        }
    }

    /// Removes a field, failing with `FieldNotFound` when it is absent.
    pub fn delete(&mut self, field: &str) -> Result<(), VellumError> {
        match self.fields.iter().position(|(f, _)| f == field) {
            Some(i) => {
                self.fields.remove(i);
                Ok(())
            }
            None => Err(VellumError::FieldNotFound),
        }
    }

    /// Deep-copies every field of `doc` into the buffer.
    pub fn copy_document(&mut self, doc: &dyn Document) -> Result<(), VellumError> {
        for entry in doc.iter_fields() {
            let (field, value) = entry?;
            self.add(&field, value);
        }
        Ok(())
    }

    pub fn from_document(doc: &dyn Document) -> Result<FieldBuffer, VellumError> {
        let mut buf = FieldBuffer::new();
        buf.copy_document(doc)?;
        Ok(buf)
    }

    /// Resolves `path` against the buffer.
    pub fn get_path(&self, path: &Path) -> Result<Value, VellumError> {
        let (first, rest) = path
            .fragments()
            .split_first()
            .ok_or(VellumError::FieldNotFound)?;
        let PathFragment::Field(name) = first else {
            return Err(VellumError::FieldNotFound);
        };
        let value = self.get_field(name).ok_or(VellumError::FieldNotFound)?;
        get_in_value(value, rest)
    }

    /// Sets the value at `path`. Every intermediate fragment must already
    /// resolve; only the final fragment may be newly added, and only as a
    /// document field. Array indexes must be in range.
    pub fn set_path(&mut self, path: &Path, value: Value) -> Result<(), VellumError> {
        let (first, rest) = path
            .fragments()
            .split_first()
            .ok_or(VellumError::FieldNotFound)?;
        let PathFragment::Field(name) = first else {
            return Err(VellumError::FieldNotFound);
        };
        if rest.is_empty() {
            self.add(name, value);
            return Ok(());
        }
        let slot = self
            .get_field_mut(name)
            .ok_or(VellumError::FieldNotFound)?;
        set_in_value(slot, rest, value)
    }

    /// Removes the value at `path`. The final fragment must name an
    /// existing document field.
    pub fn delete_path(&mut self, path: &Path) -> Result<(), VellumError> {
        match path.fragments() {
            [] => Err(VellumError::FieldNotFound),
            [PathFragment::Field(name)] => self.delete(name),
            [PathFragment::Field(name), rest @ ..] => {
                let slot = self
                    .get_field_mut(name)
                    .ok_or(VellumError::FieldNotFound)?;
                delete_in_value(slot, rest)
            }
            _ => Err(VellumError::FieldNotFound),
        }
    }
}

pub(crate) fn get_in_value(value: &Value, frags: &[PathFragment]) -> Result<Value, VellumError> {
    let Some((first, rest)) = frags.split_first() else {
        return Ok(value.clone());
    };
    match (value, first) {
        (Value::Document(doc), PathFragment::Field(name)) => {
            let inner = doc.get_field(name).ok_or(VellumError::FieldNotFound)?;
            get_in_value(inner, rest)
        }
        (Value::Array(items), PathFragment::Index(i)) => {
            let inner = items.get(*i).ok_or(VellumError::FieldNotFound)?;
            get_in_value(inner, rest)
        }
        _ => Err(VellumError::FieldNotFound),
    }
}

fn set_in_value(
    value: &mut Value,
    frags: &[PathFragment],
    new: Value,
) -> Result<(), VellumError> {
    let Some((first, rest)) = frags.split_first() else {
        *value = new;
        return Ok(());
    };
    match (value, first) {
        (Value::Document(doc), PathFragment::Field(name)) => {
            if rest.is_empty() {
                doc.add(name, new);
                return Ok(());
            }
            let slot = doc
                .get_field_mut(name)
                .ok_or(VellumError::FieldNotFound)?;
            set_in_value(slot, rest, new)
        }
        (Value::Array(items), PathFragment::Index(i)) => {
            let slot = items.get_mut(*i).ok_or(VellumError::FieldNotFound)?;
            set_in_value(slot, rest, new)
        }
        _ => Err(VellumError::FieldNotFound),
    }
}

fn delete_in_value(value: &mut Value, frags: &[PathFragment]) -> Result<(), VellumError> {
    match (value, frags) {
        (Value::Document(doc), [PathFragment::Field(name)]) => doc.delete(name),
        (Value::Document(doc), [PathFragment::Field(name), rest @ ..]) => {
            let slot = doc
                .get_field_mut(name)
                .ok_or(VellumError::FieldNotFound)?;
            delete_in_value(slot, rest)
        }
        (Value::Array(items), [PathFragment::Index(i), rest @ ..]) if !rest.is_empty() => {
            let slot = items.get_mut(*i).ok_or(VellumError::FieldNotFound)?;
            delete_in_value(slot, rest)
        }
        _ => Err(VellumError::FieldNotFound),
    }
}

impl Document for FieldBuffer {
    fn iter_fields(
        &self,
    ) -> Box<dyn Iterator<Item = Result<(CompactString, Value), VellumError>> + '_> {
        Box::new(self.fields.iter().map(|(f, v)| Ok((f.clone(), v.clone()))))
    }

    fn get(&self, field: &str) -> Result<Value, VellumError> {
        self.get_field(field)
            .cloned()
            .ok_or(VellumError::FieldNotFound)
    }
}
