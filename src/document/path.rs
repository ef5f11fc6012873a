use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a [`Path`]: either a field of a document or an index into
/// an array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathFragment {
    Field(CompactString),
    Index(usize),
}

/// The address of a value inside a document, e.g. `a.b.1.c`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Path(pub Vec<PathFragment>);

impl Path {
    pub fn field(name: &str) -> Path {
        Path(vec![PathFragment::Field(CompactString::from(name))])
    }

    /// Parses a dotted path. Fragments made only of digits address array
    /// elements, everything else addresses fields.
    pub fn parse(text: &str) -> Path {
        Path(
            text.split('.')
                .map(|frag| match frag.parse::<usize>() {
                    Ok(i) => PathFragment::Index(i),
                    Err(_) => PathFragment::Field(CompactString::from(frag)),
                })
                .collect(),
        )
    }

    pub fn fragments(&self) -> &[PathFragment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The field name of a single-fragment field path, if that is what
    /// this path is.
    pub fn as_field(&self) -> Option<&str> {
        match self.0.as_slice() {
            [PathFragment::Field(name)] => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frag) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            match frag {
                PathFragment::Field(name) => write!(f, "{name}")?,
                PathFragment::Index(idx) => write!(f, "{idx}")?,
            }
        }
        Ok(())
    }
}
