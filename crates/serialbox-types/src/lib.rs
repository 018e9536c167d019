pub mod element_type;
pub mod field_meta_info;
pub mod meta_info;
pub mod savepoint;

pub use element_type::ElementType;
pub use field_meta_info::FieldMetaInfo;
pub use meta_info::{MetaInfoMap, MetaInfoValue, MetaInfoExtract};
pub use savepoint::Savepoint;

use std::fmt;

/// Mode in which a serializer (and its archive) is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// Parse existing metadata; no mutating operations permitted.
    Read,
    /// Discard any existing archive state for the prefix and start fresh.
    Write,
    /// Keep existing content; deduplication applies across old and new data.
    Append,
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "Read",
            Self::Write => "Write",
            Self::Append => "Append",
        })
    }
}

/// Identifier of a single stored payload: a field name plus the stable index
/// into that field's offset table.
///
/// Once a `FieldId` has been recorded in a savepoint vector it resolves to
/// the same payload bytes for the lifetime of the archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldId {
    /// Name of the field.
    pub name: String,
    /// Index into the field's offset table.
    pub id: usize,
}

impl FieldId {
    /// Create a new field identifier.
    pub fn new(name: impl Into<String>, id: usize) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}, {}}}", self.name, self.id)
    }
}
