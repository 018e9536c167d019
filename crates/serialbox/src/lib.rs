//! Public API facade for the serialbox data engine.
//!
//! Persists labeled multidimensional numeric fields at named savepoints and
//! restores them bit-identically, backed by a content-addressed binary
//! archive with per-payload SHA-256 checksums.

pub use serialbox_core::serializer::{
    disable_serialization, enable_serialization, serialbox_version, serialization_status,
    version_matches, SERIALBOX_VERSION_MAJOR, SERIALBOX_VERSION_MINOR, SERIALBOX_VERSION_PATCH,
};
pub use serialbox_core::{
    Archive, BinaryArchive, Element, FieldMap, SavepointVector, Serializer, StorageView,
    StorageViewMut,
};
pub use serialbox_error::{Result, SerialboxError};
pub use serialbox_types::{
    ElementType, FieldId, FieldMetaInfo, MetaInfoExtract, MetaInfoMap, MetaInfoValue, OpenMode,
    Savepoint,
};
