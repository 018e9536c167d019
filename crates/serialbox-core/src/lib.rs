//! Serializer core of the serialbox data engine.
//!
//! Composes the field map, the savepoint vector and the binary archive into
//! the write/read contracts of the engine, persists the top-level metadata
//! document after every mutating operation, and migrates legacy archives.

pub mod archive;
pub mod field_map;
pub mod flock;
pub mod persist;
pub mod savepoint_vector;
pub mod serializer;
pub mod storage_view;
pub mod upgrade;

pub use archive::binary::{BinaryArchive, FieldOffsetTable, FieldTable, FileOffset};
pub use archive::Archive;
pub use field_map::FieldMap;
pub use savepoint_vector::SavepointVector;
pub use serializer::Serializer;
pub use storage_view::{Element, StorageView, StorageViewMut};
