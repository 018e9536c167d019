//! Payload stores addressed by field identifiers.

pub mod binary;

use serialbox_error::Result;
use serialbox_types::FieldId;

use crate::storage_view::{StorageView, StorageViewMut};

/// Backing store of raw typed payloads.
///
/// Implementations own their on-disk layout and metadata; the serializer
/// only ever talks to this seam.
pub trait Archive {
    /// Name of the archive implementation, persisted in the top-level
    /// metadata document.
    fn name(&self) -> &'static str;

    /// Store the view's payload under `field`, returning the identifier the
    /// payload will resolve to forever after.
    fn write(&mut self, view: &StorageView<'_>, field: &str) -> Result<FieldId>;

    /// Load the payload of `field_id` into the view.
    fn read(&self, view: &mut StorageViewMut<'_>, field_id: &FieldId) -> Result<()>;

    /// Rewrite the archive's own metadata document.
    fn update_meta_data(&mut self) -> Result<()>;

    /// Drop all stored payloads and metadata, on disk and in memory.
    fn clear(&mut self) -> Result<()>;
}
