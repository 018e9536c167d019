//! The serializer: composes global metainfo, field map, savepoint vector
//! and archive, and enforces the write/read contracts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use serialbox_error::{Result, SerialboxError};
use serialbox_types::field_meta_info::join_dims;
use serialbox_types::{
    FieldMetaInfo, MetaInfoExtract, MetaInfoMap, MetaInfoValue, OpenMode, Savepoint,
};

use crate::archive::binary::BinaryArchive;
use crate::archive::Archive;
use crate::field_map::FieldMap;
use crate::flock::ArchiveLock;
use crate::persist::{atomic_write_json, read_json};
use crate::savepoint_vector::SavepointVector;
use crate::storage_view::{StorageView, StorageViewMut};
use crate::upgrade;

pub const SERIALBOX_VERSION_MAJOR: i32 = 2;
pub const SERIALBOX_VERSION_MINOR: i32 = 6;
pub const SERIALBOX_VERSION_PATCH: i32 = 1;

/// Library version encoded as `100*major + 10*minor + patch`.
pub const fn serialbox_version() -> i32 {
    100 * SERIALBOX_VERSION_MAJOR + 10 * SERIALBOX_VERSION_MINOR + SERIALBOX_VERSION_PATCH
}

/// A stored version is compatible iff its major component equals the
/// library major.
pub const fn version_matches(version: i32) -> bool {
    version / 100 == SERIALBOX_VERSION_MAJOR
}

// 0: uninitialized, +1: enabled, -1: disabled.
static SERIALIZATION_STATUS: AtomicI32 = AtomicI32::new(0);

/// Current serialization status: +1 enabled, -1 disabled.
///
/// On first use the `SERIALBOX_SERIALIZATION_DISABLE` environment variable
/// decides; a positive value disables serialization globally.
pub fn serialization_status() -> i32 {
    let status = SERIALIZATION_STATUS.load(Ordering::Relaxed);
    if status != 0 {
        return status;
    }
    let disabled = std::env::var("SERIALBOX_SERIALIZATION_DISABLE")
        .ok()
        .and_then(|v| v.parse::<i32>().ok())
        .map_or(false, |v| v > 0);
    let status = if disabled { -1 } else { 1 };
    SERIALIZATION_STATUS.store(status, Ordering::Relaxed);
    status
}

/// Enable serialization, independently of the environment.
pub fn enable_serialization() {
    SERIALIZATION_STATUS.store(1, Ordering::Relaxed);
}

/// Disable serialization, independently of the environment. Writes become
/// logged no-ops.
pub fn disable_serialization() {
    SERIALIZATION_STATUS.store(-1, Ordering::Relaxed);
}

/// Serializer over a binary archive in a single directory.
///
/// All metadata lives in memory and is flushed to
/// `MetaData-<prefix>.json` / `ArchiveMetaData-<prefix>.json` after every
/// mutating operation on a write-enabled serializer. A serializer is not
/// thread-safe; callers sharing one must serialize access externally.
#[derive(Debug)]
pub struct Serializer {
    mode: OpenMode,
    directory: PathBuf,
    prefix: String,
    meta_data_file: PathBuf,
    global_meta_info: MetaInfoMap,
    savepoint_vector: SavepointVector,
    field_map: FieldMap,
    archive: BinaryArchive,
    _lock: Option<ArchiveLock>,
}

impl Serializer {
    /// Open a serializer for archive `prefix` in `directory`.
    ///
    /// - `Read`: the directory and `MetaData-<prefix>.json` must exist; the
    ///   metadata is parsed and frozen. A legacy archive is upgraded first.
    /// - `Write`: the directory is created if absent and any existing
    ///   archive state for this prefix is dropped.
    /// - `Append`: existing metadata is parsed if present; deduplication
    ///   applies across old and new content.
    pub fn open(
        mode: OpenMode,
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        let directory = directory.into();
        let prefix = prefix.into();
        let meta_data_file = directory.join(format!("MetaData-{prefix}.json"));

        info!(%mode, directory = %directory.display(), prefix = %prefix, "creating serializer");

        if mode == OpenMode::Read && !directory.exists() {
            return Err(SerialboxError::DirectoryMissing { path: directory });
        }
        if mode != OpenMode::Read && !directory.exists() {
            fs::create_dir_all(&directory)?;
        }

        let lock = match mode {
            OpenMode::Read => None,
            OpenMode::Write | OpenMode::Append => Some(ArchiveLock::acquire(&directory, &prefix)?),
        };

        let mut serializer = Self {
            mode,
            archive: BinaryArchive::new_skip_metadata(mode, directory.clone(), prefix.clone())?,
            directory,
            prefix,
            meta_data_file,
            global_meta_info: MetaInfoMap::new(),
            savepoint_vector: SavepointVector::new(),
            field_map: FieldMap::new(),
            _lock: lock,
        };

        // Older archives are migrated before normal construction.
        if !serializer.upgrade_meta_data()? {
            serializer.archive = BinaryArchive::new(
                mode,
                serializer.directory.clone(),
                serializer.prefix.clone(),
            )?;
            serializer.construct_meta_data_from_json()?;
        }

        if mode == OpenMode::Write {
            serializer.clear()?;
        }

        Ok(serializer)
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn meta_data_file(&self) -> &Path {
        &self.meta_data_file
    }

    pub fn archive_name(&self) -> &'static str {
        self.archive.name()
    }

    /// Drop all field, savepoint and global metadata, and all archive
    /// content on disk.
    pub fn clear(&mut self) -> Result<()> {
        self.savepoint_vector.clear();
        self.field_map.clear();
        self.global_meta_info.clear();
        self.archive.clear()?;
        if self.meta_data_file.exists() {
            fs::remove_file(&self.meta_data_file)?;
        }
        Ok(())
    }

    fn require_writable(&self) -> Result<()> {
        if self.mode == OpenMode::Read {
            return Err(SerialboxError::NotWritable);
        }
        Ok(())
    }

    // === Global meta-information ===

    pub fn global_meta_info(&self) -> &MetaInfoMap {
        &self.global_meta_info
    }

    /// Add `key = value` to the global metainfo and persist.
    pub fn add_global_meta_info(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetaInfoValue>,
    ) -> Result<()> {
        self.require_writable()?;
        let key = key.into();
        if !self.global_meta_info.insert(key.clone(), value) {
            return Err(SerialboxError::DuplicateKey { key });
        }
        self.update_meta_data()
    }

    /// Typed lookup in the global metainfo, applying the numeric widening
    /// rule.
    pub fn get_global_meta_info_as<T: MetaInfoExtract>(&self, key: &str) -> Result<T> {
        self.global_meta_info.get(key)
    }

    // === Fields ===

    /// Register a field. Re-registration with an identical descriptor is a
    /// no-op; any mismatch fails.
    pub fn register_field(&mut self, name: impl Into<String>, info: FieldMetaInfo) -> Result<()> {
        self.require_writable()?;
        self.field_map.insert(name, info)?;
        self.update_meta_data()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_map.has_field(name)
    }

    pub fn fieldnames(&self) -> Vec<String> {
        self.field_map.fieldnames()
    }

    pub fn get_field_meta_info(&self, name: &str) -> Result<&FieldMetaInfo> {
        self.field_map
            .find_field(name)
            .ok_or_else(|| SerialboxError::field_not_registered(name))
    }

    /// Attach `key = value` metainfo to a registered field. Returns `false`
    /// if the key already exists on that field.
    pub fn add_field_meta_info(
        &mut self,
        name: &str,
        key: impl Into<String>,
        value: impl Into<MetaInfoValue>,
    ) -> Result<bool> {
        self.require_writable()?;
        let info = self
            .field_map
            .find_field_mut(name)
            .ok_or_else(|| SerialboxError::field_not_registered(name))?;
        let inserted = info.meta_info_mut().insert(key, value);
        if inserted {
            self.update_meta_data()?;
        }
        Ok(inserted)
    }

    // === Savepoints ===

    /// Register a savepoint explicitly. Returns `true` iff it was new.
    pub fn register_savepoint(&mut self, savepoint: Savepoint) -> Result<bool> {
        self.require_writable()?;
        if self.savepoint_vector.exists(&savepoint) {
            return Ok(false);
        }
        self.savepoint_vector.insert(savepoint);
        self.update_meta_data()?;
        Ok(true)
    }

    pub fn has_savepoint(&self, savepoint: &Savepoint) -> bool {
        self.savepoint_vector.exists(savepoint)
    }

    pub fn savepoints(&self) -> &[Savepoint] {
        self.savepoint_vector.savepoints()
    }

    pub fn savepoint_vector(&self) -> &SavepointVector {
        &self.savepoint_vector
    }

    /// Validate a storage view against the registered descriptor of `name`.
    fn check_storage_view(&self, name: &str, element_type: serialbox_types::ElementType, dims: &[i32]) -> Result<()> {
        let info = self
            .field_map
            .find_field(name)
            .ok_or_else(|| SerialboxError::field_not_registered(name))?;

        if info.element_type() != element_type {
            return Err(SerialboxError::type_mismatch(
                info.element_type().name(),
                element_type.name(),
            ));
        }

        if info.dims() != dims {
            return Err(SerialboxError::ShapeMismatch {
                name: name.to_owned(),
                registered: join_dims(info.dims()),
                given: join_dims(dims),
            });
        }
        Ok(())
    }

    // === Writing ===

    /// Serialize the field `name` at `savepoint`.
    ///
    /// Registers the savepoint if new, rejects a second write of the same
    /// field at the same savepoint, stores the payload and atomically
    /// rewrites both metadata documents. On failure the in-memory metadata
    /// is left unchanged.
    pub fn write(
        &mut self,
        name: &str,
        savepoint: &Savepoint,
        view: &StorageView<'_>,
    ) -> Result<()> {
        if serialization_status() < 0 {
            debug!(name, "serialization is disabled, skipping write");
            return Ok(());
        }

        info!(name, %savepoint, "serializing field");

        if self.mode == OpenMode::Read {
            return Err(SerialboxError::NotWritable);
        }

        self.check_storage_view(name, view.element_type(), view.dims())?;

        let (index, inserted) = match self.savepoint_vector.find(savepoint) {
            Some(index) => (index, false),
            None => {
                debug!(%savepoint, "registering new savepoint");
                (self.savepoint_vector.insert(savepoint.clone()), true)
            }
        };

        if self.savepoint_vector.has_field(index, name) {
            return Err(SerialboxError::FieldAlreadyAtSavepoint {
                name: name.to_owned(),
                savepoint: savepoint.to_string(),
            });
        }

        // From here on every failure must roll the savepoint vector back.
        let field_id = match self.archive.write(view, name) {
            Ok(field_id) => field_id,
            Err(e) => {
                if inserted {
                    self.savepoint_vector.pop_last();
                }
                return Err(e);
            }
        };

        if let Err(e) = self.savepoint_vector.add_field(index, field_id) {
            if inserted {
                self.savepoint_vector.pop_last();
            }
            return Err(e);
        }

        if let Err(e) = self.update_meta_data() {
            self.savepoint_vector.remove_field(index, name);
            if inserted {
                self.savepoint_vector.pop_last();
            }
            return Err(e);
        }

        debug!(name, "successfully serialized field");
        Ok(())
    }

    // === Reading ===

    /// Deserialize the field `name` at `savepoint` into the view.
    pub fn read(
        &self,
        name: &str,
        savepoint: &Savepoint,
        view: &mut StorageViewMut<'_>,
    ) -> Result<()> {
        info!(name, %savepoint, "deserializing field");

        if self.mode != OpenMode::Read {
            return Err(SerialboxError::NotReadable);
        }

        self.check_storage_view(name, view.element_type(), view.dims())?;

        let index = self
            .savepoint_vector
            .find(savepoint)
            .ok_or_else(|| SerialboxError::SavepointNotFound {
                savepoint: savepoint.to_string(),
            })?;

        let field_id = self.savepoint_vector.get_field_id(index, name)?;
        self.archive.read(view, &field_id)?;

        debug!(name, "successfully deserialized field");
        Ok(())
    }

    // === JSON serialization ===

    fn to_json(&self) -> Value {
        json!({
            "serialbox_version": serialbox_version(),
            "prefix": self.prefix,
            "global_meta_info": self.global_meta_info.to_json(),
            "savepoint_vector": self.savepoint_vector.to_json(),
            "field_map": self.field_map.to_json(),
        })
    }

    /// Atomically rewrite `MetaData-<prefix>.json` and the archive's own
    /// metadata document.
    pub fn update_meta_data(&mut self) -> Result<()> {
        debug!("updating serializer metadata");
        atomic_write_json(&self.meta_data_file, &self.to_json())?;
        self.archive.update_meta_data()
    }

    fn construct_meta_data_from_json(&mut self) -> Result<()> {
        if !self.meta_data_file.exists() {
            if self.mode == OpenMode::Read {
                return Err(SerialboxError::MetadataNotFound {
                    path: self.meta_data_file.clone(),
                });
            }
            return Ok(());
        }

        let node = read_json(&self.meta_data_file)?;

        let version = node
            .get("serialbox_version")
            .and_then(Value::as_i64)
            .ok_or_else(|| SerialboxError::corrupt("node 'serialbox_version' not found"))?;
        let version = i32::try_from(version)
            .map_err(|_| SerialboxError::corrupt("node 'serialbox_version' out of range"))?;
        if !version_matches(version) {
            return Err(SerialboxError::VersionMismatch {
                on_disk: version,
                library: serialbox_version(),
            });
        }

        let prefix = node
            .get("prefix")
            .and_then(Value::as_str)
            .ok_or_else(|| SerialboxError::corrupt("node 'prefix' not found"))?;
        if prefix != self.prefix {
            return Err(SerialboxError::PrefixMismatch {
                expected: self.prefix.clone(),
                actual: prefix.to_owned(),
            });
        }

        if let Some(global) = node.get("global_meta_info") {
            self.global_meta_info = MetaInfoMap::from_json(global)?;
        }
        if let Some(savepoints) = node.get("savepoint_vector") {
            self.savepoint_vector = SavepointVector::from_json(savepoints)?;
        }
        if let Some(fields) = node.get("field_map") {
            self.field_map = FieldMap::from_json(fields)?;
        }
        Ok(())
    }

    // === Upgrade ===

    /// Migrate a legacy `<prefix>.json` archive. Returns `true` if an
    /// upgrade ran and construction from current metadata must be skipped.
    fn upgrade_meta_data(&mut self) -> Result<bool> {
        let legacy_file = self.directory.join(format!("{}.json", self.prefix));
        if !legacy_file.exists() {
            return Ok(false);
        }

        info!(legacy = %legacy_file.display(), "detected old serialbox metadata");

        // Skip if this archive was already upgraded.
        if self.meta_data_file.exists() {
            let legacy_mtime = fs::metadata(&legacy_file)?.modified()?;
            let current_mtime = fs::metadata(&self.meta_data_file)?.modified()?;
            if legacy_mtime < current_mtime {
                return Ok(false);
            }
        }

        if self.mode != OpenMode::Read {
            return Err(SerialboxError::UpgradeReadOnly);
        }

        let legacy = read_json(&legacy_file)?;
        let upgraded = upgrade::upgrade_meta_data(&legacy)?;

        self.global_meta_info = upgraded.global_meta_info;
        self.field_map = upgraded.field_map;
        self.savepoint_vector = upgraded.savepoint_vector;
        self.archive =
            BinaryArchive::new_skip_metadata(self.mode, self.directory.clone(), self.prefix.clone())?;
        *self.archive.field_table_mut() = upgraded.field_table;

        // Persist so the next open skips the upgrade; read-only locations
        // make this fail, which is non-fatal.
        if let Err(e) = self.update_meta_data() {
            warn!(error = %e, "failed to write upgraded metadata to disk");
        }

        info!("successfully upgraded metadata to serialbox version {}", serialbox_version());
        Ok(true)
    }
}
