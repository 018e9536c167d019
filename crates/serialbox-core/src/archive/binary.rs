//! Binary archive: one data file per field plus an offset/checksum table.
//!
//! For archive prefix `P` in directory `D` the on-disk layout is
//!
//! - `D/ArchiveMetaData-P.json` — the offset-table document,
//! - `D/P_<fieldname>.dat` — payloads concatenated in write order, no
//!   headers, no separators; offsets are authoritative.
//!
//! Payloads are content-addressed by their SHA-256 digest: writing bytes
//! whose digest already appears in the field's table returns the existing
//! identifier without touching the data file.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use serialbox_error::{Result, SerialboxError};
use serialbox_types::{FieldId, OpenMode};

use crate::archive::Archive;
use crate::persist::{atomic_write_json, read_json};
use crate::storage_view::{StorageView, StorageViewMut};

/// Name persisted as `"archive_name"` in the metadata documents.
pub const ARCHIVE_NAME: &str = "Binary";

/// On-disk layout version of the binary archive.
pub const ARCHIVE_VERSION: i32 = 1;

/// The single digest algorithm of this archive. Mixing algorithms within
/// one archive is disallowed.
pub const CHECKSUM_ALGORITHM: &str = "sha256";

/// One stored payload: byte position in the field's data file plus the
/// hex-encoded SHA-256 digest of the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOffset {
    pub offset: u64,
    pub checksum: String,
}

/// Append-only table of stored payloads of one field; the position of an
/// entry is the `id` component of its [`FieldId`].
pub type FieldOffsetTable = Vec<FileOffset>;

/// Per-field offset tables, in first-write order.
pub type FieldTable = IndexMap<String, FieldOffsetTable>;

/// SHA-256 digest rendered as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    use std::fmt::Write as _;

    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[derive(Debug)]
pub struct BinaryArchive {
    mode: OpenMode,
    directory: PathBuf,
    prefix: String,
    meta_data_file: PathBuf,
    field_table: FieldTable,
}

impl BinaryArchive {
    /// Open an archive. Write/Append create the directory if absent; Read
    /// and Append parse the existing metadata document if present.
    pub fn new(mode: OpenMode, directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self> {
        let mut archive = Self::new_skip_metadata(mode, directory, prefix)?;
        if archive.mode != OpenMode::Write && archive.meta_data_file.exists() {
            archive.parse_meta_data()?;
        }
        Ok(archive)
    }

    /// Open an archive without parsing its metadata document. The legacy
    /// upgrade path uses this and populates the field table directly.
    pub fn new_skip_metadata(
        mode: OpenMode,
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        let directory = directory.into();
        let prefix = prefix.into();
        debug!(%mode, directory = %directory.display(), prefix = %prefix, "opening binary archive");

        if mode != OpenMode::Read && !directory.exists() {
            fs::create_dir_all(&directory)?;
        }

        let meta_data_file = directory.join(format!("ArchiveMetaData-{prefix}.json"));
        Ok(Self {
            mode,
            directory,
            prefix,
            meta_data_file,
            field_table: FieldTable::new(),
        })
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

    /// The in-memory offset tables. The legacy upgrade mutates these
    /// directly, mimicking the write path entry for entry.
    pub fn field_table(&self) -> &FieldTable {
        &self.field_table
    }

    pub fn field_table_mut(&mut self) -> &mut FieldTable {
        &mut self.field_table
    }

    /// Path of the data file of `field`.
    pub fn data_file(&self, field: &str) -> PathBuf {
        self.directory.join(format!("{}_{field}.dat", self.prefix))
    }

    fn parse_meta_data(&mut self) -> Result<()> {
        let node = read_json(&self.meta_data_file)?;

        let version = node
            .get("archive_version")
            .and_then(Value::as_i64)
            .ok_or_else(|| SerialboxError::corrupt("node 'archive_version' not found"))?;
        if version != i64::from(ARCHIVE_VERSION) {
            return Err(SerialboxError::VersionMismatch {
                on_disk: version as i32,
                library: ARCHIVE_VERSION,
            });
        }

        let name = node
            .get("archive_name")
            .and_then(Value::as_str)
            .ok_or_else(|| SerialboxError::corrupt("node 'archive_name' not found"))?;
        if name != ARCHIVE_NAME {
            return Err(SerialboxError::corrupt(format!(
                "archive is not a binary archive: got '{name}'"
            )));
        }

        // One digest per archive: reject documents naming any other algorithm.
        if let Some(algorithm) = node.get("checksum_algorithm").and_then(Value::as_str) {
            if algorithm != CHECKSUM_ALGORITHM {
                return Err(SerialboxError::corrupt(format!(
                    "unsupported checksum algorithm '{algorithm}'"
                )));
            }
        }

        let fields = node
            .get("fields_table")
            .and_then(Value::as_object)
            .ok_or_else(|| SerialboxError::corrupt("node 'fields_table' not found"))?;

        self.field_table.clear();
        for (field, entries) in fields {
            let entries = entries.as_array().ok_or_else(|| {
                SerialboxError::corrupt(format!("offset table of field '{field}' is not an array"))
            })?;
            let mut table = FieldOffsetTable::with_capacity(entries.len());
            for entry in entries {
                let pair = entry.as_array().filter(|p| p.len() == 2).ok_or_else(|| {
                    SerialboxError::corrupt(format!(
                        "offset table entry of field '{field}' is not an [offset, checksum] pair"
                    ))
                })?;
                let offset = pair[0].as_u64().ok_or_else(|| {
                    SerialboxError::corrupt(format!("invalid offset in table of field '{field}'"))
                })?;
                let checksum = pair[1]
                    .as_str()
                    .ok_or_else(|| {
                        SerialboxError::corrupt(format!(
                            "invalid checksum in table of field '{field}'"
                        ))
                    })?
                    .to_owned();
                table.push(FileOffset { offset, checksum });
            }
            self.check_data_file_length(field, &table)?;
            self.field_table.insert(field.clone(), table);
        }
        Ok(())
    }

    /// A data file shorter than the highest referenced offset cannot hold
    /// the payloads the table promises.
    fn check_data_file_length(&self, field: &str, table: &FieldOffsetTable) -> Result<()> {
        let Some(max_offset) = table.iter().map(|e| e.offset).max() else {
            return Ok(());
        };
        let path = self.data_file(field);
        let length = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if length < max_offset {
            return Err(SerialboxError::corrupt(format!(
                "data file '{}' holds {length} bytes but the offset table references offset {max_offset}",
                path.display()
            )));
        }
        Ok(())
    }

    fn to_json(&self) -> Value {
        let mut fields = serde_json::Map::new();
        for (field, table) in &self.field_table {
            let entries: Vec<Value> = table
                .iter()
                .map(|e| json!([e.offset, e.checksum]))
                .collect();
            fields.insert(field.clone(), Value::Array(entries));
        }
        json!({
            "archive_name": ARCHIVE_NAME,
            "archive_version": ARCHIVE_VERSION,
            "checksum_algorithm": CHECKSUM_ALGORITHM,
            "fields_table": Value::Object(fields),
        })
    }
}

impl Archive for BinaryArchive {
    fn name(&self) -> &'static str {
        ARCHIVE_NAME
    }

    fn write(&mut self, view: &StorageView<'_>, field: &str) -> Result<FieldId> {
        let buffer = view.to_le_buffer();
        let checksum = sha256_hex(&buffer);

        let table = self.field_table.entry(field.to_owned()).or_default();

        // Dedup: a payload with a matching digest is already on disk.
        if let Some(id) = table.iter().position(|e| e.checksum == checksum) {
            debug!(field, id, "payload already serialized, reusing entry");
            return Ok(FieldId::new(field, id));
        }

        let path = self.directory.join(format!("{}_{field}.dat", self.prefix));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(&buffer)?;

        table.push(FileOffset { offset, checksum });
        let id = table.len() - 1;
        debug!(field, id, offset, bytes = buffer.len(), "appended payload");
        Ok(FieldId::new(field, id))
    }

    fn read(&self, view: &mut StorageViewMut<'_>, field_id: &FieldId) -> Result<()> {
        let table = self.field_table.get(&field_id.name).ok_or_else(|| {
            SerialboxError::ArchiveEntryNotFound {
                name: field_id.name.clone(),
                id: field_id.id,
                table_size: 0,
            }
        })?;
        let entry = table
            .get(field_id.id)
            .ok_or_else(|| SerialboxError::ArchiveEntryNotFound {
                name: field_id.name.clone(),
                id: field_id.id,
                table_size: table.len(),
            })?;

        let expected = view.byte_count();
        let path = self.data_file(&field_id.name);
        let mut file = File::open(&path)?;
        file.seek(SeekFrom::Start(entry.offset))?;

        let mut buffer = vec![0_u8; expected];
        let mut filled = 0;
        while filled < expected {
            let n = file.read(&mut buffer[filled..])?;
            if n == 0 {
                return Err(SerialboxError::ShortRead {
                    expected,
                    actual: filled,
                });
            }
            filled += n;
        }

        if sha256_hex(&buffer) != entry.checksum {
            return Err(SerialboxError::ChecksumMismatch {
                name: field_id.name.clone(),
                id: field_id.id,
            });
        }

        view.fill_from_le_buffer(&buffer)
    }

    fn update_meta_data(&mut self) -> Result<()> {
        atomic_write_json(&self.meta_data_file, &self.to_json())
    }

    fn clear(&mut self) -> Result<()> {
        info!(prefix = %self.prefix, "clearing binary archive");
        // Remove every data file of this prefix, including files left behind
        // by tables that were never parsed.
        if self.directory.exists() {
            let file_prefix = format!("{}_", self.prefix);
            for entry in fs::read_dir(&self.directory)? {
                let path = entry?.path();
                let matches = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| {
                        n.starts_with(&file_prefix) && n.ends_with(".dat")
                    });
                if matches {
                    fs::remove_file(&path)?;
                }
            }
        }
        self.field_table.clear();
        if self.meta_data_file.exists() {
            fs::remove_file(&self.meta_data_file)?;
        }
        Ok(())
    }
}
