use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for serialbox operations.
///
/// Structured variants for every failure the engine can surface: mode
/// violations, metadata/schema problems, write/read contract violations,
/// archive corruption and the legacy-upgrade failures.
#[derive(Error, Debug)]
pub enum SerialboxError {
    // === Serializer mode ===
    /// A mutating operation was requested on a read-only serializer.
    #[error("serializer not open in write mode, but write operation requested")]
    NotWritable,

    /// A read operation was requested on a write-enabled serializer.
    #[error("serializer not open in read mode, but read operation requested")]
    NotReadable,

    // === Metadata ===
    /// Read mode requires the archive directory to exist.
    #[error("directory does not exist: '{path}'")]
    DirectoryMissing { path: PathBuf },

    /// Read mode requires the top-level metadata document to exist.
    #[error("metadata not found: '{path}'")]
    MetadataNotFound { path: PathBuf },

    /// JSON parse failure or schema violation in a metadata document.
    #[error("metadata is corrupt: {detail}")]
    MetadataCorrupt { detail: String },

    /// On-disk version is outside the library's compatibility window.
    #[error("serialbox version of metadata ({on_disk}) does not match the version of the library ({library})")]
    VersionMismatch { on_disk: i32, library: i32 },

    /// On-disk prefix differs from the expected prefix.
    #[error("inconsistent prefixes: expected '{expected}' got '{actual}'")]
    PrefixMismatch { expected: String, actual: String },

    // === Field registration ===
    /// Write/read of a field never registered within the serializer.
    #[error("field '{name}' is not registered within the serializer")]
    FieldNotRegistered { name: String },

    /// Re-registration of a field with conflicting meta-information.
    #[error("field '{name}' is already registered with different meta-information")]
    FieldAlreadyRegistered { name: String },

    /// A storage view contradicts the registered dimensions of its field.
    #[error("dimensions of field '{name}' do not match registered ones: registered as [{registered}], given as [{given}]")]
    ShapeMismatch {
        name: String,
        registered: String,
        given: String,
    },

    /// A stored or supplied value has the wrong element type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// A field-meta-info descriptor was constructed with a non-positive dimension.
    #[error("invalid dimensions [{dims}]: all dimensions must be positive")]
    InvalidDimensions { dims: String },

    // === Metainfo ===
    /// Lookup of an absent metainfo key.
    #[error("no key '{key}' exists in meta-info map")]
    KeyNotFound { key: String },

    /// Insertion of a metainfo key that already exists.
    #[error("key '{key}' already exists in meta-info map")]
    DuplicateKey { key: String },

    // === Write/read contract ===
    /// A field may be stored at most once per savepoint.
    #[error("field '{name}' already saved at savepoint '{savepoint}'")]
    FieldAlreadyAtSavepoint { name: String, savepoint: String },

    /// Read of a savepoint that was never recorded.
    #[error("savepoint '{savepoint}' does not exist")]
    SavepointNotFound { savepoint: String },

    /// Read of a field not stored at the given savepoint.
    #[error("field '{name}' was not saved at savepoint '{savepoint}'")]
    FieldNotAtSavepoint { name: String, savepoint: String },

    // === Archive ===
    /// A field identifier resolves outside the archive's offset table.
    #[error("archive has no entry {id} for field '{name}' (table size {table_size})")]
    ArchiveEntryNotFound {
        name: String,
        id: usize,
        table_size: usize,
    },

    /// Fewer bytes on disk than the view requires.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// Payload bytes do not reproduce the stored checksum.
    #[error("checksum mismatch for entry {id} of field '{name}'")]
    ChecksumMismatch { name: String, id: usize },

    /// A second writer attempted to open a locked archive.
    #[error("archive is locked by another writer: '{path}'")]
    ArchiveLocked { path: PathBuf },

    // === Legacy upgrade ===
    /// Legacy archives may only be opened in read mode.
    #[error("old serialbox archives cannot be opened in 'Write' or 'Append' mode")]
    UpgradeReadOnly,

    /// The legacy document contains a value whose type cannot be inferred.
    #[error("failed to upgrade: cannot deduce type of meta-info '{key}' of {context}")]
    UpgradeTypeInference { key: String, context: String },

    // === I/O ===
    /// Wraps underlying filesystem errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SerialboxError {
    /// Create a `MetadataCorrupt` error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::MetadataCorrupt {
            detail: detail.into(),
        }
    }

    /// Create a `FieldNotRegistered` error.
    pub fn field_not_registered(name: impl Into<String>) -> Self {
        Self::FieldNotRegistered { name: name.into() }
    }

    /// Create a `KeyNotFound` error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Create a `TypeMismatch` error.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Whether re-running the failed operation with identical input can
    /// succeed without external intervention.
    ///
    /// A write that failed after the payload append is the canonical case:
    /// content-addressed deduplication makes the retry idempotent.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ArchiveLocked { .. })
    }
}

/// Result type alias using `SerialboxError`.
pub type Result<T> = std::result::Result<T, SerialboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_not_writable() {
        assert_eq!(
            SerialboxError::NotWritable.to_string(),
            "serializer not open in write mode, but write operation requested"
        );
    }

    #[test]
    fn error_display_version_mismatch() {
        let err = SerialboxError::VersionMismatch {
            on_disk: 1,
            library: 261,
        };
        assert_eq!(
            err.to_string(),
            "serialbox version of metadata (1) does not match the version of the library (261)"
        );
    }

    #[test]
    fn error_display_field_at_savepoint() {
        let err = SerialboxError::FieldAlreadyAtSavepoint {
            name: "u".to_owned(),
            savepoint: "step-1".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "field 'u' already saved at savepoint 'step-1'"
        );
    }

    #[test]
    fn error_display_short_read() {
        let err = SerialboxError::ShortRead {
            expected: 48,
            actual: 16,
        };
        assert_eq!(err.to_string(), "short read: expected 48 bytes, got 16");
    }

    #[test]
    fn convenience_constructors() {
        let err = SerialboxError::corrupt("node 'prefix' not found");
        assert!(matches!(err, SerialboxError::MetadataCorrupt { .. }));

        let err = SerialboxError::field_not_registered("phi");
        assert!(matches!(err, SerialboxError::FieldNotRegistered { name } if name == "phi"));

        let err = SerialboxError::type_mismatch("int32", "string");
        assert_eq!(err.to_string(), "type mismatch: expected int32, got string");
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: SerialboxError = io_err.into();
        assert!(matches!(err, SerialboxError::Io(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn retryable_classification() {
        assert!(
            SerialboxError::ArchiveLocked {
                path: PathBuf::from("/tmp/field.lock")
            }
            .is_retryable()
        );
        assert!(!SerialboxError::NotWritable.is_retryable());
        assert!(!SerialboxError::UpgradeReadOnly.is_retryable());
    }
}
