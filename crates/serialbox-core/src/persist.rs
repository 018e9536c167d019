//! Atomic metadata persistence.
//!
//! Metadata documents are rewritten by writing to a sibling temporary file,
//! flushing, and renaming over the target. Readers therefore always observe
//! either the old or the new document, never a partial one.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde_json::Value;

use serialbox_error::{Result, SerialboxError};

/// Atomically replace `path` with the pretty-printed JSON document.
pub fn atomic_write_json(path: &Path, node: &Value) -> Result<()> {
    let directory = path
        .parent()
        .ok_or_else(|| SerialboxError::corrupt(format!("path has no parent: {}", path.display())))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SerialboxError::corrupt(format!("invalid path: {}", path.display())))?;
    let tmp_path = directory.join(format!(".{file_name}.tmp"));

    let mut file = File::create(&tmp_path)?;
    serde_json::to_writer_pretty(&mut file, node)
        .map_err(|e| SerialboxError::corrupt(format!("cannot serialize metadata: {e}")))?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Parse a JSON document from disk. Parse failures map to `MetadataCorrupt`.
pub fn read_json(path: &Path) -> Result<Value> {
    let file = File::open(path)?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| {
        SerialboxError::corrupt(format!("JSON parser error in {}: {e}", path.display()))
    })
}
