use std::fmt;

use serde_json::{json, Value};

use serialbox_error::{Result, SerialboxError};

use crate::meta_info::{MetaInfoMap, MetaInfoValue};

/// A named, metainfo-decorated checkpoint of host-program execution.
///
/// Two savepoints are equal iff their names are equal and their metainfo
/// maps hold the same keys with equal values; the insertion order of the
/// metainfo keys does not affect equality, but is preserved on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Savepoint {
    name: String,
    meta_info: MetaInfoMap,
}

impl Savepoint {
    /// Create a savepoint with empty metainfo.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            meta_info: MetaInfoMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta_info(&self) -> &MetaInfoMap {
        &self.meta_info
    }

    pub fn meta_info_mut(&mut self) -> &mut MetaInfoMap {
        &mut self.meta_info
    }

    /// Attach `key = value` metainfo. Fails with `DuplicateKey` if the key
    /// already exists.
    pub fn add_meta_info(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetaInfoValue>,
    ) -> Result<()> {
        let key = key.into();
        if !self.meta_info.insert(key.clone(), value) {
            return Err(SerialboxError::DuplicateKey { key });
        }
        Ok(())
    }

    /// Builder-style variant of [`add_meta_info`](Self::add_meta_info) for
    /// constructing decorated savepoints inline.
    pub fn with_meta_info(
        mut self,
        key: impl Into<String>,
        value: impl Into<MetaInfoValue>,
    ) -> Result<Self> {
        self.add_meta_info(key, value)?;
        Ok(self)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "meta_info": self.meta_info.to_json(),
        })
    }

    pub fn from_json(node: &Value) -> Result<Self> {
        let name = node
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| SerialboxError::corrupt("savepoint node has no 'name'"))?;
        let meta_info = match node.get("meta_info") {
            Some(meta) => MetaInfoMap::from_json(meta)?,
            None => MetaInfoMap::new(),
        };
        Ok(Self {
            name: name.to_owned(),
            meta_info,
        })
    }
}

impl fmt::Display for Savepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.meta_info.is_empty() {
            return f.write_str(&self.name);
        }
        write!(f, "{} {}", self.name, self.meta_info)
    }
}
