//! Registry of field descriptors.

use indexmap::IndexMap;
use serde_json::Value;

use serialbox_error::{Result, SerialboxError};
use serialbox_types::FieldMetaInfo;

/// Mapping from field name to its meta-information.
///
/// Registration is idempotent only when the supplied descriptor is
/// structurally equal to the registered one; the engine never silently
/// widens a field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    map: IndexMap<String, FieldMetaInfo>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field. Succeeds if the name is absent or already bound to
    /// an identical descriptor; any mismatch fails with
    /// `FieldAlreadyRegistered`.
    pub fn insert(&mut self, name: impl Into<String>, info: FieldMetaInfo) -> Result<()> {
        let name = name.into();
        match self.map.get(&name) {
            None => {
                self.map.insert(name, info);
                Ok(())
            }
            Some(existing) if *existing == info => Ok(()),
            Some(_) => Err(SerialboxError::FieldAlreadyRegistered { name }),
        }
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldMetaInfo> {
        self.map.get(name)
    }

    pub fn find_field_mut(&mut self, name: &str) -> Option<&mut FieldMetaInfo> {
        self.map.get_mut(name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Names of all registered fields, in registration order.
    pub fn fieldnames(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldMetaInfo)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Encode as `{"field_map": {name: FM, ...}}`.
    pub fn to_json(&self) -> Value {
        let mut fields = serde_json::Map::new();
        for (name, info) in &self.map {
            fields.insert(name.clone(), info.to_json());
        }
        let mut node = serde_json::Map::new();
        node.insert("field_map".to_owned(), Value::Object(fields));
        Value::Object(node)
    }

    /// Decode from the `{"field_map": ...}` document. `null` decodes as the
    /// empty map; a document without the `"field_map"` key is a schema
    /// error.
    pub fn from_json(node: &Value) -> Result<Self> {
        if node.is_null() {
            return Ok(Self::new());
        }
        let fields = node
            .get("field_map")
            .ok_or_else(|| SerialboxError::corrupt("cannot create FieldMap: no node 'field_map'"))?
            .as_object()
            .ok_or_else(|| SerialboxError::corrupt("'field_map' is not a JSON object"))?;
        let mut map = Self::new();
        for (name, info) in fields {
            let info = FieldMetaInfo::from_json(info).map_err(|e| {
                SerialboxError::corrupt(format!("cannot insert node '{name}' in FieldMap: {e}"))
            })?;
            map.insert(name.clone(), info)?;
        }
        Ok(map)
    }
}
