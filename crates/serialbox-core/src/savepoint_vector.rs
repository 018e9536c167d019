//! Ordered collection of savepoints with per-savepoint field bindings.
//!
//! Array position is identity: indices handed out by `insert` stay valid for
//! the lifetime of the vector, persistence preserves them, and entries are
//! never reordered or deleted.

use std::ops::Index;

use indexmap::IndexMap;
use serde_json::{json, Value};

use serialbox_error::{Result, SerialboxError};
use serialbox_types::{FieldId, Savepoint};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SavepointVector {
    savepoints: Vec<Savepoint>,
    /// Parallel to `savepoints`: field name → offset-table id.
    fields: Vec<IndexMap<String, usize>>,
}

impl SavepointVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Linear scan for a savepoint equal to `savepoint` (by name and
    /// metainfo, order-insensitive).
    pub fn find(&self, savepoint: &Savepoint) -> Option<usize> {
        self.savepoints.iter().position(|sp| sp == savepoint)
    }

    pub fn exists(&self, savepoint: &Savepoint) -> bool {
        self.find(savepoint).is_some()
    }

    /// Insert a savepoint, returning its stable index. If an equal savepoint
    /// is already present its existing index is returned and the field
    /// bindings are left untouched.
    pub fn insert(&mut self, savepoint: Savepoint) -> usize {
        if let Some(index) = self.find(&savepoint) {
            return index;
        }
        self.savepoints.push(savepoint);
        self.fields.push(IndexMap::new());
        self.savepoints.len() - 1
    }

    /// Remove the most recently appended savepoint. Only used to roll back a
    /// failed write; the entry must not carry field bindings yet.
    pub(crate) fn pop_last(&mut self) {
        debug_assert!(self.fields.last().map_or(true, IndexMap::is_empty));
        self.savepoints.pop();
        self.fields.pop();
    }

    pub fn has_field(&self, index: usize, name: &str) -> bool {
        self.fields
            .get(index)
            .is_some_and(|f| f.contains_key(name))
    }

    /// Bind a stored payload to the savepoint at `index`. A field may be
    /// bound at most once per savepoint.
    pub fn add_field(&mut self, index: usize, field_id: FieldId) -> Result<()> {
        let savepoint_name = self.savepoints[index].to_string();
        let fields = &mut self.fields[index];
        if fields.contains_key(&field_id.name) {
            return Err(SerialboxError::FieldAlreadyAtSavepoint {
                name: field_id.name,
                savepoint: savepoint_name,
            });
        }
        fields.insert(field_id.name, field_id.id);
        Ok(())
    }

    /// Remove a field binding. Only used to roll back a failed write.
    pub(crate) fn remove_field(&mut self, index: usize, name: &str) {
        self.fields[index].shift_remove(name);
    }

    /// Resolve the payload identifier of `name` at the savepoint at `index`.
    pub fn get_field_id(&self, index: usize, name: &str) -> Result<FieldId> {
        self.fields[index]
            .get(name)
            .map(|&id| FieldId::new(name, id))
            .ok_or_else(|| SerialboxError::FieldNotAtSavepoint {
                name: name.to_owned(),
                savepoint: self.savepoints[index].to_string(),
            })
    }

    /// Field bindings of the savepoint at `index`, in binding order.
    pub fn fields_at(&self, index: usize) -> impl Iterator<Item = (&str, usize)> {
        self.fields[index].iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn savepoints(&self) -> &[Savepoint] {
        &self.savepoints
    }

    pub fn len(&self) -> usize {
        self.savepoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.savepoints.is_empty()
    }

    pub fn clear(&mut self) {
        self.savepoints.clear();
        self.fields.clear();
    }

    /// Encode as an ordered array; array position defines the stable index.
    pub fn to_json(&self) -> Value {
        let entries: Vec<Value> = self
            .savepoints
            .iter()
            .zip(&self.fields)
            .map(|(sp, fields)| {
                let mut field_node = serde_json::Map::new();
                for (name, &id) in fields {
                    field_node.insert(name.clone(), json!([id]));
                }
                json!({
                    "savepoint": sp.to_json(),
                    "fields": Value::Object(field_node),
                })
            })
            .collect();
        Value::Array(entries)
    }

    /// Decode from the ordered-array form. `null` decodes as the empty
    /// vector; duplicate savepoints violate the uniqueness invariant.
    pub fn from_json(node: &Value) -> Result<Self> {
        if node.is_null() {
            return Ok(Self::new());
        }
        let entries = node
            .as_array()
            .ok_or_else(|| SerialboxError::corrupt("savepoint vector is not a JSON array"))?;
        let mut vector = Self::new();
        for entry in entries {
            let savepoint = Savepoint::from_json(
                entry
                    .get("savepoint")
                    .ok_or_else(|| SerialboxError::corrupt("savepoint entry has no 'savepoint'"))?,
            )?;
            if vector.exists(&savepoint) {
                return Err(SerialboxError::corrupt(format!(
                    "duplicate savepoint '{savepoint}' in savepoint vector"
                )));
            }
            let index = vector.insert(savepoint);
            let fields = entry
                .get("fields")
                .and_then(Value::as_object)
                .ok_or_else(|| SerialboxError::corrupt("savepoint entry has no 'fields'"))?;
            for (name, id_node) in fields {
                let id = id_node
                    .as_array()
                    .and_then(|a| a.first())
                    .and_then(Value::as_u64)
                    .ok_or_else(|| {
                        SerialboxError::corrupt(format!(
                            "field '{name}' has no valid id in savepoint vector"
                        ))
                    })?;
                vector.add_field(index, FieldId::new(name.clone(), id as usize))?;
            }
        }
        Ok(vector)
    }
}

impl Index<usize> for SavepointVector {
    type Output = Savepoint;

    fn index(&self, index: usize) -> &Savepoint {
        &self.savepoints[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(name: &str, time: f64) -> Savepoint {
        Savepoint::new(name).with_meta_info("time", time).unwrap()
    }

    #[test]
    fn insert_returns_stable_indices() {
        let mut sv = SavepointVector::new();
        assert_eq!(sv.insert(sp("a", 0.0)), 0);
        assert_eq!(sv.insert(sp("b", 1.0)), 1);
        // Equal savepoint: existing index, no growth.
        assert_eq!(sv.insert(sp("a", 0.0)), 0);
        assert_eq!(sv.len(), 2);
        assert_eq!(sv[1].name(), "b");
    }

    #[test]
    fn same_name_different_meta_are_distinct() {
        let mut sv = SavepointVector::new();
        assert_eq!(sv.insert(sp("step", 0.0)), 0);
        assert_eq!(sv.insert(sp("step", 1.0)), 1);
    }

    #[test]
    fn find_compares_order_insensitively() {
        let mut a = Savepoint::new("s");
        a.add_meta_info("i", 1_i32).unwrap();
        a.add_meta_info("j", 2_i32).unwrap();
        let mut b = Savepoint::new("s");
        b.add_meta_info("j", 2_i32).unwrap();
        b.add_meta_info("i", 1_i32).unwrap();

        let mut sv = SavepointVector::new();
        let index = sv.insert(a);
        assert_eq!(sv.find(&b), Some(index));
    }

    #[test]
    fn add_field_rejects_duplicates() {
        let mut sv = SavepointVector::new();
        let index = sv.insert(sp("s", 0.0));
        sv.add_field(index, FieldId::new("u", 0)).unwrap();
        let err = sv.add_field(index, FieldId::new("u", 1)).unwrap_err();
        assert!(matches!(err, SerialboxError::FieldAlreadyAtSavepoint { name, .. } if name == "u"));
        // Same field at a different savepoint is fine.
        let other = sv.insert(sp("s", 1.0));
        sv.add_field(other, FieldId::new("u", 0)).unwrap();
    }

    #[test]
    fn get_field_id_resolves_or_fails() {
        let mut sv = SavepointVector::new();
        let index = sv.insert(sp("s", 0.0));
        sv.add_field(index, FieldId::new("u", 3)).unwrap();
        assert_eq!(sv.get_field_id(index, "u").unwrap(), FieldId::new("u", 3));
        let err = sv.get_field_id(index, "v").unwrap_err();
        assert!(matches!(err, SerialboxError::FieldNotAtSavepoint { name, .. } if name == "v"));
    }

    #[test]
    fn json_round_trip_preserves_indices() {
        let mut sv = SavepointVector::new();
        let i0 = sv.insert(sp("first", 0.0));
        let i1 = sv.insert(sp("second", 1.0));
        sv.add_field(i0, FieldId::new("u", 0)).unwrap();
        sv.add_field(i0, FieldId::new("v", 0)).unwrap();
        sv.add_field(i1, FieldId::new("u", 1)).unwrap();

        let restored = SavepointVector::from_json(&sv.to_json()).unwrap();
        assert_eq!(restored, sv);
        assert_eq!(restored.find(&sp("first", 0.0)), Some(0));
        assert_eq!(restored.find(&sp("second", 1.0)), Some(1));
        assert_eq!(restored.get_field_id(1, "u").unwrap().id, 1);
    }

    #[test]
    fn json_rejects_duplicate_savepoints() {
        let mut sv = SavepointVector::new();
        sv.insert(sp("s", 0.0));
        let mut node = sv.to_json();
        let entry = node.as_array().unwrap()[0].clone();
        node.as_array_mut().unwrap().push(entry);
        let err = SavepointVector::from_json(&node).unwrap_err();
        assert!(matches!(err, SerialboxError::MetadataCorrupt { .. }));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn round_trip_any_vector(
                names in prop::collection::vec("[a-z]{1,6}", 1..8),
                times in prop::collection::vec(0_i32..100, 1..8),
            ) {
                let mut sv = SavepointVector::new();
                for (name, time) in names.iter().zip(&times) {
                    let savepoint = Savepoint::new(name.clone())
                        .with_meta_info("time", *time)
                        .unwrap();
                    let index = sv.insert(savepoint);
                    if !sv.has_field(index, "u") {
                        sv.add_field(index, FieldId::new("u", index)).unwrap();
                    }
                }
                let restored = SavepointVector::from_json(&sv.to_json()).unwrap();
                prop_assert_eq!(restored, sv);
            }
        }
    }
}
