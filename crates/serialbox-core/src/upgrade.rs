//! Migration of legacy archives.
//!
//! Old archives carry a single `<prefix>.json` document with the top-level
//! keys `FieldsTable`, `GlobalMetainfo` and `OffsetTable`. The migration
//! rebuilds the current metadata model from it losslessly: metainfo types
//! are inferred from the JSON shapes (the legacy format stored no tags),
//! the offset table is replayed entry by entry through the same dedup rule
//! the binary archive applies on write.

use serde_json::Value;
use tracing::{debug, info};

use serialbox_error::{Result, SerialboxError};
use serialbox_types::{ElementType, FieldId, FieldMetaInfo, MetaInfoMap, MetaInfoValue, Savepoint};

use crate::archive::binary::{FieldOffsetTable, FieldTable, FileOffset};
use crate::field_map::FieldMap;
use crate::savepoint_vector::SavepointVector;

/// The metadata model rebuilt from a legacy document.
#[derive(Debug)]
pub struct UpgradedMetaData {
    pub global_meta_info: MetaInfoMap,
    pub field_map: FieldMap,
    pub savepoint_vector: SavepointVector,
    pub field_table: FieldTable,
}

/// Structural keys of a legacy fields-table entry; everything else becomes
/// field-local metainfo.
const FIELD_STRUCTURAL_KEYS: [&str; 6] = [
    "__name",
    "__elementtype",
    "__isize",
    "__jsize",
    "__ksize",
    "__lsize",
];

/// Rebuild the current metadata model from a legacy document.
pub fn upgrade_meta_data(legacy: &Value) -> Result<UpgradedMetaData> {
    let float_type = infer_float_type(legacy);
    debug!(%float_type, "deduced float type of legacy meta-info");

    let mut upgraded = UpgradedMetaData {
        global_meta_info: MetaInfoMap::new(),
        field_map: FieldMap::new(),
        savepoint_vector: SavepointVector::new(),
        field_table: FieldTable::new(),
    };

    if let Some(global) = legacy.get("GlobalMetainfo") {
        upgrade_global_meta_info(global, float_type, &mut upgraded.global_meta_info)?;
    }
    if let Some(fields) = legacy.get("FieldsTable") {
        upgrade_fields_table(fields, float_type, &mut upgraded.field_map)?;
    }
    if let Some(offsets) = legacy.get("OffsetTable") {
        upgrade_offset_table(
            offsets,
            float_type,
            &mut upgraded.savepoint_vector,
            &mut upgraded.field_table,
        )?;
    }

    info!(
        fields = upgraded.field_map.len(),
        savepoints = upgraded.savepoint_vector.len(),
        "rebuilt metadata from legacy document"
    );
    Ok(upgraded)
}

/// The legacy format records floats as plain JSON numbers. If any field is
/// declared single precision the whole document is assumed single
/// precision; otherwise double.
fn infer_float_type(legacy: &Value) -> ElementType {
    let single = legacy
        .get("FieldsTable")
        .and_then(Value::as_array)
        .map_or(false, |fields| {
            fields
                .iter()
                .any(|f| f.get("__elementtype").and_then(Value::as_str) == Some("float"))
        });
    if single {
        ElementType::Float32
    } else {
        ElementType::Float64
    }
}

/// Infer a tagged value from an untagged legacy JSON value.
#[allow(clippy::cast_possible_truncation)]
fn infer_value(
    key: &str,
    node: &Value,
    float_type: ElementType,
    context: &str,
) -> Result<MetaInfoValue> {
    if let Some(s) = node.as_str() {
        return Ok(MetaInfoValue::String(s.to_owned()));
    }
    if let Some(b) = node.as_bool() {
        return Ok(MetaInfoValue::Boolean(b));
    }
    if node.is_i64() || node.is_u64() {
        let v = node
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| SerialboxError::UpgradeTypeInference {
                key: key.to_owned(),
                context: context.to_owned(),
            })?;
        return Ok(MetaInfoValue::Int32(v));
    }
    if let Some(f) = node.as_f64() {
        return Ok(if float_type == ElementType::Float32 {
            MetaInfoValue::Float32(f as f32)
        } else {
            MetaInfoValue::Float64(f)
        });
    }
    Err(SerialboxError::UpgradeTypeInference {
        key: key.to_owned(),
        context: context.to_owned(),
    })
}

fn upgrade_global_meta_info(
    node: &Value,
    float_type: ElementType,
    meta_info: &mut MetaInfoMap,
) -> Result<()> {
    let object = node
        .as_object()
        .ok_or_else(|| SerialboxError::corrupt("'GlobalMetainfo' is not a JSON object"))?;
    for (key, value) in object {
        if key.starts_with("__") {
            continue;
        }
        debug!(key = %key, "inserting global meta-info");
        meta_info.insert(key.clone(), infer_value(key, value, float_type, "global meta-info")?);
    }
    Ok(())
}

fn legacy_element_type(name: Option<&str>) -> ElementType {
    match name {
        Some("int") => ElementType::Int32,
        Some("float") => ElementType::Float32,
        _ => ElementType::Float64,
    }
}

fn required_dim(entry: &Value, name: &str, key: &str) -> Result<i32> {
    entry
        .get(key)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| {
            SerialboxError::corrupt(format!("field '{name}' has no valid '{key}'"))
        })
}

fn upgrade_fields_table(
    node: &Value,
    float_type: ElementType,
    field_map: &mut FieldMap,
) -> Result<()> {
    let entries = node
        .as_array()
        .ok_or_else(|| SerialboxError::corrupt("'FieldsTable' is not a JSON array"))?;
    for entry in entries {
        let name = entry
            .get("__name")
            .and_then(Value::as_str)
            .ok_or_else(|| SerialboxError::corrupt("fields table entry has no '__name'"))?;
        debug!(name, "inserting field");

        let element_type =
            legacy_element_type(entry.get("__elementtype").and_then(Value::as_str));

        let mut dims = vec![
            required_dim(entry, name, "__isize")?,
            required_dim(entry, name, "__jsize")?,
            required_dim(entry, name, "__ksize")?,
        ];
        if entry.get("__lsize").is_some() {
            dims.push(required_dim(entry, name, "__lsize")?);
        }

        let mut meta_info = MetaInfoMap::new();
        let object = entry
            .as_object()
            .ok_or_else(|| SerialboxError::corrupt("fields table entry is not a JSON object"))?;
        let context = format!("field '{name}'");
        for (key, value) in object {
            if FIELD_STRUCTURAL_KEYS.contains(&key.as_str()) {
                continue;
            }
            meta_info.insert(key.clone(), infer_value(key, value, float_type, &context)?);
        }

        let info = FieldMetaInfo::with_meta_info(element_type, dims, meta_info)?;
        field_map.insert(name, info)?;
    }
    Ok(())
}

fn upgrade_offset_table(
    node: &Value,
    float_type: ElementType,
    savepoint_vector: &mut SavepointVector,
    field_table: &mut FieldTable,
) -> Result<()> {
    let entries = node
        .as_array()
        .ok_or_else(|| SerialboxError::corrupt("'OffsetTable' is not a JSON array"))?;
    for entry in entries {
        let name = entry
            .get("__name")
            .and_then(Value::as_str)
            .ok_or_else(|| SerialboxError::corrupt("offset table entry has no '__name'"))?;

        let mut savepoint = Savepoint::new(name);
        let object = entry
            .as_object()
            .ok_or_else(|| SerialboxError::corrupt("offset table entry is not a JSON object"))?;
        let context = format!("savepoint '{name}'");
        for (key, value) in object {
            if key.starts_with("__") {
                continue;
            }
            savepoint
                .meta_info_mut()
                .insert(key.clone(), infer_value(key, value, float_type, &context)?);
        }

        debug!(%savepoint, "adding savepoint");
        let index = savepoint_vector.insert(savepoint);

        let offsets = entry
            .get("__offsets")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                SerialboxError::corrupt(format!("offset table entry '{name}' has no '__offsets'"))
            })?;

        for (fieldname, offset_node) in offsets {
            let pair = offset_node
                .as_array()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| {
                    SerialboxError::corrupt(format!(
                        "offset of field '{fieldname}' is not an [offset, checksum] pair"
                    ))
                })?;
            let offset = pair[0].as_u64().ok_or_else(|| {
                SerialboxError::corrupt(format!("invalid offset of field '{fieldname}'"))
            })?;
            let checksum = pair[1]
                .as_str()
                .ok_or_else(|| {
                    SerialboxError::corrupt(format!("invalid checksum of field '{fieldname}'"))
                })?
                .to_owned();

            // Mimic the binary archive's write path: reuse a matching
            // checksum, otherwise append at the tail.
            let id = match field_table.get_mut(fieldname) {
                Some(table) => {
                    if let Some(id) = table.iter().position(|e| e.checksum == checksum) {
                        id
                    } else {
                        if offset == 0 {
                            return Err(SerialboxError::corrupt(format!(
                                "field '{fieldname}' has a non-initial entry at offset 0"
                            )));
                        }
                        table.push(FileOffset { offset, checksum });
                        table.len() - 1
                    }
                }
                None => {
                    if offset != 0 {
                        return Err(SerialboxError::corrupt(format!(
                            "first entry of field '{fieldname}' has non-zero offset {offset}"
                        )));
                    }
                    field_table.insert(
                        fieldname.clone(),
                        FieldOffsetTable::from([FileOffset { offset, checksum }]),
                    );
                    0
                }
            };

            savepoint_vector.add_field(index, FieldId::new(fieldname.clone(), id))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn legacy_document() -> Value {
        json!({
            "GlobalMetainfo": {
                "__format": "legacy",
                "creator": "dycore",
                "steps": 10,
                "dt": 0.25,
                "staggered": true,
            },
            "FieldsTable": [
                {
                    "__name": "u",
                    "__elementtype": "double",
                    "__isize": 2,
                    "__jsize": 2,
                    "__ksize": 1,
                    "unit": "m/s",
                },
                {
                    "__name": "count",
                    "__elementtype": "int",
                    "__isize": 4,
                    "__jsize": 1,
                    "__ksize": 1,
                    "__lsize": 2,
                },
            ],
            "OffsetTable": [
                {
                    "__name": "sp0",
                    "time": 0.0,
                    "__offsets": {
                        "u": [0, "aaaa"],
                        "count": [0, "cccc"],
                    },
                },
                {
                    "__name": "sp1",
                    "time": 1.0,
                    "__offsets": {
                        "u": [32, "bbbb"],
                        "count": [0, "cccc"],
                    },
                },
            ],
        })
    }

    #[test]
    fn global_meta_info_inference() {
        let upgraded = upgrade_meta_data(&legacy_document()).unwrap();
        let global = &upgraded.global_meta_info;
        // Dunder keys are skipped.
        assert!(!global.has_key("__format"));
        assert_eq!(global.get::<String>("creator").unwrap(), "dycore");
        assert!(matches!(global.at("steps").unwrap(), MetaInfoValue::Int32(10)));
        // No field declares "float", so JSON floats become Float64.
        assert!(matches!(global.at("dt").unwrap(), MetaInfoValue::Float64(_)));
        assert!(matches!(global.at("staggered").unwrap(), MetaInfoValue::Boolean(true)));
    }

    #[test]
    fn float_tag_inference_from_fields() {
        let mut legacy = legacy_document();
        legacy["FieldsTable"][0]["__elementtype"] = json!("float");
        let upgraded = upgrade_meta_data(&legacy).unwrap();
        assert!(matches!(
            upgraded.global_meta_info.at("dt").unwrap(),
            MetaInfoValue::Float32(_)
        ));
    }

    #[test]
    fn fields_table_translation() {
        let upgraded = upgrade_meta_data(&legacy_document()).unwrap();
        let u = upgraded.field_map.find_field("u").unwrap();
        assert_eq!(u.element_type(), ElementType::Float64);
        assert_eq!(u.dims(), &[2, 2, 1]);
        assert_eq!(u.meta_info().get::<String>("unit").unwrap(), "m/s");

        let count = upgraded.field_map.find_field("count").unwrap();
        assert_eq!(count.element_type(), ElementType::Int32);
        assert_eq!(count.dims(), &[4, 1, 1, 2]);
        assert!(count.meta_info().is_empty());
    }

    #[test]
    fn offset_table_replay_with_dedup() {
        let upgraded = upgrade_meta_data(&legacy_document()).unwrap();
        let sv = &upgraded.savepoint_vector;
        assert_eq!(sv.len(), 2);

        let sp0 = Savepoint::new("sp0").with_meta_info("time", 0.0_f64).unwrap();
        let sp1 = Savepoint::new("sp1").with_meta_info("time", 1.0_f64).unwrap();
        assert_eq!(sv.find(&sp0), Some(0));
        assert_eq!(sv.find(&sp1), Some(1));

        // u has two distinct payloads, count dedups to a single entry.
        assert_eq!(sv.get_field_id(0, "u").unwrap().id, 0);
        assert_eq!(sv.get_field_id(1, "u").unwrap().id, 1);
        assert_eq!(sv.get_field_id(0, "count").unwrap().id, 0);
        assert_eq!(sv.get_field_id(1, "count").unwrap().id, 0);

        assert_eq!(upgraded.field_table["u"].len(), 2);
        assert_eq!(upgraded.field_table["u"][1].offset, 32);
        assert_eq!(upgraded.field_table["count"].len(), 1);
    }

    #[test]
    fn unknown_json_shape_fails_inference() {
        let legacy = json!({
            "GlobalMetainfo": { "weird": {"nested": 1} },
        });
        let err = upgrade_meta_data(&legacy).unwrap_err();
        assert!(matches!(err, SerialboxError::UpgradeTypeInference { key, .. } if key == "weird"));
    }

    #[test]
    fn offset_invariants_enforced() {
        // First entry of a field must sit at offset 0.
        let legacy = json!({
            "OffsetTable": [
                {"__name": "s", "__offsets": {"u": [16, "abcd"]}},
            ],
        });
        assert!(upgrade_meta_data(&legacy).is_err());

        // A fresh checksum appended later must not sit at offset 0.
        let legacy = json!({
            "OffsetTable": [
                {"__name": "s0", "__offsets": {"u": [0, "aaaa"]}},
                {"__name": "s1", "__offsets": {"u": [0, "bbbb"]}},
            ],
        });
        assert!(upgrade_meta_data(&legacy).is_err());
    }

    #[test]
    fn missing_dims_rejected() {
        let legacy = json!({
            "FieldsTable": [
                {"__name": "u", "__elementtype": "double", "__isize": 2, "__jsize": 2},
            ],
        });
        let err = upgrade_meta_data(&legacy).unwrap_err();
        assert!(matches!(err, SerialboxError::MetadataCorrupt { .. }));
    }
}
