use serde_json::{json, Value};

use serialbox_error::{Result, SerialboxError};

use crate::element_type::ElementType;
use crate::meta_info::MetaInfoMap;

/// Meta-information of a registered field: element type, dimensions and an
/// attached metainfo map.
///
/// Dimensions are fixed at construction and must all be positive. Equality
/// is structural across all three members.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMetaInfo {
    element_type: ElementType,
    dims: Vec<i32>,
    meta_info: MetaInfoMap,
}

impl FieldMetaInfo {
    /// Create a descriptor with empty metainfo. Fails with
    /// `InvalidDimensions` if any dimension is not positive.
    pub fn new(element_type: ElementType, dims: Vec<i32>) -> Result<Self> {
        Self::with_meta_info(element_type, dims, MetaInfoMap::new())
    }

    /// Create a descriptor with the given metainfo map.
    pub fn with_meta_info(
        element_type: ElementType,
        dims: Vec<i32>,
        meta_info: MetaInfoMap,
    ) -> Result<Self> {
        if dims.iter().any(|&d| d <= 0) {
            return Err(SerialboxError::InvalidDimensions {
                dims: join_dims(&dims),
            });
        }
        Ok(Self {
            element_type,
            dims,
            meta_info,
        })
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn dims(&self) -> &[i32] {
        &self.dims
    }

    pub fn meta_info(&self) -> &MetaInfoMap {
        &self.meta_info
    }

    pub fn meta_info_mut(&mut self) -> &mut MetaInfoMap {
        &mut self.meta_info
    }

    /// Total number of elements described by the dimensions.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "type": self.element_type.name(),
            "dims": self.dims,
            "meta_info": self.meta_info.to_json(),
        })
    }

    pub fn from_json(node: &Value) -> Result<Self> {
        let type_name = node
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SerialboxError::corrupt("field meta-info node has no 'type'"))?;
        let element_type = ElementType::from_name(type_name)?;
        let dims = node
            .get("dims")
            .and_then(Value::as_array)
            .ok_or_else(|| SerialboxError::corrupt("field meta-info node has no 'dims'"))?
            .iter()
            .map(|d| {
                d.as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(|| SerialboxError::corrupt(format!("invalid dimension {d}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let meta_info = match node.get("meta_info") {
            Some(meta) => MetaInfoMap::from_json(meta)?,
            None => MetaInfoMap::new(),
        };
        Self::with_meta_info(element_type, dims, meta_info)
    }
}

/// Render dimensions as `2, 3, 4` for error messages.
pub fn join_dims(dims: &[i32]) -> String {
    dims.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_dims_enforced() {
        assert!(FieldMetaInfo::new(ElementType::Float64, vec![2, 3]).is_ok());
        let err = FieldMetaInfo::new(ElementType::Float64, vec![2, 0]).unwrap_err();
        assert!(matches!(err, SerialboxError::InvalidDimensions { .. }));
        assert!(FieldMetaInfo::new(ElementType::Int32, vec![-1]).is_err());
    }

    #[test]
    fn structural_equality() {
        let mut meta = MetaInfoMap::new();
        meta.insert("unit", "kelvin");
        let a = FieldMetaInfo::with_meta_info(ElementType::Float32, vec![8, 8, 4], meta.clone())
            .unwrap();
        let b = FieldMetaInfo::with_meta_info(ElementType::Float32, vec![8, 8, 4], meta).unwrap();
        assert_eq!(a, b);

        let c = FieldMetaInfo::new(ElementType::Float32, vec![8, 8, 4]).unwrap();
        assert_ne!(a, c);
        let d = FieldMetaInfo::new(ElementType::Float64, vec![8, 8, 4]).unwrap();
        let e = FieldMetaInfo::new(ElementType::Float32, vec![8, 8]).unwrap();
        assert_ne!(c, d);
        assert_ne!(c, e);
    }

    #[test]
    fn num_elements() {
        let fm = FieldMetaInfo::new(ElementType::Float64, vec![2, 3, 4]).unwrap();
        assert_eq!(fm.num_elements(), 24);
    }

    #[test]
    fn json_round_trip() {
        let mut meta = MetaInfoMap::new();
        meta.insert("halo", vec![2_i32, 2]);
        let fm =
            FieldMetaInfo::with_meta_info(ElementType::Int64, vec![16, 16, 60], meta).unwrap();
        let restored = FieldMetaInfo::from_json(&fm.to_json()).unwrap();
        assert_eq!(restored, fm);
    }

    #[test]
    fn json_rejects_malformed_nodes() {
        assert!(FieldMetaInfo::from_json(&json!({"dims": [1]})).is_err());
        assert!(FieldMetaInfo::from_json(&json!({"type": "float64"})).is_err());
        assert!(
            FieldMetaInfo::from_json(&json!({"type": "float64", "dims": ["x"]})).is_err()
        );
    }
}
