//! Tagged metainfo values and the insertion-ordered metainfo map.
//!
//! A metainfo value is either a single scalar of one element type or a
//! homogeneous array of scalars of one element type. Construction fixes the
//! tag; changing the type of a key requires erasing and reinserting it. The
//! tag is serialized explicitly as `["<tag>", <value>]` so that the type
//! survives JSON round-trips.

use std::fmt;

use indexmap::IndexMap;
use serde_json::{json, Value};

use serialbox_error::{Result, SerialboxError};

use crate::element_type::ElementType;

/// A tagged scalar or homogeneous scalar array.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaInfoValue {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    BooleanArray(Vec<bool>),
    Int32Array(Vec<i32>),
    Int64Array(Vec<i64>),
    Float32Array(Vec<f32>),
    Float64Array(Vec<f64>),
    StringArray(Vec<String>),
}

impl MetaInfoValue {
    /// Element type tag of this value.
    pub const fn element_type(&self) -> ElementType {
        match self {
            Self::Boolean(_) | Self::BooleanArray(_) => ElementType::Boolean,
            Self::Int32(_) | Self::Int32Array(_) => ElementType::Int32,
            Self::Int64(_) | Self::Int64Array(_) => ElementType::Int64,
            Self::Float32(_) | Self::Float32Array(_) => ElementType::Float32,
            Self::Float64(_) | Self::Float64Array(_) => ElementType::Float64,
            Self::String(_) | Self::StringArray(_) => ElementType::String,
        }
    }

    /// Whether this value holds an array of scalars.
    pub const fn is_array(&self) -> bool {
        matches!(
            self,
            Self::BooleanArray(_)
                | Self::Int32Array(_)
                | Self::Int64Array(_)
                | Self::Float32Array(_)
                | Self::Float64Array(_)
                | Self::StringArray(_)
        )
    }

    /// Human-readable type name, e.g. `int32` or `float64[]`.
    pub fn type_name(&self) -> String {
        if self.is_array() {
            format!("{}[]", self.element_type())
        } else {
            self.element_type().to_string()
        }
    }

    /// Encode as `["<tag>", <json-value-or-array>]`.
    pub fn to_json(&self) -> Value {
        let tag = self.element_type().name();
        let payload = match self {
            Self::Boolean(v) => json!(v),
            Self::Int32(v) => json!(v),
            Self::Int64(v) => json!(v),
            Self::Float32(v) => json!(v),
            Self::Float64(v) => json!(v),
            Self::String(v) => json!(v),
            Self::BooleanArray(v) => json!(v),
            Self::Int32Array(v) => json!(v),
            Self::Int64Array(v) => json!(v),
            Self::Float32Array(v) => json!(v),
            Self::Float64Array(v) => json!(v),
            Self::StringArray(v) => json!(v),
        };
        json!([tag, payload])
    }

    /// Decode from the `["<tag>", <json-value-or-array>]` form.
    pub fn from_json(node: &Value) -> Result<Self> {
        let pair = node
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or_else(|| SerialboxError::corrupt("meta-info value is not a [tag, value] pair"))?;
        let tag = pair[0]
            .as_str()
            .ok_or_else(|| SerialboxError::corrupt("meta-info tag is not a string"))?;
        let ty = ElementType::from_name(tag)?;
        match &pair[1] {
            Value::Array(items) => {
                let scalars = items
                    .iter()
                    .map(|item| scalar_from_json(ty, item))
                    .collect::<Result<Vec<_>>>()?;
                Self::array_from_scalars(ty, scalars)
            }
            scalar => scalar_from_json(ty, scalar),
        }
    }

    fn array_from_scalars(ty: ElementType, scalars: Vec<Self>) -> Result<Self> {
        macro_rules! collect {
            ($variant:ident, $array:ident) => {
                Ok(Self::$array(
                    scalars
                        .into_iter()
                        .map(|s| match s {
                            Self::$variant(v) => v,
                            _ => unreachable!("scalar parsed with fixed tag"),
                        })
                        .collect(),
                ))
            };
        }
        match ty {
            ElementType::Boolean => collect!(Boolean, BooleanArray),
            ElementType::Int32 => collect!(Int32, Int32Array),
            ElementType::Int64 => collect!(Int64, Int64Array),
            ElementType::Float32 => collect!(Float32, Float32Array),
            ElementType::Float64 => collect!(Float64, Float64Array),
            ElementType::String => collect!(String, StringArray),
        }
    }
}

fn scalar_from_json(ty: ElementType, node: &Value) -> Result<MetaInfoValue> {
    let fail = || {
        SerialboxError::corrupt(format!(
            "meta-info value {node} is not representable as '{ty}'"
        ))
    };
    match ty {
        ElementType::Boolean => node.as_bool().map(MetaInfoValue::Boolean).ok_or_else(fail),
        ElementType::Int32 => node
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(MetaInfoValue::Int32)
            .ok_or_else(fail),
        ElementType::Int64 => node.as_i64().map(MetaInfoValue::Int64).ok_or_else(fail),
        #[allow(clippy::cast_possible_truncation)]
        ElementType::Float32 => node
            .as_f64()
            .map(|v| MetaInfoValue::Float32(v as f32))
            .ok_or_else(fail),
        ElementType::Float64 => node.as_f64().map(MetaInfoValue::Float64).ok_or_else(fail),
        ElementType::String => node
            .as_str()
            .map(|s| MetaInfoValue::String(s.to_owned()))
            .ok_or_else(fail),
    }
}

impl fmt::Display for MetaInfoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

macro_rules! impl_from_scalar {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for MetaInfoValue {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        }
        impl From<Vec<$ty>> for MetaInfoValue {
            fn from(v: Vec<$ty>) -> Self {
                paste_array!(v, $variant)
            }
        }
    };
}

// Maps a scalar variant name to its array variant.
macro_rules! paste_array {
    ($v:expr, Boolean) => {
        MetaInfoValue::BooleanArray($v)
    };
    ($v:expr, Int32) => {
        MetaInfoValue::Int32Array($v)
    };
    ($v:expr, Int64) => {
        MetaInfoValue::Int64Array($v)
    };
    ($v:expr, Float32) => {
        MetaInfoValue::Float32Array($v)
    };
    ($v:expr, Float64) => {
        MetaInfoValue::Float64Array($v)
    };
    ($v:expr, String) => {
        MetaInfoValue::StringArray($v)
    };
}

impl_from_scalar!(bool, Boolean);
impl_from_scalar!(i32, Int32);
impl_from_scalar!(i64, Int64);
impl_from_scalar!(f32, Float32);
impl_from_scalar!(f64, Float64);
impl_from_scalar!(String, String);

impl From<&str> for MetaInfoValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

/// Typed extraction from a [`MetaInfoValue`].
///
/// Numeric widening is permitted only where the stored value is exactly
/// representable in the requested type: `Int32` may be read as `Int64`,
/// `Float32` or `Float64`, and `Float32` as `Float64`. Values are never
/// silently narrowed.
pub trait MetaInfoExtract: Sized {
    fn extract(value: &MetaInfoValue) -> Result<Self>;
}

fn mismatch<T>(expected: &str, value: &MetaInfoValue) -> Result<T> {
    Err(SerialboxError::type_mismatch(expected, value.type_name()))
}

impl MetaInfoExtract for bool {
    fn extract(value: &MetaInfoValue) -> Result<Self> {
        match value {
            MetaInfoValue::Boolean(v) => Ok(*v),
            other => mismatch("bool", other),
        }
    }
}

impl MetaInfoExtract for i32 {
    fn extract(value: &MetaInfoValue) -> Result<Self> {
        match value {
            MetaInfoValue::Int32(v) => Ok(*v),
            other => mismatch("int32", other),
        }
    }
}

impl MetaInfoExtract for i64 {
    fn extract(value: &MetaInfoValue) -> Result<Self> {
        match value {
            MetaInfoValue::Int32(v) => Ok(Self::from(*v)),
            MetaInfoValue::Int64(v) => Ok(*v),
            other => mismatch("int64", other),
        }
    }
}

impl MetaInfoExtract for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn extract(value: &MetaInfoValue) -> Result<Self> {
        match value {
            MetaInfoValue::Int32(v) => {
                let widened = *v as Self;
                if widened as i64 == i64::from(*v) {
                    Ok(widened)
                } else {
                    mismatch("float32", value)
                }
            }
            MetaInfoValue::Float32(v) => Ok(*v),
            other => mismatch("float32", other),
        }
    }
}

impl MetaInfoExtract for f64 {
    fn extract(value: &MetaInfoValue) -> Result<Self> {
        match value {
            MetaInfoValue::Int32(v) => Ok(Self::from(*v)),
            MetaInfoValue::Float32(v) => Ok(Self::from(*v)),
            MetaInfoValue::Float64(v) => Ok(*v),
            other => mismatch("float64", other),
        }
    }
}

impl MetaInfoExtract for String {
    fn extract(value: &MetaInfoValue) -> Result<Self> {
        match value {
            MetaInfoValue::String(v) => Ok(v.clone()),
            other => mismatch("string", other),
        }
    }
}

macro_rules! impl_extract_array {
    ($ty:ty, $name:literal, $($variant:ident),+) => {
        impl MetaInfoExtract for Vec<$ty> {
            fn extract(value: &MetaInfoValue) -> Result<Self> {
                match value {
                    $(MetaInfoValue::$variant(v) => v
                        .iter()
                        .map(|s| <$ty>::extract(&MetaInfoValue::from(s.clone())))
                        .collect(),)+
                    other => mismatch($name, other),
                }
            }
        }
    };
}

impl_extract_array!(bool, "bool[]", BooleanArray);
impl_extract_array!(i32, "int32[]", Int32Array);
impl_extract_array!(i64, "int64[]", Int32Array, Int64Array);
impl_extract_array!(f32, "float32[]", Int32Array, Float32Array);
impl_extract_array!(f64, "float64[]", Int32Array, Float32Array, Float64Array);
impl_extract_array!(String, "string[]", StringArray);

/// Ordered mapping from string keys to tagged values.
///
/// Iteration order is insertion order, and the serialized object preserves
/// that order across round-trips. Equality is order-insensitive: two maps
/// are equal iff they hold the same keys with equal values.
#[derive(Debug, Clone, Default)]
pub struct MetaInfoMap {
    map: IndexMap<String, MetaInfoValue>,
}

impl MetaInfoMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key-value pair. Returns `false` without modification if the
    /// key already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetaInfoValue>) -> bool {
        let key = key.into();
        if self.map.contains_key(&key) {
            return false;
        }
        self.map.insert(key, value.into());
        true
    }

    /// Replace the value of an existing key with a new value of the same
    /// tag. Changing the tag of a key requires `erase` + `insert`.
    pub fn overwrite(&mut self, key: &str, value: impl Into<MetaInfoValue>) -> Result<()> {
        let value = value.into();
        let slot = self
            .map
            .get_mut(key)
            .ok_or_else(|| SerialboxError::key_not_found(key))?;
        if slot.element_type() != value.element_type() || slot.is_array() != value.is_array() {
            return Err(SerialboxError::type_mismatch(
                slot.type_name(),
                value.type_name(),
            ));
        }
        *slot = value;
        Ok(())
    }

    /// Remove a key if present. Idempotent; returns whether a value was
    /// removed. Uses a shift-remove to keep insertion order intact.
    pub fn erase(&mut self, key: &str) -> bool {
        self.map.shift_remove(key).is_some()
    }

    /// Look up the tagged value of `key`.
    pub fn at(&self, key: &str) -> Result<&MetaInfoValue> {
        self.map
            .get(key)
            .ok_or_else(|| SerialboxError::key_not_found(key))
    }

    /// Typed lookup applying the widening rule of [`MetaInfoExtract`].
    pub fn get<T: MetaInfoExtract>(&self, key: &str) -> Result<T> {
        T::extract(self.at(key)?)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
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

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaInfoValue)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Encode as a JSON object, one `["<tag>", <value>]` pair per key,
    /// preserving insertion order.
    pub fn to_json(&self) -> Value {
        let mut node = serde_json::Map::new();
        for (key, value) in &self.map {
            node.insert(key.clone(), value.to_json());
        }
        Value::Object(node)
    }

    /// Decode from the JSON object form. `null` decodes as the empty map.
    pub fn from_json(node: &Value) -> Result<Self> {
        if node.is_null() {
            return Ok(Self::new());
        }
        let object = node
            .as_object()
            .ok_or_else(|| SerialboxError::corrupt("meta-info map is not a JSON object"))?;
        let mut map = Self::new();
        for (key, value) in object {
            map.map.insert(key.clone(), MetaInfoValue::from_json(value)?);
        }
        Ok(map)
    }
}

impl PartialEq for MetaInfoMap {
    fn eq(&self, other: &Self) -> bool {
        self.map.len() == other.map.len()
            && self
                .map
                .iter()
                .all(|(k, v)| other.map.get(k).is_some_and(|o| o == v))
    }
}

impl fmt::Display for MetaInfoMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
