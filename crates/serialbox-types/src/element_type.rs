use std::fmt;

use serialbox_error::{Result, SerialboxError};

/// Type tag of a scalar element.
///
/// Every tag except `String` has a fixed byte size; payloads are stored
/// little-endian on disk regardless of host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    /// Boolean, 1 byte on disk.
    #[serde(rename = "bool")]
    Boolean,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// IEEE 754 single precision.
    Float32,
    /// IEEE 754 double precision.
    Float64,
    /// UTF-8 string; variable size, metadata only.
    String,
}

impl ElementType {
    /// Fixed byte size of one element, or `None` for variable-size types.
    pub const fn size_of(self) -> Option<usize> {
        match self {
            Self::Boolean => Some(1),
            Self::Int32 | Self::Float32 => Some(4),
            Self::Int64 | Self::Float64 => Some(8),
            Self::String => None,
        }
    }

    /// Stable on-disk name of this tag.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "bool",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::String => "string",
        }
    }

    /// Parse a tag from its on-disk name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "bool" => Ok(Self::Boolean),
            "int32" => Ok(Self::Int32),
            "int64" => Ok(Self::Int64),
            "float32" => Ok(Self::Float32),
            "float64" => Ok(Self::Float64),
            "string" => Ok(Self::String),
            other => Err(SerialboxError::corrupt(format!(
                "unknown element type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(ElementType::Boolean.size_of(), Some(1));
        assert_eq!(ElementType::Int32.size_of(), Some(4));
        assert_eq!(ElementType::Int64.size_of(), Some(8));
        assert_eq!(ElementType::Float32.size_of(), Some(4));
        assert_eq!(ElementType::Float64.size_of(), Some(8));
        assert_eq!(ElementType::String.size_of(), None);
    }

    #[test]
    fn name_round_trip() {
        for ty in [
            ElementType::Boolean,
            ElementType::Int32,
            ElementType::Int64,
            ElementType::Float32,
            ElementType::Float64,
            ElementType::String,
        ] {
            assert_eq!(ElementType::from_name(ty.name()).unwrap(), ty);
        }
    }

    #[test]
    fn unknown_name_rejected() {
        let err = ElementType::from_name("quaternion").unwrap_err();
        assert!(matches!(err, SerialboxError::MetadataCorrupt { .. }));
    }
}
