//! The dataset data model: dimensions, variables, data types, fill values
//! and attribute bags.
//!
//! Attributes are opaque pass-through payload; the engine itself depends on
//! no attribute key and copies bags verbatim (insertion order preserved).

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// An attribute bag attached to a dataset or variable.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// A fixed-size numeric element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 8-bit integer.
    UInt8,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Unsigned 64-bit integer.
    UInt64,
    /// IEEE 754 single precision.
    Float32,
    /// IEEE 754 double precision.
    Float64,
}

impl DataType {
    /// The size of one element in bytes.
    #[must_use]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Whether the data type is a floating point type.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// The fill value of a variable, as a JSON scalar.
///
/// Finite values are JSON numbers. Non-finite floats use the spellings
/// `"NaN"`, `"Infinity"` and `"-Infinity"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FillValue(serde_json::Value);

impl FillValue {
    /// Create a fill value from a JSON scalar.
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// The fill value as JSON.
    #[must_use]
    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    /// Resolve the fill value to an `f64`, honouring the non-finite
    /// spellings.
    fn resolve_f64(&self) -> Option<f64> {
        match &self.0 {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => match s.as_str() {
                "NaN" => Some(f64::NAN),
                "Infinity" => Some(f64::INFINITY),
                "-Infinity" => Some(f64::NEG_INFINITY),
                _ => None,
            },
            _ => None,
        }
    }

    /// The native little-endian byte pattern of the fill value in
    /// `data_type`.
    ///
    /// # Errors
    /// Returns [`SchemaError::InvalidFillValue`] if the value is not
    /// representable in `data_type` (e.g. `"NaN"` for an integer type, or an
    /// out-of-range integer).
    pub fn to_le_bytes(&self, data_type: DataType) -> Result<Vec<u8>, SchemaError> {
        let invalid = || SchemaError::InvalidFillValue {
            value: self.0.clone(),
            data_type,
        };
        if data_type.is_float() {
            let v = self.resolve_f64().ok_or_else(invalid)?;
            return Ok(match data_type {
                DataType::Float32 => (v as f32).to_le_bytes().to_vec(),
                DataType::Float64 => v.to_le_bytes().to_vec(),
                _ => unreachable!(),
            });
        }
        let number = self.0.as_number().ok_or_else(invalid)?;
        match data_type {
            DataType::Int8 => i8::try_from(number.as_i64().ok_or_else(invalid)?)
                .map(|v| v.to_le_bytes().to_vec())
                .map_err(|_| invalid()),
            DataType::Int16 => i16::try_from(number.as_i64().ok_or_else(invalid)?)
                .map(|v| v.to_le_bytes().to_vec())
                .map_err(|_| invalid()),
            DataType::Int32 => i32::try_from(number.as_i64().ok_or_else(invalid)?)
                .map(|v| v.to_le_bytes().to_vec())
                .map_err(|_| invalid()),
            DataType::Int64 => number
                .as_i64()
                .map(|v| v.to_le_bytes().to_vec())
                .ok_or_else(invalid),
            DataType::UInt8 => u8::try_from(number.as_u64().ok_or_else(invalid)?)
                .map(|v| v.to_le_bytes().to_vec())
                .map_err(|_| invalid()),
            DataType::UInt16 => u16::try_from(number.as_u64().ok_or_else(invalid)?)
                .map(|v| v.to_le_bytes().to_vec())
                .map_err(|_| invalid()),
            DataType::UInt32 => u32::try_from(number.as_u64().ok_or_else(invalid)?)
                .map(|v| v.to_le_bytes().to_vec())
                .map_err(|_| invalid()),
            DataType::UInt64 => number
                .as_u64()
                .map(|v| v.to_le_bytes().to_vec())
                .ok_or_else(invalid),
            DataType::Float32 | DataType::Float64 => unreachable!(),
        }
    }
}

impl From<f64> for FillValue {
    fn from(v: f64) -> Self {
        if v.is_nan() {
            Self(serde_json::Value::String("NaN".to_string()))
        } else if v == f64::INFINITY {
            Self(serde_json::Value::String("Infinity".to_string()))
        } else if v == f64::NEG_INFINITY {
            Self(serde_json::Value::String("-Infinity".to_string()))
        } else {
            Self(serde_json::json!(v))
        }
    }
}

impl From<f32> for FillValue {
    fn from(v: f32) -> Self {
        Self::from(f64::from(v))
    }
}

impl From<i64> for FillValue {
    fn from(v: i64) -> Self {
        Self(serde_json::json!(v))
    }
}

impl From<u64> for FillValue {
    fn from(v: u64) -> Self {
        Self(serde_json::json!(v))
    }
}

/// A named dimension of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    /// The dimension name.
    pub name: String,
    /// The number of index positions along the dimension.
    pub size: u64,
}

/// The schema of one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSchema {
    /// The variable name. A variable named after a dimension is a coordinate
    /// variable by convention.
    pub name: String,
    /// The ordered dimension names of the variable.
    pub dimensions: Vec<String>,
    /// The element type.
    pub data_type: DataType,
    /// The declared chunk length along each dimension. A length equal to the
    /// dimension size means unchunked along that axis.
    pub chunk_shape: Vec<u64>,
    /// The fill value returned for never-written chunks.
    pub fill_value: FillValue,
    /// Opaque attributes, copied verbatim.
    #[serde(default)]
    pub attributes: Attributes,
}

/// The schema of a dataset: dimensions, variables and attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSchema {
    /// The declared dimensions.
    pub dimensions: Vec<Dimension>,
    /// The variables of the dataset.
    pub variables: Vec<VariableSchema>,
    /// Opaque dataset-level attributes, copied verbatim.
    #[serde(default)]
    pub attributes: Attributes,
}

impl DatasetSchema {
    /// Look up a dimension by name.
    #[must_use]
    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Look up a variable by name.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&VariableSchema> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// The shape of `variable`, derived from the declared dimension sizes.
    ///
    /// Returns [`None`] if the variable or one of its dimensions is unknown.
    #[must_use]
    pub fn variable_shape(&self, variable: &VariableSchema) -> Option<Vec<u64>> {
        variable
            .dimensions
            .iter()
            .map(|d| self.dimension(d).map(|d| d.size))
            .collect()
    }

    /// Validate the schema invariants: unique names, every variable
    /// dimension declared, chunk shapes of the right length with nonzero
    /// lengths, at least one dimension per variable, and representable fill
    /// values.
    ///
    /// # Errors
    /// Returns the first [`SchemaError`] encountered.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = std::collections::BTreeSet::new();
        for dimension in &self.dimensions {
            if !seen.insert(dimension.name.as_str()) {
                return Err(SchemaError::Duplicate(dimension.name.clone()));
            }
        }
        let mut seen = std::collections::BTreeSet::new();
        for variable in &self.variables {
            if !seen.insert(variable.name.as_str()) {
                return Err(SchemaError::Duplicate(variable.name.clone()));
            }
            if variable.dimensions.is_empty() {
                return Err(SchemaError::ZeroDimensional {
                    variable: variable.name.clone(),
                });
            }
            for dimension in &variable.dimensions {
                if self.dimension(dimension).is_none() {
                    return Err(SchemaError::UndeclaredDimension {
                        variable: variable.name.clone(),
                        dimension: dimension.clone(),
                    });
                }
            }
            if variable.chunk_shape.len() != variable.dimensions.len() {
                return Err(SchemaError::ChunkShapeLength {
                    variable: variable.name.clone(),
                    expected: variable.dimensions.len(),
                    got: variable.chunk_shape.len(),
                });
            }
            if variable.chunk_shape.contains(&0) {
                return Err(SchemaError::ZeroChunkLength {
                    variable: variable.name.clone(),
                });
            }
            variable.fill_value.to_le_bytes(variable.data_type)?;
        }
        Ok(())
    }
}
