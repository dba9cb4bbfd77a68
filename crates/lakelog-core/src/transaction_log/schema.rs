//! Table schema stored in `Metadata.schema_string`.
//!
//! The schema is serialized as a struct type:
//!
//! ```json
//! {"type":"struct","fields":[{"name":"id","type":"long","nullable":false,"metadata":{}}]}
//! ```
//!
//! Only flat schemas of primitive columns are supported; each primitive maps
//! to exactly one Arrow [`DataType`].
use std::{collections::BTreeMap, collections::HashSet, fmt, sync::Arc};

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Primitive column types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// 64-bit signed integer.
    Long,
    /// 32-bit signed integer.
    Integer,
    /// 16-bit signed integer.
    Short,
    /// 8-bit signed integer.
    Byte,
    /// 64-bit float.
    Double,
    /// 32-bit float.
    Float,
    /// Boolean.
    Boolean,
    /// Opaque bytes.
    Binary,
    /// Calendar date.
    Date,
    /// Microsecond-precision UTC timestamp.
    Timestamp,
}

impl FieldType {
    /// The Arrow type used for columns of this type.
    pub fn to_arrow(self) -> DataType {
        match self {
            FieldType::String => DataType::Utf8,
            FieldType::Long => DataType::Int64,
            FieldType::Integer => DataType::Int32,
            FieldType::Short => DataType::Int16,
            FieldType::Byte => DataType::Int8,
            FieldType::Double => DataType::Float64,
            FieldType::Float => DataType::Float32,
            FieldType::Boolean => DataType::Boolean,
            FieldType::Binary => DataType::Binary,
            FieldType::Date => DataType::Date32,
            FieldType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        }
    }

    /// Map an Arrow type back to a column type, if supported.
    pub fn from_arrow(dt: &DataType) -> Option<Self> {
        Some(match dt {
            DataType::Utf8 | DataType::LargeUtf8 => FieldType::String,
            DataType::Int64 => FieldType::Long,
            DataType::Int32 => FieldType::Integer,
            DataType::Int16 => FieldType::Short,
            DataType::Int8 => FieldType::Byte,
            DataType::Float64 => FieldType::Double,
            DataType::Float32 => FieldType::Float,
            DataType::Boolean => FieldType::Boolean,
            DataType::Binary | DataType::LargeBinary => FieldType::Binary,
            DataType::Date32 => FieldType::Date,
            DataType::Timestamp(TimeUnit::Microsecond, _) => FieldType::Timestamp,
            _ => return None,
        })
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::String => "string",
            FieldType::Long => "long",
            FieldType::Integer => "integer",
            FieldType::Short => "short",
            FieldType::Byte => "byte",
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Binary => "binary",
            FieldType::Date => "date",
            FieldType::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}

/// A single column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaField {
    /// Column name.
    pub name: String,
    /// Column type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the column allows nulls.
    pub nullable: bool,
    /// Free-form column metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl SchemaField {
    /// A column without metadata.
    pub fn new(name: impl Into<String>, field_type: FieldType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable,
            metadata: BTreeMap::new(),
        }
    }
}

/// Errors that can occur while constructing or parsing a table schema.
#[derive(Debug, Snafu)]
pub enum SchemaError {
    /// Duplicate column names are not allowed.
    #[snafu(display("Duplicate column name: {column}"))]
    DuplicateColumn {
        /// The duplicate column name.
        column: String,
    },

    /// The Arrow type of a column has no table-format counterpart.
    #[snafu(display("Unsupported type for column '{column}': {data_type}"))]
    UnsupportedType {
        /// Column name.
        column: String,
        /// Display form of the Arrow type.
        data_type: String,
    },

    /// The top-level schema type was not `struct`.
    #[snafu(display("Schema must be a struct type, found '{found}'"))]
    NotAStruct {
        /// The type that was found.
        found: String,
    },

    /// The schema string is not valid JSON.
    #[snafu(display("Invalid schema JSON: {source}"))]
    InvalidJson {
        /// Underlying serde_json error.
        source: serde_json::Error,
    },
}

#[derive(Serialize, Deserialize)]
struct StructRepr {
    #[serde(rename = "type")]
    type_name: String,
    fields: Vec<SchemaField>,
}

/// Ordered, validated collection of columns.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    fields: Vec<SchemaField>,
}

impl TableSchema {
    /// Construct a validated schema (rejects duplicate column names).
    pub fn new(fields: Vec<SchemaField>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return DuplicateColumnSnafu {
                    column: field.name.clone(),
                }
                .fail();
            }
        }
        Ok(Self { fields })
    }

    /// Borrow the columns in order.
    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    /// Look up a column by name.
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Derive a schema from an Arrow schema.
    pub fn from_arrow(schema: &Schema) -> Result<Self, SchemaError> {
        let fields = schema
            .fields()
            .iter()
            .map(|f| {
                let field_type =
                    FieldType::from_arrow(f.data_type()).context(UnsupportedTypeSnafu {
                        column: f.name().clone(),
                        data_type: f.data_type().to_string(),
                    })?;
                Ok(SchemaField::new(f.name().clone(), field_type, f.is_nullable()))
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;
        Self::new(fields)
    }

    /// Convert to an owned Arrow [`Schema`].
    pub fn to_arrow_schema(&self) -> Schema {
        Schema::new(
            self.fields
                .iter()
                .map(|f| Field::new(f.name.clone(), f.field_type.to_arrow(), f.nullable))
                .collect::<Vec<_>>(),
        )
    }

    /// Convert to a shared Arrow [`SchemaRef`].
    pub fn to_arrow_schema_ref(&self) -> SchemaRef {
        Arc::new(self.to_arrow_schema())
    }

    /// Serialize into the form stored in `Metadata.schema_string`.
    pub fn to_json(&self) -> Result<String, SchemaError> {
        serde_json::to_string(&StructRepr {
            type_name: "struct".to_string(),
            fields: self.fields.clone(),
        })
        .context(InvalidJsonSnafu)
    }

    /// Parse a `Metadata.schema_string`.
    pub fn from_json(s: &str) -> Result<Self, SchemaError> {
        let repr: StructRepr = serde_json::from_str(s).context(InvalidJsonSnafu)?;
        ensure!(
            repr.type_name == "struct",
            NotAStructSnafu {
                found: repr.type_name
            }
        );
        Self::new(repr.fields)
    }
}
