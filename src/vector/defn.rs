use std::fmt;
use std::str::FromStr;

use crate::errors::{Result, VirtualLayerError};

/// Attribute types a virtual layer can expose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    Integer64,
    Real,
    String,
    Date,
    DateTime,
    Binary,
}

impl FieldType {
    /// The column type written into relation declarations.
    pub fn decl_type(&self) -> &'static str {
        match self {
            FieldType::Integer => "INT",
            FieldType::Integer64 => "BIGINT",
            FieldType::Real => "REAL",
            FieldType::String => "TEXT",
            FieldType::Date => "DATE",
            FieldType::DateTime => "DATETIME",
            FieldType::Binary => "BLOB",
        }
    }

    /// Maps a declared column type back to a field type.
    ///
    /// Returns `None` for declarations that carry no usable type information,
    /// including geometry declarations.
    pub fn from_decl_type(decl: &str) -> Option<FieldType> {
        let decl = decl.trim().to_ascii_uppercase();
        if decl.is_empty() || decl.starts_with("GEOMETRY") {
            return None;
        }
        let field_type = match decl.as_str() {
            "BIGINT" | "INT8" | "INTEGER64" => FieldType::Integer64,
            "DATE" => FieldType::Date,
            "DATETIME" | "TIMESTAMP" => FieldType::DateTime,
            d if d.contains("INT") => FieldType::Integer,
            d if d.contains("CHAR") || d.contains("CLOB") || d.contains("TEXT") => {
                FieldType::String
            }
            d if d.contains("BLOB") => FieldType::Binary,
            d if d.contains("REAL")
                || d.contains("FLOA")
                || d.contains("DOUB")
                || d.contains("NUMERIC")
                || d.contains("DECIMAL") =>
            {
                FieldType::Real
            }
            _ => return None,
        };
        Some(field_type)
    }

    /// The name used in `field=<name>:<type>` overrides.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Integer => "int",
            FieldType::Integer64 => "int8",
            FieldType::Real => "real",
            FieldType::String => "text",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Binary => "blob",
        }
    }
}

impl FromStr for FieldType {
    type Err = VirtualLayerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(FieldType::Integer),
            "int8" | "bigint" | "integer64" => Ok(FieldType::Integer64),
            "real" | "double" => Ok(FieldType::Real),
            "string" | "text" => Ok(FieldType::String),
            "date" => Ok(FieldType::Date),
            "datetime" => Ok(FieldType::DateTime),
            "blob" => Ok(FieldType::Binary),
            other => Err(VirtualLayerError::ConfigurationError(format!(
                "Unknown field type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named, typed attribute column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    name: String,
    field_type: FieldType,
}

impl Field {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Field {
            name: name.to_string(),
            field_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }
}

/// Ordered attribute list of a layer or source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fields {
    fields: Vec<Field>,
}

impl Fields {
    pub fn new(fields: Vec<Field>) -> Self {
        Fields { fields }
    }

    /// Builds a field list from `(name, type)` pairs.
    pub fn from_defn(defn: &[(&str, FieldType)]) -> Self {
        Fields {
            fields: defn.iter().map(|(n, t)| Field::new(n, *t)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    /// Index of the field called `name`, compared case-insensitively.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.fields.iter()
    }
}

impl<'a> IntoIterator for &'a Fields {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decl_type_mapping() {
        assert_eq!(FieldType::from_decl_type("INT"), Some(FieldType::Integer));
        assert_eq!(FieldType::from_decl_type("integer"), Some(FieldType::Integer));
        assert_eq!(FieldType::from_decl_type("BIGINT"), Some(FieldType::Integer64));
        assert_eq!(FieldType::from_decl_type("varchar(20)"), Some(FieldType::String));
        assert_eq!(FieldType::from_decl_type("DOUBLE"), Some(FieldType::Real));
        assert_eq!(FieldType::from_decl_type("DATETIME"), Some(FieldType::DateTime));
        assert_eq!(FieldType::from_decl_type("GEOMETRY(1,4326)"), None);
        assert_eq!(FieldType::from_decl_type(""), None);
        for t in [
            FieldType::Integer,
            FieldType::Integer64,
            FieldType::Real,
            FieldType::String,
            FieldType::Date,
            FieldType::DateTime,
            FieldType::Binary,
        ] {
            assert_eq!(FieldType::from_decl_type(t.decl_type()), Some(t));
        }
    }

    #[test]
    fn test_override_names() {
        assert_eq!("integer".parse::<FieldType>().unwrap(), FieldType::Integer);
        assert_eq!("Double".parse::<FieldType>().unwrap(), FieldType::Real);
        assert_eq!("string".parse::<FieldType>().unwrap(), FieldType::String);
        assert!("varchar".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_index_of_is_case_insensitive() {
        let fields = Fields::from_defn(&[("Id", FieldType::Integer), ("name", FieldType::String)]);
        assert_eq!(fields.index_of("id"), Some(0));
        assert_eq!(fields.index_of("NAME"), Some(1));
        assert_eq!(fields.index_of("other"), None);
    }
}
