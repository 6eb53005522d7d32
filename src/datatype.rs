// used to print out readable forms of a type class
use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse classes of engine data types. Rules declare the class they can be
/// tested against, and the planner only pairs a rule with columns of that class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeClass {
    String,
    Numeric,
    Temporal,
    Boolean,
    Binary,
    Complex,
    Other,
}

impl TypeClass {
    /// Classifies a data type as reported by a metadata service, e.g.
    /// `STRING`, `varchar(255)`, `decimal(10,2)` or `array<string>`.
    pub fn of(data_type: &str) -> Self {
        let normalized = data_type.trim().to_ascii_lowercase();
        // parameters such as the length in varchar(255) do not change the class
        let base = normalized
            .split(|c: char| c == '(' || c == '<' || c.is_whitespace())
            .next()
            .unwrap_or("");
        match base {
            "string" | "varchar" | "char" | "character" | "text" | "nvarchar" | "nchar"
            | "clob" | "varying" | "" => Self::String,
            "tinyint" | "smallint" | "int" | "integer" | "bigint" | "long" | "short"
            | "byte" | "float" | "double" | "real" | "decimal" | "numeric" | "number" => {
                Self::Numeric
            }
            "date" | "timestamp" | "timestamp_ntz" | "datetime" | "time" | "interval" => {
                Self::Temporal
            }
            "boolean" | "bool" => Self::Boolean,
            "binary" | "blob" | "varbinary" | "bytea" => Self::Binary,
            "array" | "map" | "struct" | "variant" | "json" => Self::Complex,
            _ => Self::Other,
        }
    }
}

impl Default for TypeClass {
    fn default() -> Self {
        Self::String
    }
}

impl fmt::Display for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Numeric => "numeric",
            Self::Temporal => "temporal",
            Self::Boolean => "boolean",
            Self::Binary => "binary",
            Self::Complex => "complex",
            Self::Other => "other",
        };
        write!(f, "{name}")
    }
}
