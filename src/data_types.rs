use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use strum_macros::{Display, EnumString};

pub type RowCount = i64;

lazy_static! {
    // e.g. "VARCHAR(50)", "character varying(12)", "NUMERIC(10, 2)"
    static ref DECLARED_LENGTH: Regex = Regex::new(r"\(\s*(\d+)\s*(?:,\s*\d+\s*)?\)").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum BackendKind {
    Sqlite,
    Postgres,
}

/// Base type tag of a destination column, as declared in the live catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseType {
    Integer,
    BigInt,
    Float,
    Double,
    Real,
    Text,
    Varchar,
    Boolean,
    Date,
    Timestamp,
    // Anything we don't coerce (NUMERIC, JSON, UUID...): values are left as text
    Other(String),
}

/// The value family a column is coerced into before insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TypeFamily {
    Integer,
    Floating,
    Boolean,
    CalendarDate,
    String,
    Unmapped,
}

impl BaseType {
    /// Parse the type name part of a declaration. Handles both the SQL spelling used
    /// in CREATE TABLE scripts (what SQLite hands back) and the long-form names
    /// reported by PostgreSQL's information_schema.
    pub fn parse(type_name: &str) -> Self {
        let lower = type_name.trim().to_lowercase();
        let name = match lower.find('(') {
            Some(idx) => lower[..idx].trim_end(),
            None => lower.as_str(),
        };

        match name {
            "integer" | "int" | "int4" | "int2" | "smallint" | "tinyint" | "mediumint" => {
                BaseType::Integer
            }
            "bigint" | "int8" => BaseType::BigInt,
            "float" => BaseType::Float,
            "double" | "double precision" | "float8" => BaseType::Double,
            "real" | "float4" => BaseType::Real,
            "text" => BaseType::Text,
            "varchar" | "character varying" | "char" | "character" | "bpchar"
            | "nvarchar" | "nchar" => BaseType::Varchar,
            "boolean" | "bool" => BaseType::Boolean,
            "date" => BaseType::Date,
            n if n.starts_with("timestamp") || n == "datetime" => BaseType::Timestamp,
            _ => BaseType::Other(name.to_string()),
        }
    }

    pub fn family(&self) -> TypeFamily {
        match self {
            BaseType::Integer | BaseType::BigInt => TypeFamily::Integer,
            BaseType::Float | BaseType::Double | BaseType::Real => TypeFamily::Floating,
            BaseType::Boolean => TypeFamily::Boolean,
            BaseType::Date | BaseType::Timestamp => TypeFamily::CalendarDate,
            BaseType::Text | BaseType::Varchar => TypeFamily::String,
            BaseType::Other(_) => TypeFamily::Unmapped,
        }
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BaseType::Integer => "INTEGER",
            BaseType::BigInt => "BIGINT",
            BaseType::Float => "FLOAT",
            BaseType::Double => "DOUBLE",
            BaseType::Real => "REAL",
            BaseType::Text => "TEXT",
            BaseType::Varchar => "VARCHAR",
            BaseType::Boolean => "BOOLEAN",
            BaseType::Date => "DATE",
            BaseType::Timestamp => "TIMESTAMP",
            BaseType::Other(other) => return write!(f, "{}", other.to_uppercase()),
        };
        f.write_str(name)
    }
}

/// One destination column, read from the live catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub base_type: BaseType,
    pub length: Option<usize>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, base_type: BaseType, length: Option<usize>) -> Self {
        Self {
            name: name.into(),
            base_type,
            length,
        }
    }

    // Split a declaration such as `VARCHAR(50)` into its base type and length
    pub fn from_declared(name: impl Into<String>, declared_type: &str) -> Self {
        let length = DECLARED_LENGTH
            .captures(declared_type)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok());

        Self::new(name, BaseType::parse(declared_type), length)
    }

    pub fn family(&self) -> TypeFamily {
        self.base_type.family()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    pub namespace: String,
    pub backend: BackendKind,
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ({})", self.namespace, self.name, self.backend)
    }
}

/// Per-table state, recomputed on every run. Loads are all-or-nothing, so there is
/// no partially loaded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Missing,
    ExistsEmpty,
    ExistsPopulated(RowCount),
}

impl TableState {
    pub fn from_catalog(exists: bool, row_count: RowCount) -> Self {
        match (exists, row_count) {
            (false, _) => TableState::Missing,
            (true, 0) => TableState::ExistsEmpty,
            (true, n) => TableState::ExistsPopulated(n),
        }
    }

    pub fn should_insert(&self) -> bool {
        matches!(self, TableState::ExistsEmpty)
    }
}
