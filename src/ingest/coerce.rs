use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
};
use arrow::compute::cast;
use arrow::datatypes::Date32Type;
use arrow_schema::DataType;
use chrono::NaiveDate;
use serde::Deserialize;
use strum_macros::{Display, EnumString};
use tracing::{debug, warn};

use super::{IngestError, Result};
use crate::data_types::{ColumnSchema, TableSchema, TypeFamily};
use crate::records::RecordSet;

pub const DEFAULT_DATE_FORMAT: &str = "%d-%m-%Y";
pub const DEFAULT_TRUTHY: [&str; 5] = ["true", "1", "yes", "y", "t"];
pub const DEFAULT_FALSY: [&str; 5] = ["false", "0", "no", "n", "f"];

// Text that numeric columns treat as "no value"
const NUMERIC_NULL_TOKENS: [&str; 2] = ["", "nan"];

/// What numeric columns do with null, empty and "nan" values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NumericNullPolicy {
    /// Store 0. Lossy: "missing" and "zero" become indistinguishable.
    #[default]
    Zero,
    /// Store NULL.
    Null,
}

/// Case-insensitive text → boolean mapping. Nulls and empty strings are false;
/// anything outside the lexicon is false and reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BooleanLexicon {
    truthy: HashSet<String>,
    falsy: HashSet<String>,
}

impl Default for BooleanLexicon {
    fn default() -> Self {
        Self::new(DEFAULT_TRUTHY, DEFAULT_FALSY)
    }
}

impl BooleanLexicon {
    pub fn new<I, J, S, T>(truthy: I, falsy: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            truthy: truthy
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .collect(),
            falsy: falsy
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    /// `None` means the value is not in the lexicon.
    pub fn lookup(&self, value: Option<&str>) -> Option<bool> {
        let value = match value.map(str::trim) {
            None | Some("") => return Some(false),
            Some(v) => v.to_lowercase(),
        };

        if self.truthy.contains(&value) {
            Some(true)
        } else if self.falsy.contains(&value) {
            Some(false)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoercionWarning {
    /// The column could not be cast and was left as text.
    CastFailed {
        column: String,
        family: TypeFamily,
        reason: String,
    },
    /// Boolean column values outside the lexicon (stored as false).
    UnmappedBoolean { column: String, values: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct Coerced {
    pub records: RecordSet,
    pub warnings: Vec<CoercionWarning>,
}

/// Casts reconciled text columns to the value family of their destination column.
///
/// The policies are fixed at construction time; a failed cast never escapes, it
/// leaves the column as text and records a [`CoercionWarning`].
#[derive(Debug, Clone)]
pub struct TypeCoercer {
    numeric_nulls: NumericNullPolicy,
    booleans: BooleanLexicon,
    date_format: String,
}

impl Default for TypeCoercer {
    fn default() -> Self {
        Self::new(
            NumericNullPolicy::default(),
            BooleanLexicon::default(),
            DEFAULT_DATE_FORMAT,
        )
    }
}

impl TypeCoercer {
    pub fn new(
        numeric_nulls: NumericNullPolicy,
        booleans: BooleanLexicon,
        date_format: impl Into<String>,
    ) -> Self {
        Self {
            numeric_nulls,
            booleans,
            date_format: date_format.into(),
        }
    }

    pub fn coerce(&self, records: &RecordSet, schema: &TableSchema) -> Result<Coerced> {
        let mut warnings = vec![];
        let mut columns = Vec::with_capacity(records.num_columns());

        for (field, array) in records
            .schema()
            .fields()
            .iter()
            .zip(records.batch().columns())
        {
            let name = field.name();
            let coerced = match schema.column(name) {
                Some(column) => match self.coerce_column(column, array) {
                    Ok((coerced, unmapped)) => {
                        if !unmapped.is_empty() {
                            warn!(
                                "Column '{name}': unmapped boolean values {unmapped:?}, stored as false"
                            );
                            warnings.push(CoercionWarning::UnmappedBoolean {
                                column: name.clone(),
                                values: unmapped,
                            });
                        }
                        coerced
                    }
                    Err(reason) => {
                        warn!(
                            "Could not convert '{name}' to {}: {reason}, values left as text",
                            column.base_type
                        );
                        warnings.push(CoercionWarning::CastFailed {
                            column: name.clone(),
                            family: column.family(),
                            reason,
                        });
                        array.clone()
                    }
                },
                None => array.clone(),
            };
            columns.push((name.clone(), coerced));
        }

        let records = RecordSet::try_new(columns).map_err(|source| IngestError::Arrow {
            path: schema.table.clone().into(),
            source,
        })?;
        Ok(Coerced { records, warnings })
    }

    // Returns the new column plus any unmapped boolean values
    fn coerce_column(
        &self,
        column: &ColumnSchema,
        array: &ArrayRef,
    ) -> Result<(ArrayRef, Vec<String>), String> {
        let family = column.family();
        if family == TypeFamily::Unmapped {
            return Ok((array.clone(), vec![]));
        }

        let text = cast(array, &DataType::Utf8).map_err(|e| e.to_string())?;
        let text = text
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| "expected a text column".to_string())?;

        debug!("Coercing '{}' as {family}", column.name);
        let coerced: ArrayRef = match family {
            TypeFamily::Integer => Arc::new(
                text.iter()
                    .map(|v| self.numeric(v, parse_integer))
                    .collect::<Result<Int64Array, String>>()?,
            ),
            TypeFamily::Floating => Arc::new(
                text.iter()
                    .map(|v| self.numeric(v, parse_float))
                    .collect::<Result<Float64Array, String>>()?,
            ),
            TypeFamily::Boolean => {
                let mut unmapped = BTreeSet::new();
                let values: BooleanArray = text
                    .iter()
                    .map(|v| {
                        Some(self.booleans.lookup(v).unwrap_or_else(|| {
                            unmapped.insert(v.unwrap_or_default().to_string());
                            false
                        }))
                    })
                    .collect();
                return Ok((Arc::new(values), unmapped.into_iter().collect()));
            }
            TypeFamily::CalendarDate => {
                let values: Date32Array = text
                    .iter()
                    .map(|v| {
                        v.and_then(|v| NaiveDate::parse_from_str(v.trim(), &self.date_format).ok())
                            .map(Date32Type::from_naive_date)
                    })
                    .collect();
                Arc::new(values)
            }
            TypeFamily::String => match column.length {
                Some(length) => Arc::new(
                    text.iter()
                        .map(|v| v.map(|s| s.chars().take(length).collect::<String>()))
                        .collect::<StringArray>(),
                ),
                None => Arc::new(text.clone()),
            },
            TypeFamily::Unmapped => unreachable!("handled above"),
        };

        Ok((coerced, vec![]))
    }

    fn numeric<T: Default>(
        &self,
        value: Option<&str>,
        parse: fn(&str) -> Result<T, String>,
    ) -> Result<Option<T>, String> {
        match value {
            None => Ok(self.null_value()),
            Some(v) if NUMERIC_NULL_TOKENS.contains(&v.trim()) => Ok(self.null_value()),
            Some(v) => parse(v.trim()).map(Some),
        }
    }

    fn null_value<T: Default>(&self) -> Option<T> {
        match self.numeric_nulls {
            NumericNullPolicy::Zero => Some(T::default()),
            NumericNullPolicy::Null => None,
        }
    }
}

fn parse_float(value: &str) -> Result<f64, String> {
    value
        .parse::<f64>()
        .map_err(|_| format!("cannot convert {value:?} to a number"))
}

// Integers go through a float first, so "3.0" and "1e3" are accepted (and "3.7" is
// truncated) the same way the upstream extracts have always been read.
fn parse_integer(value: &str) -> Result<i64, String> {
    if let Ok(v) = value.parse::<i64>() {
        return Ok(v);
    }

    let float = parse_float(value)?;
    if !float.is_finite() || float < i64::MIN as f64 || float >= i64::MAX as f64 {
        return Err(format!("cannot convert {value:?} to an integer"));
    }
    Ok(float.trunc() as i64)
}
