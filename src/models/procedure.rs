//! Stored procedure request and result models.
//!
//! This module defines the types for a procedure invocation: the parameter values,
//! the caller's expected result shape, and the normalized result.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::time::Duration;
use tiberius::numeric::Numeric;
use tokio_util::sync::CancellationToken;

use crate::error::{DbError, DbResult};

/// A single result row: column name to decoded value.
pub type Row = Map<String, JsonValue>;

/// One result set produced by a statement inside a procedure.
pub type RecordSet = Vec<Row>;

/// Bound parameters keyed by name. Sorted keys make binding independent of the
/// order in which parameters were supplied.
pub type Params = BTreeMap<String, ProcParam>;

/// A scalar parameter value bound by name.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcParam {
    /// SQL NULL
    Null,
    /// BIT
    Bit(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// FLOAT
    Float(f64),
    /// DECIMAL/NUMERIC with explicit scale
    Decimal(Numeric),
    /// NVARCHAR
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl ProcParam {
    /// Create a decimal parameter from an unscaled integer, e.g. `decimal(3590, 2)` is 35.90.
    pub fn decimal(value: i128, scale: u8) -> Self {
        Self::Decimal(Numeric::new_with_scale(value, scale))
    }

    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bit(_) => "bit",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::DateTime(_) => "datetime",
        }
    }

    /// JSON rendering used for diagnostics.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bit(v) => JsonValue::Bool(*v),
            Self::Int(v) => JsonValue::from(*v),
            Self::Float(v) => JsonValue::from(*v),
            Self::Decimal(n) => JsonValue::from(numeric_to_f64(n)),
            Self::String(v) => JsonValue::String(v.clone()),
            Self::Date(d) => JsonValue::String(d.to_string()),
            Self::DateTime(dt) => JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        }
    }
}

/// Convert a SQL numeric to f64 (JSON has no decimal type).
pub(crate) fn numeric_to_f64(n: &Numeric) -> f64 {
    n.value() as f64 / 10f64.powi(i32::from(n.scale()))
}

macro_rules! impl_from_param {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for ProcParam {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )+
    };
}

impl_from_param! {
    bool => Bit,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f64 => Float,
    Numeric => Decimal,
    String => String,
    &str => String,
    NaiveDate => Date,
    NaiveDateTime => DateTime,
}

impl<T: Into<ProcParam>> From<Option<T>> for ProcParam {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ProcParam::Null)
    }
}

/// Result shape the caller expects the procedure to produce.
///
/// This is an assertion about the procedure, not something the gateway checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedReturn {
    /// Discard everything the procedure returns.
    #[default]
    None,
    /// First row of the first result set.
    Single,
    /// Every result set, optionally named.
    Multi,
}

/// A stored procedure invocation.
#[derive(Debug, Clone)]
pub struct ProcedureRequest {
    pub procedure: String,
    pub params: Params,
    pub expected: ExpectedReturn,
    /// Names zipped positionally onto result sets. Only used with `ExpectedReturn::Multi`.
    pub result_set_names: Vec<String>,
    /// Deadline for checkout plus execution. Falls back to the gateway default.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl ProcedureRequest {
    /// Create a new request that expects no result.
    pub fn new(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            params: Params::new(),
            expected: ExpectedReturn::None,
            result_set_names: Vec::new(),
            timeout: None,
            cancel: None,
        }
    }

    /// Bind a parameter. A leading `@` on the name is optional.
    pub fn param(mut self, name: impl AsRef<str>, value: impl Into<ProcParam>) -> Self {
        let name = name.as_ref();
        let name = name.strip_prefix('@').unwrap_or(name);
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// Bind many parameters at once.
    pub fn params(mut self, params: Params) -> Self {
        for (name, value) in params {
            self = self.param(name, value);
        }
        self
    }

    /// Set the expected result shape.
    pub fn expect(mut self, expected: ExpectedReturn) -> Self {
        self.expected = expected;
        self
    }

    /// Expect every result set, keyed by the given names in order.
    pub fn expect_named<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected = ExpectedReturn::Multi;
        self.result_set_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abort the invocation when the token is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Check names before anything is sent to the server.
    pub fn validate(&self) -> DbResult<()> {
        validate_procedure_name(&self.procedure)?;

        for name in self.params.keys() {
            if !is_identifier(name) {
                return Err(DbError::invalid_input(format!(
                    "Invalid parameter name '{}' for procedure '{}'",
                    name, self.procedure
                )));
            }
        }

        if self.expected == ExpectedReturn::Multi {
            let mut seen = std::collections::HashSet::new();
            for name in &self.result_set_names {
                if !seen.insert(name.as_str()) {
                    return Err(DbError::invalid_input(format!(
                        "Duplicate result set name '{}'",
                        name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Validate a procedure name: one or two dot-separated identifiers (`proc` or `schema.proc`).
pub fn validate_procedure_name(name: &str) -> DbResult<()> {
    if name.is_empty() {
        return Err(DbError::invalid_input("Procedure name cannot be empty"));
    }

    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|part| is_identifier(part)) {
        return Err(DbError::invalid_input(format!(
            "Invalid procedure name '{}'",
            name
        )));
    }
    Ok(())
}

/// SQL Server regular identifier: starts with a letter, `_` or `#`, continues with
/// letters, digits, `_`, `#`, `$` or `@`. At most 128 characters (sysname).
///
/// A leading `@` is not accepted since parameter names are written as `@name`.
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    s.chars().count() <= 128
        && (first.is_alphabetic() || first == '_' || first == '#')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '#' | '$' | '@'))
}

/// Normalized result of an invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InvocationResult {
    None,
    Single(Option<Row>),
    Multi(Vec<RecordSet>),
    MultiNamed(BTreeMap<String, RecordSet>),
}

impl InvocationResult {
    /// Shape raw result sets according to the caller's expectation.
    pub fn shape(
        expected: ExpectedReturn,
        names: &[String],
        mut sets: Vec<RecordSet>,
    ) -> DbResult<Self> {
        match expected {
            ExpectedReturn::None => Ok(Self::None),
            ExpectedReturn::Single => {
                let first = if sets.is_empty() {
                    None
                } else {
                    sets.swap_remove(0).into_iter().next()
                };
                Ok(Self::Single(first))
            }
            ExpectedReturn::Multi if names.is_empty() => Ok(Self::Multi(sets)),
            ExpectedReturn::Multi => {
                if names.len() > sets.len() {
                    return Err(DbError::database(
                        format!(
                            "Procedure returned {} result set(s) but {} names were supplied",
                            sets.len(),
                            names.len()
                        ),
                        None,
                    ));
                }
                Ok(Self::MultiNamed(
                    names.iter().cloned().zip(sets).collect(),
                ))
            }
        }
    }

    /// The single row, if this is a `Single` result with a row.
    pub fn into_single(self) -> Option<Row> {
        match self {
            Self::Single(row) => row,
            _ => None,
        }
    }

    /// All result sets, if this is an unnamed `Multi` result.
    pub fn into_multi(self) -> Option<Vec<RecordSet>> {
        match self {
            Self::Multi(sets) => Some(sets),
            _ => None,
        }
    }

    /// Named result sets, if this is a `MultiNamed` result.
    pub fn into_named(self) -> Option<BTreeMap<String, RecordSet>> {
        match self {
            Self::MultiNamed(sets) => Some(sets),
            _ => None,
        }
    }

    /// Decode the single row into a typed value.
    pub fn single_as<T: DeserializeOwned>(self) -> DbResult<Option<T>> {
        self.into_single()
            .map(|row| {
                serde_json::from_value(JsonValue::Object(row))
                    .map_err(|e| DbError::internal(format!("Failed to decode row: {}", e)))
            })
            .transpose()
    }
}

/// Row returned by create procedures.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateObjectResult {
    pub id: i64,
    pub date_created: NaiveDateTime,
}
