//! SQL Server to JSON type mappings.
//!
//! Rows coming back from a procedure are decoded column by column into
//! `serde_json` values so callers get a uniform [`Row`] regardless of column types.
//!
//! | SQL Server type                         | JSON            |
//! |-----------------------------------------|-----------------|
//! | tinyint, smallint, int, bigint          | number          |
//! | real, float                             | number          |
//! | decimal, numeric, money                 | number          |
//! | bit                                     | bool            |
//! | char, varchar, nchar, nvarchar, xml     | string          |
//! | uniqueidentifier                        | string          |
//! | binary, varbinary, image                | base64 string   |
//! | date, time, datetime, datetime2, ...    | ISO-8601 string |
//! | NULL                                    | null            |

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;
use tiberius::{ColumnData, FromSql};

use crate::error::DbResult;
use crate::models::procedure::{RecordSet, Row, numeric_to_f64};

/// Format used for date-time columns without an offset.
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Decode a tiberius row into a JSON map keyed by column name.
pub fn row_to_json(row: tiberius::Row) -> DbResult<Row> {
    let names: Vec<String> = row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let mut map = Row::new();
    for (name, data) in names.into_iter().zip(row) {
        map.insert(name, column_to_json(data)?);
    }
    Ok(map)
}

/// Decode every row of every result set.
pub fn result_sets_to_json(sets: Vec<Vec<tiberius::Row>>) -> DbResult<Vec<RecordSet>> {
    sets.into_iter()
        .map(|rows| rows.into_iter().map(row_to_json).collect())
        .collect()
}

/// Decode a single column value.
pub fn column_to_json(data: ColumnData<'static>) -> DbResult<JsonValue> {
    let value = match data {
        ColumnData::U8(v) => v.map(JsonValue::from),
        ColumnData::I16(v) => v.map(JsonValue::from),
        ColumnData::I32(v) => v.map(JsonValue::from),
        ColumnData::I64(v) => v.map(JsonValue::from),
        ColumnData::F32(v) => v.map(|f| JsonValue::from(f64::from(f))),
        ColumnData::F64(v) => v.map(JsonValue::from),
        ColumnData::Bit(v) => v.map(JsonValue::Bool),
        ColumnData::String(v) => v.map(|s| JsonValue::String(s.into_owned())),
        ColumnData::Guid(v) => v.map(|g| JsonValue::String(g.to_string())),
        ColumnData::Binary(v) => v.map(|b| JsonValue::String(STANDARD.encode(b.as_ref()))),
        ColumnData::Numeric(v) => v.map(|n| JsonValue::from(numeric_to_f64(&n))),
        ColumnData::Xml(v) => v.map(|x| JsonValue::String(x.into_owned().into_string())),
        other => return temporal_to_json(&other),
    };
    Ok(value.unwrap_or(JsonValue::Null))
}

fn temporal_to_json(data: &ColumnData<'static>) -> DbResult<JsonValue> {
    let value = match data {
        ColumnData::Date(_) => NaiveDate::from_sql(data)?.map(|d| d.to_string()),
        ColumnData::Time(_) => NaiveTime::from_sql(data)?.map(|t| t.to_string()),
        ColumnData::DateTimeOffset(_) => {
            DateTime::<FixedOffset>::from_sql(data)?.map(|dt| dt.to_rfc3339())
        }
        _ => NaiveDateTime::from_sql(data)?.map(|dt| dt.format(DATETIME_FORMAT).to_string()),
    };
    Ok(value.map(JsonValue::String).unwrap_or(JsonValue::Null))
}
