//! Parameter binding utilities for procedure calls.
//!
//! Procedures are executed as an `EXEC` batch with every argument passed by name:
//!
//! ```text
//! EXEC [dbo].[GetProductById] @id = @P1, @idAccount = @P2
//! ```
//!
//! Names come from the sorted parameter map so the statement text does not depend
//! on the order the caller supplied parameters in. Names are validated as identifiers
//! by [`ProcedureRequest::validate`](crate::models::ProcedureRequest::validate) before
//! they reach this module.

use crate::models::{ProcParam, Params};
use tiberius::Query;

/// Quote a (possibly schema-qualified) procedure name: `dbo.Proc` -> `[dbo].[Proc]`.
pub(crate) fn quote_procedure(name: &str) -> String {
    name.split('.')
        .map(|part| format!("[{}]", part.replace(']', "]]")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Build the `EXEC` statement for a procedure and its named parameters.
pub(crate) fn exec_statement(procedure: &str, params: &Params) -> String {
    let mut sql = format!("EXEC {}", quote_procedure(procedure));
    for (index, name) in params.keys().enumerate() {
        let sep = if index == 0 { " " } else { ", " };
        sql.push_str(&format!("{sep}@{name} = @P{}", index + 1));
    }
    sql
}

/// Bind a parameter to a SQL Server query.
pub(crate) fn bind_mssql_param<'a>(query: &mut Query<'a>, param: &'a ProcParam) {
    match param {
        ProcParam::Null => query.bind(Option::<&str>::None),
        ProcParam::Bit(v) => query.bind(*v),
        ProcParam::Int(v) => query.bind(*v),
        ProcParam::Float(v) => query.bind(*v),
        ProcParam::Decimal(v) => query.bind(*v),
        ProcParam::String(v) => query.bind(v.as_str()),
        ProcParam::Date(v) => query.bind(*v),
        ProcParam::DateTime(v) => query.bind(*v),
    }
}

/// Build a ready-to-run query for a procedure call.
pub(crate) fn build_query<'a>(procedure: &str, params: &'a Params) -> Query<'a> {
    let mut query = Query::new(exec_statement(procedure, params));
    for value in params.values() {
        bind_mssql_param(&mut query, value);
    }
    query
}
