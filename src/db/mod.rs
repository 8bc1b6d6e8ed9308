//! Database access layer.
//!
//! This module provides the stored procedure gateway:
//! - Driver traits separating pooling and result shaping from the wire driver
//! - The gateway with its lazily created, single-flight pool
//! - Transactions spanning several procedure calls
//! - Parameter binding and SQL Server to JSON type mappings
//! - Redaction of parameter values in failure logs

pub mod driver;
pub mod gateway;
pub mod mssql;
pub mod params;
pub mod redact;
pub mod transaction;
pub mod types;

pub use driver::{
    ConnectionOf, ConnectionSource, Connector, PoolState, ProcedureCall, ProcedureConnection,
};
pub use gateway::{Gateway, PoolStatus};
pub use mssql::{MssqlConnection, MssqlConnector, MssqlPool};
pub use redact::{REDACTED, RedactionPolicy};
pub use transaction::Transaction;

/// Gateway over the SQL Server driver.
pub type MssqlGateway = Gateway<MssqlConnector>;
