//! Driver seams for the procedure gateway.
//!
//! The gateway is written against three small traits so the pooling and result shaping
//! logic does not depend on a particular wire driver:
//!
//! - [`Connector`]: builds a pool from configuration (called at most once per gateway)
//! - [`ConnectionSource`]: the pool itself, hands out connections
//! - [`ProcedureConnection`]: one checked-out connection that can run procedures
//!
//! The SQL Server implementation lives in [`crate::db::mssql`].

use crate::error::DbResult;
use crate::models::{Params, RecordSet};
use serde::Serialize;
use std::future::Future;

/// A procedure call as seen by a driver connection.
#[derive(Debug, Clone, Copy)]
pub struct ProcedureCall<'a> {
    pub procedure: &'a str,
    pub params: &'a Params,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolState {
    pub connections: u32,
    pub idle_connections: u32,
}

/// One checked-out connection.
///
/// Dropping the value returns it to its pool.
pub trait ProcedureConnection: Send + 'static {
    /// Execute a procedure and return every result set it produced.
    fn execute(
        &mut self,
        call: &ProcedureCall<'_>,
    ) -> impl Future<Output = DbResult<Vec<RecordSet>>> + Send;

    fn begin(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Mark the connection unusable so the pool closes it instead of reusing it.
    fn discard(&mut self);
}

/// A connection pool.
pub trait ConnectionSource: Send + Sync + 'static {
    type Connection: ProcedureConnection;

    /// Check out a connection.
    fn acquire(&self) -> impl Future<Output = DbResult<Self::Connection>> + Send;

    /// Stop handing out connections and close idle ones.
    fn close(&self) -> impl Future<Output = ()> + Send;

    fn state(&self) -> PoolState;
}

/// Builds a pool and verifies connectivity.
pub trait Connector: Send + Sync + 'static {
    type Pool: ConnectionSource;

    fn connect(&self) -> impl Future<Output = DbResult<Self::Pool>> + Send;
}

/// Connection type produced by a connector's pool.
pub type ConnectionOf<C> = <<C as Connector>::Pool as ConnectionSource>::Connection;
