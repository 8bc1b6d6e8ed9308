//! Transactions spanning several procedure calls.
//!
//! A [`Transaction`] owns one checked-out connection from `BEGIN TRANSACTION` until
//! it is committed or rolled back. Procedures run on that connection through
//! [`Gateway::invoke_in`](crate::db::Gateway::invoke_in), so a transaction never draws
//! extra connections from the pool.
//!
//! A transaction that is dropped without finishing has its connection discarded
//! rather than returned to the pool. SQL Server rolls back when the session closes.

use crate::db::driver::ProcedureConnection;
use crate::error::{DbError, DbResult};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct Transaction<C: ProcedureConnection> {
    id: String,
    conn: Option<C>,
    poisoned: bool,
    started_at: Instant,
}

impl<C: ProcedureConnection> Transaction<C> {
    /// Issue `BEGIN TRANSACTION` on a dedicated connection.
    pub(crate) async fn begin(mut conn: C) -> DbResult<Self> {
        if let Err(e) = conn.begin().await {
            conn.discard();
            return Err(e);
        }

        let id = generate_transaction_id();
        info!(transaction_id = %id, "Transaction started");

        Ok(Self {
            id,
            conn: Some(conn),
            poisoned: false,
            started_at: Instant::now(),
        })
    }

    /// Unique transaction identifier, used in logs.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// True once a call inside the transaction was interrupted.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Connection for the next call. Fails once the transaction is poisoned.
    pub(crate) fn connection(&mut self) -> DbResult<&mut C> {
        if self.poisoned {
            return Err(DbError::invalid_input(format!(
                "Transaction {} was interrupted and can only be rolled back",
                self.id
            )));
        }
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::internal(format!("Transaction {} has no connection", self.id)))
    }

    /// The connection's state is unknown after an interrupted call.
    pub(crate) fn poison(&mut self) {
        if !self.poisoned {
            warn!(transaction_id = %self.id, "Transaction poisoned by interrupted call");
        }
        self.poisoned = true;
    }

    /// Commit and return the connection to the pool.
    pub async fn commit(mut self) -> DbResult<()> {
        let mut conn = self.take_connection()?;

        if self.poisoned {
            conn.discard();
            return Err(DbError::invalid_input(format!(
                "Transaction {} was interrupted and cannot be committed",
                self.id
            )));
        }

        if let Err(e) = conn.commit().await {
            conn.discard();
            return Err(e);
        }

        info!(
            transaction_id = %self.id,
            duration_ms = self.started_at.elapsed().as_millis() as u64,
            "Transaction committed"
        );
        Ok(())
    }

    /// Roll back and return the connection to the pool.
    ///
    /// A poisoned transaction is rolled back by discarding its connection.
    pub async fn rollback(mut self) -> DbResult<()> {
        let mut conn = self.take_connection()?;

        if self.poisoned {
            conn.discard();
            debug!(transaction_id = %self.id, "Discarded connection of poisoned transaction");
            return Ok(());
        }

        if let Err(e) = conn.rollback().await {
            conn.discard();
            return Err(e);
        }

        info!(transaction_id = %self.id, "Transaction rolled back");
        Ok(())
    }

    fn take_connection(&mut self) -> DbResult<C> {
        self.conn
            .take()
            .ok_or_else(|| DbError::internal(format!("Transaction {} has no connection", self.id)))
    }
}

impl<C: ProcedureConnection> Drop for Transaction<C> {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.discard();
            warn!(
                transaction_id = %self.id,
                "Transaction dropped without commit or rollback, discarding connection"
            );
        }
    }
}

impl<C: ProcedureConnection> std::fmt::Debug for Transaction<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("poisoned", &self.poisoned)
            .field("elapsed", &self.started_at.elapsed())
            .finish()
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
