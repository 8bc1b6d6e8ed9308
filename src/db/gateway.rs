//! Stored procedure gateway.
//!
//! The [`Gateway`] owns a lazily created connection pool and runs stored procedures
//! against it. Every data access in the service goes through [`Gateway::invoke`] or,
//! inside a transaction, [`Gateway::invoke_in`].
//!
//! # Pool lifecycle
//!
//! - The pool is built on first use and cached for the gateway's lifetime
//! - Construction is single-flight: concurrent first callers await the same attempt and
//!   share its outcome, success or failure
//! - A failed construction is not cached, the next call tries again
//! - After [`Gateway::close`] every call fails with a connection error
//!
//! # Deadlines and cancellation
//!
//! Pool construction, checkout and execution are bounded by the request's deadline (or
//! the gateway default) and aborted when the request's cancellation token fires. Interrupted connections
//! are discarded by the pool instead of being reused.

use crate::db::driver::{
    ConnectionOf, ConnectionSource, Connector, PoolState, ProcedureCall, ProcedureConnection,
};
use crate::db::redact::RedactionPolicy;
use crate::db::transaction::Transaction;
use crate::error::{DbError, DbResult};
use crate::models::{InvocationResult, ProcedureRequest, RecordSet};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pool status as reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PoolStatus {
    /// No call has needed the database yet.
    Uninitialized,
    Closed,
    Ready {
        connections: u32,
        idle_connections: u32,
    },
}

/// Outcome of the most recent failed pool construction.
#[derive(Debug, Default)]
struct ConnectFailures {
    /// Failed attempts so far.
    count: u64,
    last: Option<DbError>,
}

pub struct Gateway<C: Connector> {
    connector: C,
    pool: OnceCell<C::Pool>,
    failures: Mutex<ConnectFailures>,
    closed: AtomicBool,
    redaction: RedactionPolicy,
    default_timeout: Option<Duration>,
}

impl<C: Connector> Gateway<C> {
    /// Create a gateway. No connection is opened until the first call.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            pool: OnceCell::new(),
            failures: Mutex::new(ConnectFailures::default()),
            closed: AtomicBool::new(false),
            redaction: RedactionPolicy::redact_all(),
            default_timeout: None,
        }
    }

    /// Set which parameter values may appear in failure logs.
    pub fn with_redaction(mut self, redaction: RedactionPolicy) -> Self {
        self.redaction = redaction;
        self
    }

    /// Deadline applied to requests that do not carry their own.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn redaction(&self) -> &RedactionPolicy {
        &self.redaction
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get the pool, building it on first use.
    ///
    /// Callers that arrive while a construction attempt is in flight get that attempt's
    /// result. If it fails they all see the same failure; only a later call retries.
    pub async fn pool(&self) -> DbResult<&C::Pool> {
        if self.is_closed() {
            return Err(closed_error());
        }

        if let Some(pool) = self.pool.get() {
            return Ok(pool);
        }
        let joined_at = self.lock_failures().count;

        let pool = self
            .pool
            .get_or_try_init(|| async {
                // An attempt that was in flight when we arrived has already failed
                {
                    let failures = self.lock_failures();
                    if failures.count > joined_at {
                        if let Some(e) = &failures.last {
                            return Err(e.clone());
                        }
                    }
                }

                debug!("Creating database connection pool");
                match self.connector.connect().await {
                    Ok(pool) => {
                        info!("Database connection pool established");
                        Ok(pool)
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to create database connection pool");
                        let e = as_connection_error(e);
                        let mut failures = self.lock_failures();
                        failures.count += 1;
                        failures.last = Some(e.clone());
                        Err(e)
                    }
                }
            })
            .await?;

        // close() may have run while construction was in flight
        if self.is_closed() {
            pool.close().await;
            return Err(closed_error());
        }

        Ok(pool)
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, ConnectFailures> {
        match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run a stored procedure on a pooled connection.
    pub async fn invoke(&self, request: &ProcedureRequest) -> DbResult<InvocationResult> {
        request.validate()?;

        let started = Instant::now();
        let call = ProcedureCall {
            procedure: &request.procedure,
            params: &request.params,
        };
        debug!(procedure = %request.procedure, "Invoking stored procedure");

        let outcome = run_bounded(
            &request.procedure,
            request.timeout.or(self.default_timeout),
            request.cancel.as_ref(),
            async {
                // Pool failures stay connection errors; checkout and execution failures
                // belong to this call
                let pool = self.pool().await?;
                Ok::<_, DbError>(async {
                    let mut conn = pool.acquire().await?;
                    conn.execute(&call).await
                }
                .await)
            },
        )
        .await;

        self.finish(request, outcome, started, None)
    }

    /// Run a stored procedure on a transaction's connection.
    ///
    /// An interrupted call poisons the transaction.
    pub async fn invoke_in(
        &self,
        tx: &mut Transaction<ConnectionOf<C>>,
        request: &ProcedureRequest,
    ) -> DbResult<InvocationResult> {
        request.validate()?;

        let started = Instant::now();
        let call = ProcedureCall {
            procedure: &request.procedure,
            params: &request.params,
        };
        debug!(
            procedure = %request.procedure,
            transaction_id = %tx.id(),
            "Invoking stored procedure in transaction"
        );

        let outcome = match tx.connection() {
            Ok(conn) => {
                run_bounded(
                    &request.procedure,
                    request.timeout.or(self.default_timeout),
                    request.cancel.as_ref(),
                    conn.execute(&call),
                )
                .await
            }
            Err(e) => Err(e),
        };

        if matches!(
            outcome,
            Err(DbError::Timeout { .. } | DbError::Canceled { .. })
        ) {
            tx.poison();
        }

        self.finish(request, Ok(outcome), started, Some(tx.id()))
    }

    /// Start a transaction on a dedicated connection.
    pub async fn begin(&self) -> DbResult<Transaction<ConnectionOf<C>>> {
        let pool = self.pool().await?;
        let conn = pool.acquire().await?;
        Transaction::begin(conn).await
    }

    /// Close the pool. Later calls fail with a connection error.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(pool) = self.pool.get() {
            info!("Closing database connection pool");
            pool.close().await;
        }
    }

    pub fn status(&self) -> PoolStatus {
        if self.is_closed() {
            return PoolStatus::Closed;
        }
        match self.pool.get() {
            Some(pool) => {
                let PoolState {
                    connections,
                    idle_connections,
                } = pool.state();
                PoolStatus::Ready {
                    connections,
                    idle_connections,
                }
            }
            None => PoolStatus::Uninitialized,
        }
    }

    /// Shape the result and log failures.
    ///
    /// The outer error comes from reaching the pool (or from the deadline) and is
    /// returned as is. Errors of the call itself get the procedure context attached.
    fn finish(
        &self,
        request: &ProcedureRequest,
        outcome: DbResult<DbResult<Vec<RecordSet>>>,
        started: Instant,
        transaction_id: Option<&str>,
    ) -> DbResult<InvocationResult> {
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = outcome.and_then(|executed| {
            executed
                .and_then(|sets| {
                    debug!(
                        procedure = %request.procedure,
                        result_sets = sets.len(),
                        elapsed_ms = elapsed_ms,
                        "Stored procedure completed"
                    );
                    InvocationResult::shape(request.expected, &request.result_set_names, sets)
                })
                .map_err(|e| {
                    e.with_procedure(&request.procedure, &self.redaction.redact(&request.params))
                })
        });

        result.map_err(|e| {
            let parameters = JsonValue::Object(self.redaction.redact(&request.params));
            match &e {
                DbError::Timeout { .. } | DbError::Canceled { .. } => warn!(
                    procedure = %request.procedure,
                    parameters = %parameters,
                    transaction_id = transaction_id.unwrap_or("-"),
                    elapsed_ms = elapsed_ms,
                    error = %e,
                    "Stored procedure interrupted"
                ),
                _ => error!(
                    procedure = %request.procedure,
                    parameters = %parameters,
                    transaction_id = transaction_id.unwrap_or("-"),
                    code = e.code(),
                    elapsed_ms = elapsed_ms,
                    error = %e,
                    "Stored procedure failed"
                ),
            }
            e
        })
    }
}

impl<C: Connector> std::fmt::Debug for Gateway<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("status", &self.status())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

/// Await `fut` under an optional deadline and cancellation token.
///
/// Dropping `fut` on expiry leaves any connection it held flagged as broken.
pub(crate) async fn run_bounded<T, F>(
    operation: &str,
    deadline: Option<Duration>,
    cancel: Option<&CancellationToken>,
    fut: F,
) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    let timed = async {
        match deadline {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| DbError::timeout(operation, limit.as_millis() as u64))?,
            None => fut.await,
        }
    };

    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(DbError::canceled(operation)),
            result = timed => result,
        },
        None => timed.await,
    }
}

fn closed_error() -> DbError {
    DbError::connection(
        "Database connection pool is closed",
        "The service is shutting down",
    )
}

fn as_connection_error(err: DbError) -> DbError {
    match err {
        e @ DbError::Connection { .. } => e,
        other => DbError::connection(
            other.to_string(),
            "Check the database configuration and server availability",
        ),
    }
}
