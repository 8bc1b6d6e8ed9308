//! SQL Server driver built on tiberius with bb8 pooling.
//!
//! [`MssqlConnector`] turns a [`DatabaseConfig`] into a bb8 pool of tiberius clients
//! after checking that one connection can be opened. Each pooled client carries a
//! `dirty` flag that is raised for the duration of every request; a request that never
//! finished (deadline, cancellation, dropped future) or failed with an I/O error leaves
//! the flag up and bb8 closes the connection instead of reusing it.

use crate::config::{DEFAULT_CONNECT_TIMEOUT_SECS, DatabaseConfig};
use crate::db::driver::{ConnectionSource, Connector, PoolState, ProcedureCall, ProcedureConnection};
use crate::db::params::build_query;
use crate::db::types::result_sets_to_json;
use crate::error::{DbError, DbResult};
use crate::models::RecordSet;
use async_trait::async_trait;
use bb8::{ErrorSink, ManageConnection, Pool, PooledConnection, RunError};
use std::sync::Mutex;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

const APPLICATION_NAME: &str = "lovecakes-backend";

type TdsClient = Client<Compat<TcpStream>>;

/// A pooled tiberius client.
pub struct MssqlClient {
    client: TdsClient,
    dirty: bool,
}

impl MssqlClient {
    /// Record the outcome of a request. I/O failures leave the stream in an unknown state.
    fn settle<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        self.dirty = matches!(result, Err(DbError::Connection { .. }));
        result
    }

    async fn batch(&mut self, sql: &str) -> DbResult<()> {
        self.dirty = true;
        let result = async {
            self.client.simple_query(sql).await?.into_results().await?;
            Ok(())
        }
        .await;
        self.settle(result)
    }
}

/// bb8 connection manager for SQL Server.
pub struct MssqlConnectionManager {
    config: Config,
}

impl MssqlConnectionManager {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    async fn open(config: Config) -> Result<TdsClient, tiberius::error::Error> {
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        Client::connect(config, tcp.compat_write()).await
    }
}

#[async_trait]
impl bb8::ManageConnection for MssqlConnectionManager {
    type Connection = MssqlClient;
    type Error = DbError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let client = match Self::open(self.config.clone()).await {
            Ok(client) => client,
            // Azure SQL gateways redirect to the node that owns the database
            Err(tiberius::error::Error::Routing { host, port }) => {
                debug!(host = %host, port = port, "Following SQL Server routing redirect");
                let mut config = self.config.clone();
                config.host(&host);
                config.port(port);
                Self::open(config).await?
            }
            Err(e) => return Err(e.into()),
        };

        Ok(MssqlClient {
            client,
            dirty: false,
        })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.batch("SELECT 1").await
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.dirty
    }
}

/// Sends connection failures from bb8's background tasks to the log.
#[derive(Debug, Clone, Copy)]
struct TracingErrorSink;

impl ErrorSink<DbError> for TracingErrorSink {
    fn sink(&self, error: DbError) {
        warn!(error = %error, "SQL Server pool connection failed");
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<DbError>> {
        Box::new(*self)
    }
}

/// A connection checked out of an [`MssqlPool`].
pub struct MssqlConnection(PooledConnection<'static, MssqlConnectionManager>);

impl ProcedureConnection for MssqlConnection {
    async fn execute(&mut self, call: &ProcedureCall<'_>) -> DbResult<Vec<RecordSet>> {
        let conn = &mut *self.0;
        conn.dirty = true;

        let query = build_query(call.procedure, call.params);
        let result = async {
            let stream = query.query(&mut conn.client).await?;
            let sets = stream.into_results().await?;
            result_sets_to_json(sets)
        }
        .await;

        conn.settle(result)
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.0.batch("BEGIN TRANSACTION").await
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.0.batch("COMMIT TRANSACTION").await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.0.batch("ROLLBACK TRANSACTION").await
    }

    fn discard(&mut self) {
        self.0.dirty = true;
    }
}

/// bb8 pool of SQL Server connections.
pub struct MssqlPool {
    inner: Mutex<Option<Pool<MssqlConnectionManager>>>,
    target: String,
}

impl MssqlPool {
    fn current(&self) -> Option<Pool<MssqlConnectionManager>> {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ConnectionSource for MssqlPool {
    type Connection = MssqlConnection;

    async fn acquire(&self) -> DbResult<MssqlConnection> {
        let pool = self.current().ok_or_else(|| {
            DbError::connection(
                "Database connection pool is closed",
                "The service is shutting down",
            )
        })?;

        pool.get_owned()
            .await
            .map(MssqlConnection)
            .map_err(|e| checkout_error(e, &self.target))
    }

    async fn close(&self) {
        let pool = match self.inner.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        // Idle connections close with the last handle; checked-out ones close on return
        if let Some(pool) = pool {
            let state = pool.state();
            debug!(
                connections = state.connections,
                idle_connections = state.idle_connections,
                "Releasing SQL Server pool"
            );
            drop(pool);
        }
    }

    fn state(&self) -> PoolState {
        match self.current() {
            Some(pool) => {
                let state = pool.state();
                PoolState {
                    connections: state.connections,
                    idle_connections: state.idle_connections,
                }
            }
            None => PoolState {
                connections: 0,
                idle_connections: 0,
            },
        }
    }
}

/// Builds [`MssqlPool`]s from configuration.
#[derive(Debug, Clone)]
pub struct MssqlConnector {
    config: DatabaseConfig,
    connect_timeout: Duration,
}

impl MssqlConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Upper bound for opening a connection or waiting for a free one.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Translate the service configuration into a tiberius config.
    pub fn tds_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port_or_default());
        config.database(&self.config.database);
        config.application_name(APPLICATION_NAME);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));
        if self.config.trust_server_certificate {
            config.trust_cert();
        }
        config
    }

    fn target(&self) -> String {
        format!(
            "{}:{}/{}",
            self.config.host,
            self.config.port_or_default(),
            self.config.database
        )
    }
}

impl Connector for MssqlConnector {
    type Pool = MssqlPool;

    async fn connect(&self) -> DbResult<MssqlPool> {
        let target = self.target();
        let options = &self.config.pool;
        let manager = MssqlConnectionManager::new(self.tds_config());

        // Verify connectivity with a direct connection so the server's own error
        // (refused, login failed, TLS) reaches the caller
        let verified = tokio::time::timeout(self.connect_timeout, manager.connect())
            .await
            .map_err(|_| checkout_error(RunError::TimedOut, &target))?
            .map_err(|e| connect_error(e, &target))?;
        drop(verified);

        let pool = Pool::builder()
            .max_size(options.max_or_default())
            .min_idle(Some(options.min_or_default()))
            .idle_timeout(Some(options.idle_timeout_or_default()))
            .connection_timeout(self.connect_timeout)
            .retry_connection(false)
            .error_sink(Box::new(TracingErrorSink))
            .build(manager)
            .await
            .map_err(|e| connect_error(e, &target))?;

        info!(
            target = %target,
            max_connections = options.max_or_default(),
            min_idle = options.min_or_default(),
            "Connected to SQL Server"
        );

        Ok(MssqlPool {
            inner: Mutex::new(Some(pool)),
            target,
        })
    }
}

fn connect_error(err: DbError, target: &str) -> DbError {
    match err {
        DbError::Connection {
            message,
            suggestion,
        } => DbError::connection(format!("Failed to connect to {}: {}", target, message), suggestion),
        other => DbError::connection(
            format!("Failed to connect to {}: {}", target, other),
            "Check the connection credentials are correct",
        ),
    }
}

fn checkout_error(err: RunError<DbError>, target: &str) -> DbError {
    match err {
        RunError::User(e) => connect_error(e, target),
        RunError::TimedOut => DbError::connection(
            format!("Timed out waiting for a connection to {}", target),
            "Check that the server is reachable or raise pool.max",
        ),
    }
}
