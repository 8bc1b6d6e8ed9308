//! Scripted in-memory driver for gateway and HTTP tests.
//!
//! Procedures are registered with a canned behavior. Every pool, checkout and
//! transaction step is counted or written to a journal so tests can assert on them.

#![allow(dead_code)]

use lovecakes_backend::db::{
    ConnectionSource, Connector, PoolState, ProcedureCall, ProcedureConnection,
};
use lovecakes_backend::error::{DbError, DbResult};
use lovecakes_backend::models::{Params, RecordSet, Row};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Canned response for one procedure.
#[derive(Debug, Clone)]
pub enum Behavior {
    Sets(Vec<RecordSet>),
    Fail { message: String, code: Option<u32> },
    Slow(Duration, Vec<RecordSet>),
    /// The server drops the connection mid-call.
    Lost,
}

#[derive(Default)]
pub struct Script {
    pub connect_attempts: AtomicUsize,
    fail_connects: AtomicUsize,
    connect_delay: Mutex<Duration>,
    procedures: Mutex<HashMap<String, Behavior>>,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub discarded: AtomicUsize,
    journal: Mutex<Vec<String>>,
    calls: Mutex<Vec<(String, Params)>>,
}

impl Script {
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<(String, Params)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    fn log(&self, entry: impl Into<String>) {
        self.journal.lock().unwrap().push(entry.into());
    }
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    pub script: Arc<Script>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedure returning the given result sets.
    pub fn with_procedure(self, name: &str, sets: Vec<RecordSet>) -> Self {
        self.set(name, Behavior::Sets(sets))
    }

    pub fn with_failing_procedure(self, name: &str, message: &str, code: Option<u32>) -> Self {
        self.set(
            name,
            Behavior::Fail {
                message: message.to_string(),
                code,
            },
        )
    }

    pub fn with_slow_procedure(self, name: &str, delay: Duration, sets: Vec<RecordSet>) -> Self {
        self.set(name, Behavior::Slow(delay, sets))
    }

    pub fn with_lost_connection(self, name: &str) -> Self {
        self.set(name, Behavior::Lost)
    }

    /// Fail the next `count` pool constructions.
    pub fn failing_connects(self, count: usize) -> Self {
        self.script.fail_connects.store(count, Ordering::SeqCst);
        self
    }

    pub fn connect_delay(self, delay: Duration) -> Self {
        *self.script.connect_delay.lock().unwrap() = delay;
        self
    }

    fn set(self, name: &str, behavior: Behavior) -> Self {
        self.script
            .procedures
            .lock()
            .unwrap()
            .insert(name.to_string(), behavior);
        self
    }
}

impl Connector for ScriptedConnector {
    type Pool = ScriptedPool;

    async fn connect(&self) -> DbResult<ScriptedPool> {
        self.script.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.script.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .script
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(DbError::connection(
                "Login failed for user 'sa'",
                "Check the connection credentials are correct",
            ));
        }

        Ok(ScriptedPool {
            script: Arc::clone(&self.script),
            closed: AtomicBool::new(false),
        })
    }
}

pub struct ScriptedPool {
    script: Arc<Script>,
    closed: AtomicBool,
}

impl ConnectionSource for ScriptedPool {
    type Connection = ScriptedConnection;

    async fn acquire(&self) -> DbResult<ScriptedConnection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::connection("pool closed", "reconnect"));
        }
        self.script.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedConnection {
            script: Arc::clone(&self.script),
            busy: false,
            discarded: false,
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.script.log("CLOSE");
    }

    fn state(&self) -> PoolState {
        let out = self
            .script
            .acquired()
            .saturating_sub(self.script.released() + self.script.discarded());
        PoolState {
            connections: out as u32,
            idle_connections: 0,
        }
    }
}

pub struct ScriptedConnection {
    script: Arc<Script>,
    /// Set while a request is in flight, like the real driver's dirty flag.
    busy: bool,
    discarded: bool,
}

impl ProcedureConnection for ScriptedConnection {
    async fn execute(&mut self, call: &ProcedureCall<'_>) -> DbResult<Vec<RecordSet>> {
        self.busy = true;
        self.script.log(format!("EXEC {}", call.procedure));
        self.script
            .calls
            .lock()
            .unwrap()
            .push((call.procedure.to_string(), call.params.clone()));

        let behavior = self
            .script
            .procedures
            .lock()
            .unwrap()
            .get(call.procedure)
            .cloned();

        let result = match behavior {
            Some(Behavior::Sets(sets)) => Ok(sets),
            Some(Behavior::Slow(delay, sets)) => {
                tokio::time::sleep(delay).await;
                Ok(sets)
            }
            Some(Behavior::Fail { message, code }) => Err(DbError::database(message, code)),
            Some(Behavior::Lost) => {
                // The stream is unusable; leave the connection busy so it is discarded
                return Err(DbError::connection(
                    "I/O error: connection reset by peer",
                    "Check network connectivity and database server status",
                ));
            }
            None => Err(DbError::database(
                format!("Could not find stored procedure '{}'.", call.procedure),
                Some(2812),
            )),
        };

        self.busy = false;
        result
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.script.log("BEGIN");
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.script.log("COMMIT");
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.script.log("ROLLBACK");
        Ok(())
    }

    fn discard(&mut self) {
        self.discarded = true;
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        if self.discarded || self.busy {
            self.script.log("DISCARD");
            self.script.discarded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.script.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Build a row from a JSON object literal.
pub fn row(value: JsonValue) -> Row {
    value.as_object().cloned().unwrap_or_default()
}
