//! Integration tests for the stored procedure gateway.
//!
//! These tests drive the gateway through a scripted in-memory driver to verify pool
//! lifecycle, result shaping, failure context and interruption handling.

mod common;

use common::{ScriptedConnector, row};
use lovecakes_backend::db::{Gateway, PoolStatus, REDACTED, RedactionPolicy};
use lovecakes_backend::error::DbError;
use lovecakes_backend::models::{ExpectedReturn, InvocationResult, ProcedureRequest};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

fn products_connector() -> ScriptedConnector {
    ScriptedConnector::new()
        .with_procedure(
            "GetProductById",
            vec![vec![row(json!({"id": 1, "name": "Chocolate Cake", "price": 35.9}))]],
        )
        .with_procedure(
            "ListCatalog",
            vec![
                vec![row(json!({"id": 1})), row(json!({"id": 2}))],
                vec![row(json!({"idCategory": 10}))],
            ],
        )
        .with_procedure("EmptyProc", vec![])
}

// =========================================================================
// Pool lifecycle
// =========================================================================

#[tokio::test]
async fn test_pool_is_created_lazily() {
    let connector = products_connector();
    let script = Arc::clone(&connector.script);
    let gateway = Gateway::new(connector);

    assert_eq!(gateway.status(), PoolStatus::Uninitialized);
    assert_eq!(script.connect_attempts(), 0);

    gateway.pool().await.unwrap();
    assert_eq!(script.connect_attempts(), 1);
    assert!(matches!(gateway.status(), PoolStatus::Ready { .. }));
}

#[tokio::test]
async fn test_pool_is_reused_across_calls() {
    let connector = products_connector();
    let script = Arc::clone(&connector.script);
    let gateway = Gateway::new(connector);

    let request = ProcedureRequest::new("GetProductById").param("id", 1);
    for _ in 0..5 {
        gateway.invoke(&request).await.unwrap();
    }
    assert_eq!(script.connect_attempts(), 1);
}

#[tokio::test]
async fn test_concurrent_first_calls_share_one_construction() {
    let connector = products_connector().connect_delay(Duration::from_millis(50));
    let script = Arc::clone(&connector.script);
    let gateway = Arc::new(Gateway::new(connector));

    let mut tasks = JoinSet::new();
    for id in 0..16 {
        let gateway = Arc::clone(&gateway);
        tasks.spawn(async move {
            let request = ProcedureRequest::new("GetProductById").param("id", id);
            gateway.invoke(&request).await.map(|_| ())
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    assert_eq!(script.connect_attempts(), 1);
}

#[tokio::test]
async fn test_failed_construction_is_not_cached() {
    let connector = products_connector().failing_connects(1);
    let script = Arc::clone(&connector.script);
    let gateway = Gateway::new(connector);
    let request = ProcedureRequest::new("GetProductById").param("id", 1);

    let err = gateway.invoke(&request).await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }), "{err:?}");
    assert_eq!(gateway.status(), PoolStatus::Uninitialized);

    gateway.invoke(&request).await.unwrap();
    assert_eq!(script.connect_attempts(), 2);
}

#[tokio::test]
async fn test_concurrent_callers_share_a_failed_construction() {
    let connector = products_connector()
        .failing_connects(100)
        .connect_delay(Duration::from_millis(50));
    let script = Arc::clone(&connector.script);
    let gateway = Arc::new(Gateway::new(connector));

    let mut tasks = JoinSet::new();
    for id in 0..16 {
        let gateway = Arc::clone(&gateway);
        tasks.spawn(async move {
            let request = ProcedureRequest::new("GetProductById").param("id", id);
            gateway.invoke(&request).await.map(|_| ())
        });
    }
    while let Some(result) = tasks.join_next().await {
        let err = result.unwrap().unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }), "{err:?}");
        assert!(err.to_string().contains("Login failed"));
    }
    assert_eq!(script.connect_attempts(), 1);

    // The failure is not cached: the next call makes a fresh attempt
    gateway
        .invoke(&ProcedureRequest::new("GetProductById").param("id", 1))
        .await
        .unwrap_err();
    assert_eq!(script.connect_attempts(), 2);
}

#[tokio::test]
async fn test_close_rejects_later_calls() {
    let connector = products_connector();
    let script = Arc::clone(&connector.script);
    let gateway = Gateway::new(connector);
    let request = ProcedureRequest::new("GetProductById").param("id", 1);

    gateway.invoke(&request).await.unwrap();
    gateway.close().await;

    assert_eq!(gateway.status(), PoolStatus::Closed);
    assert!(script.journal().contains(&"CLOSE".to_string()));

    let err = gateway.invoke(&request).await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
    assert!(matches!(gateway.begin().await, Err(DbError::Connection { .. })));
}

#[tokio::test]
async fn test_close_before_first_use() {
    let connector = products_connector();
    let script = Arc::clone(&connector.script);
    let gateway = Gateway::new(connector);

    gateway.close().await;
    assert!(gateway.pool().await.is_err());
    assert_eq!(script.connect_attempts(), 0);
}

#[tokio::test]
async fn test_connections_returned_on_every_path() {
    let connector = products_connector();
    let script = Arc::clone(&connector.script);
    let gateway = Gateway::new(connector);

    gateway
        .invoke(&ProcedureRequest::new("GetProductById").param("id", 1))
        .await
        .unwrap();
    gateway
        .invoke(&ProcedureRequest::new("Missing"))
        .await
        .unwrap_err();
    gateway
        .invoke(&ProcedureRequest::new("ListCatalog").expect_named(["a", "b", "c"]))
        .await
        .unwrap_err();

    assert_eq!(script.acquired(), 3);
    assert_eq!(script.released(), 3);
    assert_eq!(script.discarded(), 0);
}

// =========================================================================
// Result shaping
// =========================================================================

#[tokio::test]
async fn test_single_returns_first_row() {
    let gateway = Gateway::new(products_connector());
    let request = ProcedureRequest::new("GetProductById")
        .param("id", 1)
        .expect(ExpectedReturn::Single);

    let product = gateway.invoke(&request).await.unwrap().into_single().unwrap();
    assert_eq!(product["name"], "Chocolate Cake");
}

#[tokio::test]
async fn test_single_without_rows_is_absent() {
    let gateway = Gateway::new(products_connector());
    let request = ProcedureRequest::new("EmptyProc").expect(ExpectedReturn::Single);

    assert_eq!(
        gateway.invoke(&request).await.unwrap(),
        InvocationResult::Single(None)
    );
}

#[tokio::test]
async fn test_none_discards_results() {
    let gateway = Gateway::new(products_connector());
    let request = ProcedureRequest::new("ListCatalog");

    assert_eq!(gateway.invoke(&request).await.unwrap(), InvocationResult::None);
}

#[tokio::test]
async fn test_multi_returns_every_set() {
    let gateway = Gateway::new(products_connector());
    let request = ProcedureRequest::new("ListCatalog").expect(ExpectedReturn::Multi);

    let sets = gateway.invoke(&request).await.unwrap().into_multi().unwrap();
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0].len(), 2);
}

#[tokio::test]
async fn test_named_sets_drop_extras() {
    let gateway = Gateway::new(products_connector());
    let request = ProcedureRequest::new("ListCatalog").expect_named(["products"]);

    let named = gateway.invoke(&request).await.unwrap().into_named().unwrap();
    assert_eq!(named.len(), 1);
    assert_eq!(named["products"].len(), 2);
}

#[tokio::test]
async fn test_more_names_than_sets_fails() {
    let gateway = Gateway::new(products_connector());
    let request =
        ProcedureRequest::new("ListCatalog").expect_named(["products", "categories", "tags"]);

    match gateway.invoke(&request).await.unwrap_err() {
        DbError::Request {
            procedure, message, ..
        } => {
            assert_eq!(procedure, "ListCatalog");
            assert!(message.contains("2 result set(s)"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_names_behave_like_multi() {
    let gateway = Gateway::new(products_connector());
    let request = ProcedureRequest::new("ListCatalog").expect_named(Vec::<String>::new());

    assert!(matches!(
        gateway.invoke(&request).await.unwrap(),
        InvocationResult::Multi(_)
    ));
}

// =========================================================================
// Failures and redaction
// =========================================================================

#[tokio::test]
async fn test_unknown_procedure_carries_context() {
    let gateway = Gateway::new(products_connector());
    let request = ProcedureRequest::new("GetProductByIdd").param("id", 7);

    let err = gateway.invoke(&request).await.unwrap_err();
    assert_eq!(err.code(), Some(2812));
    assert!(err.suggestion().is_some());
    match err {
        DbError::Request {
            procedure,
            parameters,
            ..
        } => {
            assert_eq!(procedure, "GetProductByIdd");
            assert_eq!(parameters["id"], REDACTED);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_allow_listed_parameters_are_kept() {
    let connector = ScriptedConnector::new().with_failing_procedure(
        "spCustomerUpdate",
        "Violation of UNIQUE KEY constraint",
        Some(2627),
    );
    let gateway =
        Gateway::new(connector).with_redaction(RedactionPolicy::allow(["idCustomer"]));
    let request = ProcedureRequest::new("spCustomerUpdate")
        .param("idCustomer", 9)
        .param("email", "someone@example.com");

    match gateway.invoke(&request).await.unwrap_err() {
        DbError::Request {
            parameters, code, ..
        } => {
            assert_eq!(code, Some(2627));
            assert_eq!(parameters["idCustomer"], 9);
            assert_eq!(parameters["email"], REDACTED);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_lost_connection_is_a_request_failure() {
    let connector = products_connector().with_lost_connection("spOrderSync");
    let script = Arc::clone(&connector.script);
    let gateway = Gateway::new(connector);

    gateway.pool().await.unwrap();
    let err = gateway
        .invoke(&ProcedureRequest::new("spOrderSync").param("idOrder", 12))
        .await
        .unwrap_err();

    match err {
        DbError::Request {
            procedure,
            parameters,
            message,
            ..
        } => {
            assert_eq!(procedure, "spOrderSync");
            assert_eq!(parameters["idOrder"], REDACTED);
            assert!(message.contains("connection reset"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(script.discarded(), 1);
}

#[tokio::test]
async fn test_invalid_names_never_reach_the_server() {
    let connector = products_connector();
    let script = Arc::clone(&connector.script);
    let gateway = Gateway::new(connector);

    let err = gateway
        .invoke(&ProcedureRequest::new("GetProductById; DROP TABLE Product"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));

    let err = gateway
        .invoke(&ProcedureRequest::new("GetProductById").param("id = 1; --", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));

    assert_eq!(script.connect_attempts(), 0);
}

#[tokio::test]
async fn test_parameters_bound_by_name() {
    let connector = products_connector();
    let script = Arc::clone(&connector.script);
    let gateway = Gateway::new(connector);

    let request = ProcedureRequest::new("GetProductById")
        .param("@id", 42)
        .param("idAccount", 1);
    gateway.invoke(&request).await.unwrap();

    let (procedure, params) = script.calls().pop().unwrap();
    assert_eq!(procedure, "GetProductById");
    assert_eq!(params.keys().collect::<Vec<_>>(), vec!["id", "idAccount"]);
}

// =========================================================================
// Deadlines and cancellation
// =========================================================================

#[tokio::test]
async fn test_deadline_yields_timeout_and_discards_connection() {
    let connector = ScriptedConnector::new().with_slow_procedure(
        "spSlowReport",
        Duration::from_secs(5),
        vec![],
    );
    let script = Arc::clone(&connector.script);
    let gateway = Gateway::new(connector);

    let request = ProcedureRequest::new("spSlowReport").timeout(Duration::from_millis(30));
    let err = gateway.invoke(&request).await.unwrap_err();

    assert!(matches!(err, DbError::Timeout { .. }), "{err:?}");
    assert_eq!(script.discarded(), 1);
    assert_eq!(script.released(), 0);
}

#[tokio::test]
async fn test_gateway_default_deadline() {
    let connector = ScriptedConnector::new().with_slow_procedure(
        "spSlowReport",
        Duration::from_secs(5),
        vec![],
    );
    let gateway =
        Gateway::new(connector).with_default_timeout(Some(Duration::from_millis(30)));

    let err = gateway
        .invoke(&ProcedureRequest::new("spSlowReport"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Timeout { .. }));
}

#[tokio::test]
async fn test_cancellation_yields_canceled() {
    let connector = ScriptedConnector::new().with_slow_procedure(
        "spSlowReport",
        Duration::from_secs(5),
        vec![],
    );
    let script = Arc::clone(&connector.script);
    let gateway = Gateway::new(connector);

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let request = ProcedureRequest::new("spSlowReport").cancel_on(token);
    let err = gateway.invoke(&request).await.unwrap_err();

    assert!(matches!(err, DbError::Canceled { .. }), "{err:?}");
    assert_eq!(script.discarded(), 1);
}

#[tokio::test]
async fn test_deadline_covers_pool_construction() {
    let connector = products_connector().connect_delay(Duration::from_millis(500));
    let gateway = Gateway::new(connector);

    let request = ProcedureRequest::new("GetProductById")
        .param("id", 1)
        .timeout(Duration::from_millis(30));
    let started = std::time::Instant::now();
    let err = gateway.invoke(&request).await.unwrap_err();

    assert!(matches!(err, DbError::Timeout { .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(gateway.status(), PoolStatus::Uninitialized);
}

#[tokio::test]
async fn test_cancellation_during_pool_construction() {
    let connector = products_connector().connect_delay(Duration::from_millis(500));
    let script = Arc::clone(&connector.script);
    let gateway = Gateway::new(connector);

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let request = ProcedureRequest::new("GetProductById")
        .param("id", 1)
        .cancel_on(token);
    let err = gateway.invoke(&request).await.unwrap_err();
    assert!(matches!(err, DbError::Canceled { .. }), "{err:?}");

    // An abandoned attempt does not block the next caller
    gateway
        .invoke(&ProcedureRequest::new("GetProductById").param("id", 1))
        .await
        .unwrap();
    assert_eq!(script.connect_attempts(), 2);
}
