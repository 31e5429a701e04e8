//! Integration tests for the connection manager.
//!
//! Every test scripts an in-memory driver, so no database server is needed.

use db_layer::db::{DbManager, TransactionMode, TransactionState};
use db_layer::drivers::{InMemoryDriver, MemoryResponse, TransactionEvent};
use db_layer::error::DbError;
use db_layer::models::{CommandKind, DbValue, ParameterDirection, ProviderKind};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn manager(provider: ProviderKind, cs: &str, driver: &InMemoryDriver) -> DbManager {
    DbManager::with_connection_string(provider, cs).with_driver(Arc::new(driver.clone()))
}

async fn open_sql_server(driver: &InMemoryDriver) -> DbManager {
    let mut m = manager(ProviderKind::SqlServer, "Server=x;Database=y;", driver);
    assert_ok!(m.open().await);
    m
}

#[tokio::test]
async fn test_update_scenario() {
    let driver = InMemoryDriver::new().with_response(MemoryResponse::Affected(3));
    let mut m = open_sql_server(&driver).await;

    let affected = assert_ok!(
        m.execute_non_query(CommandKind::Text, "UPDATE t SET c=1")
            .await
    );

    assert_eq!(affected, 3);
    assert!(m.is_open());
    assert!(m.pending_parameters().is_empty());
    driver.assert_last_command("UPDATE t SET c=1", &[]);
    assert_ok!(m.dispose().await);
}

#[tokio::test]
async fn test_close_is_noop_when_never_opened() {
    let driver = InMemoryDriver::new();
    let mut m = manager(ProviderKind::Odbc, "DSN=test", &driver);
    assert_ok!(m.close().await);
    assert_ok!(m.close().await);
    assert_eq!(driver.connect_count(), 0);
    assert_eq!(driver.close_count(), 0);
}

#[tokio::test]
async fn test_close_twice_after_open() {
    let driver = InMemoryDriver::new();
    let mut m = open_sql_server(&driver).await;
    assert_ok!(m.close().await);
    assert_ok!(m.close().await);
    assert!(!m.is_open());
    assert_eq!(driver.close_count(), 1);
}

#[tokio::test]
async fn test_open_twice_connects_once() {
    let driver = InMemoryDriver::new();
    let mut m = open_sql_server(&driver).await;
    assert_ok!(m.open().await);
    assert_eq!(driver.connect_count(), 1);
    assert!(m.command().is_some());
}

#[tokio::test]
async fn test_reopen_after_close() {
    let driver = InMemoryDriver::new();
    let mut m = open_sql_server(&driver).await;
    assert_ok!(m.close().await);
    assert_ok!(m.open().await);
    assert!(m.is_open());
    assert_eq!(driver.connect_count(), 2);
}

#[tokio::test]
async fn test_oracle_manager_fails_to_open() {
    let mut m = DbManager::with_connection_string(ProviderKind::Oracle, "Data Source=orcl");
    let err = assert_err!(m.open().await);
    assert!(matches!(err, DbError::UnsupportedProvider { .. }));
    assert!(!m.is_open());
}

#[tokio::test]
async fn test_execute_before_open() {
    let driver = InMemoryDriver::new();
    let mut m = manager(ProviderKind::Odbc, "DSN=test", &driver);
    m.add_parameter(m.create_parameter().unwrap().with_value(1));

    let err = assert_err!(m.execute_scalar(CommandKind::Text, "SELECT ?").await);
    assert!(matches!(err, DbError::InvalidOperation { .. }));
    assert!(m.pending_parameters().is_empty());
    driver.assert_command_count(0);
}

#[tokio::test]
async fn test_batch_is_consumed_on_success() {
    let driver = InMemoryDriver::new().with_responses([
        MemoryResponse::scalar(DbValue::Int(2)),
        MemoryResponse::Affected(1),
    ]);
    let mut m = manager(ProviderKind::Odbc, "Driver={Test};", &driver);
    assert_ok!(m.open().await);

    m.add_parameters([
        m.create_parameter().unwrap().with_value(10),
        m.create_parameter().unwrap().with_value("x"),
    ]);
    assert_eq!(m.pending_parameters().len(), 2);

    let value = assert_ok!(
        m.execute_scalar(CommandKind::Text, "SELECT COUNT(*) FROM t WHERE a = ? AND b = ?")
            .await
    );
    assert_eq!(value, Some(DbValue::Int(2)));
    assert!(m.pending_parameters().is_empty());
    driver.assert_last_command(
        "SELECT COUNT(*) FROM t WHERE a = ? AND b = ?",
        &[DbValue::Int(10), DbValue::from("x")],
    );

    // The next call binds nothing from the previous batch.
    assert_ok!(m.execute_non_query(CommandKind::Text, "DELETE FROM t").await);
    driver.assert_last_command("DELETE FROM t", &[]);
}

#[tokio::test]
async fn test_batch_is_consumed_on_failure() {
    let driver = InMemoryDriver::new().with_responses([
        MemoryResponse::Error("syntax error".into()),
        MemoryResponse::Affected(1),
    ]);
    let mut m = manager(ProviderKind::Odbc, "DSN=test", &driver);
    assert_ok!(m.open().await);

    m.add_parameter(m.create_parameter().unwrap().with_value(1));
    let err = assert_err!(m.execute_non_query(CommandKind::Text, "UPDTE t SET a = ?").await);
    assert!(matches!(err, DbError::Driver { .. }));
    assert!(m.pending_parameters().is_empty());

    m.add_parameter(m.create_parameter().unwrap().with_value(2));
    assert_ok!(m.execute_non_query(CommandKind::Text, "UPDATE t SET a = ?").await);
    driver.assert_last_command("UPDATE t SET a = ?", &[DbValue::Int(2)]);
}

#[tokio::test]
async fn test_unsupplied_input_is_rejected_and_consumed() {
    let driver = InMemoryDriver::new();
    let mut m = manager(ProviderKind::Odbc, "DSN=test", &driver);
    assert_ok!(m.open().await);

    m.add_parameter(m.create_parameter().unwrap().with_name("id"));
    let err = assert_err!(m.execute_reader(CommandKind::Text, "SELECT * FROM t WHERE id = ?").await);
    assert!(matches!(err, DbError::InvalidArgument { .. }));
    assert!(err.to_string().contains("'id' was not supplied"));
    assert!(m.pending_parameters().is_empty());
    driver.assert_command_count(0);
}

#[tokio::test]
async fn test_input_output_without_value_binds_null() {
    let driver = InMemoryDriver::new();
    let mut m = open_sql_server(&driver).await;

    m.add_parameter(
        m.create_parameter()
            .unwrap()
            .with_name("total")
            .with_direction(ParameterDirection::InputOutput),
    );
    assert_ok!(m.execute_non_query(CommandKind::StoredProcedure, "dbo.Tally").await);

    let recorded = driver.last_command().unwrap();
    assert_eq!(recorded.parameters[0].value(), Some(&DbValue::Null));
    assert_eq!(recorded.values, vec![DbValue::Null]);
    assert_eq!(
        recorded.sql,
        "DECLARE @total sql_variant = @P1; EXEC dbo.Tally @total = @total OUTPUT\n\
         SELECT @@ROWCOUNT AS [@@ROWCOUNT], @total AS [@total]"
    );
}

#[tokio::test]
async fn test_output_values_are_written_to_command() {
    let driver = InMemoryDriver::new()
        .with_response(MemoryResponse::Affected(2))
        .with_output_values([DbValue::Int(0), DbValue::Int(42), DbValue::Int(6)]);
    let mut m = open_sql_server(&driver).await;

    let param = |name: &str, direction| {
        m.create_parameter()
            .unwrap()
            .with_name(name)
            .with_direction(direction)
    };
    let parameters = [
        param("rc", ParameterDirection::ReturnValue),
        param("id", ParameterDirection::Input).with_value(7),
        param("total", ParameterDirection::Output),
        param("count", ParameterDirection::InputOutput).with_value(5),
    ];
    m.add_parameters(parameters);

    let affected = assert_ok!(
        m.execute_non_query(CommandKind::StoredProcedure, "dbo.usp_total")
            .await
    );
    assert_eq!(affected, 2);
    driver.assert_last_command(
        "DECLARE @rc int; DECLARE @total sql_variant; DECLARE @count bigint = @P2; \
         EXEC @rc = dbo.usp_total @id = @P1, @total = @total OUTPUT, @count = @count OUTPUT\n\
         SELECT @@ROWCOUNT AS [@@ROWCOUNT], @rc AS [@rc], @total AS [@total], @count AS [@count]",
        &[DbValue::Int(7), DbValue::Int(5)],
    );

    let command = m.command().unwrap();
    let values: Vec<_> = command
        .parameters()
        .iter()
        .map(|p| (p.name(), p.value()))
        .collect();
    assert_eq!(
        values,
        vec![
            ("@rc", Some(&DbValue::Int(0))),
            ("@id", Some(&DbValue::Int(7))),
            ("@total", Some(&DbValue::Int(42))),
            ("@count", Some(&DbValue::Int(6))),
        ]
    );
}

#[tokio::test]
async fn test_return_value_on_text_command_is_rejected() {
    let driver = InMemoryDriver::new().with_response(MemoryResponse::scalar(7));
    let mut m = manager(ProviderKind::Odbc, "DSN=test", &driver);
    assert_ok!(m.open().await);

    m.add_parameters([
        m.create_parameter().unwrap().with_value(7),
        m.create_parameter()
            .unwrap()
            .with_name("rc")
            .with_direction(ParameterDirection::ReturnValue),
    ]);
    let err = assert_err!(m.execute_scalar(CommandKind::Text, "SELECT ?").await);
    assert!(matches!(err, DbError::InvalidArgument { .. }));
    assert!(m.pending_parameters().is_empty());
    driver.assert_command_count(0);

    // Without the return value the input keeps its placeholder
    m.add_parameter(m.create_parameter().unwrap().with_value(7));
    let value = assert_ok!(m.execute_scalar(CommandKind::Text, "SELECT ?").await);
    assert_eq!(value, Some(DbValue::Int(7)));
    driver.assert_last_command("SELECT ?", &[DbValue::Int(7)]);
}

#[tokio::test]
async fn test_foreign_family_parameter_is_rejected() {
    let driver = InMemoryDriver::new();
    let mut m = open_sql_server(&driver).await;
    let odbc = db_layer::db::ProviderFactory::create_parameter(ProviderKind::Odbc)
        .unwrap()
        .with_name("x")
        .with_value(1);
    m.add_parameter(odbc);

    let err = assert_err!(m.execute_non_query(CommandKind::Text, "SELECT @x").await);
    assert!(matches!(err, DbError::InvalidArgument { .. }));
    assert!(m.pending_parameters().is_empty());
}

#[tokio::test]
async fn test_commit_without_transaction_is_noop() {
    let driver = InMemoryDriver::new();
    let mut m = open_sql_server(&driver).await;
    assert_ok!(m.commit_transaction().await);
    assert_ok!(m.rollback_transaction().await);
    assert!(driver.transaction_events().is_empty());
}

#[tokio::test]
async fn test_begin_after_commit_creates_new_transaction() {
    let driver = InMemoryDriver::new();
    let mut m = open_sql_server(&driver).await;

    let first = assert_ok!(m.begin_transaction(TransactionMode::ReuseExisting).await)
        .id()
        .to_string();
    assert_ok!(m.commit_transaction().await);
    assert!(m.transaction().is_none());

    let second = assert_ok!(m.begin_transaction(TransactionMode::ReuseExisting).await)
        .id()
        .to_string();
    assert_ne!(first, second);
    assert_eq!(
        driver.transaction_events(),
        vec![
            TransactionEvent::Begin(first.clone()),
            TransactionEvent::Commit(first),
            TransactionEvent::Begin(second),
        ]
    );
}

#[tokio::test]
async fn test_reuse_existing_returns_active_transaction() {
    let driver = InMemoryDriver::new();
    let mut m = open_sql_server(&driver).await;

    let first = assert_ok!(m.begin_transaction(TransactionMode::ReuseExisting).await)
        .id()
        .to_string();
    let again = assert_ok!(m.begin_transaction(TransactionMode::ReuseExisting).await)
        .id()
        .to_string();
    assert_eq!(first, again);
    assert_eq!(driver.transaction_events().len(), 1);
}

#[tokio::test]
async fn test_require_new_fails_while_active() {
    let driver = InMemoryDriver::new();
    let mut m = open_sql_server(&driver).await;

    let first = assert_ok!(m.begin_transaction(TransactionMode::RequireNew).await)
        .id()
        .to_string();
    let err = assert_err!(m.begin_transaction(TransactionMode::RequireNew).await);
    assert!(matches!(err, DbError::Transaction { ref transaction_id, .. } if *transaction_id == first));
    assert_eq!(m.transaction().map(|t| t.id()), Some(first.as_str()));
}

#[tokio::test]
async fn test_begin_without_open_connection() {
    let driver = InMemoryDriver::new();
    let mut m = manager(ProviderKind::SqlServer, "Server=x", &driver);
    let err = assert_err!(m.begin_transaction(TransactionMode::ReuseExisting).await);
    assert!(matches!(err, DbError::InvalidArgument { .. }));
}

#[tokio::test]
async fn test_commands_are_enlisted_in_active_transaction() {
    let driver = InMemoryDriver::new();
    let mut m = open_sql_server(&driver).await;
    let id = assert_ok!(m.begin_transaction(TransactionMode::ReuseExisting).await)
        .id()
        .to_string();

    assert_ok!(m.execute_non_query(CommandKind::Text, "DELETE FROM t").await);
    assert_eq!(driver.last_command().unwrap().transaction_id, Some(id.clone()));
    assert_eq!(m.command().unwrap().transaction_id(), Some(id.as_str()));

    assert_ok!(m.rollback_transaction().await);
    assert!(m.transaction().is_none());
    assert_eq!(driver.transaction_events().last(), Some(&TransactionEvent::Rollback(id)));

    assert_ok!(m.execute_non_query(CommandKind::Text, "DELETE FROM t").await);
    assert_eq!(driver.last_command().unwrap().transaction_id, None);
}

#[tokio::test]
async fn test_failed_commit_keeps_transaction() {
    let driver = InMemoryDriver::new();
    let mut m = open_sql_server(&driver).await;
    assert_ok!(m.begin_transaction(TransactionMode::ReuseExisting).await);

    driver.set_commit_failure(true);
    let err = assert_err!(m.commit_transaction().await);
    assert_eq!(err.sql_state(), Some("40001"));
    let tx = m.transaction().unwrap();
    assert_eq!(tx.state(), TransactionState::Active);

    assert_ok!(m.rollback_transaction().await);
    assert!(m.transaction().is_none());
}

#[tokio::test]
async fn test_close_abandons_transaction() {
    let driver = InMemoryDriver::new();
    let mut m = open_sql_server(&driver).await;
    assert_ok!(m.begin_transaction(TransactionMode::ReuseExisting).await);
    assert_ok!(m.close().await);
    assert!(m.transaction().is_none());
    assert!(!m.is_open());
}

#[tokio::test]
async fn test_reader_replaces_previous_reader() {
    let driver = InMemoryDriver::new().with_responses([
        MemoryResponse::table(&["n"], vec![vec![DbValue::Int(1)], vec![DbValue::Int(2)]]),
        MemoryResponse::table(&["n"], vec![vec![DbValue::Int(3)]]),
    ]);
    let mut m = open_sql_server(&driver).await;

    let reader = assert_ok!(m.execute_reader(CommandKind::Text, "SELECT n FROM a").await);
    assert!(reader.read().unwrap());
    assert_eq!(reader.get_by_name("N").unwrap(), &DbValue::Int(1));

    let reader = assert_ok!(m.execute_reader(CommandKind::Text, "SELECT n FROM b").await);
    assert!(!reader.is_closed());
    assert!(reader.read().unwrap());
    assert_eq!(reader.get(0).unwrap(), &DbValue::Int(3));
    assert!(!reader.read().unwrap());

    m.close_reader();
    let reader = m.reader().unwrap();
    assert!(reader.is_closed());
    assert!(matches!(reader.get(0), Err(DbError::InvalidOperation { .. })));
}

#[tokio::test]
async fn test_tabular_names_tables() {
    let driver = InMemoryDriver::new().with_response(MemoryResponse::Tables(vec![
        db_layer::models::DataTable::default(),
        db_layer::models::DataTable::default(),
    ]));
    let mut m = manager(ProviderKind::OleDb, "Provider=SQLOLEDB;Data Source=x", &driver);
    assert_ok!(m.open().await);

    m.add_parameter(m.create_parameter().unwrap().with_value(5));
    let data_set = assert_ok!(
        m.execute_tabular(CommandKind::StoredProcedure, "GetOrders")
            .await
    );
    assert_eq!(data_set.table_count(), 2);
    assert!(data_set.table("Table").is_some());
    assert!(data_set.table("Table1").is_some());
    assert!(m.pending_parameters().is_empty());
    driver.assert_last_command("{CALL GetOrders(?)}", &[DbValue::Int(5)]);
}

#[tokio::test]
async fn test_tabular_keeps_output_values() {
    let driver = InMemoryDriver::new()
        .with_response(MemoryResponse::table(&["id"], vec![vec![DbValue::Int(1)]]))
        .with_output_values([DbValue::Int(1)]);
    let mut m = manager(ProviderKind::OleDb, "Provider=SQLOLEDB;Data Source=x", &driver);
    assert_ok!(m.open().await);

    m.add_parameter(
        m.create_parameter()
            .unwrap()
            .with_name("found")
            .with_direction(ParameterDirection::Output),
    );
    let data_set = assert_ok!(
        m.execute_tabular(CommandKind::StoredProcedure, "FindOrders")
            .await
    );
    assert_eq!(data_set.table_count(), 1);
    driver.assert_last_command("{CALL FindOrders(?)}", &[DbValue::Null]);
    let found = &m.command().unwrap().parameters()[0];
    assert_eq!(found.value(), Some(&DbValue::Int(1)));
}

#[tokio::test]
async fn test_scalar_without_rows_is_none() {
    let driver = InMemoryDriver::new();
    let mut m = open_sql_server(&driver).await;
    let value = assert_ok!(m.execute_scalar(CommandKind::Text, "SELECT 1 WHERE 1 = 0").await);
    assert_eq!(value, None);
}

#[tokio::test]
async fn test_dispose_closes_connection() {
    let driver = InMemoryDriver::new();
    let m = open_sql_server(&driver).await;
    assert_ok!(m.dispose().await);
    assert_eq!(driver.close_count(), 1);
}

#[tokio::test]
async fn test_connect_failure_propagates() {
    let driver = InMemoryDriver::new().with_connect_failure("connection refused");
    let mut m = manager(ProviderKind::SqlServer, "Server=x", &driver);
    let err = assert_err!(m.open().await);
    assert!(matches!(err, DbError::Driver { .. }));
    assert!(err.to_string().contains("connection refused"));
    assert!(!m.is_open());
}

#[tokio::test]
async fn test_connection_alias() {
    let driver = InMemoryDriver::new();
    let mut m: db_layer::ConnectionManager =
        manager(ProviderKind::Odbc, "DSN=test", &driver);
    assert_ok!(m.open().await);
    assert_eq!(m.provider(), ProviderKind::Odbc);
    assert_eq!(m.connection().unwrap().masked_connection_string(), "DSN=test");
}
