//! Integration tests against the bundled SQLite engine, reached through the
//! ODBC family with a SQLite ODBC connection string.

#![cfg(feature = "sqlite")]

use db_layer::db::{DbManager, TransactionMode};
use db_layer::error::DbError;
use db_layer::models::{CommandKind, DbValue, ParameterDirection, ProviderKind};
use tempfile::NamedTempFile;

/// Create a test database with a populated `users` table.
async fn setup_test_db() -> (DbManager, tempfile::TempPath) {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.into_temp_path();
    let cs = format!(
        "Driver={{SQLite3 ODBC Driver}};Database={};Timeout=2000",
        db_path.to_str().unwrap()
    );

    let mut manager = DbManager::with_connection_string(ProviderKind::Odbc, cs);
    manager.open().await.unwrap();
    manager
        .execute_non_query(
            CommandKind::Text,
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL, avatar BLOB)",
        )
        .await
        .unwrap();
    manager
        .execute_non_query(
            CommandKind::Text,
            "INSERT INTO users (id, name, score) VALUES (1, 'Alice', 9.5), (2, 'Bob', NULL)",
        )
        .await
        .unwrap();

    (manager, db_path)
}

fn param(manager: &DbManager, value: impl Into<DbValue>) -> db_layer::models::Parameter {
    manager.create_parameter().unwrap().with_value(value)
}

#[tokio::test]
async fn test_insert_with_parameters() {
    let (mut manager, _path) = setup_test_db().await;

    manager.add_parameters([
        param(&manager, 3),
        param(&manager, "Carol"),
        param(&manager, vec![0xDE_u8, 0xAD]),
    ]);
    let affected = manager
        .execute_non_query(
            CommandKind::Text,
            "INSERT INTO users (id, name, avatar) VALUES (?, ?, ?)",
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);
    assert!(manager.pending_parameters().is_empty());

    manager.add_parameter(param(&manager, 3));
    let avatar = manager
        .execute_scalar(CommandKind::Text, "SELECT avatar FROM users WHERE id = ?")
        .await
        .unwrap();
    assert_eq!(avatar, Some(DbValue::Bytes(vec![0xDE, 0xAD])));

    manager.dispose().await.unwrap();
}

#[tokio::test]
async fn test_reader_decodes_storage_classes() {
    let (mut manager, _path) = setup_test_db().await;

    let reader = manager
        .execute_reader(CommandKind::Text, "SELECT id, name, score FROM users ORDER BY id")
        .await
        .unwrap();
    assert_eq!(reader.field_count().unwrap(), 3);
    assert!(reader.read().unwrap());
    assert_eq!(reader.get(0).unwrap(), &DbValue::Int(1));
    assert_eq!(reader.get_by_name("name").unwrap(), &DbValue::from("Alice"));
    assert_eq!(reader.get(2).unwrap(), &DbValue::Float(9.5));
    assert!(reader.read().unwrap());
    assert_eq!(reader.get(2).unwrap(), &DbValue::Null);
    assert!(!reader.read().unwrap());
    assert!(!reader.next_result().unwrap());
}

#[tokio::test]
async fn test_scalar_without_rows() {
    let (mut manager, _path) = setup_test_db().await;
    manager.add_parameter(param(&manager, 42));
    let value = manager
        .execute_scalar(CommandKind::Text, "SELECT name FROM users WHERE id = ?")
        .await
        .unwrap();
    assert_eq!(value, None);
}

#[tokio::test]
async fn test_tabular_fill() {
    let (mut manager, _path) = setup_test_db().await;
    let data_set = manager
        .execute_tabular(CommandKind::Text, "SELECT id, name FROM users ORDER BY id")
        .await
        .unwrap();
    assert_eq!(data_set.table_count(), 1);
    let table = data_set.table("Table").unwrap();
    assert_eq!(table.column_names(), vec!["id", "name"]);
    assert_eq!(table.row_count(), 2);
}

#[tokio::test]
async fn test_empty_result_sets_keep_their_place() {
    let (mut manager, _path) = setup_test_db().await;
    let data_set = manager
        .execute_tabular(
            CommandKind::Text,
            "SELECT id FROM users WHERE 1 = 0; SELECT name FROM users ORDER BY id",
        )
        .await
        .unwrap();
    assert_eq!(data_set.table_count(), 2);

    let empty = data_set.table("Table").unwrap();
    assert_eq!(empty.column_names(), vec!["id"]);
    assert_eq!(empty.row_count(), 0);
    let names = data_set.table("Table1").unwrap();
    assert_eq!(names.column_names(), vec!["name"]);
    assert_eq!(names.row_count(), 2);
}

#[tokio::test]
async fn test_reader_over_empty_select_has_fields() {
    let (mut manager, _path) = setup_test_db().await;
    let reader = manager
        .execute_reader(CommandKind::Text, "SELECT id, name FROM users WHERE 1 = 0")
        .await
        .unwrap();
    assert_eq!(reader.field_count().unwrap(), 2);
    assert!(!reader.read().unwrap());
}

#[tokio::test]
async fn test_batch_binds_values_per_statement() {
    let (mut manager, _path) = setup_test_db().await;
    manager.add_parameters([
        param(&manager, 3),
        param(&manager, "Carol; the third"),
        param(&manager, 3),
    ]);
    let data_set = manager
        .execute_tabular(
            CommandKind::Text,
            "INSERT INTO users (id, name) VALUES (?, ?); SELECT name FROM users WHERE id = ?",
        )
        .await
        .unwrap();
    assert_eq!(data_set.table_count(), 1);
    let table = data_set.table("Table").unwrap();
    assert_eq!(table.first_value(), Some(&DbValue::from("Carol; the third")));
}

#[tokio::test]
async fn test_single_placeholder_gets_its_input() {
    let (mut manager, _path) = setup_test_db().await;
    manager.add_parameter(param(&manager, 7));
    let value = manager
        .execute_scalar(CommandKind::Text, "SELECT ?")
        .await
        .unwrap();
    assert_eq!(value, Some(DbValue::Int(7)));
}

#[tokio::test]
async fn test_output_parameters_are_rejected() {
    let (mut manager, _path) = setup_test_db().await;
    manager.add_parameter(
        manager
            .create_parameter()
            .unwrap()
            .with_name("n")
            .with_direction(ParameterDirection::Output),
    );
    let err = manager
        .execute_non_query(CommandKind::Text, "UPDATE users SET score = ?")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument { .. }));
    assert!(err.to_string().contains("'n'"));
}

#[tokio::test]
async fn test_rollback_discards_changes() {
    let (mut manager, _path) = setup_test_db().await;

    manager
        .begin_transaction(TransactionMode::RequireNew)
        .await
        .unwrap();
    manager
        .execute_non_query(CommandKind::Text, "DELETE FROM users")
        .await
        .unwrap();
    manager.rollback_transaction().await.unwrap();

    let count = manager
        .execute_scalar(CommandKind::Text, "SELECT COUNT(*) FROM users")
        .await
        .unwrap();
    assert_eq!(count, Some(DbValue::Int(2)));
}

#[tokio::test]
async fn test_commit_persists_changes() {
    let (mut manager, _path) = setup_test_db().await;

    manager
        .begin_transaction(TransactionMode::ReuseExisting)
        .await
        .unwrap();
    manager.add_parameter(param(&manager, 1));
    let affected = manager
        .execute_non_query(CommandKind::Text, "DELETE FROM users WHERE id = ?")
        .await
        .unwrap();
    assert_eq!(affected, 1);
    manager.commit_transaction().await.unwrap();
    assert!(manager.transaction().is_none());

    let count = manager
        .execute_scalar(CommandKind::Text, "SELECT COUNT(*) FROM users")
        .await
        .unwrap();
    assert_eq!(count, Some(DbValue::Int(1)));
}

#[tokio::test]
async fn test_syntax_error_surfaces_as_driver_error() {
    let (mut manager, _path) = setup_test_db().await;
    manager.add_parameter(param(&manager, 1));
    let err = manager
        .execute_non_query(CommandKind::Text, "UPDTE users SET name = 'x' WHERE id = ?")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Driver { .. }));
    assert!(manager.pending_parameters().is_empty());
    assert!(manager.is_open());
}

#[tokio::test]
async fn test_stored_procedures_are_rejected() {
    let (mut manager, _path) = setup_test_db().await;
    let err = manager
        .execute_non_query(CommandKind::StoredProcedure, "refresh_users")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument { .. }));
}

#[tokio::test]
async fn test_in_memory_database() {
    let mut manager = DbManager::with_connection_string(
        ProviderKind::Odbc,
        "Driver={SQLite3 ODBC Driver};Database=:memory:",
    );
    manager.open().await.unwrap();
    let value = manager
        .execute_scalar(CommandKind::Text, "SELECT 'hello'")
        .await
        .unwrap();
    assert_eq!(value, Some(DbValue::from("hello")));
    manager.close().await.unwrap();
    manager.close().await.unwrap();
}
