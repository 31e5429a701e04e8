//! Embedded SQLite reached through the ODBC family.
//!
//! Serves ODBC connection strings that name a SQLite ODBC driver, e.g.
//! `Driver={SQLite3 ODBC Driver};Database=/path/app.db`. The `Timeout` key is
//! honored as the busy timeout in milliseconds, as the SQLite ODBC drivers do.
//!
//! Readers run a batch one statement at a time so that every row-returning
//! statement yields a result set, including ones without rows. SQLite has no
//! output parameters; commands that expect values back are rejected.

use crate::config::ConnectionOptions;
use crate::drivers::{
    NativeCommand, NativeDriver, NativeSession, discard_on_timeout, reject_outputs, with_timeout,
};
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnInfo, CommandKind, ConnectionString, DataRow, DataTable, DbValue, ProviderKind,
};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Either, Executor, Row, Sqlite, Statement, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Native driver backed by sqlx's SQLite engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

#[async_trait]
impl NativeDriver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn accepts(&self, connection_string: &ConnectionString) -> bool {
        connection_string
            .get("Driver")
            .is_some_and(|d| d.to_ascii_lowercase().contains("sqlite"))
    }

    async fn connect(
        &self,
        provider: ProviderKind,
        connection_string: &ConnectionString,
        options: &ConnectionOptions,
    ) -> DbResult<Box<dyn NativeSession>> {
        let database = connection_string
            .get("Database")
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                DbError::invalid_argument("SQLite connection strings need Database=<path>")
            })?;

        let mut connect_options = if database == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| map_sqlx_error(provider, e))?
        } else {
            SqliteConnectOptions::new()
                .filename(database)
                .create_if_missing(true)
        };
        if let Some(ms) = connection_string
            .get("Timeout")
            .and_then(|v| v.parse::<u64>().ok())
        {
            connect_options = connect_options.busy_timeout(Duration::from_millis(ms));
        }

        debug!(database = %database, "Opening SQLite database");
        let conn = with_timeout("connect", options.connect_timeout, async {
            SqliteConnection::connect_with(&connect_options)
                .await
                .map_err(|e| map_sqlx_error(provider, e))
        })
        .await?;

        Ok(Box::new(SqliteSession {
            provider,
            conn: Some(conn),
        }))
    }
}

struct SqliteSession {
    provider: ProviderKind,
    conn: Option<SqliteConnection>,
}

impl SqliteSession {
    fn conn(&mut self) -> DbResult<&mut SqliteConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::invalid_operation("the SQLite session is closed"))
    }

    fn check_supported(&self, command: &NativeCommand) -> DbResult<()> {
        match command.kind {
            CommandKind::Text => reject_outputs("sqlite", command),
            other => Err(DbError::invalid_argument(format!(
                "SQLite does not support {other} commands"
            ))),
        }
    }

    async fn run(&mut self, sql: &'static str) -> DbResult<()> {
        let provider = self.provider;
        self.conn()?
            .execute(sql)
            .await
            .map_err(|e| map_sqlx_error(provider, e))?;
        Ok(())
    }
}

#[async_trait]
impl NativeSession for SqliteSession {
    async fn execute_reader(&mut self, command: &NativeCommand) -> DbResult<Vec<DataTable>> {
        self.check_supported(command)?;
        let provider = self.provider;
        let conn = self.conn()?;

        let result = with_timeout("command execution", command.timeout, async move {
            let mut tables = Vec::new();
            let mut values = command.values.iter();
            for sql in split_statements(&command.sql) {
                let statement = (&mut *conn)
                    .prepare(sql)
                    .await
                    .map_err(|e| map_sqlx_error(provider, e))?;
                let wanted = match statement.parameters() {
                    Some(Either::Left(types)) => types.len(),
                    Some(Either::Right(count)) => count,
                    None => 0,
                };
                let mut query = statement.query();
                for value in values.by_ref().take(wanted) {
                    query = bind_value(query, value);
                }

                let columns: Vec<ColumnInfo> = statement
                    .columns()
                    .iter()
                    .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                    .collect();
                let mut table = (!columns.is_empty()).then(|| DataTable::new(columns, Vec::new()));

                let mut rows = query.fetch(&mut *conn);
                while let Some(row) = rows
                    .try_next()
                    .await
                    .map_err(|e| map_sqlx_error(provider, e))?
                {
                    let table =
                        table.get_or_insert_with(|| DataTable::new(columns_of(&row), Vec::new()));
                    table.rows.push(decode_row(provider, &row)?);
                }
                tables.extend(table);
            }
            Ok(tables)
        })
        .await;
        discard_on_timeout(&mut self.conn, result)
    }

    async fn execute_non_query(&mut self, command: &NativeCommand) -> DbResult<u64> {
        self.check_supported(command)?;
        let provider = self.provider;
        let conn = self.conn()?;

        let result = with_timeout("command execution", command.timeout, async move {
            let mut query = sqlx::query(&command.sql);
            for value in &command.values {
                query = bind_value(query, value);
            }
            let result = query
                .execute(conn)
                .await
                .map_err(|e| map_sqlx_error(provider, e))?;
            Ok(result.rows_affected())
        })
        .await;
        discard_on_timeout(&mut self.conn, result)
    }

    async fn execute_scalar(&mut self, command: &NativeCommand) -> DbResult<Option<DbValue>> {
        let tables = self.execute_reader(command).await?;
        Ok(tables.first().and_then(|t| t.first_value().cloned()))
    }

    async fn begin(&mut self, _transaction_id: &str) -> DbResult<()> {
        self.run("BEGIN").await
    }

    async fn commit(&mut self, _transaction_id: &str) -> DbResult<()> {
        self.run("COMMIT").await
    }

    async fn rollback(&mut self, _transaction_id: &str) -> DbResult<()> {
        self.run("ROLLBACK").await
    }

    async fn close(&mut self) -> DbResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|e| map_sqlx_error(self.provider, e))?;
        }
        Ok(())
    }
}

/// Bind a value to a SQLite query.
fn bind_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q DbValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        DbValue::Null => query.bind(None::<String>),
        DbValue::Bool(v) => query.bind(*v),
        DbValue::Int(v) => query.bind(*v),
        DbValue::Float(v) => query.bind(*v),
        DbValue::String(v) => query.bind(v.as_str()),
        DbValue::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Split a batch at top-level semicolons.
///
/// Quoted text, bracketed identifiers and comments are skipped over, and
/// comment-only pieces are dropped. Inside `CREATE TRIGGER` a semicolon only
/// ends the statement after the closing `END`.
fn split_statements(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                has_code = true;
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
            }
            b'[' => {
                has_code = true;
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            b';' if !inside_trigger_body(&sql[start..i]) => {
                if has_code {
                    statements.push(sql[start..i].trim());
                }
                start = i + 1;
                has_code = false;
            }
            b if !b.is_ascii_whitespace() => has_code = true,
            _ => {}
        }
        i += 1;
    }
    if has_code {
        statements.push(sql[start..].trim());
    }
    statements
}

fn inside_trigger_body(statement: &str) -> bool {
    let upper = statement.trim().to_ascii_uppercase();
    let words: Vec<&str> = upper.split_whitespace().take(3).collect();
    let is_trigger = matches!(
        words.as_slice(),
        ["CREATE", "TRIGGER", ..] | ["CREATE", "TEMP" | "TEMPORARY", "TRIGGER"]
    );
    is_trigger
        && !upper
            .strip_suffix("END")
            .is_some_and(|rest| !rest.ends_with(|c: char| c.is_ascii_alphanumeric() || c == '_'))
}

fn columns_of(row: &SqliteRow) -> Vec<ColumnInfo> {
    row.columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

/// Decode a row by the storage class of each value.
fn decode_row(provider: ProviderKind, row: &SqliteRow) -> DbResult<DataRow> {
    let mut values = Vec::with_capacity(row.len());
    for idx in 0..row.len() {
        let raw = row
            .try_get_raw(idx)
            .map_err(|e| map_sqlx_error(provider, e))?;
        if raw.is_null() {
            values.push(DbValue::Null);
            continue;
        }
        let storage = raw.type_info().name().to_string();
        let value = match storage.as_str() {
            "INTEGER" => row.try_get::<i64, _>(idx).map(DbValue::Int),
            "REAL" => row.try_get::<f64, _>(idx).map(DbValue::Float),
            "BLOB" => row.try_get::<Vec<u8>, _>(idx).map(DbValue::Bytes),
            _ => row.try_get::<String, _>(idx).map(DbValue::String),
        }
        .map_err(|e| map_sqlx_error(provider, e))?;
        values.push(value);
    }
    Ok(DataRow::new(values))
}

fn map_sqlx_error(provider: ProviderKind, err: sqlx::Error) -> DbError {
    let sql_state = match &err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.to_string()),
        _ => None,
    };
    DbError::driver_with_state(provider, sql_state, err)
}
