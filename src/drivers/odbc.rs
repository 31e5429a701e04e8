//! ODBC through the system driver manager.
//!
//! Uses `odbc-api` against unixODBC or the Windows driver manager, so any
//! installed ODBC driver or configured DSN works (`DSN=warehouse`,
//! `Driver={ODBC Driver 18 for SQL Server};Server=..`). The API is blocking:
//! every call moves the connection onto a blocking task and takes it back
//! when the call finishes. A call that times out leaves the connection with
//! the abandoned task and the session reports closed afterward.
//!
//! Parameters are bound as input only; commands that expect output values
//! are rejected.

use crate::config::ConnectionOptions;
use crate::drivers::{NativeCommand, NativeDriver, NativeSession, reject_outputs, with_timeout};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnInfo, ConnectionString, DataRow, DataTable, DbValue, ProviderKind};
use async_trait::async_trait;
use odbc_api::parameter::InputParameter;
use odbc_api::{
    Bit, Connection, ConnectionOptions as OdbcOptions, Cursor, CursorRow, DataType, Environment,
    IntoParameter, ResultSetMetadata,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

static ENVIRONMENT: OnceLock<Environment> = OnceLock::new();

/// The process-wide ODBC environment.
fn environment(provider: ProviderKind) -> DbResult<&'static Environment> {
    if let Some(environment) = ENVIRONMENT.get() {
        return Ok(environment);
    }
    let environment = Environment::new().map_err(|e| map_odbc_error(provider, e))?;
    Ok(ENVIRONMENT.get_or_init(|| environment))
}

/// Native driver over the ODBC driver manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct OdbcDriver;

#[async_trait]
impl NativeDriver for OdbcDriver {
    fn name(&self) -> &'static str {
        "odbc-api"
    }

    async fn connect(
        &self,
        provider: ProviderKind,
        connection_string: &ConnectionString,
        options: &ConnectionOptions,
    ) -> DbResult<Box<dyn NativeSession>> {
        let raw = connection_string.raw().to_string();
        let login_timeout_sec = u32::try_from(options.connect_timeout.as_secs()).ok();
        debug!("Connecting through the ODBC driver manager");

        let task = tokio::task::spawn_blocking(move || {
            let environment = environment(provider)?;
            environment
                .connect_with_connection_string(
                    &raw,
                    OdbcOptions {
                        login_timeout_sec,
                        ..OdbcOptions::default()
                    },
                )
                .map_err(|e| map_odbc_error(provider, e))
        });
        let conn = with_timeout("connect", options.connect_timeout, async move {
            task.await.map_err(|e| DbError::driver(provider, e))?
        })
        .await?;

        Ok(Box::new(OdbcSession {
            provider,
            conn: Some(conn),
            timeout: options.command_timeout,
        }))
    }
}

struct OdbcSession {
    provider: ProviderKind,
    conn: Option<Connection<'static>>,
    /// Limit for transaction calls, which carry no command timeout
    timeout: Duration,
}

impl OdbcSession {
    /// Run blocking work on the connection off the async runtime.
    async fn blocking<T, F>(&mut self, operation: &str, limit: Duration, work: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(ProviderKind, &Connection<'static>) -> DbResult<T> + Send + 'static,
    {
        let provider = self.provider;
        let conn = self
            .conn
            .take()
            .ok_or_else(|| DbError::invalid_operation("the ODBC session is closed"))?;

        let task = tokio::task::spawn_blocking(move || {
            let result = work(provider, &conn);
            (conn, result)
        });
        let joined = with_timeout(operation, limit, async move {
            task.await.map_err(|e| DbError::driver(provider, e))
        })
        .await;

        match joined {
            Ok((conn, result)) => {
                self.conn = Some(conn);
                result
            }
            Err(e) => {
                warn!(operation = %operation, error = %e, "Discarding ODBC session");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl NativeSession for OdbcSession {
    async fn execute_reader(&mut self, command: &NativeCommand) -> DbResult<Vec<DataTable>> {
        reject_outputs("odbc", command)?;
        let sql = command.sql.clone();
        let values = command.values.clone();
        self.blocking("command execution", command.timeout, move |provider, conn| {
            read_result_sets(provider, conn, &sql, values)
        })
        .await
    }

    async fn execute_non_query(&mut self, command: &NativeCommand) -> DbResult<u64> {
        reject_outputs("odbc", command)?;
        let sql = command.sql.clone();
        let values = command.values.clone();
        self.blocking("command execution", command.timeout, move |provider, conn| {
            let parameters = to_parameters(values);
            let mut statement = conn
                .preallocate()
                .map_err(|e| map_odbc_error(provider, e))?;
            drop(
                statement
                    .execute(&sql, parameters.as_slice())
                    .map_err(|e| map_odbc_error(provider, e))?,
            );
            let rows = statement
                .row_count()
                .map_err(|e| map_odbc_error(provider, e))?;
            Ok(rows.map_or(0, |n| n as u64))
        })
        .await
    }

    async fn execute_scalar(&mut self, command: &NativeCommand) -> DbResult<Option<DbValue>> {
        let tables = self.execute_reader(command).await?;
        Ok(tables.first().and_then(|t| t.first_value().cloned()))
    }

    async fn begin(&mut self, _transaction_id: &str) -> DbResult<()> {
        let limit = self.timeout;
        self.blocking("begin transaction", limit, |provider, conn| {
            conn.set_autocommit(false)
                .map_err(|e| map_odbc_error(provider, e))
        })
        .await
    }

    async fn commit(&mut self, _transaction_id: &str) -> DbResult<()> {
        let limit = self.timeout;
        self.blocking("commit", limit, |provider, conn| {
            conn.commit().map_err(|e| map_odbc_error(provider, e))?;
            conn.set_autocommit(true)
                .map_err(|e| map_odbc_error(provider, e))
        })
        .await
    }

    async fn rollback(&mut self, _transaction_id: &str) -> DbResult<()> {
        let limit = self.timeout;
        self.blocking("rollback", limit, |provider, conn| {
            conn.rollback().map_err(|e| map_odbc_error(provider, e))?;
            conn.set_autocommit(true)
                .map_err(|e| map_odbc_error(provider, e))
        })
        .await
    }

    async fn close(&mut self) -> DbResult<()> {
        if let Some(conn) = self.conn.take() {
            // Dropping the connection disconnects, which blocks
            tokio::task::spawn_blocking(move || drop(conn))
                .await
                .map_err(|e| DbError::driver(self.provider, e))?;
        }
        Ok(())
    }
}

fn to_parameters(values: Vec<DbValue>) -> Vec<Box<dyn InputParameter>> {
    values
        .into_iter()
        .map(|value| -> Box<dyn InputParameter> {
            match value {
                DbValue::Null => Box::new(None::<i64>.into_parameter()),
                DbValue::Bool(v) => Box::new(Bit::from_bool(v)),
                DbValue::Int(v) => Box::new(v),
                DbValue::Float(v) => Box::new(v),
                DbValue::String(v) => Box::new(v.into_parameter()),
                DbValue::Bytes(v) => Box::new(v.into_parameter()),
            }
        })
        .collect()
}

fn read_result_sets(
    provider: ProviderKind,
    conn: &Connection<'static>,
    sql: &str,
    values: Vec<DbValue>,
) -> DbResult<Vec<DataTable>> {
    let parameters = to_parameters(values);
    let mut statement = conn
        .preallocate()
        .map_err(|e| map_odbc_error(provider, e))?;
    let mut cursor = statement
        .execute(sql, parameters.as_slice())
        .map_err(|e| map_odbc_error(provider, e))?;

    let mut tables = Vec::new();
    while let Some(mut current) = cursor {
        tables.push(read_table(provider, &mut current)?);
        cursor = current
            .more_results()
            .map_err(|e| map_odbc_error(provider, e))?;
    }
    Ok(tables)
}

fn read_table(provider: ProviderKind, cursor: &mut impl Cursor) -> DbResult<DataTable> {
    let count = cursor
        .num_result_cols()
        .map_err(|e| map_odbc_error(provider, e))?;
    let count = u16::try_from(count).unwrap_or(0);

    let mut columns = Vec::with_capacity(usize::from(count));
    let mut types = Vec::with_capacity(usize::from(count));
    for index in 1..=count {
        let name = cursor
            .col_name(index)
            .map_err(|e| map_odbc_error(provider, e))?;
        let data_type = cursor
            .col_data_type(index)
            .map_err(|e| map_odbc_error(provider, e))?;
        columns.push(ColumnInfo::new(name, format!("{data_type:?}")));
        types.push(data_type);
    }

    let mut rows = Vec::new();
    let mut buf = Vec::new();
    while let Some(mut row) = cursor
        .next_row()
        .map_err(|e| map_odbc_error(provider, e))?
    {
        let mut values = Vec::with_capacity(types.len());
        for (index, data_type) in (1..=count).zip(&types) {
            values.push(read_value(provider, &mut row, index, data_type, &mut buf)?);
        }
        rows.push(DataRow::new(values));
    }
    Ok(DataTable::new(columns, rows))
}

fn is_binary(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Binary { .. } | DataType::Varbinary { .. } | DataType::LongVarbinary { .. }
    )
}

fn read_value(
    provider: ProviderKind,
    row: &mut CursorRow<'_>,
    index: u16,
    data_type: &DataType,
    buf: &mut Vec<u8>,
) -> DbResult<DbValue> {
    let present = if is_binary(data_type) {
        row.get_binary(index, buf)
    } else {
        row.get_text(index, buf)
    }
    .map_err(|e| map_odbc_error(provider, e))?;
    if !present {
        return Ok(DbValue::Null);
    }
    Ok(decode(data_type, buf))
}

/// Decode a fetched value by its column type.
///
/// Everything but binary columns is fetched as text; numbers that do not
/// parse keep their text.
fn decode(data_type: &DataType, bytes: &[u8]) -> DbValue {
    if is_binary(data_type) {
        return DbValue::Bytes(bytes.to_vec());
    }
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    match data_type {
        DataType::TinyInt | DataType::SmallInt | DataType::Integer | DataType::BigInt => trimmed
            .parse::<i64>()
            .map(DbValue::Int)
            .unwrap_or_else(|_| DbValue::String(text.into_owned())),
        DataType::Real | DataType::Double | DataType::Float { .. } => trimmed
            .parse::<f64>()
            .map(DbValue::Float)
            .unwrap_or_else(|_| DbValue::String(text.into_owned())),
        DataType::Bit => DbValue::Bool(trimmed == "1"),
        _ => DbValue::String(text.into_owned()),
    }
}

fn map_odbc_error(provider: ProviderKind, err: odbc_api::Error) -> DbError {
    let sql_state = match &err {
        odbc_api::Error::Diagnostics { record, .. } => Some(record.state.as_str().to_string()),
        _ => None,
    };
    DbError::driver_with_state(provider, sql_state, err)
}
