//! SQL Server over TDS.
//!
//! Uses `tiberius` with a tokio TCP stream. Connection strings are ADO.NET
//! style (`Server=tcp:host,1433;Database=db;User Id=..;Password=..`) and are
//! handed to `tiberius::Config::from_ado_string` unchanged.
//!
//! Output parameters come back as one extra row that the rendered batch
//! selects last: the row count of the preceding statement, then each output
//! variable. The driver takes that row off before returning result sets.
//! A timed-out call drops the client, since TDS cannot resume a half-read
//! response.

use crate::config::ConnectionOptions;
use crate::drivers::{
    NativeCommand, NativeDriver, NativeSession, discard_on_timeout, with_timeout,
};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnInfo, ConnectionString, DataRow, DataTable, DbValue, ProviderKind};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use tiberius::{Client, ColumnData, Config, Query, QueryItem};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

type TdsClient = Client<Compat<TcpStream>>;

/// Native driver for SQL Server.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDriver;

#[async_trait]
impl NativeDriver for MssqlDriver {
    fn name(&self) -> &'static str {
        "tiberius"
    }

    async fn connect(
        &self,
        provider: ProviderKind,
        connection_string: &ConnectionString,
        options: &ConnectionOptions,
    ) -> DbResult<Box<dyn NativeSession>> {
        let config = Config::from_ado_string(connection_string.raw())
            .map_err(|e| map_tds_error(provider, e))?;
        let addr = config.get_addr();
        debug!(addr = %addr, "Connecting to SQL Server");

        let client = with_timeout("connect", options.connect_timeout, async {
            let tcp = TcpStream::connect(&addr)
                .await
                .map_err(|e| DbError::driver(provider, e))?;
            tcp.set_nodelay(true)
                .map_err(|e| DbError::driver(provider, e))?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| map_tds_error(provider, e))
        })
        .await?;

        Ok(Box::new(MssqlSession {
            provider,
            client: Some(client),
            outputs: Vec::new(),
        }))
    }
}

struct MssqlSession {
    provider: ProviderKind,
    client: Option<TdsClient>,
    outputs: Vec<(usize, DbValue)>,
}

impl MssqlSession {
    fn client(&mut self) -> DbResult<&mut TdsClient> {
        self.client
            .as_mut()
            .ok_or_else(|| DbError::invalid_operation("the SQL Server session is closed"))
    }

    /// Run the batch and collect its result sets.
    async fn query_tables(&mut self, command: &NativeCommand) -> DbResult<Vec<DataTable>> {
        let provider = self.provider;
        let client = self.client()?;

        let result = with_timeout("command execution", command.timeout, async move {
            let mut stream = build_query(command)
                .query(client)
                .await
                .map_err(|e| map_tds_error(provider, e))?;

            let mut tables: Vec<DataTable> = Vec::new();
            while let Some(item) = stream
                .try_next()
                .await
                .map_err(|e| map_tds_error(provider, e))?
            {
                match item {
                    QueryItem::Metadata(meta) => {
                        let columns = meta
                            .columns()
                            .iter()
                            .map(|c| ColumnInfo::new(c.name(), format!("{:?}", c.column_type())))
                            .collect();
                        tables.push(DataTable::new(columns, Vec::new()));
                    }
                    QueryItem::Row(row) => {
                        let values = row.into_iter().map(convert_column).collect();
                        if let Some(table) = tables.last_mut() {
                            table.rows.push(DataRow::new(values));
                        }
                    }
                }
            }
            Ok(tables)
        })
        .await;
        discard_on_timeout(&mut self.client, result)
    }

    async fn run(&mut self, sql: &'static str) -> DbResult<()> {
        let provider = self.provider;
        self.client()?
            .execute(sql, &[])
            .await
            .map_err(|e| map_tds_error(provider, e))?;
        Ok(())
    }
}

/// Build a TDS query with `@P1..@Pn` bound in order.
fn build_query(command: &NativeCommand) -> Query<'_> {
    let mut query = Query::new(command.sql.as_str());
    for value in &command.values {
        match value {
            DbValue::Null => query.bind(Option::<String>::None),
            DbValue::Bool(v) => query.bind(*v),
            DbValue::Int(v) => query.bind(*v),
            DbValue::Float(v) => query.bind(*v),
            DbValue::String(v) => query.bind(v.as_str()),
            DbValue::Bytes(v) => query.bind(v.as_slice()),
        }
    }
    query
}

#[async_trait]
impl NativeSession for MssqlSession {
    async fn execute_reader(&mut self, command: &NativeCommand) -> DbResult<Vec<DataTable>> {
        self.outputs.clear();
        let mut tables = self.query_tables(command).await?;
        if !command.outputs.is_empty() {
            let (_, outputs) = split_outputs(self.provider, command, &mut tables)?;
            self.outputs = outputs;
        }
        Ok(tables)
    }

    async fn execute_non_query(&mut self, command: &NativeCommand) -> DbResult<u64> {
        self.outputs.clear();
        if !command.outputs.is_empty() {
            let mut tables = self.query_tables(command).await?;
            let (rows_affected, outputs) = split_outputs(self.provider, command, &mut tables)?;
            self.outputs = outputs;
            return Ok(rows_affected);
        }

        let provider = self.provider;
        let client = self.client()?;
        let result = with_timeout("command execution", command.timeout, async move {
            let result = build_query(command)
                .execute(client)
                .await
                .map_err(|e| map_tds_error(provider, e))?;
            Ok(result.rows_affected().iter().sum())
        })
        .await;
        discard_on_timeout(&mut self.client, result)
    }

    async fn execute_scalar(&mut self, command: &NativeCommand) -> DbResult<Option<DbValue>> {
        let tables = self.execute_reader(command).await?;
        Ok(tables.first().and_then(|t| t.first_value().cloned()))
    }

    async fn begin(&mut self, _transaction_id: &str) -> DbResult<()> {
        self.run("BEGIN TRANSACTION").await
    }

    async fn commit(&mut self, _transaction_id: &str) -> DbResult<()> {
        self.run("COMMIT TRANSACTION").await
    }

    async fn rollback(&mut self, _transaction_id: &str) -> DbResult<()> {
        self.run("ROLLBACK TRANSACTION").await
    }

    async fn close(&mut self) -> DbResult<()> {
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| map_tds_error(self.provider, e))?;
        }
        Ok(())
    }

    fn take_output_values(&mut self) -> Vec<(usize, DbValue)> {
        std::mem::take(&mut self.outputs)
    }
}

/// Take the output row off the end of the result sets.
///
/// Returns the row count it reports and the output values keyed by
/// parameter index.
fn split_outputs(
    provider: ProviderKind,
    command: &NativeCommand,
    tables: &mut Vec<DataTable>,
) -> DbResult<(u64, Vec<(usize, DbValue)>)> {
    let row = tables
        .pop()
        .and_then(|table| table.rows.into_iter().next())
        .ok_or_else(|| {
            DbError::driver(provider, "the batch ended before returning its output parameters")
        })?;
    let mut values = row.values.into_iter();
    let rows_affected = match values.next() {
        Some(DbValue::Int(n)) => u64::try_from(n).unwrap_or(0),
        _ => 0,
    };
    Ok((rows_affected, command.outputs.iter().copied().zip(values).collect()))
}

fn convert_column(data: ColumnData<'static>) -> DbValue {
    match data {
        ColumnData::U8(v) => v.map(|v| DbValue::Int(i64::from(v))).into(),
        ColumnData::I16(v) => v.map(|v| DbValue::Int(i64::from(v))).into(),
        ColumnData::I32(v) => v.map(|v| DbValue::Int(i64::from(v))).into(),
        ColumnData::I64(v) => v.into(),
        ColumnData::F32(v) => v.map(|v| DbValue::Float(f64::from(v))).into(),
        ColumnData::F64(v) => v.into(),
        ColumnData::Bit(v) => v.into(),
        ColumnData::String(v) => v.map(|s| DbValue::String(s.into_owned())).into(),
        ColumnData::Guid(v) => v.map(|g| DbValue::String(g.to_string())).into(),
        ColumnData::Binary(v) => v.map(|b| DbValue::Bytes(b.into_owned())).into(),
        ColumnData::Numeric(v) => v
            .map(|n| DbValue::String(format_decimal(n.value(), n.scale())))
            .into(),
        // Temporal and XML values keep their TDS rendering
        other => DbValue::String(format!("{other:?}")),
    }
}

/// Render a scaled integer as a decimal string without losing precision.
fn format_decimal(value: i128, scale: u8) -> String {
    if scale == 0 {
        return value.to_string();
    }
    let digits = value.unsigned_abs().to_string();
    let scale = usize::from(scale);
    let padded = format!("{digits:0>width$}", width = scale + 1);
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    let sign = if value < 0 { "-" } else { "" };
    format!("{sign}{int_part}.{frac_part}")
}

fn map_tds_error(provider: ProviderKind, err: tiberius::error::Error) -> DbError {
    let sql_state = match &err {
        tiberius::error::Error::Server(token) => Some(token.code().to_string()),
        _ => None,
    };
    DbError::driver_with_state(provider, sql_state, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommandKind;
    use std::time::Duration;

    fn command_with_outputs(outputs: Vec<usize>) -> NativeCommand {
        NativeCommand {
            provider: ProviderKind::SqlServer,
            kind: CommandKind::StoredProcedure,
            text: "dbo.usp_total".to_string(),
            sql: String::new(),
            parameters: Vec::new(),
            values: Vec::new(),
            outputs,
            transaction_id: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_split_outputs_takes_last_row() {
        let command = command_with_outputs(vec![0, 2]);
        let mut tables = vec![
            DataTable::new(
                vec![ColumnInfo::new("id", "Int4")],
                vec![DataRow::new(vec![DbValue::Int(1)])],
            ),
            DataTable::new(
                vec![
                    ColumnInfo::new("@@ROWCOUNT", "Int4"),
                    ColumnInfo::new("@rc", "Int4"),
                    ColumnInfo::new("@total", "Int8"),
                ],
                vec![DataRow::new(vec![
                    DbValue::Int(3),
                    DbValue::Int(0),
                    DbValue::Int(42),
                ])],
            ),
        ];

        let (rows_affected, outputs) =
            split_outputs(ProviderKind::SqlServer, &command, &mut tables).unwrap();
        assert_eq!(rows_affected, 3);
        assert_eq!(outputs, vec![(0, DbValue::Int(0)), (2, DbValue::Int(42))]);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].column_names(), vec!["id"]);
    }

    #[test]
    fn test_split_outputs_without_row_fails() {
        let command = command_with_outputs(vec![0]);
        let mut tables = Vec::new();
        let err = split_outputs(ProviderKind::SqlServer, &command, &mut tables).unwrap_err();
        assert!(matches!(err, DbError::Driver { .. }));
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(12345, 2), "123.45");
        assert_eq!(format_decimal(-5, 3), "-0.005");
        assert_eq!(format_decimal(42, 0), "42");
    }

    #[test]
    fn test_convert_column_nulls() {
        assert_eq!(convert_column(ColumnData::I32(None)), DbValue::Null);
        assert_eq!(convert_column(ColumnData::I32(Some(7))), DbValue::Int(7));
        assert_eq!(convert_column(ColumnData::Bit(Some(true))), DbValue::Bool(true));
        assert_eq!(
            convert_column(ColumnData::String(Some("x".into()))),
            DbValue::String("x".to_string())
        );
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        // Nothing listens on port 1
        let cs = ConnectionString::parse("Server=tcp:127.0.0.1,1;Database=y").unwrap();
        let options = ConnectionOptions::default()
            .with_connect_timeout(std::time::Duration::from_secs(2));
        let result = MssqlDriver
            .connect(ProviderKind::SqlServer, &cs, &options)
            .await;
        assert!(matches!(
            result,
            Err(DbError::Driver { .. } | DbError::Timeout { .. })
        ));
    }
}
