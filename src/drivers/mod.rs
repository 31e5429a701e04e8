//! Native driver layer.
//!
//! A native driver is the wire-level client behind one provider family. The
//! facade never talks to a database directly: `Connection` resolves a
//! [`NativeDriver`], opens a [`NativeSession`] with it and hands every command
//! over as a [`NativeCommand`].
//!
//! Drivers are looked up in a process-wide registry keyed by provider family.
//! The most recently installed driver that accepts a connection string wins, so
//! applications can layer their own drivers over the bundled ones:
//!
//! - `sqlserver`: [`mssql::MssqlDriver`] (feature `mssql`)
//! - `odbc`: [`odbc::OdbcDriver`] over the system driver manager (feature `odbc`),
//!   with [`sqlite::SqliteDriver`] layered on top for SQLite ODBC connection
//!   strings (feature `sqlite`)
//! - `oledb`: nothing bundled

#[cfg(feature = "mssql")]
pub mod mssql;
pub mod memory;
#[cfg(feature = "odbc")]
pub mod odbc;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{InMemoryDriver, MemoryResponse, TransactionEvent};

use crate::config::ConnectionOptions;
use crate::error::{DbError, DbResult};
use crate::models::{CommandKind, ConnectionString, DataTable, DbValue, Parameter, ProviderKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// A command ready for a native session.
///
/// `sql` is the text rendered for the provider dialect and `values` holds the
/// positional values for its placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeCommand {
    pub provider: ProviderKind,
    pub kind: CommandKind,
    /// Command text as supplied by the caller
    pub text: String,
    pub sql: String,
    pub parameters: Vec<Parameter>,
    pub values: Vec<DbValue>,
    /// Indexes into `parameters` whose values come back after execution
    pub outputs: Vec<usize>,
    pub transaction_id: Option<String>,
    pub timeout: Duration,
}

/// Factory for native sessions of one provider family.
#[async_trait]
pub trait NativeDriver: Send + Sync {
    /// Short driver name used in logs.
    fn name(&self) -> &'static str;

    /// Whether this driver can serve the given connection string.
    fn accepts(&self, _connection_string: &ConnectionString) -> bool {
        true
    }

    /// Open a session.
    async fn connect(
        &self,
        provider: ProviderKind,
        connection_string: &ConnectionString,
        options: &ConnectionOptions,
    ) -> DbResult<Box<dyn NativeSession>>;
}

/// A live native connection.
///
/// Dropping a session releases it. `close` is the graceful path.
#[async_trait]
pub trait NativeSession: Send {
    /// Run the command and materialize every result set it produces.
    ///
    /// All rows are buffered before this returns; the caller's
    /// [`DataReader`](crate::models::DataReader) walks them afterward.
    async fn execute_reader(&mut self, command: &NativeCommand) -> DbResult<Vec<DataTable>>;

    /// Run the command and return the affected row count.
    async fn execute_non_query(&mut self, command: &NativeCommand) -> DbResult<u64>;

    /// Run the command and return the first column of the first row.
    async fn execute_scalar(&mut self, command: &NativeCommand) -> DbResult<Option<DbValue>>;

    async fn begin(&mut self, transaction_id: &str) -> DbResult<()>;

    async fn commit(&mut self, transaction_id: &str) -> DbResult<()>;

    async fn rollback(&mut self, transaction_id: &str) -> DbResult<()>;

    async fn close(&mut self) -> DbResult<()>;

    /// Values of the last command's `outputs`, as `(parameter index, value)`.
    ///
    /// Drained by the call. Sessions that cannot return parameter values
    /// reject such commands and keep this default.
    fn take_output_values(&mut self) -> Vec<(usize, DbValue)> {
        Vec::new()
    }
}

type DriverMap = HashMap<ProviderKind, Vec<Arc<dyn NativeDriver>>>;

static REGISTRY: OnceLock<RwLock<DriverMap>> = OnceLock::new();

fn registry() -> &'static RwLock<DriverMap> {
    REGISTRY.get_or_init(|| RwLock::new(bundled_drivers()))
}

fn bundled_drivers() -> DriverMap {
    #[allow(unused_mut)]
    let mut map: DriverMap = HashMap::new();
    #[cfg(feature = "mssql")]
    map.entry(ProviderKind::SqlServer)
        .or_default()
        .push(Arc::new(mssql::MssqlDriver));
    #[cfg(feature = "odbc")]
    map.entry(ProviderKind::Odbc)
        .or_default()
        .push(Arc::new(odbc::OdbcDriver));
    #[cfg(feature = "sqlite")]
    map.entry(ProviderKind::Odbc)
        .or_default()
        .push(Arc::new(sqlite::SqliteDriver));
    map
}

/// Install a driver for a provider family.
///
/// Later installs take precedence over earlier ones and over bundled drivers.
pub fn install(provider: ProviderKind, driver: Arc<dyn NativeDriver>) {
    debug!(provider = %provider, driver = driver.name(), "Installing native driver");
    registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(provider)
        .or_default()
        .push(driver);
}

/// Names of the drivers installed for a provider family, most preferred first.
pub fn installed(provider: ProviderKind) -> Vec<&'static str> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&provider)
        .map(|drivers| drivers.iter().rev().map(|d| d.name()).collect())
        .unwrap_or_default()
}

/// Find the driver that will serve `connection_string`.
pub fn resolve(
    provider: ProviderKind,
    connection_string: &ConnectionString,
) -> DbResult<Arc<dyn NativeDriver>> {
    let registry = registry().read().unwrap_or_else(PoisonError::into_inner);
    registry
        .get(&provider)
        .and_then(|drivers| {
            drivers
                .iter()
                .rev()
                .find(|d| d.accepts(connection_string))
                .cloned()
        })
        .ok_or_else(|| DbError::driver_not_installed(provider, install_hint(provider)))
}

fn install_hint(provider: ProviderKind) -> String {
    match provider {
        ProviderKind::SqlServer => {
            "Build with the `mssql` feature or install a driver with drivers::install".to_string()
        }
        ProviderKind::OleDb => {
            "No OLE DB driver is bundled; install one with drivers::install(ProviderKind::OleDb, ..)"
                .to_string()
        }
        ProviderKind::Odbc => "Build with the `odbc` feature to use the system ODBC driver \
             manager; without it only SQLite connection strings \
             (Driver={SQLite3 ODBC Driver};Database=<path>) are served"
            .to_string(),
        ProviderKind::Oracle => "Oracle is not implemented".to_string(),
    }
}

/// Map a tokio timeout into a [`DbError::Timeout`].
pub(crate) async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> DbResult<T>
where
    F: std::future::Future<Output = DbResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DbError::timeout(operation, limit.as_secs())),
    }
}

/// Drop a session's client after a timeout.
///
/// A timed-out call can stop reading in the middle of a response, which
/// leaves the wire protocol out of step. Later calls then see a closed session.
pub(crate) fn discard_on_timeout<C, T>(
    client: &mut Option<C>,
    result: DbResult<T>,
) -> DbResult<T> {
    if let Err(DbError::Timeout { operation, .. }) = &result {
        if client.take().is_some() {
            warn!(operation = %operation, "Discarding native session after a timeout");
        }
    }
    result
}

/// Reject commands that expect parameter values back.
pub(crate) fn reject_outputs(driver: &str, command: &NativeCommand) -> DbResult<()> {
    match command.outputs.first() {
        None => Ok(()),
        Some(&index) => {
            let name = command
                .parameters
                .get(index)
                .map(Parameter::name)
                .filter(|name| !name.is_empty())
                .map_or_else(|| format!("#{}", index + 1), str::to_string);
            Err(DbError::invalid_argument(format!(
                "the {driver} driver cannot return parameter values (parameter '{name}')"
            )))
        }
    }
}
