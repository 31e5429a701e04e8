//! Provider factory.
//!
//! Maps a provider selector to the family of objects for that provider. Every
//! operation resolves the selector first, so undefined values never reach the
//! dispatch; each dispatch is an exhaustive match over [`ProviderKind`].

use crate::db::{Command, Connection, DataAdapter, Transaction};
use crate::error::{DbError, DbResult};
use crate::models::{Parameter, ProviderKind, ProviderSelector};

/// Stateless dispatcher from provider kind to driver objects.
///
/// Every object returned is owned by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create a new, unopened connection.
    pub fn create_connection(provider: impl ProviderSelector) -> DbResult<Connection> {
        let kind = provider.resolve()?;
        match kind {
            ProviderKind::SqlServer => Ok(Connection::new(ProviderKind::SqlServer)),
            ProviderKind::OleDb => Ok(Connection::new(ProviderKind::OleDb)),
            ProviderKind::Odbc => Ok(Connection::new(ProviderKind::Odbc)),
            ProviderKind::Oracle => Err(DbError::unsupported_provider(kind)),
        }
    }

    /// Create a new, unconfigured command.
    pub fn create_command(provider: impl ProviderSelector) -> DbResult<Command> {
        let kind = provider.resolve()?;
        match kind {
            ProviderKind::SqlServer => Ok(Command::new(ProviderKind::SqlServer)),
            ProviderKind::OleDb => Ok(Command::new(ProviderKind::OleDb)),
            ProviderKind::Odbc => Ok(Command::new(ProviderKind::Odbc)),
            ProviderKind::Oracle => Err(DbError::unsupported_provider(kind)),
        }
    }

    /// Create a new data adapter with no select command.
    pub fn create_data_adapter(provider: impl ProviderSelector) -> DbResult<DataAdapter> {
        let kind = provider.resolve()?;
        match kind {
            ProviderKind::SqlServer => Ok(DataAdapter::new(ProviderKind::SqlServer)),
            ProviderKind::OleDb => Ok(DataAdapter::new(ProviderKind::OleDb)),
            ProviderKind::Odbc => Ok(DataAdapter::new(ProviderKind::Odbc)),
            ProviderKind::Oracle => Err(DbError::unsupported_provider(kind)),
        }
    }

    /// Create a new, unconfigured parameter.
    pub fn create_parameter(provider: impl ProviderSelector) -> DbResult<Parameter> {
        let kind = provider.resolve()?;
        match kind {
            ProviderKind::SqlServer => Ok(Parameter::new(ProviderKind::SqlServer)),
            ProviderKind::OleDb => Ok(Parameter::new(ProviderKind::OleDb)),
            ProviderKind::Odbc => Ok(Parameter::new(ProviderKind::Odbc)),
            ProviderKind::Oracle => Err(DbError::unsupported_provider(kind)),
        }
    }

    /// Begin a transaction on `connection`.
    pub async fn begin_transaction(connection: Option<&mut Connection>) -> DbResult<Transaction> {
        let connection = connection.ok_or_else(|| {
            DbError::invalid_argument("a connection is required to begin a transaction")
        })?;
        connection.begin_transaction().await
    }
}
