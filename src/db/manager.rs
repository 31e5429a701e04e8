//! Connection lifecycle and execution facade.
//!
//! `DbManager` owns one connection, the command of the last execute call, at
//! most one transaction, the pending parameter batch and the most recent
//! reader. Methods take `&mut self`; a manager is used by one task at a time.

use crate::config::ConnectionOptions;
use crate::db::{Command, Connection, ProviderFactory, Transaction, TransactionMode};
use crate::drivers::NativeDriver;
use crate::error::{DbError, DbResult};
use crate::models::{
    CommandKind, DataReader, DataSet, DbValue, Parameter, ParameterDirection, ProviderKind,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct DbManager {
    provider: ProviderKind,
    connection_string: String,
    options: ConnectionOptions,
    driver: Option<Arc<dyn NativeDriver>>,
    connection: Option<Connection>,
    command: Option<Command>,
    transaction: Option<Transaction>,
    parameters: Vec<Parameter>,
    reader: Option<DataReader>,
}

impl DbManager {
    /// Create a manager with no connection string.
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            connection_string: String::new(),
            options: ConnectionOptions::default(),
            driver: None,
            connection: None,
            command: None,
            transaction: None,
            parameters: Vec::new(),
            reader: None,
        }
    }

    pub fn with_connection_string(
        provider: ProviderKind,
        connection_string: impl Into<String>,
    ) -> Self {
        let mut manager = Self::new(provider);
        manager.connection_string = connection_string.into();
        manager
    }

    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Use this native driver instead of the registry.
    pub fn with_driver(mut self, driver: Arc<dyn NativeDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Set the connection string; takes effect on the next `open`.
    pub fn set_connection_string(&mut self, connection_string: impl Into<String>) {
        self.connection_string = connection_string.into();
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// The command configured by the most recent execute call.
    ///
    /// Its output, input-output and return-value parameters carry the values
    /// the database returned.
    pub fn command(&self) -> Option<&Command> {
        self.command.as_ref()
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    pub fn reader(&self) -> Option<&DataReader> {
        self.reader.as_ref()
    }

    pub fn reader_mut(&mut self) -> Option<&mut DataReader> {
        self.reader.as_mut()
    }

    /// Parameters that the next execute call will bind.
    pub fn pending_parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn is_open(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_open)
    }

    /// Open the connection. A no-op when already open.
    pub async fn open(&mut self) -> DbResult<()> {
        if self.is_open() {
            debug!(provider = %self.provider, "Connection already open");
            return Ok(());
        }

        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => ProviderFactory::create_connection(self.provider)?,
        };
        connection.set_connection_string(self.connection_string.as_str());
        connection.set_options(self.options);
        if let Some(driver) = &self.driver {
            connection.set_driver(driver.clone());
        }

        let opened = connection.open().await;
        self.connection = Some(connection);
        opened?;

        self.command = Some(ProviderFactory::create_command(self.provider)?);
        Ok(())
    }

    /// Close the connection. A no-op when never opened or already closed.
    ///
    /// A pending transaction is abandoned and the slot cleared.
    pub async fn close(&mut self) -> DbResult<()> {
        if let Some(tx) = self.transaction.take() {
            warn!(
                transaction_id = %tx.id(),
                "Closing with an uncommitted transaction"
            );
        }
        match self.connection.as_mut() {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }

    /// Append to the pending batch. No validation happens until execution.
    pub fn add_parameter(&mut self, parameter: Parameter) {
        self.parameters.push(parameter);
    }

    pub fn add_parameters(&mut self, parameters: impl IntoIterator<Item = Parameter>) {
        self.parameters.extend(parameters);
    }

    /// Create an unconfigured parameter of this manager's family.
    pub fn create_parameter(&self) -> DbResult<Parameter> {
        ProviderFactory::create_parameter(self.provider)
    }

    /// Begin a transaction, or reuse the active one under `ReuseExisting`.
    pub async fn begin_transaction(&mut self, mode: TransactionMode) -> DbResult<&Transaction> {
        let tx = match self.transaction.take() {
            Some(active) if mode == TransactionMode::RequireNew => {
                let id = active.id().to_string();
                self.transaction = Some(active);
                return Err(DbError::transaction(
                    "a transaction is already active and a new one was required",
                    id,
                ));
            }
            Some(active) => {
                debug!(transaction_id = %active.id(), "Reusing active transaction");
                active
            }
            None => ProviderFactory::begin_transaction(self.connection.as_mut()).await?,
        };
        if let Some(command) = self.command.as_mut() {
            command.set_transaction(Some(&tx));
        }
        Ok(&*self.transaction.insert(tx))
    }

    /// Commit the active transaction and clear the slot.
    ///
    /// A no-op without a transaction. If the commit fails the transaction
    /// stays in the slot so the caller can retry or roll back.
    pub async fn commit_transaction(&mut self) -> DbResult<()> {
        let Some(mut tx) = self.transaction.take() else {
            return Ok(());
        };
        let result = match self.connection.as_mut() {
            Some(connection) => tx.commit(connection).await,
            None => Err(DbError::invalid_operation("no connection for the transaction")),
        };
        match result {
            Ok(()) => {
                self.clear_command_transaction();
                Ok(())
            }
            Err(e) => {
                self.transaction = Some(tx);
                Err(e)
            }
        }
    }

    /// Roll back the active transaction and clear the slot. A no-op without a transaction.
    pub async fn rollback_transaction(&mut self) -> DbResult<()> {
        let Some(mut tx) = self.transaction.take() else {
            return Ok(());
        };
        let result = match self.connection.as_mut() {
            Some(connection) => tx.rollback(connection).await,
            None => Err(DbError::invalid_operation("no connection for the transaction")),
        };
        match result {
            Ok(()) => {
                self.clear_command_transaction();
                Ok(())
            }
            Err(e) => {
                self.transaction = Some(tx);
                Err(e)
            }
        }
    }

    fn clear_command_transaction(&mut self) {
        if let Some(command) = self.command.as_mut() {
            command.set_transaction(None);
        }
    }

    /// Take the pending batch and configure a fresh command for it.
    ///
    /// The batch is consumed before anything can fail.
    fn bind(
        &mut self,
        kind: CommandKind,
        text: &str,
    ) -> DbResult<(&mut Command, &mut Connection)> {
        let parameters = std::mem::take(&mut self.parameters);

        let connection = match self.connection.as_mut() {
            Some(connection) if connection.is_open() => connection,
            _ => {
                return Err(DbError::invalid_operation(
                    "the connection is not open; call open() first",
                ));
            }
        };

        let mut command = ProviderFactory::create_command(self.provider)?;
        command.set_kind(kind);
        command.set_text(text);
        command.set_transaction(self.transaction.as_ref());
        for mut parameter in parameters {
            if parameter.direction() == ParameterDirection::InputOutput && parameter.is_unset() {
                parameter.set_value(Some(DbValue::Null));
            }
            command.add_parameter(parameter)?;
        }

        Ok((self.command.insert(command), connection))
    }

    /// Execute and keep the reader. A previous reader is closed first.
    pub async fn execute_reader(
        &mut self,
        kind: CommandKind,
        text: &str,
    ) -> DbResult<&mut DataReader> {
        self.close_reader();
        let (command, connection) = self.bind(kind, text)?;
        let reader = command.execute_reader(connection).await?;
        Ok(self.reader.insert(reader))
    }

    /// Execute and return the affected row count.
    pub async fn execute_non_query(&mut self, kind: CommandKind, text: &str) -> DbResult<u64> {
        let (command, connection) = self.bind(kind, text)?;
        command.execute_non_query(connection).await
    }

    /// Execute and return the first column of the first row, or `None` without rows.
    pub async fn execute_scalar(
        &mut self,
        kind: CommandKind,
        text: &str,
    ) -> DbResult<Option<DbValue>> {
        let (command, connection) = self.bind(kind, text)?;
        command.execute_scalar(connection).await
    }

    /// Execute through a data adapter into a data set.
    pub async fn execute_tabular(&mut self, kind: CommandKind, text: &str) -> DbResult<DataSet> {
        let provider = self.provider;
        let (command, connection) = self.bind(kind, text)?;
        let mut adapter = ProviderFactory::create_data_adapter(provider)?;
        adapter.set_select_command(command.clone())?;
        let data_set = adapter.fill(connection).await?;
        if let Some(filled) = adapter.select_command() {
            command.clone_from(filled);
        }
        Ok(data_set)
    }

    /// Close the stored reader, if any.
    pub fn close_reader(&mut self) {
        if let Some(reader) = self.reader.as_mut() {
            reader.close();
        }
    }

    /// Close the connection and release everything the manager holds.
    pub async fn dispose(mut self) -> DbResult<()> {
        let closed = self.close().await;
        self.close_reader();
        self.reader = None;
        self.command = None;
        self.transaction = None;
        self.connection = None;
        info!(provider = %self.provider, "Manager disposed");
        closed
    }
}

impl std::fmt::Debug for DbManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbManager")
            .field("provider", &self.provider)
            .field("connection", &self.connection)
            .field("command", &self.command)
            .field("transaction", &self.transaction)
            .field("pending_parameters", &self.parameters.len())
            .field("has_reader", &self.reader.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for DbManager {
    fn drop(&mut self) {
        if self.is_open() {
            warn!(
                provider = %self.provider,
                "DbManager dropped without close(); releasing the connection"
            );
        }
    }
}
