//! Commands and data adapters.

use crate::db::Connection;
use crate::db::dialect;
use crate::db::transaction::Transaction;
use crate::drivers::NativeCommand;
use crate::error::{DbError, DbResult};
use crate::models::{
    CommandKind, DataReader, DataSet, DbValue, Parameter, ParameterDirection, ProviderKind,
};
use std::time::Duration;
use tracing::{debug, info};

/// A command of one provider family.
///
/// Created unconfigured by `ProviderFactory::create_command`. The connection is
/// supplied at execution time.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    provider: ProviderKind,
    kind: CommandKind,
    text: String,
    parameters: Vec<Parameter>,
    transaction_id: Option<String>,
    timeout: Option<Duration>,
}

impl Command {
    pub(crate) fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            kind: CommandKind::Text,
            text: String::new(),
            parameters: Vec::new(),
            transaction_id: None,
            timeout: None,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Attached parameters. After a successful execution, output,
    /// input-output and return-value parameters hold what the database returned.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    /// Per-command timeout; `None` uses the connection's command timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_kind(&mut self, kind: CommandKind) {
        self.kind = kind;
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Enlist the command in a transaction, or clear it with `None`.
    pub fn set_transaction(&mut self, transaction: Option<&Transaction>) {
        self.transaction_id = transaction.map(|t| t.id().to_string());
    }

    /// Attach a parameter of the same family.
    pub fn add_parameter(&mut self, mut parameter: Parameter) -> DbResult<()> {
        if parameter.provider() != self.provider {
            return Err(DbError::invalid_argument(format!(
                "cannot attach a {} parameter to a {} command",
                parameter.provider(),
                self.provider
            )));
        }
        let name = dialect::normalize_parameter_name(self.provider, parameter.name());
        parameter.set_name(name);
        self.parameters.push(parameter);
        Ok(())
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    /// Check the connection and render the command for its native session.
    fn prepare(&self, connection: &Connection) -> DbResult<NativeCommand> {
        if connection.provider() != self.provider {
            return Err(DbError::invalid_argument(format!(
                "cannot run a {} command on a {} connection",
                self.provider,
                connection.provider()
            )));
        }
        if !connection.is_open() {
            return Err(DbError::invalid_operation("the connection is not open"));
        }
        match (self.transaction_id.as_deref(), connection.active_transaction_id()) {
            (Some(ours), Some(pending)) if ours == pending => {}
            (None, None) => {}
            (Some(ours), _) => {
                return Err(DbError::invalid_operation(format!(
                    "transaction {ours} is not pending on this connection"
                )));
            }
            (None, Some(pending)) => {
                return Err(DbError::invalid_operation(format!(
                    "the connection has pending transaction {pending}; \
                     enlist the command with set_transaction"
                )));
            }
        }

        let rendered = dialect::render(self.provider, self.kind, &self.text, &self.parameters)?;
        Ok(NativeCommand {
            provider: self.provider,
            kind: self.kind,
            text: self.text.clone(),
            sql: rendered.sql,
            parameters: self.parameters.clone(),
            values: rendered.values,
            outputs: rendered.outputs,
            transaction_id: self.transaction_id.clone(),
            timeout: self.timeout.unwrap_or(connection.options().command_timeout),
        })
    }

    /// Copy the values the session returned into the output parameters.
    fn collect_output_values(&mut self, connection: &mut Connection) -> DbResult<()> {
        for (index, value) in connection.session_mut()?.take_output_values() {
            match self.parameters.get_mut(index) {
                Some(parameter) if parameter.direction() != ParameterDirection::Input => {
                    parameter.set_value(Some(value));
                }
                _ => debug!(index, "Ignoring output value for a non-output parameter"),
            }
        }
        Ok(())
    }

    /// Execute and return a reader over every result set.
    pub async fn execute_reader(&mut self, connection: &mut Connection) -> DbResult<DataReader> {
        let native = self.prepare(connection)?;
        debug!(
            provider = %self.provider,
            command_kind = %self.kind,
            parameters = self.parameters.len(),
            "Executing reader"
        );
        let tables = connection.session_mut()?.execute_reader(&native).await?;
        self.collect_output_values(connection)?;
        debug!(result_sets = tables.len(), "Reader ready");
        Ok(DataReader::new(tables))
    }

    /// Execute and return the affected row count.
    pub async fn execute_non_query(&mut self, connection: &mut Connection) -> DbResult<u64> {
        let native = self.prepare(connection)?;
        debug!(
            provider = %self.provider,
            command_kind = %self.kind,
            parameters = self.parameters.len(),
            "Executing non-query"
        );
        let rows_affected = connection.session_mut()?.execute_non_query(&native).await?;
        self.collect_output_values(connection)?;
        info!(
            provider = %self.provider,
            rows_affected = rows_affected,
            "Non-query executed"
        );
        Ok(rows_affected)
    }

    /// Execute and return the first column of the first row.
    ///
    /// `None` means no rows; `Some(DbValue::Null)` is a database null.
    pub async fn execute_scalar(
        &mut self,
        connection: &mut Connection,
    ) -> DbResult<Option<DbValue>> {
        let native = self.prepare(connection)?;
        debug!(
            provider = %self.provider,
            command_kind = %self.kind,
            parameters = self.parameters.len(),
            "Executing scalar"
        );
        let value = connection.session_mut()?.execute_scalar(&native).await?;
        self.collect_output_values(connection)?;
        Ok(value)
    }
}

/// Fills disconnected data sets from a select command.
#[derive(Debug, Clone, PartialEq)]
pub struct DataAdapter {
    provider: ProviderKind,
    select_command: Option<Command>,
}

impl DataAdapter {
    pub(crate) fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            select_command: None,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// The select command, with output parameter values from the last fill.
    pub fn select_command(&self) -> Option<&Command> {
        self.select_command.as_ref()
    }

    pub fn set_select_command(&mut self, command: Command) -> DbResult<()> {
        if command.provider() != self.provider {
            return Err(DbError::invalid_argument(format!(
                "cannot use a {} command with a {} data adapter",
                command.provider(),
                self.provider
            )));
        }
        self.select_command = Some(command);
        Ok(())
    }

    /// Run the select command and collect every result set.
    pub async fn fill(&mut self, connection: &mut Connection) -> DbResult<DataSet> {
        let command = self
            .select_command
            .as_mut()
            .ok_or_else(|| DbError::invalid_operation("the data adapter has no select command"))?;
        let native = command.prepare(connection)?;
        debug!(provider = %self.provider, "Filling data set");
        let tables = connection.session_mut()?.execute_reader(&native).await?;
        command.collect_output_values(connection)?;
        let data_set = DataSet::new(tables);
        debug!(tables = data_set.table_count(), "Data set filled");
        Ok(data_set)
    }
}
