//! Scripted in-memory driver.
//!
//! Returns queued responses in FIFO order and records every command and
//! transaction call so tests can verify what the facade sent.

use crate::config::ConnectionOptions;
use crate::drivers::{NativeCommand, NativeDriver, NativeSession};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnInfo, ConnectionString, DataRow, DataTable, DbValue, ProviderKind};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A scripted result for the next command.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryResponse {
    /// Result sets for reader, scalar and tabular calls
    Tables(Vec<DataTable>),
    /// Affected row count for non-query calls
    Affected(u64),
    /// Fail the command with a driver error carrying this message
    Error(String),
}

impl MemoryResponse {
    /// A single result set with untyped columns.
    pub fn table(columns: &[&str], rows: Vec<Vec<DbValue>>) -> Self {
        let columns = columns.iter().map(|c| ColumnInfo::new(*c, "")).collect();
        let rows = rows.into_iter().map(DataRow::new).collect();
        Self::Tables(vec![DataTable::new(columns, rows)])
    }

    /// A one-row, one-column result set.
    pub fn scalar(value: impl Into<DbValue>) -> Self {
        Self::table(&["value"], vec![vec![value.into()]])
    }
}

/// A transaction call observed by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    Begin(String),
    Commit(String),
    Rollback(String),
}

/// A queued response and the output parameter values that come with it.
struct Scripted {
    response: MemoryResponse,
    outputs: Vec<DbValue>,
}

#[derive(Default)]
struct State {
    responses: VecDeque<Scripted>,
    commands: Vec<NativeCommand>,
    transactions: Vec<TransactionEvent>,
    connects: usize,
    closes: usize,
    fail_commit: bool,
    fail_connect: Option<String>,
}

/// An in-memory native driver for testing.
///
/// Clones share state, so a test can keep one handle for assertions while
/// the facade owns another.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use db_layer::drivers::{InMemoryDriver, MemoryResponse};
/// use db_layer::models::DbValue;
///
/// let driver = Arc::new(
///     InMemoryDriver::new().with_response(MemoryResponse::scalar(DbValue::Int(1))),
/// );
/// assert_eq!(driver.recorded_commands().len(), 0);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryDriver {
    state: Arc<Mutex<State>>,
}

impl InMemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a response for the next command.
    pub fn with_response(self, response: MemoryResponse) -> Self {
        self.state().responses.push_back(Scripted {
            response,
            outputs: Vec::new(),
        });
        self
    }

    /// Queue several responses.
    pub fn with_responses(self, responses: impl IntoIterator<Item = MemoryResponse>) -> Self {
        self.state()
            .responses
            .extend(responses.into_iter().map(|response| Scripted {
                response,
                outputs: Vec::new(),
            }));
        self
    }

    /// Return these parameter values with the most recently queued response.
    ///
    /// Values are matched to the command's output parameters in order; with
    /// nothing queued they ride on an `Affected(0)` response.
    pub fn with_output_values(self, values: impl IntoIterator<Item = DbValue>) -> Self {
        {
            let mut state = self.state();
            if state.responses.is_empty() {
                state.responses.push_back(Scripted {
                    response: MemoryResponse::Affected(0),
                    outputs: Vec::new(),
                });
            }
            if let Some(last) = state.responses.back_mut() {
                last.outputs = values.into_iter().collect();
            }
        }
        self
    }

    /// Make `connect` fail with a driver error.
    pub fn with_connect_failure(self, message: impl Into<String>) -> Self {
        self.state().fail_connect = Some(message.into());
        self
    }

    /// Make every subsequent commit fail until reset.
    pub fn set_commit_failure(&self, fail: bool) {
        self.state().fail_commit = fail;
    }

    /// All commands executed so far, oldest first.
    pub fn recorded_commands(&self) -> Vec<NativeCommand> {
        self.state().commands.clone()
    }

    pub fn last_command(&self) -> Option<NativeCommand> {
        self.state().commands.last().cloned()
    }

    pub fn transaction_events(&self) -> Vec<TransactionEvent> {
        self.state().transactions.clone()
    }

    /// Number of sessions opened.
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    /// Number of sessions closed gracefully.
    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    /// Assert that the last command rendered to `expected_sql` with `expected_values`.
    pub fn assert_last_command(&self, expected_sql: &str, expected_values: &[DbValue]) {
        let last = self.last_command().expect("No commands were recorded");
        assert_eq!(
            last.sql, expected_sql,
            "SQL mismatch.\nExpected: {}\nActual: {}",
            expected_sql, last.sql
        );
        assert_eq!(
            last.values, expected_values,
            "Values mismatch.\nExpected: {:?}\nActual: {:?}",
            expected_values, last.values
        );
    }

    /// Assert that exactly n commands were executed.
    pub fn assert_command_count(&self, expected: usize) {
        let actual = self.state().commands.len();
        assert_eq!(
            actual, expected,
            "Command count mismatch. Expected: {}, Actual: {}",
            expected, actual
        );
    }
}

#[async_trait]
impl NativeDriver for InMemoryDriver {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn connect(
        &self,
        provider: ProviderKind,
        _connection_string: &ConnectionString,
        _options: &ConnectionOptions,
    ) -> DbResult<Box<dyn NativeSession>> {
        let mut state = self.state();
        if let Some(message) = state.fail_connect.clone() {
            return Err(DbError::driver(provider, message));
        }
        state.connects += 1;
        Ok(Box::new(InMemorySession {
            provider,
            state: self.state.clone(),
            outputs: Vec::new(),
        }))
    }
}

struct InMemorySession {
    provider: ProviderKind,
    state: Arc<Mutex<State>>,
    outputs: Vec<(usize, DbValue)>,
}

impl InMemorySession {
    /// Record the command and pop its response.
    fn next_response(&mut self, command: &NativeCommand) -> DbResult<Option<MemoryResponse>> {
        self.outputs.clear();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.commands.push(command.clone());
        match state.responses.pop_front() {
            Some(Scripted {
                response: MemoryResponse::Error(message),
                ..
            }) => Err(DbError::driver(self.provider, message)),
            Some(Scripted { response, outputs }) => {
                self.outputs = command.outputs.iter().copied().zip(outputs).collect();
                Ok(Some(response))
            }
            None => Ok(None),
        }
    }

    fn record_transaction(&self, event: TransactionEvent) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transactions
            .push(event);
    }
}

#[async_trait]
impl NativeSession for InMemorySession {
    async fn execute_reader(&mut self, command: &NativeCommand) -> DbResult<Vec<DataTable>> {
        Ok(match self.next_response(command)? {
            Some(MemoryResponse::Tables(tables)) => tables,
            _ => Vec::new(),
        })
    }

    async fn execute_non_query(&mut self, command: &NativeCommand) -> DbResult<u64> {
        Ok(match self.next_response(command)? {
            Some(MemoryResponse::Affected(n)) => n,
            Some(MemoryResponse::Tables(tables)) => {
                tables.iter().filter_map(|t| t.records_affected).sum()
            }
            _ => 0,
        })
    }

    async fn execute_scalar(&mut self, command: &NativeCommand) -> DbResult<Option<DbValue>> {
        Ok(match self.next_response(command)? {
            Some(MemoryResponse::Tables(tables)) => {
                tables.first().and_then(|t| t.first_value().cloned())
            }
            _ => None,
        })
    }

    async fn begin(&mut self, transaction_id: &str) -> DbResult<()> {
        self.record_transaction(TransactionEvent::Begin(transaction_id.to_string()));
        Ok(())
    }

    async fn commit(&mut self, transaction_id: &str) -> DbResult<()> {
        let fail = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_commit;
        if fail {
            return Err(DbError::driver_with_state(
                self.provider,
                Some("40001".to_string()),
                "commit rejected by in-memory driver",
            ));
        }
        self.record_transaction(TransactionEvent::Commit(transaction_id.to_string()));
        Ok(())
    }

    async fn rollback(&mut self, transaction_id: &str) -> DbResult<()> {
        self.record_transaction(TransactionEvent::Rollback(transaction_id.to_string()));
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closes += 1;
        Ok(())
    }

    fn take_output_values(&mut self) -> Vec<(usize, DbValue)> {
        std::mem::take(&mut self.outputs)
    }
}
