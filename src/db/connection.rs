//! Family-tagged connections.

use crate::config::ConnectionOptions;
use crate::db::dialect;
use crate::db::transaction::{Transaction, generate_transaction_id};
use crate::drivers::{self, NativeDriver, NativeSession};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionString, ProviderKind};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Closed,
    Open,
}

/// A connection of one provider family.
///
/// Created unopened by `ProviderFactory::create_connection`. While open it owns
/// a native session; dropping the connection releases that session.
pub struct Connection {
    provider: ProviderKind,
    connection_string: String,
    options: ConnectionOptions,
    driver: Option<Arc<dyn NativeDriver>>,
    session: Option<Box<dyn NativeSession>>,
    transaction_id: Option<String>,
}

impl Connection {
    pub(crate) fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            connection_string: String::new(),
            options: ConnectionOptions::default(),
            driver: None,
            session: None,
            transaction_id: None,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// The connection string as supplied. Never log this; use [`Self::masked_connection_string`].
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Set the connection string; takes effect on the next `open`.
    pub fn set_connection_string(&mut self, connection_string: impl Into<String>) {
        self.connection_string = connection_string.into();
    }

    /// Get a display-safe version of the connection string (credentials masked).
    pub fn masked_connection_string(&self) -> String {
        ConnectionString::parse(&self.connection_string)
            .map(|cs| cs.masked())
            .unwrap_or_else(|_| "<unparseable>".to_string())
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: ConnectionOptions) {
        self.options = options;
    }

    /// Use this driver instead of looking one up in the registry.
    pub fn set_driver(&mut self, driver: Arc<dyn NativeDriver>) {
        self.driver = Some(driver);
    }

    pub fn state(&self) -> ConnectionState {
        if self.session.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// ID of the transaction currently pending on this connection.
    pub fn active_transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    /// Open the connection. Opening an open connection is a no-op.
    pub async fn open(&mut self) -> DbResult<()> {
        if self.is_open() {
            return Ok(());
        }

        let connection_string = ConnectionString::parse(&self.connection_string)?;
        dialect::validate_connection_string(self.provider, &connection_string)?;

        let driver = match &self.driver {
            Some(driver) => driver.clone(),
            None => drivers::resolve(self.provider, &connection_string)?,
        };

        info!(
            provider = %self.provider,
            driver = driver.name(),
            connection = %connection_string.masked(),
            "Opening connection"
        );

        let session = driver
            .connect(self.provider, &connection_string, &self.options)
            .await?;
        self.session = Some(session);
        Ok(())
    }

    /// Close the connection. Closing a closed connection is a no-op.
    ///
    /// A pending transaction is abandoned; the server rolls it back when the
    /// session ends.
    pub async fn close(&mut self) -> DbResult<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        if let Some(id) = self.transaction_id.take() {
            warn!(
                transaction_id = %id,
                provider = %self.provider,
                "Closing connection with a pending transaction"
            );
        }
        session.close().await?;
        info!(provider = %self.provider, "Connection closed");
        Ok(())
    }

    /// Begin a local transaction.
    pub async fn begin_transaction(&mut self) -> DbResult<Transaction> {
        if let Some(id) = &self.transaction_id {
            return Err(DbError::transaction(
                "the connection already has a pending transaction",
                id,
            ));
        }
        let session = self.session_mut()?;
        let id = generate_transaction_id();
        session.begin(&id).await?;
        info!(transaction_id = %id, provider = %self.provider, "Transaction started");
        self.transaction_id = Some(id.clone());
        Ok(Transaction::new(id, self.provider))
    }

    fn ensure_pending(&self, transaction_id: &str) -> DbResult<()> {
        if self.transaction_id.as_deref() != Some(transaction_id) {
            return Err(DbError::transaction(
                "the transaction is not pending on this connection",
                transaction_id,
            ));
        }
        Ok(())
    }

    pub(crate) async fn commit_transaction(&mut self, transaction_id: &str) -> DbResult<()> {
        self.ensure_pending(transaction_id)?;
        self.session_mut()?.commit(transaction_id).await?;
        self.transaction_id = None;
        Ok(())
    }

    pub(crate) async fn rollback_transaction(&mut self, transaction_id: &str) -> DbResult<()> {
        self.ensure_pending(transaction_id)?;
        self.session_mut()?.rollback(transaction_id).await?;
        self.transaction_id = None;
        Ok(())
    }

    pub(crate) fn session_mut(&mut self) -> DbResult<&mut (dyn NativeSession + 'static)> {
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(DbError::invalid_operation("the connection is not open")),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("provider", &self.provider)
            .field("connection_string", &self.masked_connection_string())
            .field("options", &self.options)
            .field("driver", &self.driver.as_ref().map(|d| d.name()))
            .field("state", &self.state())
            .field("transaction_id", &self.transaction_id)
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.session.is_some() {
            debug!(
                provider = %self.provider,
                "Connection dropped while open; releasing native session"
            );
        }
    }
}
