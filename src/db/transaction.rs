//! Transaction handles.

use crate::db::Connection;
use crate::error::{DbError, DbResult};
use crate::models::ProviderKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// What `DbManager::begin_transaction` does when a transaction is already active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Return the active transaction
    #[default]
    ReuseExisting,
    /// Fail with a transaction error
    RequireNew,
}

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    /// Check if the transaction is still active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the transaction has ended (committed or rolled back).
    pub fn is_ended(&self) -> bool {
        !self.is_active()
    }
}

/// A local transaction on one connection.
///
/// The handle does not own the connection; commit and rollback take it
/// explicitly and fail if it is not the connection the transaction was begun on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    id: String,
    provider: ProviderKind,
    started_at: DateTime<Utc>,
    state: TransactionState,
}

impl Transaction {
    pub(crate) fn new(id: String, provider: ProviderKind) -> Self {
        Self {
            id,
            provider,
            started_at: Utc::now(),
            state: TransactionState::Active,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    fn ensure_active(&self) -> DbResult<()> {
        if !self.is_active() {
            return Err(DbError::transaction(
                format!("transaction already {}", state_label(self.state)),
                &self.id,
            ));
        }
        Ok(())
    }

    /// Commit on the connection the transaction was begun on.
    pub async fn commit(&mut self, connection: &mut Connection) -> DbResult<()> {
        self.ensure_active()?;
        connection.commit_transaction(&self.id).await?;
        self.state = TransactionState::Committed;
        info!(
            transaction_id = %self.id,
            provider = %self.provider,
            duration_ms = (Utc::now() - self.started_at).num_milliseconds(),
            "Transaction committed"
        );
        Ok(())
    }

    /// Roll back on the connection the transaction was begun on.
    pub async fn rollback(&mut self, connection: &mut Connection) -> DbResult<()> {
        self.ensure_active()?;
        connection.rollback_transaction(&self.id).await?;
        self.state = TransactionState::RolledBack;
        info!(
            transaction_id = %self.id,
            provider = %self.provider,
            "Transaction rolled back"
        );
        Ok(())
    }
}

fn state_label(state: TransactionState) -> &'static str {
    match state {
        TransactionState::Active => "active",
        TransactionState::Committed => "committed",
        TransactionState::RolledBack => "rolled back",
    }
}

/// Generate a unique transaction ID.
pub fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
