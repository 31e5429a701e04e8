//! Database access layer.
//!
//! This module provides the provider-neutral object family:
//! - Connections, commands, data adapters and transactions per provider
//! - The provider factory that creates them
//! - Dialect rendering for each provider's placeholder convention
//! - `DbManager`, the single-connection facade

pub mod command;
pub mod connection;
pub mod dialect;
pub mod factory;
pub mod manager;
pub mod transaction;

pub use command::{Command, DataAdapter};
pub use connection::{Connection, ConnectionState};
pub use factory::ProviderFactory;
pub use manager::DbManager;
pub use transaction::{Transaction, TransactionMode, TransactionState, generate_transaction_id};

/// Alias for [`DbManager`].
pub type ConnectionManager = DbManager;
