//! db-layer library
//!
//! A provider-dispatching data access layer. Callers pick a provider family
//! (SQL Server, OLE DB or ODBC) at runtime and get connections, commands,
//! data adapters and parameters of that family from [`ProviderFactory`], or
//! drive a whole connection lifecycle through [`DbManager`].

pub mod config;
pub mod db;
pub mod drivers;
pub mod error;
pub mod format;
pub mod models;

pub use config::{Config, ConnectionOptions};
pub use db::{
    Command, Connection, ConnectionManager, DataAdapter, DbManager, ProviderFactory, Transaction,
    TransactionMode,
};
pub use error::{DbError, DbResult};
pub use models::{
    CommandKind, DataReader, DataSet, DataTable, DbValue, Parameter, ParameterDirection,
    ProviderKind,
};
