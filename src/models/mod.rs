//! Data models for db-layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection_string;
pub mod parameter;
pub mod provider;
pub mod result;
pub mod value;

// Re-export commonly used types
pub use connection_string::ConnectionString;
pub use parameter::{Parameter, ParameterDirection};
pub use provider::{CommandKind, ProviderKind, ProviderSelector};
pub use result::{ColumnInfo, DataReader, DataRow, DataSet, DataTable};
pub use value::DbValue;
