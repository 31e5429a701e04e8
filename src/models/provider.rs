//! Provider and command kind models.
//!
//! `ProviderKind` is the closed set of provider families the factory can dispatch to.
//! Raw selectors coming from configuration or FFI-style integer codes are resolved
//! through [`ProviderSelector`], which is where undefined values are rejected.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported provider families.
///
/// The discriminants are stable and match the integer codes accepted by
/// [`ProviderSelector`] for `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    SqlServer = 0,
    OleDb = 1,
    Odbc = 2,
    /// Recognized but not implemented
    Oracle = 3,
}

impl ProviderKind {
    /// All provider kinds, in discriminant order.
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::SqlServer,
        ProviderKind::OleDb,
        ProviderKind::Odbc,
        ProviderKind::Oracle,
    ];

    /// Get the display name for this provider.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::SqlServer => "SQL Server",
            Self::OleDb => "OLE DB",
            Self::Odbc => "ODBC",
            Self::Oracle => "Oracle",
        }
    }

    /// Whether the factory can build objects for this provider.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Oracle)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl TryFrom<i32> for ProviderKind {
    type Error = DbError;

    fn try_from(value: i32) -> DbResult<Self> {
        match value {
            0 => Ok(Self::SqlServer),
            1 => Ok(Self::OleDb),
            2 => Ok(Self::Odbc),
            3 => Ok(Self::Oracle),
            other => Err(DbError::undefined_provider(other)),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<i32>() {
            return Self::try_from(code);
        }

        let normalized: String = trimmed
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "sqlserver" | "mssql" => Ok(Self::SqlServer),
            "oledb" => Ok(Self::OleDb),
            "odbc" => Ok(Self::Odbc),
            "oracle" => Ok(Self::Oracle),
            _ => Err(DbError::undefined_provider(trimmed)),
        }
    }
}

/// Anything that can name a provider.
///
/// Factory operations accept a selector rather than a `ProviderKind` so that
/// raw values are validated at the single point where objects are created.
pub trait ProviderSelector {
    /// Resolve to a member of the provider enumeration.
    fn resolve(self) -> DbResult<ProviderKind>;
}

impl ProviderSelector for ProviderKind {
    fn resolve(self) -> DbResult<ProviderKind> {
        Ok(self)
    }
}

impl ProviderSelector for i32 {
    fn resolve(self) -> DbResult<ProviderKind> {
        ProviderKind::try_from(self)
    }
}

impl ProviderSelector for &str {
    fn resolve(self) -> DbResult<ProviderKind> {
        self.parse()
    }
}

impl ProviderSelector for &String {
    fn resolve(self) -> DbResult<ProviderKind> {
        self.parse()
    }
}

/// How command text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Plain SQL text
    #[default]
    Text,
    /// Command text is the name of a stored procedure
    StoredProcedure,
    /// Command text is a table name (OLE DB only)
    TableDirect,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::StoredProcedure => write!(f, "stored_procedure"),
            Self::TableDirect => write!(f, "table_direct"),
        }
    }
}
