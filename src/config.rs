//! Configuration handling for db-layer.
//!
//! Library callers configure timeouts through [`ConnectionOptions`]. The
//! `db-layer` binary is configured via CLI arguments and environment variables.

use crate::models::{CommandKind, DbValue, ParameterDirection, ProviderKind};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Timeouts handed to native drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Time allowed for establishing the native session
    pub connect_timeout: Duration,
    /// Default per-command timeout; a command may override it
    pub command_timeout: Duration,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }
}

/// Which execute operation the CLI runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ExecuteMode {
    /// Stream rows through a data reader
    #[default]
    Reader,
    /// Report the affected row count
    NonQuery,
    /// First column of the first row
    Scalar,
    /// Fill a data set with every result table
    Tabular,
}

impl std::fmt::Display for ExecuteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reader => write!(f, "reader"),
            Self::NonQuery => write!(f, "non-query"),
            Self::Scalar => write!(f, "scalar"),
            Self::Tabular => write!(f, "tabular"),
        }
    }
}

/// CLI spelling of [`CommandKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CommandType {
    #[default]
    Text,
    StoredProcedure,
    TableDirect,
}

impl From<CommandType> for CommandKind {
    fn from(value: CommandType) -> Self {
        match value {
            CommandType::Text => CommandKind::Text,
            CommandType::StoredProcedure => CommandKind::StoredProcedure,
            CommandType::TableDirect => CommandKind::TableDirect,
        }
    }
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Markdown,
}

/// A `--param` argument.
///
/// # Format
///
/// ```text
/// NAME=VALUE            input parameter
/// NAME:out              output parameter
/// NAME:inout            input-output parameter with no value
/// NAME:inout=VALUE      input-output parameter
/// NAME:return           return value
/// =VALUE                unnamed positional input (ODBC / OLE DB)
/// ```
///
/// Values are inferred: `null`, `true`/`false`, integers, floats, else strings.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub direction: ParameterDirection,
    pub value: Option<DbValue>,
}

impl FromStr for ParamSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, value) = match s.split_once('=') {
            Some((head, value)) => (head, Some(DbValue::infer(value))),
            None => (s, None),
        };

        let (name, direction) = match head.rsplit_once(':') {
            Some((name, suffix)) => {
                let direction = match suffix.to_ascii_lowercase().as_str() {
                    "in" => ParameterDirection::Input,
                    "out" => ParameterDirection::Output,
                    "inout" => ParameterDirection::InputOutput,
                    "return" => ParameterDirection::ReturnValue,
                    other => return Err(format!("unknown parameter direction '{other}'")),
                };
                (name, direction)
            }
            None => (head, ParameterDirection::Input),
        };

        match (direction, &value) {
            (ParameterDirection::Input, None) => {
                return Err(format!("expected NAME=VALUE, got '{s}'"));
            }
            (ParameterDirection::Output | ParameterDirection::ReturnValue, Some(_)) => {
                return Err(format!("'{name}' is an output parameter and cannot take a value"));
            }
            _ => {}
        }

        Ok(Self {
            name: name.trim().to_string(),
            direction,
            value,
        })
    }
}

/// Configuration for the db-layer CLI.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-layer",
    about = "Run a command against SQL Server, OLE DB or ODBC through one provider-dispatching facade",
    version,
    author
)]
pub struct Config {
    /// Provider family: sqlserver, oledb, odbc, oracle (or 0-3)
    #[arg(short = 'P', long, env = "DB_LAYER_PROVIDER")]
    pub provider: ProviderKind,

    /// Connection string, passed to the native driver verbatim
    #[arg(
        short = 'c',
        long,
        value_name = "CONNECTION_STRING",
        env = "DB_LAYER_CONNECTION_STRING",
        hide_env_values = true
    )]
    pub connection_string: String,

    /// Execute operation
    #[arg(short, long, value_enum, default_value_t = ExecuteMode::Reader, env = "DB_LAYER_MODE")]
    pub mode: ExecuteMode,

    /// How the command text is interpreted
    #[arg(long, value_enum, default_value_t = CommandType::Text)]
    pub command_type: CommandType,

    /// Command parameter; can be specified multiple times
    #[arg(short = 'p', long = "param", value_name = "PARAM")]
    pub params: Vec<ParamSpec>,

    /// Run the command inside a transaction and commit on success
    #[arg(long)]
    pub transaction: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, env = "DB_LAYER_FORMAT")]
    pub format: OutputFormat,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "DB_LAYER_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Command timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS,
        env = "DB_LAYER_COMMAND_TIMEOUT"
    )]
    pub command_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "DB_LAYER_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_LAYER_JSON_LOGS")]
    pub json_logs: bool,

    /// SQL text, stored procedure name or table name
    #[arg(value_name = "COMMAND_TEXT")]
    pub command_text: String,
}

impl Config {
    /// Timeouts for the native driver.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions::new()
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_command_timeout(Duration::from_secs(self.command_timeout))
    }

    pub fn command_kind(&self) -> CommandKind {
        self.command_type.into()
    }
}
