//! Per-family command rendering and connection-string rules.
//!
//! | Family    | Names          | Placeholders | Stored procedure            | TableDirect          |
//! |-----------|----------------|--------------|-----------------------------|----------------------|
//! | SqlServer | `@` prefixed   | `@P1..@Pn`   | `EXEC name @a = @P1, ...`   | rejected             |
//! | OleDb     | as given       | `?`          | `{CALL name(?, ...)}`       | `SELECT * FROM name` |
//! | Odbc      | as given       | `?`          | `{CALL name(?, ...)}`       | rejected             |

use crate::error::{DbError, DbResult};
use crate::models::{
    CommandKind, ConnectionString, DbValue, Parameter, ParameterDirection, ProviderKind,
};

/// Rendered command text plus the positional values for its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedCommand {
    pub sql: String,
    pub values: Vec<DbValue>,
    /// Indexes of the parameters the database hands values back for, in the
    /// order the driver reports them
    pub outputs: Vec<usize>,
}

/// Check that a connection string carries what the family needs to locate a server.
pub fn validate_connection_string(
    provider: ProviderKind,
    connection_string: &ConnectionString,
) -> DbResult<()> {
    if connection_string.is_empty() {
        return Err(DbError::invalid_argument("the connection string is empty"));
    }
    let required: &[&str] = match provider {
        ProviderKind::SqlServer => &["Server", "Data Source", "Address", "Addr"],
        ProviderKind::OleDb => &["Provider"],
        ProviderKind::Odbc => &["Driver", "DSN", "FileDSN"],
        ProviderKind::Oracle => return Err(DbError::unsupported_provider(provider)),
    };
    if connection_string.get_any(required).is_none() {
        return Err(DbError::invalid_argument(format!(
            "{provider} connection strings need one of: {}",
            required.join(", ")
        )));
    }
    Ok(())
}

/// Normalize a parameter name for the family.
pub fn normalize_parameter_name(provider: ProviderKind, name: &str) -> String {
    let name = name.trim();
    match provider {
        ProviderKind::SqlServer if !name.is_empty() && !name.starts_with('@') => {
            format!("@{name}")
        }
        _ => name.to_string(),
    }
}

/// Render command text and collect placeholder values.
pub fn render(
    provider: ProviderKind,
    kind: CommandKind,
    text: &str,
    parameters: &[Parameter],
) -> DbResult<RenderedCommand> {
    let text = text.trim();
    if text.is_empty() {
        return Err(DbError::invalid_argument("the command text is empty"));
    }
    match provider {
        ProviderKind::SqlServer => render_sql_server(kind, text, parameters),
        ProviderKind::OleDb | ProviderKind::Odbc => {
            render_positional(provider, kind, text, parameters)
        }
        ProviderKind::Oracle => Err(DbError::unsupported_provider(provider)),
    }
}

fn label(parameter: &Parameter, index: usize) -> String {
    if parameter.name().is_empty() {
        format!("#{}", index + 1)
    } else {
        parameter.name().to_string()
    }
}

/// Value of an input parameter; unset inputs are a caller error.
fn input_value(parameter: &Parameter, index: usize) -> DbResult<DbValue> {
    parameter.value().cloned().ok_or_else(|| {
        DbError::invalid_argument(format!(
            "parameter '{}' was not supplied",
            label(parameter, index)
        ))
    })
}

/// T-SQL type used to declare a parameter variable.
fn sql_server_type(value: Option<&DbValue>) -> &'static str {
    match value {
        Some(DbValue::Bool(_)) => "bit",
        Some(DbValue::Int(_)) => "bigint",
        Some(DbValue::Float(_)) => "float",
        Some(DbValue::String(_)) => "nvarchar(max)",
        Some(DbValue::Bytes(_)) => "varbinary(max)",
        Some(DbValue::Null) | None => "sql_variant",
    }
}

fn render_sql_server(
    kind: CommandKind,
    text: &str,
    parameters: &[Parameter],
) -> DbResult<RenderedCommand> {
    let mut declarations = Vec::new();
    let mut values = Vec::new();
    let mut arguments = Vec::new();
    let mut outputs = Vec::new();
    let mut return_target = None;

    for (index, parameter) in parameters.iter().enumerate() {
        let name = normalize_parameter_name(ProviderKind::SqlServer, parameter.name());
        if name.is_empty() {
            return Err(DbError::invalid_argument(format!(
                "SQL Server parameter {} has no name",
                label(parameter, index)
            )));
        }
        let sql_type = sql_server_type(parameter.value());

        match parameter.direction() {
            ParameterDirection::Input => {
                values.push(input_value(parameter, index)?);
                let placeholder = format!("@P{}", values.len());
                match kind {
                    CommandKind::StoredProcedure => {
                        arguments.push(format!("{name} = {placeholder}"));
                    }
                    _ => declarations.push(format!("DECLARE {name} {sql_type} = {placeholder};")),
                }
            }
            ParameterDirection::InputOutput => {
                values.push(input_value(parameter, index)?);
                declarations.push(format!("DECLARE {name} {sql_type} = @P{};", values.len()));
                arguments.push(format!("{name} = {name} OUTPUT"));
                outputs.push((index, name));
            }
            ParameterDirection::Output => {
                declarations.push(format!("DECLARE {name} {sql_type};"));
                arguments.push(format!("{name} = {name} OUTPUT"));
                outputs.push((index, name));
            }
            ParameterDirection::ReturnValue => {
                check_return_value(kind, return_target.is_some(), parameter, index)?;
                declarations.push(format!("DECLARE {name} int;"));
                return_target = Some(name.clone());
                outputs.push((index, name));
            }
        }
    }

    let body = match kind {
        CommandKind::Text => text.to_string(),
        CommandKind::StoredProcedure => {
            let mut call = String::from("EXEC ");
            if let Some(target) = &return_target {
                call.push_str(target);
                call.push_str(" = ");
            }
            call.push_str(text);
            if !arguments.is_empty() {
                call.push(' ');
                call.push_str(&arguments.join(", "));
            }
            call
        }
        CommandKind::TableDirect => {
            return Err(DbError::invalid_argument(
                "SQL Server does not support table-direct commands",
            ));
        }
    };

    let mut sql = if declarations.is_empty() {
        body
    } else {
        format!("{} {body}", declarations.join(" "))
    };
    // Read the variables back with the row count of the last statement
    // before them. A new line keeps a trailing comment in the text closed.
    if !outputs.is_empty() {
        let columns: Vec<String> = outputs
            .iter()
            .map(|(_, name)| format!("{name} AS [{name}]"))
            .collect();
        sql.push_str(&format!(
            "\nSELECT @@ROWCOUNT AS [@@ROWCOUNT], {}",
            columns.join(", ")
        ));
    }
    Ok(RenderedCommand {
        sql,
        values,
        outputs: outputs.into_iter().map(|(index, _)| index).collect(),
    })
}

/// Return values only exist for stored-procedure calls, one per call.
fn check_return_value(
    kind: CommandKind,
    seen: bool,
    parameter: &Parameter,
    index: usize,
) -> DbResult<()> {
    if kind != CommandKind::StoredProcedure {
        return Err(DbError::invalid_argument(format!(
            "return-value parameter '{}' needs a stored-procedure command, not {kind}",
            label(parameter, index)
        )));
    }
    if seen {
        return Err(DbError::invalid_argument(format!(
            "parameter '{}' is a second return-value parameter",
            label(parameter, index)
        )));
    }
    Ok(())
}

fn render_positional(
    provider: ProviderKind,
    kind: CommandKind,
    text: &str,
    parameters: &[Parameter],
) -> DbResult<RenderedCommand> {
    let mut values = Vec::new();
    let mut outputs = Vec::new();
    let mut return_index = None;
    let mut placeholders = 0usize;

    for (index, parameter) in parameters.iter().enumerate() {
        match parameter.direction() {
            ParameterDirection::Input => {
                values.push(input_value(parameter, index)?);
                placeholders += 1;
            }
            ParameterDirection::InputOutput => {
                values.push(input_value(parameter, index)?);
                placeholders += 1;
                outputs.push(index);
            }
            ParameterDirection::Output => {
                values.push(DbValue::Null);
                placeholders += 1;
                outputs.push(index);
            }
            ParameterDirection::ReturnValue => {
                check_return_value(kind, return_index.is_some(), parameter, index)?;
                return_index = Some(index);
            }
        }
    }
    let has_return = return_index.is_some();
    if let Some(index) = return_index {
        // Bound to the leading `? =` slot
        values.insert(0, DbValue::Null);
        outputs.insert(0, index);
    }

    let sql = match kind {
        CommandKind::Text => text.to_string(),
        CommandKind::StoredProcedure => {
            let prefix = if has_return { "? = " } else { "" };
            if placeholders == 0 {
                format!("{{{prefix}CALL {text}}}")
            } else {
                let marks = vec!["?"; placeholders].join(", ");
                format!("{{{prefix}CALL {text}({marks})}}")
            }
        }
        CommandKind::TableDirect => match provider {
            ProviderKind::OleDb => {
                if !parameters.is_empty() {
                    return Err(DbError::invalid_argument(
                        "table-direct commands take no parameters",
                    ));
                }
                format!("SELECT * FROM {text}")
            }
            _ => {
                return Err(DbError::invalid_argument(format!(
                    "{provider} does not support table-direct commands"
                )));
            }
        },
    };
    Ok(RenderedCommand {
        sql,
        values,
        outputs,
    })
}
