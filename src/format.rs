//! Output formatting for the CLI.
//!
//! Renders data tables, scalars and affected-row counts as an ASCII table
//! (like the MySQL CLI), markdown or JSON.

use crate::config::OutputFormat;
use crate::models::{DataTable, DbValue};
use serde_json::{Value as JsonValue, json};
use unicode_width::UnicodeWidthStr;

fn plural(count: usize) -> &'static str {
    if count == 1 { "row" } else { "rows" }
}

fn is_numeric(value: &DbValue) -> bool {
    matches!(value, DbValue::Int(_) | DbValue::Float(_))
}

pub fn format_as_table(table: &DataTable, execution_time_ms: u64) -> String {
    if table.columns.is_empty() {
        return "Empty set".to_string();
    }

    let mut widths: Vec<usize> = table.columns.iter().map(|c| c.name.width()).collect();
    for row in &table.rows {
        for (i, value) in row.values.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(value.to_string().width());
        }
    }

    let mut output = String::new();
    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    output.push_str(&separator);
    let header: String = table
        .columns
        .iter()
        .zip(&widths)
        .map(|(col, w)| format!("| {} ", pad_center(&col.name, *w)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);
    output.push_str(&separator);

    for row in &table.rows {
        let row_str: String = widths
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let value = row.get(i).unwrap_or(&DbValue::Null);
                let formatted = value.to_string();
                if is_numeric(value) {
                    format!("| {} ", pad_left(&formatted, *w))
                } else {
                    format!("| {} ", pad_right(&formatted, *w))
                }
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    output.push_str(&separator);
    output.push_str(&format!(
        "{} {} in set ({:.2} sec)\n",
        table.row_count(),
        plural(table.row_count()),
        execution_time_ms as f64 / 1000.0
    ));

    output
}

pub fn format_as_markdown(table: &DataTable) -> String {
    if table.columns.is_empty() {
        return "*Empty set*".to_string();
    }

    let mut output = String::new();

    let header: String = table
        .columns
        .iter()
        .map(|c| format!("| {} ", escape_markdown(&c.name)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);

    let sep: String = table.columns.iter().map(|_| "|---").collect::<String>() + "|\n";
    output.push_str(&sep);

    for row in &table.rows {
        let row_str: String = (0..table.columns.len())
            .map(|i| {
                let value = row.get(i).unwrap_or(&DbValue::Null);
                format!("| {} ", escape_markdown(&value.to_string()))
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    output.push_str(&format!("\n*{} {}*\n", table.row_count(), plural(table.row_count())));

    output
}

/// JSON document for a list of result tables.
pub fn tables_to_json(tables: &[DataTable]) -> JsonValue {
    let tables: Vec<JsonValue> = tables
        .iter()
        .map(|t| {
            let mut obj = json!({
                "columns": t.columns,
                "rows": t.to_json_rows(),
                "row_count": t.row_count(),
            });
            if !t.name.is_empty() {
                obj["name"] = JsonValue::String(t.name.clone());
            }
            if let Some(affected) = t.records_affected {
                obj["records_affected"] = json!(affected);
            }
            obj
        })
        .collect();
    json!({ "tables": tables })
}

/// Render every result table, separated by blank lines.
pub fn render_tables(tables: &[DataTable], format: OutputFormat, execution_time_ms: u64) -> String {
    match format {
        OutputFormat::Json => pretty(&tables_to_json(tables)),
        OutputFormat::Table if tables.is_empty() => "Empty set\n".to_string(),
        OutputFormat::Markdown if tables.is_empty() => "*Empty set*\n".to_string(),
        OutputFormat::Table => tables
            .iter()
            .map(|t| format_as_table(t, execution_time_ms))
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Markdown => tables
            .iter()
            .map(format_as_markdown)
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Render a scalar result. `None` means the command returned no rows.
pub fn render_scalar(value: Option<&DbValue>, format: OutputFormat) -> String {
    match (format, value) {
        (OutputFormat::Json, Some(v)) => pretty(&json!({ "value": v.to_json() })),
        (OutputFormat::Json, None) => pretty(&json!({ "value": JsonValue::Null, "row_count": 0 })),
        (_, Some(v)) => format!("{v}\n"),
        (_, None) => "(no rows)\n".to_string(),
    }
}

/// Render an affected-row count.
pub fn render_affected(rows_affected: u64, format: OutputFormat, execution_time_ms: u64) -> String {
    match format {
        OutputFormat::Json => pretty(&json!({
            "rows_affected": rows_affected,
            "execution_time_ms": execution_time_ms,
        })),
        OutputFormat::Table => format!(
            "Query OK, {} {} affected ({:.2} sec)\n",
            rows_affected,
            plural(rows_affected as usize),
            execution_time_ms as f64 / 1000.0
        ),
        OutputFormat::Markdown => {
            format!("*{} {} affected*\n", rows_affected, plural(rows_affected as usize))
        }
    }
}

fn pretty(value: &JsonValue) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default() + "\n"
}

fn escape_markdown(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

// `format!` pads by char count, which misaligns wide glyphs.
fn pad_right(s: &str, width: usize) -> String {
    format!("{s}{}", " ".repeat(width.saturating_sub(s.width())))
}

fn pad_left(s: &str, width: usize) -> String {
    format!("{}{s}", " ".repeat(width.saturating_sub(s.width())))
}

fn pad_center(s: &str, width: usize) -> String {
    let pad = width.saturating_sub(s.width());
    let left = pad / 2;
    format!("{}{s}{}", " ".repeat(left), " ".repeat(pad - left))
}
